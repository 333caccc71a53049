use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use url::Url;

/// Directory name used under the platform data directory.
pub const APP_SUPPORT_DIRECTORY_NAME: &str = "Komet";

/// Convert a `file://` URL or a plain path string into a filesystem path.
///
/// The native frontend hands over `NSURL`s, the CLI hands over paths; both
/// end up here.
pub fn target_path_from_arg(arg: &str) -> PathBuf {
    if let Ok(parsed) = Url::parse(arg) {
        if parsed.scheme() == "file" {
            if let Ok(path) = parsed.to_file_path() {
                return path;
            }
        }
    }
    PathBuf::from(arg)
}

/// Make `path` absolute without requiring it to exist.
///
/// The nearest existing ancestor directory is canonicalized and the rest of
/// the path joined back on, so symlinked spellings of a directory resolve to
/// one key whether or not the file itself still exists. The final component
/// is never resolved.
pub fn absolute_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => return path.to_path_buf(),
        }
    };

    let mut rest: Vec<OsString> = Vec::new();
    let mut current = absolute.as_path();
    loop {
        let (Some(name), Some(parent)) = (current.file_name(), current.parent()) else {
            // Root, or a `..` we cannot strip without resolving it.
            return std::fs::canonicalize(&absolute).unwrap_or_else(|_| absolute.clone());
        };
        rest.push(name.to_os_string());
        if let Ok(canonical) = std::fs::canonicalize(parent) {
            return rest.iter().rev().fold(canonical, |acc, part| acc.join(part));
        }
        current = parent;
    }
}

/// Name of the project being committed to: the last component of `dir`.
pub fn project_name(dir: &Path) -> Option<String> {
    dir.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .filter(|name| !name.is_empty())
}

/// Write `contents` to `path` so readers see either the old file or the
/// complete new one, never a prefix.
///
/// Writes into a temporary file in the destination directory, syncs it, then
/// renames it over `path`. The temporary file is removed on every error path.
pub fn write_atomically(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
