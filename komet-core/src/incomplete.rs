//! The last abandoned commit message of each project.
//!
//! When the user cancels a commit that started out empty, whatever they typed
//! is kept under `<data dir>/Komet/Incomplete/<project>` and offered again the
//! next time a commit is started in that project within the resume timeout.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::preferences::ResumePolicy;
use crate::util::{write_atomically, APP_SUPPORT_DIRECTORY_NAME};

const INCOMPLETE_DIRECTORY_NAME: &str = "Incomplete";

pub struct IncompleteCommitStore {
    root: PathBuf,
}

impl IncompleteCommitStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn default_root() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| {
            dir.join(APP_SUPPORT_DIRECTORY_NAME)
                .join(INCOMPLETE_DIRECTORY_NAME)
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, project: &str) -> PathBuf {
        let file_name: String = project
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' | '\0' => '-',
                _ => c,
            })
            .collect();
        let file_name = match file_name.as_str() {
            "" | "." | ".." => "_".to_string(),
            _ => file_name,
        };
        self.root.join(file_name)
    }

    /// Keep `message` for `project`. Returns `false` if there was nothing
    /// worth keeping once surrounding newlines were trimmed.
    pub fn save(&self, project: &str, message: &str) -> Result<bool, String> {
        let trimmed = message.trim_matches(|c: char| c == '\n' || c == '\r');
        if trimmed.is_empty() {
            return Ok(false);
        }
        let path = self.path_for(project);
        write_atomically(&path, trimmed.as_bytes())
            .map_err(|e| format!("Failed to save incomplete commit to {:?}: {}", path, e))?;
        log::debug!("Saved incomplete commit message for {}", project);
        Ok(true)
    }

    /// The kept message for `project`, if resuming is enabled and it is recent
    /// enough. The file is removed whenever it is looked at.
    pub fn take(&self, project: &str, policy: ResumePolicy) -> Option<String> {
        self.take_at(project, policy, SystemTime::now())
    }

    pub fn take_at(&self, project: &str, policy: ResumePolicy, now: SystemTime) -> Option<String> {
        if !policy.enabled {
            return None;
        }
        let path = self.path_for(project);
        let metadata = std::fs::metadata(&path).ok()?;

        let message = Self::read_if_fresh(&path, &metadata, policy, now);
        if let Err(e) = std::fs::remove_file(&path) {
            log::warn!("Failed to remove incomplete commit {:?}: {}", path, e);
        }
        message
    }

    fn read_if_fresh(
        path: &Path,
        metadata: &std::fs::Metadata,
        policy: ResumePolicy,
        now: SystemTime,
    ) -> Option<String> {
        let modified = match metadata.modified() {
            Ok(modified) => modified,
            Err(e) => {
                log::warn!("Cannot read modification date of {:?}: {}", path, e);
                return None;
            }
        };
        let age = now.duration_since(modified).ok()?;
        if !policy.admits(age) {
            log::debug!("Incomplete commit {:?} is too old ({:?})", path, age);
            return None;
        }
        match std::fs::read_to_string(path) {
            Ok(message) => Some(message),
            Err(e) => {
                log::warn!("Failed to load incomplete commit {:?}: {}", path, e);
                None
            }
        }
    }
}
