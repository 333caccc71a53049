//! Durable storage of session breadcrumbs, keyed by the target file path.
//!
//! Each target maps to `<root>/<sha256 of the absolute target path>.json`.
//! The file is a small JSON envelope around the record:
//!
//! ```json
//! {"format":1,"target":"/repo/.git/COMMIT_EDITMSG","saved_at_ms":1700000000000,
//!  "checksum":3735928559,"record":{"exit_status":0, ...}}
//! ```
//!
//! `checksum` is the CRC-32 of the exact `record` bytes, so a torn or
//! bit-flipped file fails to load instead of yielding garbage ranges. Unknown
//! fields are ignored so files from newer builds still load.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use sha2::{Digest, Sha256};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::breadcrumbs::Breadcrumbs;
use crate::error::BreadcrumbsError;
use crate::preferences::{Preferences, ResumePolicy};
use crate::util::{absolute_path, write_atomically, APP_SUPPORT_DIRECTORY_NAME};

/// Highest envelope format this build understands.
pub const BREADCRUMBS_FORMAT: u32 = 1;

const BREADCRUMBS_DIRECTORY_NAME: &str = "Breadcrumbs";

/// Directory entries examined by one sweep.
const SWEEP_LIMIT: usize = 256;

#[derive(Serialize)]
struct EnvelopeOut<'a> {
    format: u32,
    target: &'a str,
    saved_at_ms: u64,
    checksum: u32,
    record: &'a RawValue,
}

#[derive(Deserialize)]
struct EnvelopeIn {
    format: u32,
    target: String,
    saved_at_ms: u64,
    checksum: u32,
    record: Box<RawValue>,
}

/// A breadcrumbs record bound to its target file and storage location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreadcrumbsFile {
    target: PathBuf,
    location: PathBuf,
    record: Breadcrumbs,
}

impl BreadcrumbsFile {
    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    #[must_use]
    pub fn location(&self) -> &Path {
        &self.location
    }

    #[must_use]
    pub fn record(&self) -> &Breadcrumbs {
        &self.record
    }

    #[must_use]
    pub fn into_record(self) -> Breadcrumbs {
        self.record
    }
}

impl Deref for BreadcrumbsFile {
    type Target = Breadcrumbs;

    fn deref(&self) -> &Breadcrumbs {
        &self.record
    }
}

impl DerefMut for BreadcrumbsFile {
    fn deref_mut(&mut self) -> &mut Breadcrumbs {
        &mut self.record
    }
}

pub struct BreadcrumbStore {
    root: PathBuf,
    policy: ResumePolicy,
    write_lock: Mutex<()>,
}

impl BreadcrumbStore {
    pub fn new(root: impl Into<PathBuf>, policy: ResumePolicy) -> Self {
        Self {
            root: root.into(),
            policy,
            write_lock: Mutex::new(()),
        }
    }

    /// Store rooted at `<data dir>/Komet/Breadcrumbs`
    /// (`~/Library/Application Support/Komet/Breadcrumbs` on macOS).
    pub fn default_root() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| {
            dir.join(APP_SUPPORT_DIRECTORY_NAME)
                .join(BREADCRUMBS_DIRECTORY_NAME)
        })
    }

    /// Store configured from user preferences, honouring `breadcrumbs_dir`.
    pub fn from_preferences(preferences: &Preferences) -> Option<Self> {
        let root = match &preferences.breadcrumbs_dir {
            Some(dir) => dir.clone(),
            None => Self::default_root()?,
        };
        Some(Self::new(root, preferences.resume_policy()))
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn policy(&self) -> ResumePolicy {
        self.policy
    }

    /// Storage location for `target`'s breadcrumbs.
    pub fn path_for(&self, target: &Path) -> PathBuf {
        let target = absolute_path(target);
        self.root.join(format!("{}.json", target_digest(&target)))
    }

    /// Fresh, empty breadcrumbs for `target`.
    pub fn create(&self, target: &Path) -> BreadcrumbsFile {
        let target = absolute_path(target);
        let location = self.root.join(format!("{}.json", target_digest(&target)));
        BreadcrumbsFile {
            target,
            location,
            record: Breadcrumbs::default(),
        }
    }

    /// Previously saved breadcrumbs for `target`, if they can still be resumed.
    ///
    /// Never fails: missing, malformed and stale records all come back as
    /// `None`. Malformed and stale files are removed.
    pub fn load(&self, target: &Path) -> Option<BreadcrumbsFile> {
        self.load_at(target, SystemTime::now())
    }

    pub fn load_at(&self, target: &Path, now: SystemTime) -> Option<BreadcrumbsFile> {
        match self.try_load_at(target, now) {
            Ok(file) => {
                log::info!("Resuming breadcrumbs for {:?}", file.target);
                Some(file)
            }
            Err(e) if e.is_absent() => {
                log::debug!("No breadcrumbs to resume: {}", e);
                None
            }
            Err(e @ BreadcrumbsError::Io { .. }) => {
                log::warn!("Failed to read breadcrumbs: {}", e);
                None
            }
            Err(e) => {
                log::warn!("Discarding breadcrumbs: {}", e);
                let location = self.path_for(target);
                if let Err(remove_err) = std::fs::remove_file(&location) {
                    if remove_err.kind() != std::io::ErrorKind::NotFound {
                        log::warn!("Failed to remove {:?}: {}", location, remove_err);
                    }
                }
                None
            }
        }
    }

    /// Like [`load`](Self::load) but reports why nothing was loaded.
    pub fn try_load(&self, target: &Path) -> Result<BreadcrumbsFile, BreadcrumbsError> {
        self.try_load_at(target, SystemTime::now())
    }

    pub fn try_load_at(
        &self,
        target: &Path,
        now: SystemTime,
    ) -> Result<BreadcrumbsFile, BreadcrumbsError> {
        if !self.policy.enabled {
            return Err(BreadcrumbsError::ResumeDisabled);
        }

        let mut file = self.create(target);
        if !file.target.exists() {
            return Err(BreadcrumbsError::NotFound { path: file.target });
        }

        let location = file.location.clone();
        let data = match std::fs::read(&location) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BreadcrumbsError::NotFound { path: location });
            }
            Err(e) => return Err(BreadcrumbsError::io("reading breadcrumbs", location, e)),
        };

        let envelope = parse_envelope(&data, &location)?;

        if envelope.format > BREADCRUMBS_FORMAT {
            return Err(BreadcrumbsError::malformed(
                &location,
                format!("unsupported format {}", envelope.format),
            ));
        }
        if envelope.target != file.target.to_string_lossy() {
            return Err(BreadcrumbsError::malformed(
                &location,
                format!("record belongs to {}", envelope.target),
            ));
        }
        let raw = envelope.record.get();
        if crc32fast::hash(raw.as_bytes()) != envelope.checksum {
            return Err(BreadcrumbsError::malformed(&location, "checksum mismatch"));
        }

        let record: Breadcrumbs = serde_json::from_str(raw)
            .map_err(|e| BreadcrumbsError::malformed(&location, e.to_string()))?;
        record
            .validate()
            .map_err(|e| BreadcrumbsError::malformed(&location, e.to_string()))?;

        let saved_at = UNIX_EPOCH + Duration::from_millis(envelope.saved_at_ms);
        match now.duration_since(saved_at) {
            Ok(age) if self.policy.admits(age) => {}
            Ok(age) => return Err(BreadcrumbsError::Stale { path: location, age }),
            // Saved "in the future": the clock moved, so the age is unknown.
            Err(_) => {
                return Err(BreadcrumbsError::Stale {
                    path: location,
                    age: Duration::ZERO,
                })
            }
        }

        file.record = record;
        Ok(file)
    }

    /// Atomically write `file` to its storage location.
    pub fn save(&self, file: &BreadcrumbsFile) -> Result<(), BreadcrumbsError> {
        self.save_at(file, SystemTime::now())
    }

    pub fn save_at(&self, file: &BreadcrumbsFile, now: SystemTime) -> Result<(), BreadcrumbsError> {
        file.record.validate()?;

        let record_json = serde_json::to_string(&file.record).map_err(BreadcrumbsError::Serialize)?;
        let raw = RawValue::from_string(record_json).map_err(BreadcrumbsError::Serialize)?;
        let saved_at_ms = millis_since_epoch(now);
        let target = file.target.to_string_lossy();
        let envelope = EnvelopeOut {
            format: BREADCRUMBS_FORMAT,
            target: &target,
            saved_at_ms,
            checksum: crc32fast::hash(raw.get().as_bytes()),
            record: &*raw,
        };
        let bytes = serde_json::to_vec(&envelope).map_err(BreadcrumbsError::Serialize)?;

        let _guard = self.write_lock.lock();
        write_atomically(&file.location, &bytes)
            .map_err(|e| BreadcrumbsError::io("writing breadcrumbs", &file.location, e))?;
        log::debug!("Saved breadcrumbs for {:?} to {:?}", file.target, file.location);
        Ok(())
    }

    /// Remove any stored breadcrumbs for `target`. Missing files are fine.
    pub fn discard(&self, target: &Path) -> Result<(), BreadcrumbsError> {
        let location = self.path_for(target);
        let _guard = self.write_lock.lock();
        match std::fs::remove_file(&location) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BreadcrumbsError::io("removing breadcrumbs", location, e)),
        }
    }

    /// Remove stored records that are past the resume timeout, whatever their
    /// target. Targets such as `hg-editor-*.txt` are random per session, so
    /// their records are never looked up again by path.
    ///
    /// Looks at no more than `SWEEP_LIMIT` entries per call and returns how
    /// many files were removed. Does nothing while resuming is disabled.
    pub fn sweep_stale(&self) -> usize {
        self.sweep_stale_at(SystemTime::now())
    }

    pub fn sweep_stale_at(&self, now: SystemTime) -> usize {
        if !self.policy.enabled {
            return 0;
        }
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("Cannot list breadcrumbs in {:?}: {}", self.root, e);
                }
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.filter_map(Result::ok).take(SWEEP_LIMIT) {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            let _guard = self.write_lock.lock();
            if !self.is_expired(&path, now) {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("Failed to remove {:?}: {}", path, e),
            }
        }
        if removed > 0 {
            log::debug!("Swept {} expired breadcrumbs from {:?}", removed, self.root);
        }
        removed
    }

    /// Older than the timeout by its own timestamp, or by modification time
    /// when the file cannot be decoded. Future-dated files are left alone.
    fn is_expired(&self, path: &Path, now: SystemTime) -> bool {
        let saved_at = std::fs::read(path)
            .ok()
            .and_then(|data| parse_envelope(&data, path).ok())
            .map(|envelope| UNIX_EPOCH + Duration::from_millis(envelope.saved_at_ms))
            .or_else(|| std::fs::metadata(path).and_then(|m| m.modified()).ok());
        match saved_at.map(|saved_at| now.duration_since(saved_at)) {
            Some(Ok(age)) => age > self.policy.timeout,
            _ => false,
        }
    }
}

fn target_digest(target: &Path) -> String {
    hex::encode(Sha256::digest(target.as_os_str().as_encoded_bytes()))
}

/// Decode the envelope at the start of `data`. Anything after it is ignored.
fn parse_envelope(data: &[u8], location: &Path) -> Result<EnvelopeIn, BreadcrumbsError> {
    match serde_json::Deserializer::from_slice(data)
        .into_iter::<EnvelopeIn>()
        .next()
    {
        Some(Ok(envelope)) => Ok(envelope),
        Some(Err(e)) => Err(BreadcrumbsError::malformed(location, e.to_string())),
        None => Err(BreadcrumbsError::malformed(location, "empty file")),
    }
}

fn millis_since_epoch(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
