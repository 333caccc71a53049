use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::util::write_atomically;

/// Longest resume window honoured, regardless of what the file says.
pub const MAX_RESUME_TIMEOUT_SECS: f64 = 60.0 * 60.0 * 24.0;

/// Largest line-length recommendation honoured.
pub const MAX_LINE_LENGTH_LIMIT: usize = 1000;

/// Whether and for how long an interrupted session may be resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePolicy {
    pub enabled: bool,
    pub timeout: Duration,
}

impl ResumePolicy {
    #[must_use]
    pub fn new(enabled: bool, timeout: Duration) -> Self {
        Self { enabled, timeout }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self::new(false, Duration::ZERO)
    }

    /// True if something saved `age` ago may still be resumed.
    #[must_use]
    pub fn admits(&self, age: Duration) -> bool {
        self.enabled && age <= self.timeout
    }
}

impl Default for ResumePolicy {
    fn default() -> Self {
        Preferences::default().resume_policy()
    }
}

/// User preferences, persisted to `<config dir>/komet/preferences.json`.
///
/// `#[serde(default)]` fills in fields missing from older files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Preferences {
    // ── Session resume ───────────────────────────────────────────────────
    pub resume_incomplete_session: bool,
    pub resume_incomplete_session_timeout_secs: f64,
    /// Overrides where breadcrumbs are stored (used by UI test automation).
    pub breadcrumbs_dir: Option<PathBuf>,

    // ── Line length recommendations ──────────────────────────────────────
    pub subject_length_limit_enabled: bool,
    pub subject_length_limit: i64,
    pub body_line_length_limit_enabled: bool,
    pub body_line_length_limit: i64,

    // ── Squashes ─────────────────────────────────────────────────────────
    pub detect_hg_comment_style_for_squashes: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Preferences {
            resume_incomplete_session: true,
            resume_incomplete_session_timeout_secs: 60.0 * 60.0,
            breadcrumbs_dir: None,

            subject_length_limit_enabled: true,
            subject_length_limit: 69,
            body_line_length_limit_enabled: true,
            body_line_length_limit: 72,

            detect_hg_comment_style_for_squashes: true,
        }
    }
}

impl Preferences {
    /// Resume policy with the timeout clamped to `0..=MAX_RESUME_TIMEOUT_SECS`.
    #[must_use]
    pub fn resume_policy(&self) -> ResumePolicy {
        let secs = self.resume_incomplete_session_timeout_secs;
        let secs = if secs.is_nan() {
            0.0
        } else {
            secs.clamp(0.0, MAX_RESUME_TIMEOUT_SECS)
        };
        ResumePolicy::new(
            self.resume_incomplete_session,
            Duration::from_secs_f64(secs),
        )
    }

    #[must_use]
    pub fn subject_length_limit(&self) -> Option<usize> {
        self.subject_length_limit_enabled
            .then(|| clamp_line_limit(self.subject_length_limit))
    }

    #[must_use]
    pub fn body_line_length_limit(&self) -> Option<usize> {
        self.body_line_length_limit_enabled
            .then(|| clamp_line_limit(self.body_line_length_limit))
    }
}

fn clamp_line_limit(limit: i64) -> usize {
    limit.clamp(0, MAX_LINE_LENGTH_LIMIT as i64) as usize
}

/// Default location of the preferences file, if a config directory exists.
pub fn preferences_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("komet").join("preferences.json"))
}

/// Load preferences from the default location, falling back to defaults.
pub fn load() -> Preferences {
    match preferences_path() {
        Some(path) => load_from(&path),
        None => {
            log::warn!("Cannot determine config directory; using default preferences");
            Preferences::default()
        }
    }
}

/// Load preferences from `path`. A missing or unreadable file yields defaults.
pub fn load_from(path: &Path) -> Preferences {
    match std::fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
            log::warn!("Ignoring malformed preferences at {:?}: {}", path, e);
            Preferences::default()
        }),
        Err(_) => Preferences::default(),
    }
}

pub fn save(preferences: &Preferences) -> Result<(), String> {
    let path = preferences_path().ok_or_else(|| "Cannot determine config directory".to_string())?;
    save_to(&path, preferences)
}

pub fn save_to(path: &Path, preferences: &Preferences) -> Result<(), String> {
    let json = serde_json::to_string_pretty(preferences)
        .map_err(|e| format!("Failed to serialize preferences: {}", e))?;
    write_atomically(path, json.as_bytes())
        .map_err(|e| format!("Failed to write preferences to {:?}: {}", path, e))
}

/// JSON schema of the preferences file.
pub fn schema() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(Preferences)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_resume_for_an_hour() {
        let policy = Preferences::default().resume_policy();
        assert!(policy.enabled);
        assert_eq!(policy.timeout, Duration::from_secs(3600));
    }

    #[test]
    fn timeout_is_clamped() {
        let prefs = Preferences {
            resume_incomplete_session_timeout_secs: -5.0,
            ..Preferences::default()
        };
        assert_eq!(prefs.resume_policy().timeout, Duration::ZERO);

        let prefs = Preferences {
            resume_incomplete_session_timeout_secs: 1e12,
            ..Preferences::default()
        };
        assert_eq!(
            prefs.resume_policy().timeout,
            Duration::from_secs_f64(MAX_RESUME_TIMEOUT_SECS)
        );

        let prefs = Preferences {
            resume_incomplete_session_timeout_secs: f64::NAN,
            ..Preferences::default()
        };
        assert_eq!(prefs.resume_policy().timeout, Duration::ZERO);
    }

    #[test]
    fn line_limits_are_clamped_and_optional() {
        let prefs = Preferences {
            subject_length_limit: 5000,
            body_line_length_limit: -3,
            ..Preferences::default()
        };
        assert_eq!(prefs.subject_length_limit(), Some(MAX_LINE_LENGTH_LIMIT));
        assert_eq!(prefs.body_line_length_limit(), Some(0));

        let prefs = Preferences {
            subject_length_limit_enabled: false,
            ..Preferences::default()
        };
        assert_eq!(prefs.subject_length_limit(), None);
    }

    #[test]
    fn policy_admits_within_timeout_only() {
        let policy = ResumePolicy::new(true, Duration::from_secs(300));
        assert!(policy.admits(Duration::ZERO));
        assert!(policy.admits(Duration::from_secs(300)));
        assert!(!policy.admits(Duration::from_secs(301)));
        assert!(!ResumePolicy::disabled().admits(Duration::ZERO));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = load_from(&dir.path().join("missing.json"));
        assert_eq!(prefs, Preferences::default());
    }

    #[test]
    fn malformed_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(load_from(&path), Preferences::default());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");
        std::fs::write(&path, r#"{"resume_incomplete_session": false}"#).unwrap();
        let prefs = load_from(&path);
        assert!(!prefs.resume_incomplete_session);
        assert_eq!(prefs.body_line_length_limit, 72);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("komet").join("preferences.json");
        let prefs = Preferences {
            resume_incomplete_session_timeout_secs: 300.0,
            breadcrumbs_dir: Some(dir.path().join("crumbs")),
            ..Preferences::default()
        };
        save_to(&path, &prefs).unwrap();
        assert_eq!(load_from(&path), prefs);
    }

    #[test]
    fn defaults_validate_against_schema() {
        let schema = schema();
        let compiled = jsonschema::JSONSchema::compile(&schema).expect("schema should compile");
        let instance = serde_json::to_value(Preferences::default()).unwrap();
        assert!(compiled.is_valid(&instance));

        let bad = serde_json::json!({ "resume_incomplete_session": "yes" });
        assert!(!compiled.is_valid(&bad));
    }
}
