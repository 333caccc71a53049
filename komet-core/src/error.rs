use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Why a breadcrumbs record could not be written, or why a load came back empty.
#[derive(Debug, Error)]
pub enum BreadcrumbsError {
    #[error("I/O error while {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no breadcrumbs stored at {path}")]
    NotFound { path: PathBuf },

    #[error("malformed breadcrumbs at {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("breadcrumbs at {path} are stale ({age:?} old)")]
    Stale { path: PathBuf, age: Duration },

    #[error("resuming incomplete sessions is disabled")]
    ResumeDisabled,

    #[error("{field} contains unordered or overlapping ranges")]
    InvalidRanges { field: &'static str },

    #[error("failed to serialize breadcrumbs: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl BreadcrumbsError {
    #[must_use]
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error only means "nothing to resume" rather than a fault.
    #[must_use]
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::ResumeDisabled)
    }
}
