//! Error taxonomy for the analysis engine.
//!
//! Per-asset failures (`ExtractionFailed`, `AssetUnavailable`) are recorded on
//! the asset and never abort a scan. Enrichment failures degrade to "no
//! enrichment". Persistence and migration failures end the session.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to extract signals from {path}: {reason}")]
    ExtractionFailed { path: PathBuf, reason: String },

    #[error("asset {0} has no readable local file")]
    AssetUnavailable(String),

    #[error("enrichment capability is unavailable")]
    CapabilityUnavailable,

    #[error("enrichment call timed out after {0:?}")]
    CapabilityTimeout(Duration),

    #[error("database error: {0}")]
    PersistenceFailure(#[from] rusqlite::Error),

    #[error("migration to schema v{version} failed: {reason}")]
    MigrationFailure { version: i64, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("library provider error: {0}")]
    LibraryFailure(String),

    #[error("invalid label payload: {0}")]
    LabelFormat(String),

    #[error("invalid perceptual hash {0:?}")]
    InvalidHash(String),

    #[error("no duplicate group {0}")]
    UnknownGroup(String),
}

impl Error {
    pub fn extraction(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::ExtractionFailed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error concerns a single asset and should be recorded on it
    /// rather than ending the session.
    pub fn is_per_asset(&self) -> bool {
        matches!(
            self,
            Error::ExtractionFailed { .. }
                | Error::AssetUnavailable(_)
                | Error::InvalidHash(_)
                | Error::LabelFormat(_)
        )
    }

    /// Whether the error came from the optional enrichment capability.
    pub fn is_capability(&self) -> bool {
        matches!(self, Error::CapabilityUnavailable | Error::CapabilityTimeout(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::LabelFormat(e.to_string())
    }
}
