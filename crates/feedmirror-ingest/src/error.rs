//! Pipeline error and stage outcome types

use crate::store::StoreError;
use std::fmt;
use thiserror::Error;

/// Result type for pipeline stages
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors a sync stage can end with.
///
/// None of these stop the sync loop; they abandon the rest of the current
/// cycle and the next cycle starts again from each stage's own skip check.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected HTTP status {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Load error: {0}")]
    Load(String),

    #[error("Aggregation error: {0}")]
    Aggregation(String),

    #[error("Document store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Document store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Coarse classification used when logging failed cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Extraction,
    Load,
    Aggregation,
    StoreUnavailable,
    Store,
    Io,
    Config,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Transport(_) | SyncError::HttpStatus { .. } => ErrorKind::Transport,
            SyncError::Extraction(_) => ErrorKind::Extraction,
            SyncError::Load(_) => ErrorKind::Load,
            SyncError::Aggregation(_) => ErrorKind::Aggregation,
            SyncError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            SyncError::Store(_) => ErrorKind::Store,
            SyncError::Io(_) => ErrorKind::Io,
            SyncError::Config(_) => ErrorKind::Config,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Extraction => "extraction",
            ErrorKind::Load => "load",
            ErrorKind::Aggregation => "aggregation",
            ErrorKind::StoreUnavailable => "store_unavailable",
            ErrorKind::Store => "store",
            ErrorKind::Io => "io",
            ErrorKind::Config => "config",
        };
        f.write_str(name)
    }
}

impl StoreError {
    /// Convert into the stage's error kind, keeping connectivity failures
    /// distinguishable as [`SyncError::StoreUnavailable`].
    pub fn into_sync(self, stage_kind: impl FnOnce(String) -> SyncError) -> SyncError {
        match self {
            StoreError::Unavailable(message) => SyncError::StoreUnavailable(message),
            other => stage_kind(other.to_string()),
        }
    }
}

/// What a stage did when it ran without error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Completed,
    /// The stage's idempotency check found its output already in place
    Skipped(String),
}

impl StageOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        StageOutcome::Skipped(reason.into())
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, StageOutcome::Skipped(_))
    }
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageOutcome::Completed => f.write_str("completed"),
            StageOutcome::Skipped(reason) => write!(f, "skipped ({})", reason),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_store_unavailable_survives_stage_mapping() {
        let err = StoreError::Unavailable("connection refused".to_string()).into_sync(SyncError::Load);
        assert_eq!(err.kind(), ErrorKind::StoreUnavailable);

        let err = StoreError::Rejected("duplicate key".to_string()).into_sync(SyncError::Load);
        assert_eq!(err.kind(), ErrorKind::Load);
    }

    #[test]
    fn test_http_status_is_a_transport_error() {
        let err = SyncError::HttpStatus {
            status: 503,
            url: "http://example.com/a.tgz".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(err.kind().to_string(), "transport");
    }

    #[test]
    fn test_stage_outcome_display() {
        assert_eq!(StageOutcome::Completed.to_string(), "completed");
        let skipped = StageOutcome::skipped("already extracted");
        assert!(skipped.is_skipped());
        assert_eq!(skipped.to_string(), "skipped (already extracted)");
    }
}
