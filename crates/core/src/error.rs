//! Error types for the group sync core crate.

use thiserror::Error;

/// Top-level error type for all group sync operations.
#[derive(Debug, Error)]
pub enum GroupSyncError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("directory unavailable: {0}")]
    DirectoryUnavailable(String),

    #[error("directory error: {0}")]
    Directory(String),

    #[error("group not found: {0}")]
    GroupNotFound(String),

    #[error("target unavailable: {0}")]
    TargetUnavailable(String),

    #[error("target conflict: {0}")]
    TargetConflict(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GroupSyncError {
    /// Whether this error must abort the whole sync run.
    ///
    /// Everything else is caught at the group or mutation scope and recorded
    /// in the run summary.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::DirectoryUnavailable(_))
    }
}

/// A convenience Result alias that defaults to [`GroupSyncError`].
pub type Result<T> = std::result::Result<T, GroupSyncError>;
