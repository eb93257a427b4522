//! Error types for session storage.

use std::path::PathBuf;

/// Errors that can occur while persisting a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Creating the directory or writing the file failed.
    #[error("session I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The record could not be serialised.
    #[error("session serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The blocking write task panicked or was cancelled.
    #[error("session write task failed: {0}")]
    Task(String),
}
