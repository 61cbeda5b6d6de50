use std::path::PathBuf;
use thiserror::Error;

/// Failures a single hook invocation can hit.
///
/// Only the transcript and store variants are ever fatal. A remote
/// generation failure is recovered by the summary generator before it can
/// reach a caller, and "nothing to restore" is not an error at all.
#[derive(Debug, Error)]
pub enum KeeperError {
    #[error("transcript {path} is unreadable: {source}")]
    TranscriptUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("transcript {path} has no recoverable turns ({skipped} malformed lines skipped)")]
    TranscriptEmpty { path: PathBuf, skipped: usize },

    #[error("remote summary generation failed: {0}")]
    RemoteGenerationFailed(String),

    #[error("writing snapshot store at {path}: {message}")]
    StoreWriteFailed { path: PathBuf, message: String },
}

impl KeeperError {
    pub fn store(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::StoreWriteFailed {
            path: path.into(),
            message: err.to_string(),
        }
    }
}
