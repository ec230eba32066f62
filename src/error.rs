use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DedupError {
    #[error("Cannot read image {path}: {message}")]
    ImageRead { path: PathBuf, message: String },

    #[error("Unexpected file name {path}: {reason}")]
    FilenameFormat { path: PathBuf, reason: String },

    #[error("File is missing: {path}")]
    FileMissing { path: PathBuf },

    #[error("Failed to persist {path}: {message}")]
    Persistence { path: PathBuf, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Signal handler error: {0}")]
    Signal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DedupError {
    /// Per-item failures that are logged and skipped; everything else stops the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DedupError::ImageRead { .. }
                | DedupError::FilenameFormat { .. }
                | DedupError::FileMissing { .. }
        )
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        DedupError::Persistence {
            path: path.into(),
            message: err.to_string(),
        }
    }
}
