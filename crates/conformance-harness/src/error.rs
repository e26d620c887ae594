//! Harness error types

use std::path::PathBuf;

use thiserror::Error;

pub type HarnessResult<T> = Result<T, HarnessError>;

/// Errors that abort a whole run.
///
/// Per-test failures never show up here; they are values inside
/// [`crate::engine::ExecutionResult`] and end up in the report.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Corpus not found: {path} ({reason})")]
    CorpusNotFound { path: PathBuf, reason: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Run cancelled after {completed} of {total} tests")]
    Cancelled { completed: usize, total: usize },
}

impl HarnessError {
    pub fn corpus_not_found(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        HarnessError::CorpusNotFound {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        HarnessError::Configuration(message.into())
    }
}
