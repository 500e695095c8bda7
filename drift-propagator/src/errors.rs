//! Error types for the propagation engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PropagateError {
    #[error("Journal error: {0}")]
    Journal(#[from] drift_journal::JournalError),

    #[error("Poll continuation failed fatally: {0}")]
    PollFailed(String),
}

pub type Result<T> = std::result::Result<T, PropagateError>;
