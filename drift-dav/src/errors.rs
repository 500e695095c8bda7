use thiserror::Error;

#[derive(Error, Debug)]
pub enum DavError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected HTTP status {0}")]
    UnexpectedStatus(u16),

    #[error("Server status document is not valid: {0}")]
    InvalidStatusDocument(#[from] serde_json::Error),

    #[error("Redirect refused: {0}")]
    RedirectRefused(String),
}

pub type Result<T> = std::result::Result<T, DavError>;
