use thiserror::Error;

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Journal is closed")]
    Closed,

    #[error("Journal file path is empty")]
    EmptyPath,

    #[error("Transaction already open")]
    TransactionAlreadyOpen,

    #[error("Record rejected: {0}")]
    InvalidRecord(String),
}

pub type Result<T> = std::result::Result<T, JournalError>;
