use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("row decoding error: {0}")]
    Row(#[from] serde_rusqlite::Error),

    #[error("invalid needle: {0}")]
    InvalidNeedle(String),

    #[error("a needle named '{0}' already exists")]
    DuplicateName(String),
}

pub type Result<T> = std::result::Result<T, Error>;
