use thiserror::Error;

#[derive(Error, Debug)]
pub enum WeaverError {
    #[error("invalid input: {0}")]
    Input(String),

    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error("document failed validation: {0}")]
    Validation(String),

    #[error("duplicated id: {0}")]
    Duplicated(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("document store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WeaverError>;
