use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session not found")]
    NotFound,
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("Corrupt row: {0}")]
    Corrupt(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Session {0} was changed by another request, reload and retry")]
    Conflict(String),
}
