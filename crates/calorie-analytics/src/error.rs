use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid stored date: {0}")]
    InvalidDate(String),
}

pub type Result<T> = std::result::Result<T, AnalyticsError>;
