use thiserror::Error;

#[derive(Error, Debug)]
pub enum SmartQueryError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Ingestion error: {0}")]
    Ingestion(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Polars error: {0}")]
    Polars(String),
}

impl From<polars::error::PolarsError> for SmartQueryError {
    fn from(err: polars::error::PolarsError) -> Self {
        SmartQueryError::Polars(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SmartQueryError>;
