use thiserror::Error;

#[derive(Error, Debug)]
pub enum CarbonQueryError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Carbon intensity error: {0}")]
    Carbon(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Profiling error: {0}")]
    Profiling(String),

    #[error("Metrics error: {0}")]
    Metrics(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CarbonQueryError>;
