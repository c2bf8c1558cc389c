use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },
}

pub type Result<T> = std::result::Result<T, CoreError>;
