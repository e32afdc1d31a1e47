use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("missing required configuration: {0}")]
    MissingConfiguration(&'static str),

    #[error("invalid configuration value for {field}: {message}")]
    InvalidConfiguration { field: &'static str, message: String },

    #[error("failed to initialise logging: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
