use thiserror::Error;

/// Result type alias for infrastructure operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the infrastructure layer
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O failure while reading configuration or writing logs
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Free-form error raised by a component
    #[error("{0}")]
    Custom(String),

    /// Internal error (should not occur in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a custom error
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
