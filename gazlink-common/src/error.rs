//! Common error types for gazlink

use thiserror::Error;

/// Common result type for gazlink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across gazlink crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// HTTP client could not be built or used
    #[error("HTTP error: {0}")]
    Http(String),

    /// Remote payload did not have the expected shape
    #[error("Decode error: {0}")]
    Decode(String),

    /// Remote system answered with an error envelope where a payload was required
    #[error("Remote error: {0}")]
    Remote(String),

    /// Login rejected by the remote system
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
