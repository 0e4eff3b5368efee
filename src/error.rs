use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SurgeError {
    #[error("operation timed out")]
    Timeout,
    #[error("connection error: {0}")]
    Connection(#[from] io::Error),
    #[error("malformed frame: {0}")]
    Protocol(String),
    #[error("invalid endpoint '{0}'")]
    Endpoint(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SurgeError>;
