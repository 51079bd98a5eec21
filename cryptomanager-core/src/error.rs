//! Error types shared across the server

use thiserror::Error;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Parse error: {0}")]
    Parse(String),
}

impl CoreError {
    pub fn parse(msg: impl Into<String>) -> Self {
        CoreError::Parse(msg.into())
    }
}

/// Failure to connect a single exchange on behalf of a user
///
/// Cloneable so the same error can be handed to the caller in a
/// [`SubscribeResult`](crate::SubscribeResult) and logged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Credentials rejected: {0}")]
    Unauthorized(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Exchange not supported: {0}")]
    Unsupported(String),

    #[error("Connection error: {0}")]
    Other(String),
}

impl ConnectionError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        ConnectionError::Unauthorized(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        ConnectionError::Network(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        ConnectionError::Unsupported(msg.into())
    }
}
