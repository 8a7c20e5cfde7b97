//! Error types for Linden.
//!
//! Every fallible operation in the crate returns [`Result`]. Errors never
//! cross the RPC boundary as faults: the service layer turns them into
//! response objects with `success = false`.

use thiserror::Error;

/// The error type shared by every Linden module.
#[derive(Debug, Error)]
pub enum LindenError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Swap of a non-`next` name, unknown generation name, update of a
    /// missing document and similar lifecycle misuse.
    #[error("Invalid lifecycle transition: {0}")]
    InvalidTransition(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The request waited longer than the pool's queue budget.
    #[error("Pool saturated: {0}")]
    PoolSaturated(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Shard error: {0}")]
    Shard(String),

    #[error("Closed: {0}")]
    Closed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LindenError {
    pub fn index<S: Into<String>>(msg: S) -> Self {
        LindenError::Index(msg.into())
    }

    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        LindenError::InvalidArgument(msg.into())
    }

    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        LindenError::InvalidConfig(msg.into())
    }

    pub fn invalid_command<S: Into<String>>(msg: S) -> Self {
        LindenError::InvalidCommand(msg.into())
    }

    pub fn invalid_transition<S: Into<String>>(msg: S) -> Self {
        LindenError::InvalidTransition(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        LindenError::NotFound(msg.into())
    }

    pub fn pool_saturated<S: Into<String>>(msg: S) -> Self {
        LindenError::PoolSaturated(msg.into())
    }

    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        LindenError::Timeout(msg.into())
    }

    pub fn shard<S: Into<String>>(msg: S) -> Self {
        LindenError::Shard(msg.into())
    }

    pub fn closed<S: Into<String>>(msg: S) -> Self {
        LindenError::Closed(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        LindenError::Internal(msg.into())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LindenError>;
