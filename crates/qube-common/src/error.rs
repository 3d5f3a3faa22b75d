use thiserror::Error;

use crate::JobStatus;

#[derive(Error, Debug)]
pub enum QubeError {
    #[error("store connection error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("pool error: {0}")]
    Pool(String),

    #[error("script error: {0}")]
    Script(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("not initialized: call init() first")]
    NotInitialized,

    #[error("shutting down")]
    ShuttingDown,

    #[error("store pool is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, QubeError>;
