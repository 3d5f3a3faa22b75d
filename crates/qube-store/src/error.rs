use thiserror::Error;

use qube_common::QubeError;

/// Errors local to the store layer; converted into `QubeError` at the
/// scheduler boundary, mirroring `fc-queue`'s `QueueError`.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("pool creation error: {0}")]
    PoolCreate(#[from] deadpool_redis::CreatePoolError),

    #[error("script {name} missing after reload: {message}")]
    ScriptReload { name: &'static str, message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for QubeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Redis(e) => QubeError::Redis(e),
            // Distinguished from a generic pool error so worker loops can
            // tell "the store is gone for good" (close() was called) apart
            // from a transient acquire timeout, which is worth retrying.
            StoreError::Pool(deadpool_redis::PoolError::Closed) => QubeError::Closed,
            StoreError::Pool(e) => QubeError::Pool(e.to_string()),
            StoreError::PoolCreate(e) => QubeError::Pool(e.to_string()),
            StoreError::ScriptReload { name, message } => {
                QubeError::Script(format!("{name}: {message}"))
            }
            StoreError::Serialization(e) => QubeError::Serialization(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
