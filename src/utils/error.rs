//! The `error` module defines the error type shared across `chatframe`.
//!
//! Storage, rendering and transport failures all funnel into [`Error`] so
//! callers can propagate them with `?` and decide at the edge how much of
//! the failure to expose.

use sled::transaction::TransactionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("message already stored for topic '{topic}' at {timestamp}")]
    DuplicateMessage { topic: String, timestamp: String },

    #[error("unknown subscriber session: {0}")]
    UnknownSession(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("render worker failed: {0}")]
    WorkerFailed(String),

    #[error("render worker did not answer within {0:?}")]
    RenderTimeout(std::time::Duration),

    #[error("malformed frame: {0}")]
    Frame(String),

    #[error("render pool is closed")]
    PoolClosed,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl From<TransactionError<Error>> for Error {
    fn from(err: TransactionError<Error>) -> Self {
        match err {
            TransactionError::Abort(inner) => inner,
            TransactionError::Storage(e) => Self::Storage(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
