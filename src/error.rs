use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types
///
/// Only transport-level failures (store or push provider unreachable,
/// credentials broken) surface as errors to the event framework so it
/// can redeliver the event. Everything else the fanout pipeline treats
/// as a benign skip or a per-token delivery result.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("document store error: {0}")]
    Store(String),

    #[error("push provider error: {0}")]
    Push(String),

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("malformed event: {0}")]
    BadEvent(String),
}
