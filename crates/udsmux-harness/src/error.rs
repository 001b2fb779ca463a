//! Harness error type.

use thiserror::Error;
use udsmux_core::Errno;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("transport: {0}")]
    Transport(#[from] Errno),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid address {0:?}")]
    InvalidAddress(String),
    #[error("peer closed after {received} of {expected} bytes")]
    ShortEcho { received: usize, expected: usize },
    #[error("no echo within {0} ms")]
    Timeout(u64),
}

pub type Result<T> = std::result::Result<T, HarnessError>;
