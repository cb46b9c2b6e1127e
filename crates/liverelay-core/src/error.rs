//! Error types for the relay core.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown event kind: {0}")]
    UnknownEventKind(String),

    #[error("invalid upstream payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}
