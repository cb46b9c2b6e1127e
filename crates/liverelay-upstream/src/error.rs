//! Error types for upstream clients.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("invalid upstream url: {0}")]
    InvalidUrl(String),

    #[error("unsupported upstream scheme: {0}")]
    UnsupportedScheme(String),

    #[error("proxy tunnel failed: {0}")]
    Proxy(String),

    #[error("websocket handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("upstream io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upstream rejected connection: {0}")]
    Rejected(String),
}
