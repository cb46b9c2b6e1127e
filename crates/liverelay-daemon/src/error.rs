use liverelay_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("unknown tenant: {0}")]
    UnknownTenant(String),

    #[error("tenant is not active: {0}")]
    TenantInactive(String),

    #[error("failed to encode event: {0}")]
    Serialize(#[from] CoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
