//! liverelay-core: pure domain logic for the event relay.
//! Tenant and event types, reconnect backoff, burst limiting, dual-heartbeat
//! liveness and upstream payload normalization. No IO, no async; every
//! time-dependent function takes the current time as a parameter.

pub mod backoff;
pub mod connection_state;
pub mod error;
pub mod liveness;
pub mod normalize;
pub mod payload;
pub mod rate_limit;
pub mod simulate;
pub mod types;

pub use backoff::BackoffPolicy;
pub use connection_state::{
    FallbackTransition, ReconnectPolicy, RetryDecision, Route, UpstreamConnectionState,
};
pub use error::CoreError;
pub use liveness::{EvictReason, LivenessAction, LivenessMonitor, LivenessPolicy};
pub use rate_limit::{LimiterScope, RateLimitPolicy, RateLimiter};
pub use types::{EventKind, RelayEvent, Tenant};
