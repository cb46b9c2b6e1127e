//! liverelay-daemon: async relay engine.
//! Supervises one upstream subscription per tenant, throttles and
//! normalizes its events, and fans them out to the tenant's downstream
//! viewers over WebSocket with dual-heartbeat liveness.

pub mod avatar_cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod fanout;
pub mod supervisor;
pub mod throttle;
pub mod ws_server;

pub use config::RelayConfig;
pub use engine::{RelayEngine, RelayStatus, TenantStatus};
pub use error::RelayError;
pub use fanout::{ConnectionId, FanoutRegistry, ViewerHandle};
pub use supervisor::{EventHandler, SupervisorHandle, SupervisorSnapshot};
pub use ws_server::WsServer;
