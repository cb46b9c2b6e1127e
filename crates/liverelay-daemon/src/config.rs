//! Engine tunables.
//!
//! Every field defaults to the production constant, so an empty `[relay]`
//! table (or none at all) yields the stock behavior.

use serde::{Deserialize, Serialize};

use liverelay_core::{LivenessPolicy, RateLimitPolicy, ReconnectPolicy};

use crate::avatar_cache::AvatarCacheConfig;

pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;
pub const DEFAULT_BRIDGE_IDLE_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub reconnect: ReconnectPolicy,
    pub rate_limit: RateLimitPolicy,
    pub liveness: LivenessPolicy,
    pub avatar_cache: AvatarCacheConfig,
    /// Frames buffered per viewer before new frames are skipped for it.
    pub outbox_capacity: usize,
    /// Concurrent downstream connections accepted by the WebSocket server.
    pub max_connections: usize,
    /// Silence from a connected bridge, pongs included, that counts as a
    /// disconnect.
    pub bridge_idle_timeout_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            rate_limit: RateLimitPolicy::default(),
            liveness: LivenessPolicy::default(),
            avatar_cache: AvatarCacheConfig::default(),
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            bridge_idle_timeout_ms: DEFAULT_BRIDGE_IDLE_TIMEOUT_MS,
        }
    }
}
