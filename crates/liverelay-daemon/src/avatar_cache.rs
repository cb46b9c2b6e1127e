//! Last-known-good avatar per actor.
//!
//! Upstream payloads often omit the avatar on repeat events from the same
//! actor. A usable URL is remembered per actor id and served when a later
//! payload has none; the static fallback covers actors never seen with one.

use std::time::Duration;

use moka::sync::Cache;
use serde::{Deserialize, Serialize};

use liverelay_core::payload::{FALLBACK_AVATAR_URL, UpstreamPayload};

pub const DEFAULT_AVATAR_CACHE_CAPACITY: u64 = 10_000;
pub const DEFAULT_AVATAR_TIME_TO_IDLE_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvatarCacheConfig {
    pub max_capacity: u64,
    pub time_to_idle_secs: u64,
}

impl Default for AvatarCacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: DEFAULT_AVATAR_CACHE_CAPACITY,
            time_to_idle_secs: DEFAULT_AVATAR_TIME_TO_IDLE_SECS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvatarChange {
    First,
    Unchanged,
    Replaced,
}

#[derive(Clone)]
pub struct AvatarCache {
    cache: Cache<String, String>,
}

impl AvatarCache {
    pub fn new(config: &AvatarCacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_idle(Duration::from_secs(config.time_to_idle_secs))
            .build();
        Self { cache }
    }

    /// Avatar for the payload's actor: payload first, then cache, then the
    /// static fallback.
    pub fn resolve(&self, payload: &UpstreamPayload) -> String {
        let actor = payload.actor_id();
        if let Some(url) = payload.usable_avatar() {
            if !actor.is_empty() && self.remember(actor, url) == AvatarChange::Replaced {
                tracing::info!(actor_id = %actor, avatar_url = %url, "new avatar detected");
            }
            return url.to_owned();
        }
        if !actor.is_empty() {
            if let Some(cached) = self.cache.get(actor) {
                return cached;
            }
        }
        FALLBACK_AVATAR_URL.to_owned()
    }

    /// Store `url` for `actor` and report how it compares with what was
    /// cached before.
    pub fn remember(&self, actor: &str, url: &str) -> AvatarChange {
        let change = match self.cache.get(actor) {
            None => AvatarChange::First,
            Some(old) if old == url => return AvatarChange::Unchanged,
            Some(_) => AvatarChange::Replaced,
        };
        self.cache.insert(actor.to_owned(), url.to_owned());
        change
    }

    pub fn cached(&self, actor_id: &str) -> Option<String> {
        self.cache.get(actor_id)
    }
}
