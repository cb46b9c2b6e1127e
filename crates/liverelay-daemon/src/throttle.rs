//! Shared or per-tenant burst gate in front of fan-out.

use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use dashmap::DashMap;

use liverelay_core::{EventKind, LimiterScope, RateLimitPolicy, RateLimiter};

pub struct EventThrottle {
    policy: RateLimitPolicy,
    global: Mutex<RateLimiter>,
    per_tenant: DashMap<String, RateLimiter>,
}

impl EventThrottle {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            global: Mutex::new(RateLimiter::new(&policy)),
            per_tenant: DashMap::new(),
            policy,
        }
    }

    pub fn scope(&self) -> LimiterScope {
        self.policy.scope
    }

    /// Never blocks beyond a map shard or the single global lock.
    pub fn admit(&self, tenant_token: &str, kind: EventKind, now: Instant) -> bool {
        if !self.policy.gated_kinds.contains(&kind) {
            return true;
        }
        match self.policy.scope {
            LimiterScope::Global => self
                .global
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .admit(kind, now),
            LimiterScope::PerTenant => self
                .per_tenant
                .entry(tenant_token.to_owned())
                .or_insert_with(|| RateLimiter::new(&self.policy))
                .admit(kind, now),
        }
    }
}
