//! Reconnect delay policy.
//!
//! [`BackoffPolicy::next_delay`] is a pure function of the connection state:
//! exponential growth from `base_secs` capped at `max_secs`, a hard clamp to
//! the cap once the failure streak reaches `max_consecutive_failures`, and a
//! fixed cool-down whenever the tenant is in proxy fallback.

use serde::{Deserialize, Serialize};

use crate::connection_state::UpstreamConnectionState;

// ─── Defaults ────────────────────────────────────────────────────

pub const DEFAULT_BASE_DELAY_SECS: u64 = 15;
pub const DEFAULT_MAX_DELAY_SECS: u64 = 3_600;
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 10;
pub const DEFAULT_FALLBACK_COOLDOWN_SECS: u64 = 900;

// ─── Policy ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Delay unit multiplied by `2^failure_count`.
    pub base_secs: u64,
    /// Upper bound for any non-fallback delay.
    pub max_secs: u64,
    /// Streak length after which the delay is pinned to `max_secs`.
    pub max_consecutive_failures: u32,
    /// Fixed delay while the tenant is in proxy fallback.
    pub fallback_cooldown_secs: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_secs: DEFAULT_BASE_DELAY_SECS,
            max_secs: DEFAULT_MAX_DELAY_SECS,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            fallback_cooldown_secs: DEFAULT_FALLBACK_COOLDOWN_SECS,
        }
    }
}

impl BackoffPolicy {
    /// Seconds to wait before the next connection attempt.
    pub fn next_delay(&self, state: &UpstreamConnectionState) -> u64 {
        if state.using_fallback {
            return self.fallback_cooldown_secs;
        }
        if state.failure_count >= self.max_consecutive_failures {
            return self.max_secs;
        }
        // checked_shl only fails for shifts >= 64; anything that large is past the cap.
        let factor = 1u64.checked_shl(state.failure_count).unwrap_or(u64::MAX);
        self.base_secs.saturating_mul(factor).min(self.max_secs)
    }

    /// Whether the state is in the slow-retry regime (fallback cool-down or
    /// an exhausted failure streak) rather than normal backoff.
    pub fn is_paused(&self, state: &UpstreamConnectionState) -> bool {
        state.using_fallback || state.failure_count >= self.max_consecutive_failures
    }
}
