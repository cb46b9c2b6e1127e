//! Per-tenant upstream connection state and its failure/success transitions.
//!
//! Pure, deterministic state machine. All time values are epoch milliseconds
//! passed in by the caller (no system clock access). The owning supervisor is
//! the only writer.

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffPolicy;

// ─── Defaults ────────────────────────────────────────────────────

pub const DEFAULT_PROXY_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_FALLBACK_WINDOW_SECS: u64 = 900;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;

// ─── Policy ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub backoff: BackoffPolicy,
    /// Failure streak that moves a proxied tenant onto direct connections.
    /// Zero disables fallback.
    pub proxy_failure_threshold: u32,
    /// How long a tenant stays on direct connections once it falls back.
    pub fallback_window_secs: u64,
    /// A `connect()` still pending after this long counts as a failure.
    pub connect_timeout_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            proxy_failure_threshold: DEFAULT_PROXY_FAILURE_THRESHOLD,
            fallback_window_secs: DEFAULT_FALLBACK_WINDOW_SECS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

// ─── State ───────────────────────────────────────────────────────

/// How the next upstream client should be routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    Proxy,
    Direct,
}

/// Fallback change caused by a single recorded failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackTransition {
    None,
    /// Proxy failures crossed the threshold; switched to direct.
    Entered,
    /// The fallback window elapsed; switched back to the proxy.
    Expired,
}

/// Outcome of [`UpstreamConnectionState::record_failure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub delay_secs: u64,
    pub transition: FallbackTransition,
    pub paused: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamConnectionState {
    pub failure_count: u32,
    pub using_fallback: bool,
    pub last_success_ms: Option<u64>,
    pub paused_until_ms: Option<u64>,
    pub fallback_until_ms: Option<u64>,
}

impl UpstreamConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route for the next attempt. Without a proxy every attempt is direct.
    pub fn route(&self, proxy_configured: bool) -> Route {
        if proxy_configured && !self.using_fallback {
            Route::Proxy
        } else {
            Route::Direct
        }
    }

    /// Record a successful `connect()`.
    ///
    /// Resets the failure streak. Fallback is kept while its window is still
    /// open so a tenant that just recovered over a direct link is not pushed
    /// straight back onto a failing proxy.
    pub fn record_success(&mut self, now_ms: u64) {
        self.failure_count = 0;
        self.last_success_ms = Some(now_ms);
        self.paused_until_ms = None;
        if self.using_fallback && self.fallback_window_elapsed(now_ms) {
            self.leave_fallback();
        }
    }

    /// Record a connect failure, runtime error or disconnect and decide the
    /// next retry.
    pub fn record_failure(
        &mut self,
        now_ms: u64,
        proxy_configured: bool,
        policy: &ReconnectPolicy,
    ) -> RetryDecision {
        self.failure_count = self.failure_count.saturating_add(1);

        let mut transition = FallbackTransition::None;
        if self.using_fallback {
            if self.fallback_window_elapsed(now_ms) {
                self.leave_fallback();
                transition = FallbackTransition::Expired;
            }
        } else if proxy_configured
            && policy.proxy_failure_threshold > 0
            && self.failure_count >= policy.proxy_failure_threshold
        {
            self.using_fallback = true;
            self.fallback_until_ms =
                Some(now_ms.saturating_add(policy.fallback_window_secs.saturating_mul(1_000)));
            transition = FallbackTransition::Entered;
        }

        let delay_secs = policy.backoff.next_delay(self);
        let paused = policy.backoff.is_paused(self);
        self.paused_until_ms =
            paused.then(|| now_ms.saturating_add(delay_secs.saturating_mul(1_000)));

        RetryDecision {
            delay_secs,
            transition,
            paused,
        }
    }

    fn fallback_window_elapsed(&self, now_ms: u64) -> bool {
        self.fallback_until_ms.is_none_or(|until| now_ms >= until)
    }

    fn leave_fallback(&mut self) {
        self.using_fallback = false;
        self.fallback_until_ms = None;
    }
}
