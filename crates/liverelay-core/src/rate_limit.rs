//! Minimum-interval gate for high-frequency event kinds.
//!
//! Events of a gated kind are admitted only if at least `min_interval` has
//! passed since the previously admitted gated event. Rejected events are
//! dropped, never queued: viewers see undercounted bursts, never duplicated
//! ones. Kinds outside the gated set always pass.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::types::EventKind;

pub const DEFAULT_MIN_INTERVAL_MS: u64 = 25;

/// Whether one gate is shared by every tenant or each tenant gets its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimiterScope {
    #[default]
    Global,
    PerTenant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitPolicy {
    pub min_interval_ms: u64,
    pub gated_kinds: Vec<EventKind>,
    pub scope: LimiterScope,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            min_interval_ms: DEFAULT_MIN_INTERVAL_MS,
            gated_kinds: vec![EventKind::Like],
            scope: LimiterScope::Global,
        }
    }
}

impl RateLimitPolicy {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    min_interval: Duration,
    gated: Vec<EventKind>,
    last_admitted: Option<Instant>,
}

impl RateLimiter {
    pub fn new(policy: &RateLimitPolicy) -> Self {
        Self {
            min_interval: policy.min_interval(),
            gated: policy.gated_kinds.clone(),
            last_admitted: None,
        }
    }

    pub fn is_gated(&self, kind: EventKind) -> bool {
        self.gated.contains(&kind)
    }

    /// Decide whether an event of `kind` observed at `now` may be relayed.
    pub fn admit(&mut self, kind: EventKind, now: Instant) -> bool {
        if !self.is_gated(kind) {
            return true;
        }
        match self.last_admitted {
            Some(last) if now.saturating_duration_since(last) < self.min_interval => false,
            _ => {
                self.last_admitted = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(&RateLimitPolicy::default())
    }

    #[test]
    fn first_gated_event_is_admitted() {
        let mut rl = limiter();
        assert!(rl.admit(EventKind::Like, Instant::now()));
    }

    #[test]
    fn events_inside_interval_are_dropped() {
        let mut rl = limiter();
        let t0 = Instant::now();
        assert!(rl.admit(EventKind::Like, t0));
        assert!(!rl.admit(EventKind::Like, t0 + Duration::from_millis(10)));
        assert!(!rl.admit(EventKind::Like, t0 + Duration::from_millis(24)));
        assert!(rl.admit(EventKind::Like, t0 + Duration::from_millis(25)));
    }

    #[test]
    fn dropped_events_do_not_extend_the_gate() {
        let mut rl = limiter();
        let t0 = Instant::now();
        rl.admit(EventKind::Like, t0);
        rl.admit(EventKind::Like, t0 + Duration::from_millis(20));
        // Measured from the last *admitted* event, not the last attempt.
        assert!(rl.admit(EventKind::Like, t0 + Duration::from_millis(26)));
    }

    #[test]
    fn ungated_kinds_bypass_the_gate() {
        let mut rl = limiter();
        let t0 = Instant::now();
        assert!(rl.admit(EventKind::Like, t0));
        for kind in [EventKind::Follow, EventKind::Gift, EventKind::Join] {
            assert!(rl.admit(kind, t0));
            assert!(rl.admit(kind, t0));
        }
        // Ungated traffic leaves the like gate untouched.
        assert!(!rl.admit(EventKind::Like, t0 + Duration::from_millis(1)));
    }

    #[test]
    fn custom_gated_set_is_respected() {
        let policy = RateLimitPolicy {
            gated_kinds: vec![EventKind::Chat, EventKind::Like],
            ..Default::default()
        };
        let mut rl = RateLimiter::new(&policy);
        let t0 = Instant::now();
        assert!(rl.admit(EventKind::Chat, t0));
        // Both kinds share the same gate.
        assert!(!rl.admit(EventKind::Like, t0 + Duration::from_millis(5)));
    }

    proptest! {
        #[test]
        fn admitted_per_window_is_bounded(
            gaps in proptest::collection::vec(0u64..40, 1..400),
            window_ms in 1u64..1_000,
        ) {
            let mut rl = limiter();
            let t0 = Instant::now();
            let mut at = 0u64;
            let mut admitted = Vec::new();
            for gap in gaps {
                at += gap;
                if rl.admit(EventKind::Like, t0 + Duration::from_millis(at)) {
                    admitted.push(at);
                }
            }
            let bound = (window_ms / DEFAULT_MIN_INTERVAL_MS) as usize + 1;
            for &start in &admitted {
                let in_window = admitted
                    .iter()
                    .filter(|&&t| t >= start && t < start + window_ms)
                    .count();
                prop_assert!(in_window <= bound);
            }
        }
    }
}
