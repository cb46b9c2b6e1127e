//! Dual-heartbeat liveness for downstream viewer connections.
//!
//! Two independent trackers run per connection:
//!
//! - **transport**: a WebSocket ping each interval; a missing pong by the next
//!   tick means the network link is gone (`Dead`).
//! - **application**: a probe text frame (`CHK`) each interval; a missing
//!   reply token (`HB`) by the next tick means the socket is up but the
//!   consumer stopped executing (`Frozen`).
//!
//! Either tracker expiring is enough to evict. The trackers never read each
//! other's state, so a viewer that keeps answering pings is still evicted when
//! its application loop stalls.

use serde::{Deserialize, Serialize};

// ─── Defaults ────────────────────────────────────────────────────

pub const DEFAULT_PING_INTERVAL_MS: u64 = 25_000;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_HEARTBEAT_PROBE: &str = "CHK";
pub const DEFAULT_HEARTBEAT_REPLY: &str = "HB";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessPolicy {
    pub ping_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// Text frame sent to the viewer on each application tick.
    pub heartbeat_probe: String,
    /// Text frame the viewer sends back to prove its loop is running.
    pub heartbeat_reply: String,
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self {
            ping_interval_ms: DEFAULT_PING_INTERVAL_MS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            heartbeat_probe: DEFAULT_HEARTBEAT_PROBE.to_owned(),
            heartbeat_reply: DEFAULT_HEARTBEAT_REPLY.to_owned(),
        }
    }
}

// ─── Single Tracker ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeState {
    /// Last probe answered (or none sent yet).
    Alive,
    /// Probe sent, reply outstanding.
    Awaiting,
    /// A tick fired with the reply still outstanding. Terminal.
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickOutcome {
    Probe,
    Expire,
}

#[derive(Debug, Clone)]
struct HeartbeatTracker {
    state: ProbeState,
}

impl HeartbeatTracker {
    fn new() -> Self {
        Self {
            state: ProbeState::Alive,
        }
    }

    fn on_tick(&mut self) -> TickOutcome {
        match self.state {
            ProbeState::Alive => {
                self.state = ProbeState::Awaiting;
                TickOutcome::Probe
            }
            ProbeState::Awaiting | ProbeState::Expired => {
                self.state = ProbeState::Expired;
                TickOutcome::Expire
            }
        }
    }

    fn on_reply(&mut self) {
        if self.state != ProbeState::Expired {
            self.state = ProbeState::Alive;
        }
    }
}

// ─── Dual Monitor ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictReason {
    /// No transport pong within the ping interval.
    Dead,
    /// Transport alive but no application heartbeat within the interval.
    Frozen,
}

impl EvictReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dead => "dead",
            Self::Frozen => "frozen",
        }
    }
}

/// What the connection driver must do after a timer tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LivenessAction {
    SendPing,
    SendProbe(String),
    Evict(EvictReason),
}

#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    transport: HeartbeatTracker,
    application: HeartbeatTracker,
    probe: String,
    reply: String,
}

impl LivenessMonitor {
    pub fn new(policy: &LivenessPolicy) -> Self {
        Self {
            transport: HeartbeatTracker::new(),
            application: HeartbeatTracker::new(),
            probe: policy.heartbeat_probe.clone(),
            reply: policy.heartbeat_reply.clone(),
        }
    }

    pub fn on_transport_tick(&mut self) -> LivenessAction {
        match self.transport.on_tick() {
            TickOutcome::Probe => LivenessAction::SendPing,
            TickOutcome::Expire => LivenessAction::Evict(EvictReason::Dead),
        }
    }

    pub fn on_heartbeat_tick(&mut self) -> LivenessAction {
        match self.application.on_tick() {
            TickOutcome::Probe => LivenessAction::SendProbe(self.probe.clone()),
            TickOutcome::Expire => LivenessAction::Evict(EvictReason::Frozen),
        }
    }

    pub fn on_pong(&mut self) {
        self.transport.on_reply();
    }

    /// Feed an inbound text frame. Returns `true` if it was the heartbeat
    /// reply; anything else is ignored.
    pub fn on_client_text(&mut self, text: &str) -> bool {
        if text.trim() == self.reply {
            self.application.on_reply();
            true
        } else {
            false
        }
    }

    pub fn transport_state(&self) -> ProbeState {
        self.transport.state
    }

    pub fn application_state(&self) -> ProbeState {
        self.application.state
    }

    /// First terminal verdict reached, transport taking precedence.
    pub fn verdict(&self) -> Option<EvictReason> {
        if self.transport.state == ProbeState::Expired {
            Some(EvictReason::Dead)
        } else if self.application.state == ProbeState::Expired {
            Some(EvictReason::Frozen)
        } else {
            None
        }
    }
}
