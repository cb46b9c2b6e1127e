use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;

use liverelay_core::RelayEvent;

use crate::error::RelayError;

pub type ConnectionId = u64;

/// Serialized frame shared by every viewer of one publish.
pub type Frame = Arc<str>;

/// Write side of one viewer connection as seen by the registry.
#[derive(Debug, Clone)]
pub struct ViewerHandle {
    id: ConnectionId,
    outbox: mpsc::Sender<Frame>,
}

impl ViewerHandle {
    pub fn new(id: ConnectionId, outbox: mpsc::Sender<Frame>) -> Self {
        Self { id, outbox }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

// ---------------------------------------------------------------------------
// FanoutRegistry
// ---------------------------------------------------------------------------

/// Tenant token -> live viewers.
///
/// A connection is a member of at most one token's set. Sets are retained
/// when they drain so viewers may join a tenant that has nobody watching.
/// `publish` snapshots the set before delivering, so concurrent register or
/// unregister calls never make it skip or revisit a sibling.
#[derive(Default)]
pub struct FanoutRegistry {
    viewers: DashMap<String, Vec<ViewerHandle>>,
    membership: DashMap<ConnectionId, String>,
    next_id: AtomicU64,
}

impl FanoutRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Add `viewer` to `token`'s set, moving it out of any other set first.
    pub fn register(&self, token: &str, viewer: ViewerHandle) {
        let id = viewer.id;
        if let Some(previous) = self.membership.insert(id, token.to_owned()) {
            if previous != token {
                self.remove_from_set(&previous, id);
            }
        }
        let mut set = self.viewers.entry(token.to_owned()).or_default();
        set.retain(|v| v.id != id);
        set.push(viewer);
        tracing::debug!(tenant = %token, conn_id = id, viewers = set.len(), "fanout: registered");
    }

    /// Returns `false` if the connection was not a member of `token`.
    pub fn unregister(&self, token: &str, id: ConnectionId) -> bool {
        let owned = self
            .membership
            .remove_if(&id, |_, member_of| member_of == token)
            .is_some();
        if owned {
            self.remove_from_set(token, id);
            tracing::debug!(tenant = %token, conn_id = id, "fanout: unregistered");
        }
        owned
    }

    fn remove_from_set(&self, token: &str, id: ConnectionId) {
        if let Some(mut set) = self.viewers.get_mut(token) {
            set.retain(|v| v.id != id);
        }
    }

    /// Serialize `event` once and deliver it to every viewer of `token`.
    ///
    /// Returns how many viewers accepted the frame.
    pub fn publish(&self, token: &str, event: &RelayEvent) -> Result<usize, RelayError> {
        let frame: Frame = event.to_frame()?.into();
        Ok(self.publish_frame(token, frame))
    }

    /// Deliver a pre-serialized frame. Viewers with a full or closed outbox
    /// are skipped for this frame; an absent token is a silent no-op.
    pub fn publish_frame(&self, token: &str, frame: Frame) -> usize {
        let snapshot = match self.viewers.get(token) {
            Some(set) => set.clone(),
            None => return 0,
        };
        let mut delivered = 0;
        for viewer in &snapshot {
            match viewer.outbox.try_send(Arc::clone(&frame)) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(tenant = %token, conn_id = viewer.id, "fanout: viewer outbox full, frame skipped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!(tenant = %token, conn_id = viewer.id, "fanout: viewer closing, frame skipped");
                }
            }
        }
        delivered
    }

    pub fn viewer_count(&self, token: &str) -> usize {
        self.viewers.get(token).map_or(0, |set| set.len())
    }

    pub fn total_viewers(&self) -> usize {
        self.membership.len()
    }

    pub fn has_token(&self, token: &str) -> bool {
        self.viewers.contains_key(token)
    }

    pub fn token_of(&self, id: ConnectionId) -> Option<String> {
        self.membership.get(&id).map(|t| t.value().clone())
    }
}
