//! Composition root.
//!
//! Upstream events travel: supervisor -> [`RelayPipeline`] (rate check,
//! normalization, avatar resolution) -> [`FanoutRegistry`]. The engine owns
//! one [`SupervisorHandle`] per active tenant and exposes the operations the
//! admin surface needs.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use liverelay_core::normalize::{event_kind_for, normalize};
use liverelay_core::payload::UpstreamPayload;
use liverelay_core::simulate::synthetic_event;
use liverelay_core::{EventKind, RelayEvent, Tenant};
use liverelay_upstream::UpstreamConnector;

use crate::avatar_cache::AvatarCache;
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::fanout::FanoutRegistry;
use crate::supervisor::{EventHandler, SupervisorHandle, SupervisorSnapshot};
use crate::throttle::EventThrottle;

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct RelayPipeline {
    fanout: Arc<FanoutRegistry>,
    throttle: EventThrottle,
    avatars: AvatarCache,
}

impl RelayPipeline {
    pub fn new(fanout: Arc<FanoutRegistry>, config: &RelayConfig) -> Self {
        Self {
            fanout,
            throttle: EventThrottle::new(config.rate_limit.clone()),
            avatars: AvatarCache::new(&config.avatar_cache),
        }
    }
}

impl EventHandler for RelayPipeline {
    fn handle(&self, tenant_token: &str, event_name: &str, payload: serde_json::Value) {
        let Some(kind) = event_kind_for(event_name) else {
            tracing::debug!(tenant = %tenant_token, event = %event_name, "ignoring unrelayed upstream event");
            return;
        };
        // Decode before admission so a malformed event never takes a slot.
        let payload = if payload.is_null() {
            UpstreamPayload::default()
        } else {
            match UpstreamPayload::from_value(&payload) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(tenant = %tenant_token, kind = %kind, error = %e, "undecodable upstream payload");
                    return;
                }
            }
        };
        let now = tokio::time::Instant::now().into_std();
        if !self.throttle.admit(tenant_token, kind, now) {
            tracing::trace!(tenant = %tenant_token, kind = %kind, "event dropped by rate limiter");
            return;
        }
        let avatar = self.avatars.resolve(&payload);
        let event = normalize(tenant_token, kind, &payload, Some(avatar));

        match self.fanout.publish(tenant_token, &event) {
            Ok(delivered) => tracing::debug!(
                tenant = %tenant_token,
                kind = %kind,
                actor_id = %event.actor_id,
                delivered,
                "event relayed"
            ),
            Err(e) => tracing::warn!(tenant = %tenant_token, kind = %kind, error = %e, "failed to relay event"),
        }
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantStatus {
    pub token: String,
    pub source_id: String,
    pub active: bool,
    pub viewers: usize,
    pub upstream: Option<SupervisorSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStatus {
    pub server: &'static str,
    pub tenants: usize,
    pub active_tenants: usize,
    pub viewers: usize,
    pub tenants_detail: Vec<TenantStatus>,
}

// ---------------------------------------------------------------------------
// RelayEngine
// ---------------------------------------------------------------------------

pub struct RelayEngine<C: UpstreamConnector> {
    tenants: Vec<Tenant>,
    connector: Arc<C>,
    proxy: Option<String>,
    config: RelayConfig,
    fanout: Arc<FanoutRegistry>,
    pipeline: Arc<RelayPipeline>,
    supervisors: Mutex<HashMap<String, SupervisorHandle>>,
    cancel: CancellationToken,
}

impl<C: UpstreamConnector> RelayEngine<C> {
    pub fn new(
        tenants: Vec<Tenant>,
        connector: C,
        proxy: Option<String>,
        config: RelayConfig,
        cancel: CancellationToken,
    ) -> Self {
        let fanout = Arc::new(FanoutRegistry::new());
        let pipeline = Arc::new(RelayPipeline::new(Arc::clone(&fanout), &config));
        Self {
            tenants,
            connector: Arc::new(connector),
            proxy,
            config,
            fanout,
            pipeline,
            supervisors: Mutex::new(HashMap::new()),
            cancel,
        }
    }

    pub fn fanout(&self) -> Arc<FanoutRegistry> {
        Arc::clone(&self.fanout)
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn tenants(&self) -> &[Tenant] {
        &self.tenants
    }

    /// Supervise every tenant configured active. Idempotent.
    pub async fn start(&self) {
        let mut supervisors = self.supervisors.lock().await;
        for tenant in self.tenants.iter().filter(|t| t.active) {
            if supervisors.contains_key(&tenant.token) {
                continue;
            }
            let handle = SupervisorHandle::spawn(
                tenant.clone(),
                Arc::clone(&self.connector),
                self.proxy.clone(),
                self.config.reconnect,
                Arc::clone(&self.pipeline) as Arc<dyn EventHandler>,
                &self.cancel,
            );
            supervisors.insert(tenant.token.clone(), handle);
        }
        tracing::info!(
            tenants = self.tenants.len(),
            active = supervisors.len(),
            "relay engine started"
        );
    }

    /// Stop supervising `token` and disconnect its upstream client.
    ///
    /// Viewers stay connected; the tenant simply stops producing events.
    pub async fn deactivate(&self, token: &str) -> Result<(), RelayError> {
        if !self.tenants.iter().any(|t| t.token == token) {
            return Err(RelayError::UnknownTenant(token.to_owned()));
        }
        let handle = self
            .supervisors
            .lock()
            .await
            .remove(token)
            .ok_or_else(|| RelayError::TenantInactive(token.to_owned()))?;
        handle.shutdown().await;
        tracing::info!(tenant = %token, "tenant deactivated");
        Ok(())
    }

    pub async fn active_tokens(&self) -> Vec<String> {
        let supervisors = self.supervisors.lock().await;
        self.tenants
            .iter()
            .filter(|t| supervisors.contains_key(&t.token))
            .map(|t| t.token.clone())
            .collect()
    }

    /// Publish a canned event of `kind`, bypassing upstream and rate limiter.
    ///
    /// With no token the event goes to every active tenant. Returns the
    /// number of viewers reached.
    pub async fn publish_simulated(
        &self,
        token: Option<&str>,
        kind: EventKind,
    ) -> Result<usize, RelayError> {
        let targets = match token {
            Some(token) => vec![token.to_owned()],
            None => self.active_tokens().await,
        };
        let mut delivered = 0;
        for token in &targets {
            delivered += self.fanout.publish(token, &synthetic_event(token, kind))?;
        }
        tracing::info!(kind = %kind, tenants = targets.len(), delivered, "simulated event published");
        Ok(delivered)
    }

    /// Publish `payload` as a `custom` event to every active tenant.
    pub async fn publish_custom(&self, payload: serde_json::Value) -> Result<usize, RelayError> {
        let mut delivered = 0;
        for token in self.active_tokens().await {
            delivered += self
                .fanout
                .publish(&token, &RelayEvent::custom(token.as_str(), payload.clone()))?;
        }
        tracing::info!(delivered, "custom event published");
        Ok(delivered)
    }

    pub async fn status(&self) -> RelayStatus {
        let supervisors = self.supervisors.lock().await;
        let tenants_detail: Vec<TenantStatus> = self
            .tenants
            .iter()
            .map(|t| {
                let handle = supervisors.get(&t.token);
                TenantStatus {
                    token: t.token.clone(),
                    source_id: t.source_id.clone(),
                    active: handle.is_some(),
                    viewers: self.fanout.viewer_count(&t.token),
                    upstream: handle.map(SupervisorHandle::snapshot),
                }
            })
            .collect();
        RelayStatus {
            server: "ONLINE",
            tenants: self.tenants.len(),
            active_tenants: supervisors.len(),
            viewers: self.fanout.total_viewers(),
            tenants_detail,
        }
    }

    /// Stop every supervisor and wait for their clients to disconnect.
    pub async fn shutdown(&self) {
        let handles: Vec<SupervisorHandle> = self
            .supervisors
            .lock()
            .await
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in handles {
            handle.shutdown().await;
        }
        tracing::info!("relay engine stopped");
    }
}
