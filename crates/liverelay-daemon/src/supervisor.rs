//! Per-tenant upstream connection supervisor.
//!
//! Each active tenant gets one actor task that owns its
//! [`UpstreamConnectionState`] and at most one live upstream client. Clients
//! report through a generation-tagged channel; anything tagged with a
//! superseded generation is dropped, so a late error or disconnect from a
//! replaced client can never schedule a second retry.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use liverelay_core::{
    FallbackTransition, ReconnectPolicy, Route, Tenant, UpstreamConnectionState,
};
use liverelay_upstream::{
    ClientMessage, ClientSignal, ConnectOptions, SignalSink, UpstreamClient, UpstreamConnector,
};

/// Receives every upstream event of a tenant, in emission order.
pub trait EventHandler: Send + Sync + 'static {
    fn handle(&self, tenant_token: &str, event_name: &str, payload: serde_json::Value);
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Read-only view of a supervisor, published after every transition.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorSnapshot {
    pub connected: bool,
    pub generation: u64,
    pub retries_scheduled: u64,
    pub route: Option<Route>,
    #[serde(flatten)]
    pub connection: UpstreamConnectionState,
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Epoch milliseconds anchored at startup and advanced by the tokio clock,
/// so paused-time tests see fallback windows elapse.
#[derive(Debug, Clone, Copy)]
struct Clock {
    origin_ms: u64,
    origin: tokio::time::Instant,
}

impl Clock {
    fn start() -> Self {
        Self {
            origin_ms: u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0),
            origin: tokio::time::Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        let elapsed = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.origin_ms.saturating_add(elapsed)
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

pub struct SupervisorHandle {
    token: String,
    cancel: CancellationToken,
    snapshot: watch::Receiver<SupervisorSnapshot>,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    /// Start supervising `tenant`. The actor stops when `parent` or the
    /// handle's own token is cancelled.
    pub fn spawn<C: UpstreamConnector>(
        tenant: Tenant,
        connector: Arc<C>,
        proxy: Option<String>,
        policy: ReconnectPolicy,
        handler: Arc<dyn EventHandler>,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        let (snapshot_tx, snapshot) = watch::channel(SupervisorSnapshot::default());
        let token = tenant.token.clone();
        let supervisor = ConnectionSupervisor {
            tenant,
            connector,
            proxy,
            policy,
            handler,
            cancel: cancel.clone(),
            snapshot_tx,
            state: UpstreamConnectionState::new(),
            clock: Clock::start(),
            generation: 0,
            retries_scheduled: 0,
        };
        let task = tokio::spawn(supervisor.run());
        Self {
            token,
            cancel,
            snapshot,
            task,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn snapshot(&self) -> SupervisorSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SupervisorSnapshot> {
        self.snapshot.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.task.is_finished()
    }

    /// Stop retrying; the actor disconnects its live client and exits.
    pub fn deactivate(&self) {
        self.cancel.cancel();
    }

    /// Deactivate and wait for the actor to finish tearing down.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(tenant = %self.token, error = %e, "supervisor task ended abnormally");
        }
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct ConnectionSupervisor<C: UpstreamConnector> {
    tenant: Tenant,
    connector: Arc<C>,
    proxy: Option<String>,
    policy: ReconnectPolicy,
    handler: Arc<dyn EventHandler>,
    cancel: CancellationToken,
    snapshot_tx: watch::Sender<SupervisorSnapshot>,
    state: UpstreamConnectionState,
    clock: Clock,
    generation: u64,
    retries_scheduled: u64,
}

impl<C: UpstreamConnector> ConnectionSupervisor<C> {
    async fn run(mut self) {
        let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();
        tracing::info!(
            tenant = %self.tenant.token,
            source_id = %self.tenant.source_id,
            proxied = self.proxy.is_some(),
            "supervising upstream source"
        );

        loop {
            // Active check immediately before each attempt.
            if self.cancel.is_cancelled() {
                break;
            }

            self.generation += 1;
            let route = self.state.route(self.proxy.is_some());
            let options = match (route, &self.proxy) {
                (Route::Proxy, Some(proxy)) => ConnectOptions::via_proxy(proxy.clone()),
                _ => ConnectOptions::direct(),
            };
            let sink = SignalSink::new(self.generation, signal_tx.clone());
            let mut client = self
                .connector
                .create(&self.tenant.source_id, options, sink);
            self.publish_snapshot(false, Some(route));

            let connect_timeout = Duration::from_millis(self.policy.connect_timeout_ms);
            let attempt = tokio::select! {
                result = tokio::time::timeout(connect_timeout, client.connect()) => Some(result),
                _ = self.cancel.cancelled() => None,
            };
            let reason = match attempt {
                None => {
                    self.detach(&mut client).await;
                    break;
                }
                Some(Err(_)) => {
                    self.detach(&mut client).await;
                    format!("connect timed out after {}ms", self.policy.connect_timeout_ms)
                }
                Some(Ok(Err(e))) => {
                    self.detach(&mut client).await;
                    format!("connect failed: {e}")
                }
                Some(Ok(Ok(()))) => {
                    self.state.record_success(self.clock.now_ms());
                    self.publish_snapshot(true, Some(route));
                    tracing::info!(
                        tenant = %self.tenant.token,
                        source_id = %self.tenant.source_id,
                        generation = self.generation,
                        route = ?route,
                        "upstream connected"
                    );
                    let outcome = self.pump(&mut signal_rx).await;
                    // Detach before any replacement exists.
                    self.detach(&mut client).await;
                    match outcome {
                        Some(reason) => reason,
                        None => break,
                    }
                }
            };
            drop(client);

            let decision = self.state.record_failure(
                self.clock.now_ms(),
                self.proxy.is_some(),
                &self.policy,
            );
            self.retries_scheduled += 1;
            self.publish_snapshot(false, None);

            match decision.transition {
                FallbackTransition::Entered => tracing::warn!(
                    tenant = %self.tenant.token,
                    failures = self.state.failure_count,
                    "proxy failing repeatedly, falling back to direct connections"
                ),
                FallbackTransition::Expired => tracing::info!(
                    tenant = %self.tenant.token,
                    "fallback window elapsed, returning to proxy"
                ),
                FallbackTransition::None => {}
            }
            tracing::warn!(
                tenant = %self.tenant.token,
                source_id = %self.tenant.source_id,
                failures = self.state.failure_count,
                retry_in_secs = decision.delay_secs,
                paused = decision.paused,
                reason = %reason,
                "upstream failure, retry scheduled"
            );

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(decision.delay_secs)) => {}
                _ = self.cancel.cancelled() => break,
            }
        }

        self.publish_snapshot(false, None);
        tracing::info!(tenant = %self.tenant.token, "supervisor stopped");
    }

    /// Disconnect `client`, giving up after the connect timeout so a wedged
    /// client cannot stall the retry loop or shutdown.
    async fn detach(&self, client: &mut C::Client) {
        let limit = Duration::from_millis(self.policy.connect_timeout_ms);
        if tokio::time::timeout(limit, client.disconnect()).await.is_err() {
            tracing::warn!(
                tenant = %self.tenant.token,
                generation = self.generation,
                "upstream client did not disconnect in time, dropping it"
            );
        }
    }

    /// Forward current-generation events until the client fails.
    ///
    /// Returns the failure reason, or `None` when cancelled.
    async fn pump(&self, signal_rx: &mut mpsc::UnboundedReceiver<ClientMessage>) -> Option<String> {
        loop {
            let message = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                message = signal_rx.recv() => message?,
            };
            if message.generation != self.generation {
                tracing::debug!(
                    tenant = %self.tenant.token,
                    stale = message.generation,
                    current = self.generation,
                    "ignoring signal from superseded client"
                );
                continue;
            }
            match message.signal {
                ClientSignal::Event { name, payload } => {
                    self.handler.handle(&self.tenant.token, &name, payload);
                }
                ClientSignal::Error(e) => return Some(format!("upstream error: {e}")),
                ClientSignal::Disconnected(r) => return Some(format!("upstream disconnected: {r}")),
            }
        }
    }

    fn publish_snapshot(&self, connected: bool, route: Option<Route>) {
        self.snapshot_tx.send_replace(SupervisorSnapshot {
            connected,
            generation: self.generation,
            retries_scheduled: self.retries_scheduled,
            route,
            connection: self.state.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use liverelay_upstream::UpstreamError;

    // ─── Scripted connector ──────────────────────────────────────────

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Step {
        Fail,
        Connect,
        /// `connect()` never resolves.
        Hang,
    }

    #[derive(Default)]
    struct Shared {
        script: Mutex<VecDeque<Step>>,
        attempts: Mutex<Vec<ConnectOptions>>,
        sinks: Mutex<Vec<SignalSink>>,
        live: AtomicUsize,
        max_live: AtomicUsize,
    }

    /// Plays back `script`, then connects successfully forever.
    struct ScriptedConnector {
        shared: Arc<Shared>,
    }

    impl ScriptedConnector {
        fn new(script: impl IntoIterator<Item = Step>) -> (Arc<Self>, Arc<Shared>) {
            let shared = Arc::new(Shared::default());
            *shared.script.lock().unwrap() = script.into_iter().collect();
            (
                Arc::new(Self {
                    shared: Arc::clone(&shared),
                }),
                shared,
            )
        }
    }

    struct ScriptedClient {
        shared: Arc<Shared>,
        step: Step,
        released: bool,
    }

    impl ScriptedClient {
        fn release(&mut self) {
            if !self.released {
                self.released = true;
                self.shared.live.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    impl UpstreamClient for ScriptedClient {
        async fn connect(&mut self) -> Result<(), UpstreamError> {
            match self.step {
                Step::Fail => Err(UpstreamError::Rejected("scripted failure".into())),
                Step::Connect => Ok(()),
                Step::Hang => std::future::pending().await,
            }
        }

        async fn disconnect(&mut self) {
            self.release();
        }
    }

    impl Drop for ScriptedClient {
        fn drop(&mut self) {
            self.release();
        }
    }

    impl UpstreamConnector for ScriptedConnector {
        type Client = ScriptedClient;

        fn create(&self, _source_id: &str, options: ConnectOptions, sink: SignalSink) -> ScriptedClient {
            let live = self.shared.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.shared.max_live.fetch_max(live, Ordering::SeqCst);
            self.shared.attempts.lock().unwrap().push(options);
            self.shared.sinks.lock().unwrap().push(sink);
            let step = self
                .shared
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Step::Connect);
            ScriptedClient {
                shared: Arc::clone(&self.shared),
                step,
                released: false,
            }
        }
    }

    #[derive(Default)]
    struct RecordingHandler {
        events: Mutex<Vec<(String, String)>>,
    }

    impl EventHandler for RecordingHandler {
        fn handle(&self, tenant_token: &str, event_name: &str, _payload: serde_json::Value) {
            self.events
                .lock()
                .unwrap()
                .push((tenant_token.to_owned(), event_name.to_owned()));
        }
    }

    fn spawn(
        connector: Arc<ScriptedConnector>,
        proxy: Option<&str>,
        handler: Arc<RecordingHandler>,
    ) -> (SupervisorHandle, CancellationToken) {
        let root = CancellationToken::new();
        let handle = SupervisorHandle::spawn(
            Tenant::new("T1", "userA"),
            connector,
            proxy.map(str::to_owned),
            ReconnectPolicy::default(),
            handler,
            &root,
        );
        (handle, root)
    }

    async fn wait_connected(handle: &SupervisorHandle, generation: u64) {
        let mut rx = handle.subscribe();
        rx.wait_for(|s| s.connected && s.generation >= generation)
            .await
            .unwrap();
    }

    // ─── Retry scheduling ────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn n_connect_failures_schedule_exactly_n_retries() {
        let (connector, shared) = ScriptedConnector::new([Step::Fail; 7]);
        let (handle, _root) = spawn(connector, None, Arc::default());

        wait_connected(&handle, 8).await;
        let snap = handle.snapshot();
        assert_eq!(snap.retries_scheduled, 7);
        assert_eq!(snap.generation, 8);
        assert_eq!(snap.connection.failure_count, 0);
        assert!(snap.connection.last_success_ms.is_some());
        assert_eq!(shared.attempts.lock().unwrap().len(), 8);
        assert_eq!(shared.max_live.load(Ordering::SeqCst), 1);

        // Idle while connected: nothing else is scheduled.
        tokio::time::sleep(Duration::from_secs(7_200)).await;
        assert_eq!(handle.snapshot().retries_scheduled, 7);
        assert_eq!(shared.attempts.lock().unwrap().len(), 8);
        handle.shutdown().await;
        assert_eq!(shared.live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn error_then_disconnect_from_one_client_retries_once() {
        let (connector, shared) = ScriptedConnector::new([]);
        let (handle, _root) = spawn(connector, None, Arc::default());
        wait_connected(&handle, 1).await;

        let first = shared.sinks.lock().unwrap()[0].clone();
        first.error("socket reset");
        first.disconnected("closed");

        wait_connected(&handle, 2).await;
        tokio::time::sleep(Duration::from_secs(3_600)).await;
        let snap = handle.snapshot();
        assert_eq!(snap.retries_scheduled, 1);
        assert_eq!(snap.generation, 2);
        assert!(snap.connected);
        assert_eq!(shared.max_live.load(Ordering::SeqCst), 1);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stale_generation_events_are_dropped() {
        let handler = Arc::new(RecordingHandler::default());
        let (connector, shared) = ScriptedConnector::new([]);
        let (handle, _root) = spawn(connector, None, Arc::clone(&handler));
        wait_connected(&handle, 1).await;

        let first = shared.sinks.lock().unwrap()[0].clone();
        first.event("like", serde_json::json!({}));
        first.disconnected("bye");
        wait_connected(&handle, 2).await;

        first.event("like", serde_json::json!({}));
        let second = shared.sinks.lock().unwrap()[1].clone();
        second.event("gift", serde_json::json!({}));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let events = handler.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![("T1".to_owned(), "like".to_owned()), ("T1".to_owned(), "gift".to_owned())]
        );
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_delays_follow_policy() {
        let (connector, shared) = ScriptedConnector::new([Step::Fail, Step::Fail]);
        let (handle, _root) = spawn(connector, None, Arc::default());

        let start = tokio::time::Instant::now();
        wait_connected(&handle, 3).await;
        // 15 * 2^1 + 15 * 2^2
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(90) && waited < Duration::from_secs(91), "{waited:?}");
        assert_eq!(shared.attempts.lock().unwrap().len(), 3);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_connect_times_out_and_retries() {
        let (connector, shared) = ScriptedConnector::new([Step::Hang]);
        let (handle, _root) = spawn(connector, None, Arc::default());

        let start = tokio::time::Instant::now();
        wait_connected(&handle, 2).await;
        // 30 s connect timeout, then 15 * 2^1 backoff.
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(60) && waited < Duration::from_secs(61), "{waited:?}");

        let snap = handle.snapshot();
        assert_eq!(snap.retries_scheduled, 1);
        assert_eq!(shared.attempts.lock().unwrap().len(), 2);
        assert_eq!(shared.max_live.load(Ordering::SeqCst), 1, "hung client released before retry");
        handle.shutdown().await;
        assert_eq!(shared.live.load(Ordering::SeqCst), 0);
    }

    // ─── Proxy fallback ──────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn repeated_proxy_failures_fall_back_to_direct() {
        let (connector, shared) = ScriptedConnector::new([Step::Fail; 5]);
        let (handle, _root) = spawn(connector, Some("http://proxy:3128"), Arc::default());
        wait_connected(&handle, 6).await;

        let attempts = shared.attempts.lock().unwrap().clone();
        for options in &attempts[..5] {
            assert_eq!(options.proxy.as_deref(), Some("http://proxy:3128"));
        }
        assert_eq!(attempts[5], ConnectOptions::direct());
        assert_eq!(handle.snapshot().route, Some(Route::Direct));
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn no_fallback_without_proxy() {
        let (connector, shared) = ScriptedConnector::new([Step::Fail; 6]);
        let (handle, _root) = spawn(connector, None, Arc::default());
        wait_connected(&handle, 7).await;
        assert!(shared.attempts.lock().unwrap().iter().all(|o| o.proxy.is_none()));
        assert!(!handle.snapshot().connection.using_fallback);
        handle.shutdown().await;
    }

    // ─── Deactivation ────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn deactivate_during_backoff_stops_retrying() {
        let (connector, shared) = ScriptedConnector::new([Step::Fail; 100]);
        let (handle, _root) = spawn(connector, None, Arc::default());

        let mut rx = handle.subscribe();
        rx.wait_for(|s| s.retries_scheduled >= 1).await.unwrap();
        handle.deactivate();
        tokio::time::sleep(Duration::from_secs(86_400)).await;

        assert_eq!(shared.attempts.lock().unwrap().len(), 1);
        assert!(!handle.is_running());
        assert_eq!(shared.live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn parent_cancellation_disconnects_live_client() {
        let (connector, shared) = ScriptedConnector::new([]);
        let (handle, root) = spawn(connector, None, Arc::default());
        wait_connected(&handle, 1).await;
        assert_eq!(shared.live.load(Ordering::SeqCst), 1);

        root.cancel();
        let mut rx = handle.subscribe();
        rx.wait_for(|s| !s.connected).await.unwrap();
        handle.shutdown().await;
        assert_eq!(shared.live.load(Ordering::SeqCst), 0);
        assert_eq!(shared.attempts.lock().unwrap().len(), 1);
    }

    #[test]
    fn snapshot_serializes_flat_camel_case() {
        let snap = SupervisorSnapshot {
            connected: true,
            generation: 3,
            retries_scheduled: 2,
            route: Some(Route::Proxy),
            connection: UpstreamConnectionState::new(),
        };
        let v = serde_json::to_value(&snap).unwrap();
        assert_eq!(v["connected"], true);
        assert_eq!(v["retriesScheduled"], 2);
        assert_eq!(v["route"], "proxy");
        assert_eq!(v["failureCount"], 0);
        assert_eq!(v["usingFallback"], false);
    }
}
