use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;

use liverelay_core::{EvictReason, LivenessAction, LivenessMonitor, LivenessPolicy};

use crate::config::{DEFAULT_MAX_CONNECTIONS, DEFAULT_OUTBOX_CAPACITY};
use crate::fanout::{FanoutRegistry, Frame, ViewerHandle};

/// Upgrade paths viewers may connect on.
const VIEWER_PATHS: [&str; 2] = ["/ws", "/tap"];

// ---------------------------------------------------------------------------
// Handshake authentication
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct ViewerQuery {
    token: Option<String>,
    secret: Option<String>,
}

fn reject(status: http::StatusCode, reason: &str) -> ErrorResponse {
    let mut resp = ErrorResponse::new(Some(reason.to_owned()));
    *resp.status_mut() = status;
    resp
}

/// Validate an upgrade request and return the tenant token it is for.
///
/// Runs inside the handshake, so a rejected viewer never becomes a
/// connection: it gets 404 for an unknown path and 401 for a missing token
/// or mismatching secret.
fn authorize(req: &Request, secret: &str) -> Result<String, ErrorResponse> {
    let uri = req.uri();
    if !VIEWER_PATHS.contains(&uri.path()) {
        return Err(reject(http::StatusCode::NOT_FOUND, "Not found"));
    }
    let query: ViewerQuery = serde_urlencoded::from_str(uri.query().unwrap_or_default())
        .unwrap_or_default();

    let secret_ok = query
        .secret
        .as_deref()
        .is_some_and(|given| bool::from(given.as_bytes().ct_eq(secret.as_bytes())));
    match query.token.filter(|t| !t.is_empty()) {
        Some(token) if secret_ok => Ok(token),
        token => {
            tracing::warn!(
                tenant = token.as_deref().unwrap_or("<missing>"),
                "ws: rejected unauthorized viewer"
            );
            Err(reject(http::StatusCode::UNAUTHORIZED, "Unauthorized"))
        }
    }
}

// ---------------------------------------------------------------------------
// WsServer
// ---------------------------------------------------------------------------

/// Downstream WebSocket server.
///
/// Each authenticated viewer is registered in the [`FanoutRegistry`] under
/// its tenant token and receives relay events as JSON text frames. A
/// [`LivenessMonitor`] per connection evicts viewers whose transport stops
/// answering pings (dead) or whose application stops answering probes
/// (frozen).
pub struct WsServer {
    addr: SocketAddr,
    fanout: Arc<FanoutRegistry>,
    secret: Arc<str>,
    liveness: LivenessPolicy,
    outbox_capacity: usize,
    max_connections: usize,
    cancel: CancellationToken,
}

impl WsServer {
    pub fn new(
        addr: SocketAddr,
        fanout: Arc<FanoutRegistry>,
        secret: impl Into<Arc<str>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            addr,
            fanout,
            secret: secret.into(),
            liveness: LivenessPolicy::default(),
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            cancel,
        }
    }

    pub fn with_liveness(mut self, policy: LivenessPolicy) -> Self {
        self.liveness = policy;
        self
    }

    pub fn with_outbox_capacity(mut self, capacity: usize) -> Self {
        self.outbox_capacity = capacity.max(1);
        self
    }

    /// Set the maximum number of concurrent viewer connections.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Bind, then accept viewers until the cancellation token fires.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        tracing::info!(addr = %self.addr, max_connections = self.max_connections, "ws server listening");
        self.serve(listener).await
    }

    /// Bind to the configured address and return the actual local address.
    pub async fn bind(&self) -> std::io::Result<(TcpListener, SocketAddr)> {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, max_connections = self.max_connections, "ws server bound");
        Ok((listener, local_addr))
    }

    /// Run the accept loop on a pre-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.max_connections));

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let permit = match Arc::clone(&semaphore).try_acquire_owned() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    tracing::warn!(
                                        peer = %peer,
                                        max = self.max_connections,
                                        "ws: connection limit reached, rejecting"
                                    );
                                    drop(stream);
                                    continue;
                                }
                            };
                            let viewer = ViewerContext {
                                fanout: Arc::clone(&self.fanout),
                                liveness: self.liveness.clone(),
                                outbox_capacity: self.outbox_capacity,
                                cancel: self.cancel.clone(),
                            };
                            let secret = Arc::clone(&self.secret);
                            tokio::spawn(async move {
                                let _permit = permit;
                                accept_viewer(stream, peer, &secret, viewer).await;
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "ws: TCP accept failed");
                        }
                    }
                }
                _ = self.cancel.cancelled() => {
                    tracing::info!("ws server: cancellation requested, shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Per-viewer handler
// ---------------------------------------------------------------------------

struct ViewerContext {
    fanout: Arc<FanoutRegistry>,
    liveness: LivenessPolicy,
    outbox_capacity: usize,
    cancel: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ViewerExit {
    Closed,
    Evicted(EvictReason),
    Shutdown,
}

async fn accept_viewer(stream: TcpStream, peer: SocketAddr, secret: &str, ctx: ViewerContext) {
    let mut token = None;
    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        token = Some(authorize(req, secret)?);
        Ok(resp)
    };
    let ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::debug!(peer = %peer, error = %e, "ws handshake failed");
            return;
        }
    };
    let Some(token) = token else {
        return;
    };
    handle_viewer(ws, peer, token, ctx).await;
}

async fn handle_viewer(
    ws: WebSocketStream<TcpStream>,
    peer: SocketAddr,
    token: String,
    ctx: ViewerContext,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (outbox_tx, mut outbox_rx) = mpsc::channel::<Frame>(ctx.outbox_capacity);
    let conn_id = ctx.fanout.next_connection_id();
    ctx.fanout.register(&token, ViewerHandle::new(conn_id, outbox_tx));
    tracing::info!(tenant = %token, conn_id, peer = %peer, "viewer joined");

    // A write pending for a whole ping interval means the peer stopped
    // draining its socket; that is a dead transport.
    let write_limit = Duration::from_millis(ctx.liveness.ping_interval_ms.max(1));
    let mut monitor = LivenessMonitor::new(&ctx.liveness);
    let mut ping = ticker(ctx.liveness.ping_interval_ms);
    let mut heartbeat = ticker(ctx.liveness.heartbeat_interval_ms);

    let exit = loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => break ViewerExit::Shutdown,

            // --- outbound relay events ---
            frame = outbox_rx.recv() => {
                let Some(frame) = frame else { break ViewerExit::Closed };
                if let Err(exit) = write(&mut ws_tx, Message::Text(frame.to_string()), write_limit).await {
                    break exit;
                }
            }

            // --- inbound frames ---
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        monitor.on_client_text(&text);
                    }
                    // tungstenite answers pings itself.
                    Some(Ok(Message::Pong(_))) => monitor.on_pong(),
                    Some(Ok(Message::Close(_))) | None => break ViewerExit::Closed,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(tenant = %token, conn_id, error = %e, "ws read error, dropping viewer");
                        break ViewerExit::Closed;
                    }
                }
            }

            // --- transport liveness ---
            _ = ping.tick() => {
                match monitor.on_transport_tick() {
                    LivenessAction::SendPing => {
                        if let Err(exit) = write(&mut ws_tx, Message::Ping(Vec::new()), write_limit).await {
                            break exit;
                        }
                    }
                    LivenessAction::Evict(reason) => break ViewerExit::Evicted(reason),
                    LivenessAction::SendProbe(_) => {}
                }
            }

            // --- application liveness ---
            _ = heartbeat.tick() => {
                match monitor.on_heartbeat_tick() {
                    LivenessAction::SendProbe(probe) => {
                        if let Err(exit) = write(&mut ws_tx, Message::Text(probe), write_limit).await {
                            break exit;
                        }
                    }
                    LivenessAction::Evict(reason) => break ViewerExit::Evicted(reason),
                    LivenessAction::SendPing => {}
                }
            }
        }
    };

    ctx.fanout.unregister(&token, conn_id);
    match exit {
        ViewerExit::Closed => {
            tracing::info!(tenant = %token, conn_id, "viewer left");
        }
        ViewerExit::Evicted(reason) => {
            tracing::warn!(tenant = %token, conn_id, reason = reason.as_str(), "evicting unresponsive viewer");
            let close = CloseFrame {
                code: CloseCode::Policy,
                reason: reason.as_str().into(),
            };
            let _ = write(&mut ws_tx, Message::Close(Some(close)), write_limit).await;
        }
        ViewerExit::Shutdown => {
            let close = CloseFrame {
                code: CloseCode::Away,
                reason: "server shutting down".into(),
            };
            let _ = write(&mut ws_tx, Message::Close(Some(close)), write_limit).await;
        }
    }
    // Closing an already-closed sink is a no-op.
    let _ = tokio::time::timeout(write_limit, ws_tx.close()).await;
}

/// Send one frame, giving up after `limit`.
async fn write(
    ws_tx: &mut SplitSink<WebSocketStream<TcpStream>, Message>,
    msg: Message,
    limit: Duration,
) -> Result<(), ViewerExit> {
    match tokio::time::timeout(limit, ws_tx.send(msg)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(ViewerExit::Closed),
        Err(_) => Err(ViewerExit::Evicted(EvictReason::Dead)),
    }
}

/// Interval whose first tick is one full period away.
fn ticker(period_ms: u64) -> tokio::time::Interval {
    let period = Duration::from_millis(period_ms.max(1));
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
