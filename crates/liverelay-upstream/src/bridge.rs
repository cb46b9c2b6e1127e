//! JSON-over-WebSocket bridge client.
//!
//! The bridge is a sidecar that holds the actual platform session for one
//! source and re-emits its events as text frames shaped
//! `{"event": <name>, "data": <payload>}`. `error` frames surface as
//! [`ClientSignal::Error`]; `disconnected`/`streamEnd` frames and socket
//! closure surface as [`ClientSignal::Disconnected`].
//!
//! A connected client pings the bridge and treats a silent link as
//! disconnected once nothing at all has arrived for the idle timeout.
//!
//! [`ClientSignal::Error`]: crate::client::ClientSignal::Error
//! [`ClientSignal::Disconnected`]: crate::client::ClientSignal::Disconnected

use std::ops::ControlFlow;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{self, Message, client::IntoClientRequest};
use tokio_util::sync::CancellationToken;

use crate::client::{ConnectOptions, SignalSink, UpstreamClient, UpstreamConnector};
use crate::error::UpstreamError;
use crate::proxy::connect_tunnel;

/// Placeholder replaced by the source id in the bridge URL template.
pub const SOURCE_PLACEHOLDER: &str = "{source}";

const DEFAULT_WS_PORT: u16 = 80;

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Upper bound for a single ping or close write to the bridge.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BridgeConnector {
    url_template: String,
    idle_timeout: Duration,
}

impl BridgeConnector {
    pub fn new(url_template: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    /// How long a connected bridge may stay silent, pongs included, before
    /// the client reports it disconnected.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout.max(Duration::from_millis(1));
        self
    }

    pub fn url_for(&self, source_id: &str) -> String {
        self.url_template.replace(SOURCE_PLACEHOLDER, source_id)
    }
}

impl UpstreamConnector for BridgeConnector {
    type Client = BridgeClient;

    fn create(&self, source_id: &str, options: ConnectOptions, sink: SignalSink) -> BridgeClient {
        BridgeClient {
            url: self.url_for(source_id),
            options,
            sink,
            idle_timeout: self.idle_timeout,
            cancel: CancellationToken::new(),
            reader: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct BridgeClient {
    url: String,
    options: ConnectOptions,
    sink: SignalSink,
    idle_timeout: Duration,
    cancel: CancellationToken,
    reader: Option<JoinHandle<()>>,
}

impl BridgeClient {
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn open(&self) -> Result<WebSocketStream<TcpStream>, UpstreamError> {
        let request = self.url.as_str().into_client_request()?;
        let uri = request.uri();
        match uri.scheme_str() {
            Some("ws") => {}
            Some(other) => return Err(UpstreamError::UnsupportedScheme(other.to_owned())),
            None => return Err(UpstreamError::InvalidUrl(self.url.clone())),
        }
        let host = uri
            .host()
            .ok_or_else(|| UpstreamError::InvalidUrl(self.url.clone()))?
            .to_owned();
        let port = uri.port_u16().unwrap_or(DEFAULT_WS_PORT);

        let stream = match &self.options.proxy {
            Some(proxy) => connect_tunnel(proxy, &host, port).await?,
            None => TcpStream::connect((host.as_str(), port)).await?,
        };

        let (ws, _response) = tokio_tungstenite::client_async(request, stream)
            .await
            .map_err(|e| match e {
                tungstenite::Error::Http(resp) => {
                    UpstreamError::Rejected(format!("bridge answered {}", resp.status()))
                }
                other => UpstreamError::Handshake(other),
            })?;
        Ok(ws)
    }
}

impl UpstreamClient for BridgeClient {
    async fn connect(&mut self) -> Result<(), UpstreamError> {
        let ws = self.open().await?;
        tracing::debug!(
            url = %self.url,
            proxied = self.options.proxy.is_some(),
            generation = self.sink.generation(),
            "bridge: connected"
        );
        let sink = self.sink.clone();
        let cancel = self.cancel.clone();
        self.reader = Some(tokio::spawn(pump(ws, sink, cancel, self.idle_timeout)));
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.cancel.cancel();
        if let Some(reader) = self.reader.take() {
            if let Err(e) = reader.await {
                tracing::debug!(error = %e, "bridge: reader task ended abnormally");
            }
        }
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Frame pump
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct BridgeFrame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

async fn pump(
    mut ws: WebSocketStream<TcpStream>,
    sink: SignalSink,
    cancel: CancellationToken,
    idle_timeout: Duration,
) {
    let ping_every = idle_timeout / 3;
    let mut keepalive = tokio::time::interval_at(Instant::now() + ping_every, ping_every);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut deadline = Instant::now() + idle_timeout;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // Supervisor-initiated: close quietly, emit nothing.
                let _ = tokio::time::timeout(WRITE_TIMEOUT, ws.close(None)).await;
                return;
            }
            _ = tokio::time::sleep_until(deadline) => {
                sink.disconnected(format!("bridge silent for {}ms", idle_timeout.as_millis()));
                return;
            }
            _ = keepalive.tick() => {
                let sent = tokio::time::timeout(WRITE_TIMEOUT, ws.send(Message::Ping(Vec::new()))).await;
                if !matches!(sent, Ok(Ok(()))) {
                    sink.disconnected("bridge ping failed");
                    return;
                }
            }
            msg = ws.next() => {
                deadline = Instant::now() + idle_timeout;
                let flow = match msg {
                    Some(Ok(Message::Text(text))) => dispatch(&text, &sink),
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "bridge closed the stream".to_owned());
                        sink.disconnected(reason);
                        ControlFlow::Break(())
                    }
                    Some(Ok(_)) => ControlFlow::Continue(()),
                    Some(Err(e)) => {
                        sink.disconnected(format!("bridge read error: {e}"));
                        ControlFlow::Break(())
                    }
                    None => {
                        sink.disconnected("bridge stream ended");
                        ControlFlow::Break(())
                    }
                };
                if flow.is_break() {
                    return;
                }
            }
        }
    }
}

fn dispatch(text: &str, sink: &SignalSink) -> ControlFlow<()> {
    let frame: BridgeFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(error = %e, "bridge: ignoring malformed frame");
            return ControlFlow::Continue(());
        }
    };
    let BridgeFrame { event, data } = frame;
    let delivered = match event.as_str() {
        "error" => sink.error(error_message(&data)),
        "disconnected" | "streamEnd" => {
            sink.disconnected(event.as_str());
            return ControlFlow::Break(());
        }
        name => sink.event(name, data),
    };
    if delivered {
        ControlFlow::Continue(())
    } else {
        ControlFlow::Break(())
    }
}

fn error_message(data: &serde_json::Value) -> String {
    match data {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "unspecified bridge error".to_owned(),
        other => other
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_owned)
            .unwrap_or_else(|| other.to_string()),
    }
}
