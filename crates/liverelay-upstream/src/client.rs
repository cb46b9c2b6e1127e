//! Contract between the connection supervisor and upstream clients.
//!
//! A client never calls back into the relay. Everything it observes after
//! construction (events, runtime errors, disconnects) is sent as a
//! [`ClientMessage`] tagged with the generation it was created for, so the
//! supervisor can discard anything a superseded client emits late.

use std::future::Future;

use tokio::sync::mpsc;

use crate::error::UpstreamError;

/// Per-attempt routing options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    /// HTTP proxy to tunnel through; `None` connects directly.
    pub proxy: Option<String>,
}

impl ConnectOptions {
    pub fn direct() -> Self {
        Self { proxy: None }
    }

    pub fn via_proxy(proxy: impl Into<String>) -> Self {
        Self {
            proxy: Some(proxy.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientSignal {
    /// A named source event with its raw payload.
    Event {
        name: String,
        payload: serde_json::Value,
    },
    /// Runtime failure after a successful connect.
    Error(String),
    /// The source closed the stream or the link dropped.
    Disconnected(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientMessage {
    pub generation: u64,
    pub signal: ClientSignal,
}

/// Sending half handed to each client at construction.
#[derive(Debug, Clone)]
pub struct SignalSink {
    generation: u64,
    tx: mpsc::UnboundedSender<ClientMessage>,
}

impl SignalSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<ClientMessage>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns `false` once the owning supervisor is gone.
    pub fn emit(&self, signal: ClientSignal) -> bool {
        self.tx
            .send(ClientMessage {
                generation: self.generation,
                signal,
            })
            .is_ok()
    }

    pub fn event(&self, name: impl Into<String>, payload: serde_json::Value) -> bool {
        self.emit(ClientSignal::Event {
            name: name.into(),
            payload,
        })
    }

    pub fn error(&self, message: impl Into<String>) -> bool {
        self.emit(ClientSignal::Error(message.into()))
    }

    pub fn disconnected(&self, reason: impl Into<String>) -> bool {
        self.emit(ClientSignal::Disconnected(reason.into()))
    }
}

/// One live subscription to one upstream source.
pub trait UpstreamClient: Send + 'static {
    /// Establish the subscription. Events flow through the sink only after
    /// this resolves `Ok`.
    fn connect(&mut self) -> impl Future<Output = Result<(), UpstreamError>> + Send;

    /// Tear the subscription down and stop emitting. Must be idempotent.
    fn disconnect(&mut self) -> impl Future<Output = ()> + Send;
}

/// Factory for fresh clients; one is created per connection attempt.
pub trait UpstreamConnector: Send + Sync + 'static {
    type Client: UpstreamClient;

    fn create(&self, source_id: &str, options: ConnectOptions, sink: SignalSink) -> Self::Client;
}
