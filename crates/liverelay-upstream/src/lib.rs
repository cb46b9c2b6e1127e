//! liverelay-upstream: upstream source IO boundary.
//! Defines the client/connector contract the supervisor drives, the
//! generation-tagged signal messages clients emit, and a JSON-over-WebSocket
//! bridge client with optional HTTP CONNECT proxy routing. No relay logic.

pub mod bridge;
pub mod client;
pub mod error;
pub mod proxy;

pub use bridge::{BridgeClient, BridgeConnector};
pub use client::{
    ClientMessage, ClientSignal, ConnectOptions, SignalSink, UpstreamClient, UpstreamConnector,
};
pub use error::UpstreamError;
