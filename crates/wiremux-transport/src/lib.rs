//! Duplex frame transports for the multiplexed session client.
//!
//! Provides:
//! - The [`Connector`]/[`FrameSink`] boundary (opaque byte frames)
//! - WebSocket transport (feature: ws)
//! - In-memory loopback transport for development and tests

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

pub mod memory;

#[cfg(feature = "ws")]
pub mod ws;

pub use memory::{MemoryConnector, MemoryPeer};

#[cfg(feature = "ws")]
pub use ws::WsConnector;

/// Transport error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("receive failed: {0}")]
    Recv(String),
    #[error("connection closed")]
    Closed,
}

/// Inbound frames, ending when the connection does.
pub type FrameStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// An established duplex connection, split into halves.
pub struct Connection {
    /// Outbound half.
    pub sink: Box<dyn FrameSink>,
    /// Inbound half.
    pub stream: FrameStream,
}

/// Trait for establishing a connection against a resolved endpoint URL.
///
/// The returned future resolving is the readiness signal: a `Connection` is
/// open and ready to carry frames.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection to `url`.
    ///
    /// # Errors
    /// Returns an error if the endpoint is unreachable or the handshake fails.
    async fn connect(&self, url: &str) -> Result<Connection, TransportError>;
}

/// Trait for the outbound half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one opaque frame.
    ///
    /// # Errors
    /// Returns an error if the connection is closed or the write fails.
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError>;

    /// Close the connection.
    ///
    /// # Errors
    /// Returns an error if the close handshake fails.
    async fn close(&mut self) -> Result<(), TransportError>;
}
