//! In-memory loopback transport.
//!
//! Useful for development and tests: the peer half stands in for the remote
//! side of the connection. Frames are delivered in order and without loss
//! over unbounded channels.

use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{Connection, Connector, FrameSink, TransportError};

type Endpoint = (mpsc::UnboundedSender<Bytes>, mpsc::UnboundedReceiver<Bytes>);

/// Connector whose connection is wired to a [`MemoryPeer`].
///
/// Each pair supports exactly one `connect` call.
pub struct MemoryConnector {
    endpoint: Mutex<Option<Endpoint>>,
}

impl MemoryConnector {
    /// Create a connector and the peer standing in for the remote side.
    #[must_use]
    pub fn pair() -> (Self, MemoryPeer) {
        let (to_client, from_peer) = mpsc::unbounded_channel();
        let (to_peer, from_client) = mpsc::unbounded_channel();

        let connector = Self {
            endpoint: Mutex::new(Some((to_peer, from_peer))),
        };
        let peer = MemoryPeer {
            tx: to_client,
            rx: from_client,
        };
        (connector, peer)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, _url: &str) -> Result<Connection, TransportError> {
        let (tx, rx) = self
            .endpoint
            .lock()
            .map_err(|_| TransportError::Connect("endpoint lock poisoned".to_owned()))?
            .take()
            .ok_or_else(|| TransportError::Connect("memory endpoint already connected".to_owned()))?;

        Ok(Connection {
            sink: Box::new(MemoryFrameSink { tx: Some(tx) }),
            stream: UnboundedReceiverStream::new(rx).map(Ok).boxed(),
        })
    }
}

struct MemoryFrameSink {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
}

#[async_trait]
impl FrameSink for MemoryFrameSink {
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        self.tx
            .as_ref()
            .ok_or(TransportError::Closed)?
            .send(frame)
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx.take();
        Ok(())
    }
}

/// The remote side of an in-memory connection.
pub struct MemoryPeer {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl MemoryPeer {
    /// Deliver a frame to the client.
    ///
    /// # Errors
    /// Returns [`TransportError::Closed`] if the client side is gone.
    pub fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        self.tx.send(frame).map_err(|_| TransportError::Closed)
    }

    /// Receive the next frame sent by the client, or `None` after the client
    /// closes its sink.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Drop the peer, ending the client's inbound stream.
    pub fn hang_up(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (connector, mut peer) = MemoryConnector::pair();
        let mut conn = connector.connect("mem://test").await.unwrap();

        conn.sink.send(Bytes::from_static(b"ping")).await.unwrap();
        assert_eq!(peer.recv().await.unwrap(), Bytes::from_static(b"ping"));

        peer.send(Bytes::from_static(b"pong")).unwrap();
        let frame = conn.stream.next().await.unwrap().unwrap();
        assert_eq!(frame, Bytes::from_static(b"pong"));
    }

    #[tokio::test]
    async fn test_second_connect_fails() {
        let (connector, _peer) = MemoryConnector::pair();
        connector.connect("mem://test").await.unwrap();
        assert!(connector.connect("mem://test").await.is_err());
    }

    #[tokio::test]
    async fn test_close_ends_peer_recv() {
        let (connector, mut peer) = MemoryConnector::pair();
        let mut conn = connector.connect("mem://test").await.unwrap();

        conn.sink.close().await.unwrap();
        assert!(peer.recv().await.is_none());
        assert!(conn.sink.send(Bytes::from_static(b"x")).await.is_err());
    }

    #[tokio::test]
    async fn test_hang_up_ends_client_stream() {
        let (connector, peer) = MemoryConnector::pair();
        let mut conn = connector.connect("mem://test").await.unwrap();

        peer.hang_up();
        assert!(conn.stream.next().await.is_none());
    }
}
