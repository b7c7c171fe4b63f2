//! WebSocket frame transport.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt, future};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message,
};

use crate::{Connection, Connector, FrameSink, TransportError};

type WsSink = futures::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// WebSocket connector (`ws://` / `wss://` endpoints).
///
/// Messages travel as binary frames; inbound text/ping/pong frames are
/// dropped, and a close frame ends the inbound stream.
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

impl WsConnector {
    /// Create a new WebSocket connector.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Connection, TransportError> {
        let (ws_stream, _response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        tracing::debug!("websocket connected to {url}");

        let (sink, stream) = ws_stream.split();

        let stream = stream
            .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
            .filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Binary(data)) => Some(Ok(Bytes::from(data))),
                    Ok(_) => None,
                    Err(e) => Some(Err(TransportError::Recv(e.to_string()))),
                })
            })
            .boxed();

        Ok(Connection {
            sink: Box::new(WsFrameSink { sink: Some(sink) }),
            stream,
        })
    }
}

struct WsFrameSink {
    sink: Option<WsSink>,
}

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        let sink = self.sink.as_mut().ok_or(TransportError::Closed)?;
        sink.send(Message::Binary(frame.to_vec()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut sink) = self.sink.take() {
            sink.send(Message::Close(None))
                .await
                .map_err(|e| TransportError::Send(e.to_string()))?;
        }
        Ok(())
    }
}
