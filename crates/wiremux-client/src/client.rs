//! The multiplexer: one physical connection, many logical channels.

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    task::{Context, Poll},
};

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::{Mutex as AsyncMutex, broadcast, oneshot};
use uuid::Uuid;
use wiremux_proto::{
    Body, BootStage, CloseChanRes, CloseChannelAction, Command, ContainerPhase, OpenChannelAction,
    OpenChannelState,
};
use wiremux_transport::{Connector, FrameSink, FrameStream};

use crate::{
    adapter::Adapter,
    channel::Channel,
    error::ClientError,
    events::Event,
    services::{self, OT_SERVICE},
};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Closed,
    Connecting,
    Open,
}

/// A registered logical channel. Ids are assigned by the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRecord {
    pub id: i32,
    pub service: String,
    pub name: Option<String>,
}

/// Options for correlated sends.
#[derive(Debug, Clone, Copy)]
pub struct SendOptions {
    /// Assign a fresh ref when the command has none.
    pub auto_ref: bool,
    /// Reject the response future when the response body is a protocol error.
    pub throw_errors: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            auto_ref: true,
            throw_errors: true,
        }
    }
}

pub(crate) struct PendingRequest {
    tx: oneshot::Sender<Result<Command, ClientError>>,
    throw_errors: bool,
}

pub(crate) struct ExecSlot {
    pub(crate) channel: Option<i32>,
    pub(crate) output: String,
    pub(crate) tx: oneshot::Sender<Result<String, ClientError>>,
}

/// All session-wide mutable state, owned exclusively by the multiplexer.
#[derive(Default)]
pub(crate) struct MuxState {
    pub(crate) status: ConnectionStatus,
    pub(crate) pending: HashMap<String, PendingRequest>,
    pub(crate) channels: HashMap<i32, ChannelRecord>,
    pub(crate) names: HashMap<String, i32>,
    pub(crate) util_channels: HashMap<String, i32>,
    pub(crate) versions: HashMap<String, u64>,
    pub(crate) exec: Option<ExecSlot>,
    pub(crate) boot_stage: Option<BootStage>,
    pub(crate) container_phase: Option<ContainerPhase>,
    reader: Option<tokio::task::JoinHandle<()>>,
}

struct Config {
    url: Option<String>,
    adapter: Option<Arc<dyn Adapter>>,
}

struct Inner {
    connector: Box<dyn Connector>,
    config: Mutex<Config>,
    state: Mutex<MuxState>,
    sink: AsyncMutex<Option<Box<dyn FrameSink>>>,
    events: broadcast::Sender<Event>,
    ref_nonce: String,
    ref_seq: AtomicU64,
}

/// The multiplexing client.
///
/// Owns the physical connection, the channel table, and the pending-request
/// table. Cheap to clone; all clones share one session.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

/// Builder for [`Client`].
pub struct ClientBuilder {
    url: Option<String>,
    adapter: Option<Arc<dyn Adapter>>,
    connector: Option<Box<dyn Connector>>,
    event_capacity: usize,
}

impl ClientBuilder {
    /// Set the endpoint URL. An adapter result overrides this at connect time.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the endpoint adapter.
    #[must_use]
    pub fn adapter(mut self, adapter: impl Adapter + 'static) -> Self {
        self.adapter = Some(Arc::new(adapter));
        self
    }

    /// Override the transport connector. Defaults to the WebSocket connector.
    #[must_use]
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Box::new(connector));
        self
    }

    /// Capacity of the event broadcast channel.
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Build the client.
    #[must_use]
    pub fn build(self) -> Client {
        let (events, _) = broadcast::channel(self.event_capacity);
        Client {
            inner: Arc::new(Inner {
                connector: self
                    .connector
                    .unwrap_or_else(|| Box::new(wiremux_transport::WsConnector::new())),
                config: Mutex::new(Config {
                    url: self.url,
                    adapter: self.adapter,
                }),
                state: Mutex::new(MuxState::default()),
                sink: AsyncMutex::new(None),
                events,
                ref_nonce: Uuid::new_v4().simple().to_string()[..8].to_owned(),
                ref_seq: AtomicU64::new(0),
            }),
        }
    }
}

impl Client {
    /// Start building a client.
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder {
            url: None,
            adapter: None,
            connector: None,
            event_capacity: 256,
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, MuxState> {
        self.inner.state()
    }

    pub(crate) fn emit(&self, event: Event) {
        let _ = self.inner.events.send(event);
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.state().status
    }

    /// Subscribe to session events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.events.subscribe()
    }

    /// Snapshot of the currently registered channels.
    #[must_use]
    pub fn channels(&self) -> Vec<ChannelRecord> {
        self.state().channels.values().cloned().collect()
    }

    /// Last observed boot stage, if any.
    #[must_use]
    pub fn boot_stage(&self) -> Option<BootStage> {
        self.state().boot_stage
    }

    /// Last observed container phase, if any.
    #[must_use]
    pub fn container_phase(&self) -> Option<ContainerPhase> {
        self.state().container_phase
    }

    /// Replace the endpoint URL.
    ///
    /// # Errors
    /// Fails with [`ClientError::ConfigurationLocked`] unless closed.
    pub fn set_url(&self, url: impl Into<String>) -> Result<(), ClientError> {
        if self.status() != ConnectionStatus::Closed {
            return Err(ClientError::ConfigurationLocked);
        }
        self.inner.config_mut().url = Some(url.into());
        Ok(())
    }

    /// Replace the endpoint adapter.
    ///
    /// # Errors
    /// Fails with [`ClientError::ConfigurationLocked`] unless closed.
    pub fn set_adapter(&self, adapter: impl Adapter + 'static) -> Result<(), ClientError> {
        if self.status() != ConnectionStatus::Closed {
            return Err(ClientError::ConfigurationLocked);
        }
        self.inner.config_mut().adapter = Some(Arc::new(adapter));
        Ok(())
    }

    /// Resolve the endpoint, open the transport, and start dispatching.
    ///
    /// # Errors
    /// Fails if the adapter rejects, no URL is available, or the transport
    /// handshake fails. The client returns to the closed state on failure.
    pub async fn connect(&self) -> Result<(), ClientError> {
        {
            let mut state = self.state();
            if state.status != ConnectionStatus::Closed {
                return Err(ClientError::AlreadyConnected);
            }
            state.status = ConnectionStatus::Connecting;
        }

        match self.connect_inner().await {
            Ok(()) => {
                self.emit(Event::Connect);
                Ok(())
            }
            Err(e) => {
                self.state().status = ConnectionStatus::Closed;
                Err(e)
            }
        }
    }

    async fn connect_inner(&self) -> Result<(), ClientError> {
        let (mut url, adapter) = {
            let config = self.inner.config_mut();
            (config.url.clone(), config.adapter.clone())
        };

        if let Some(adapter) = adapter {
            let resolved = adapter.resolve().await?;
            if let Some(resolved_url) = resolved.url {
                url = Some(resolved_url);
            }
        }

        let url = url.ok_or(ClientError::MissingUrl)?;
        let connection = self.inner.connector.connect(&url).await?;
        *self.inner.sink.lock().await = Some(connection.sink);

        let reader = tokio::spawn(read_loop(Arc::clone(&self.inner), connection.stream));
        {
            let mut state = self.state();
            state.status = ConnectionStatus::Open;
            state.reader = Some(reader);
        }
        tracing::debug!("session open against {url}");
        Ok(())
    }

    /// Send a correlated command and obtain its response future.
    ///
    /// A fresh ref is assigned when the command has none; the returned future
    /// settles exactly once, when a response bearing that ref is dispatched.
    ///
    /// # Errors
    /// Fails if the session is not open or the transmit fails; transmit
    /// failure deregisters the pending request.
    pub async fn request(&self, command: Command) -> Result<ResponseFuture, ClientError> {
        self.request_with(command, SendOptions::default()).await
    }

    /// [`request`](Self::request) with explicit [`SendOptions`].
    ///
    /// # Errors
    /// As [`request`](Self::request); additionally fails with
    /// [`ClientError::MissingRef`] when `auto_ref` is off and the command
    /// carries no ref.
    pub async fn request_with(
        &self,
        mut command: Command,
        options: SendOptions,
    ) -> Result<ResponseFuture, ClientError> {
        if options.auto_ref && command.reference.is_empty() {
            command.reference = self.next_ref();
        }
        if command.reference.is_empty() {
            return Err(ClientError::MissingRef);
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state();
            if state.status != ConnectionStatus::Open {
                return Err(ClientError::NotConnected);
            }
            state.pending.insert(
                command.reference.clone(),
                PendingRequest {
                    tx,
                    throw_errors: options.throw_errors,
                },
            );
        }

        if let Err(e) = self.transmit(&command).await {
            self.state().pending.remove(&command.reference);
            return Err(e);
        }

        self.emit(Event::MessageSent(command));
        Ok(ResponseFuture { rx })
    }

    /// Send an uncorrelated command.
    ///
    /// # Errors
    /// Fails if the session is not open or the transmit fails.
    pub async fn post(&self, command: Command) -> Result<(), ClientError> {
        self.transmit(&command).await?;
        self.emit(Event::MessageSent(command));
        Ok(())
    }

    async fn transmit(&self, command: &Command) -> Result<(), ClientError> {
        let frame = command.to_bytes()?;
        let mut sink = self.inner.sink.lock().await;
        let sink = sink.as_mut().ok_or(ClientError::NotConnected)?;
        sink.send(Bytes::from(frame)).await?;
        Ok(())
    }

    fn next_ref(&self) -> String {
        let seq = self.inner.ref_seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{seq}", self.inner.ref_nonce)
    }

    /// Open a logical channel for `service`, optionally with a session-unique
    /// `name`.
    ///
    /// # Errors
    /// Fails with [`ClientError::DuplicateChannelName`] before any side effect
    /// when `name` is taken, or with the remote's error when the open is
    /// refused.
    pub async fn open_channel(
        &self,
        service: &str,
        name: Option<&str>,
        action: OpenChannelAction,
    ) -> Result<Channel, ClientError> {
        if let Some(name) = name {
            if self.state().names.contains_key(name) {
                return Err(ClientError::DuplicateChannelName(name.to_owned()));
            }
        }

        let response = self
            .request(Command::open_chan(service, name, action))
            .await?
            .await?;
        let Some(Body::OpenChanRes(res)) = response.body else {
            return Err(ClientError::UnexpectedResponse);
        };
        if res.state == OpenChannelState::Error {
            let message = if res.error.is_empty() {
                "channel open refused".to_owned()
            } else {
                res.error
            };
            return Err(ClientError::Protocol(message));
        }

        {
            let mut state = self.state();
            if let Some(name) = name {
                if state.names.contains_key(name) {
                    return Err(ClientError::DuplicateChannelName(name.to_owned()));
                }
                state.names.insert(name.to_owned(), res.id);
            }
            state.channels.insert(
                res.id,
                ChannelRecord {
                    id: res.id,
                    service: service.to_owned(),
                    name: name.map(str::to_owned),
                },
            );
        }

        self.emit(Event::ChannelOpened {
            id: res.id,
            service: service.to_owned(),
            name: name.map(str::to_owned),
        });
        Ok(Channel::new(
            self.clone(),
            res.id,
            service.to_owned(),
            name.map(str::to_owned),
        ))
    }

    /// Close channel `id`.
    ///
    /// The local record is removed whatever the remote reports; the error, if
    /// any, is surfaced after deregistration.
    ///
    /// # Errors
    /// Fails if the close request cannot be sent, or with the remote's
    /// protocol error.
    pub async fn close_channel(
        &self,
        id: i32,
        action: CloseChannelAction,
    ) -> Result<CloseChanRes, ClientError> {
        let pending = self.request(Command::close_chan(id, action)).await?;
        let response = pending.await;

        {
            let mut state = self.state();
            if let Some(record) = state.channels.remove(&id) {
                if let Some(name) = record.name {
                    state.names.remove(&name);
                }
            }
            state.util_channels.retain(|_, channel| *channel != id);
        }
        self.emit(Event::ChannelClosed { id });

        match response?.body {
            Some(Body::CloseChanRes(res)) => Ok(res),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Tear down the session. Returns `false` as a no-op when already closed.
    ///
    /// With `auto_close`, every registered channel is closed first,
    /// sequentially; close failures are logged, not fatal. All pending
    /// requests, including any in-flight execution, are rejected with
    /// [`ClientError::Disconnected`].
    pub async fn disconnect(&self, auto_close: bool) -> bool {
        if self.status() == ConnectionStatus::Closed {
            return false;
        }

        if auto_close {
            let ids: Vec<i32> = self.state().channels.keys().copied().collect();
            for id in ids {
                if let Err(e) = self.close_channel(id, CloseChannelAction::TryClose).await {
                    tracing::warn!(channel = id, "channel close during disconnect failed: {e}");
                }
            }
        }

        {
            let mut sink = self.inner.sink.lock().await;
            if let Some(mut sink) = sink.take() {
                if let Err(e) = sink.close().await {
                    tracing::debug!("transport close failed: {e}");
                }
            }
        }

        let reader = {
            let mut state = self.state();
            state.status = ConnectionStatus::Closed;
            if let Some(slot) = state.exec.take() {
                let _ = slot.tx.send(Err(ClientError::Disconnected));
            }
            for (_, request) in state.pending.drain() {
                let _ = request.tx.send(Err(ClientError::Disconnected));
            }
            state.channels.clear();
            state.names.clear();
            state.util_channels.clear();
            state.versions.clear();
            state.boot_stage = None;
            state.container_phase = None;
            state.reader.take()
        };
        if let Some(reader) = reader {
            reader.abort();
        }

        self.emit(Event::Disconnect);
        true
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, MuxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn config_mut(&self) -> MutexGuard<'_, Config> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Dispatch one inbound frame. Runs on the reader task only.
    fn dispatch(&self, frame: &[u8]) {
        let command = match Command::from_bytes(frame) {
            Ok(command) => command,
            Err(e) => {
                tracing::debug!("discarding undecodable frame: {e}");
                return;
            }
        };

        let mut toast = None;
        {
            let mut state = self.state();

            match &command.body {
                Some(Body::BootStatus { stage }) => state.boot_stage = Some(*stage),
                Some(Body::ContainerState { state: phase }) => {
                    state.container_phase = Some(*phase);
                }
                Some(Body::Toast { text }) => toast = Some(text.clone()),
                _ => {}
            }

            if state
                .exec
                .as_ref()
                .is_some_and(|slot| slot.channel == Some(command.channel))
            {
                match &command.body {
                    Some(Body::Output { data }) => {
                        if let Some(slot) = state.exec.as_mut() {
                            slot.output.push_str(data);
                        }
                    }
                    Some(Body::State {
                        state: wiremux_proto::ProcessState::Stopped,
                    }) => {
                        if let Some(slot) = state.exec.take() {
                            let _ = slot.tx.send(Ok(slot.output));
                        }
                    }
                    _ => {}
                }
            }

            if let Some(Body::OtStatus(status)) = &command.body {
                let path = state
                    .channels
                    .get(&command.channel)
                    .filter(|record| record.service == OT_SERVICE)
                    .and_then(|record| {
                        status
                            .linked_file
                            .as_ref()
                            .map(|file| file.path.clone())
                            .or_else(|| {
                                record
                                    .name
                                    .as_deref()?
                                    .strip_prefix("ot:")
                                    .map(str::to_owned)
                            })
                    });
                if let Some(path) = path {
                    state
                        .versions
                        .insert(services::normalize_path(&path), status.version);
                }
            }

            if !command.reference.is_empty() {
                if let Some(request) = state.pending.remove(&command.reference) {
                    let result = match &command.body {
                        Some(Body::Error { message }) if request.throw_errors => {
                            Err(ClientError::Protocol(message.clone()))
                        }
                        _ => Ok(command.clone()),
                    };
                    let _ = request.tx.send(result);
                }
            }
        }

        let _ = self.events.send(Event::Message(command));
        if let Some(text) = toast {
            let _ = self.events.send(Event::Toast { text });
        }
    }
}

async fn read_loop(inner: Arc<Inner>, mut stream: FrameStream) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(bytes) => inner.dispatch(&bytes),
            Err(e) => tracing::warn!("transport receive error: {e}"),
        }
    }
    tracing::debug!("inbound stream ended");
}

/// Future for a correlated response. Settles exactly once.
#[derive(Debug)]
pub struct ResponseFuture {
    rx: oneshot::Receiver<Result<Command, ClientError>>,
}

impl Future for ResponseFuture {
    type Output = Result<Command, ClientError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|settled| match settled {
            Ok(result) => result,
            Err(_) => Err(ClientError::Disconnected),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::adapter::{self, AdapterError, AdapterResult, StaticAdapter};
    use crate::testutil::{connected, recv_command, reply, send_on};
    use wiremux_proto::{CloseChannelStatus, OpenChanRes};
    use wiremux_transport::MemoryConnector;

    fn open_res(id: i32) -> Body {
        Body::OpenChanRes(OpenChanRes {
            id,
            state: OpenChannelState::Created,
            error: String::new(),
        })
    }

    #[tokio::test]
    async fn test_auto_ref_assigned_and_future_settles() {
        let (client, mut peer) = connected().await;

        let response = client.request(Command::read("test.txt")).await.unwrap();
        let request = recv_command(&mut peer).await;
        assert!(!request.reference.is_empty());

        reply(
            &peer,
            &request,
            Body::File(wiremux_proto::File {
                path: "test.txt".to_owned(),
                kind: wiremux_proto::FileKind::File,
                content: "hello".to_owned(),
            }),
        );

        let resolved = response.await.unwrap();
        assert_eq!(resolved.reference, request.reference);
        assert!(matches!(resolved.body, Some(Body::File(_))));
    }

    #[tokio::test]
    async fn test_refs_are_unique_per_request() {
        let (client, mut peer) = connected().await;

        let _a = client.request(Command::read("a")).await.unwrap();
        let _b = client.request(Command::read("b")).await.unwrap();
        let first = recv_command(&mut peer).await;
        let second = recv_command(&mut peer).await;
        assert_ne!(first.reference, second.reference);
    }

    #[tokio::test]
    async fn test_responses_correlate_out_of_order() {
        let (client, mut peer) = connected().await;

        let response_a = client.request(Command::read("a")).await.unwrap();
        let response_b = client.request(Command::read("b")).await.unwrap();
        let request_a = recv_command(&mut peer).await;
        let request_b = recv_command(&mut peer).await;

        // Answer in reverse order; correlation is by ref, not arrival.
        reply(
            &peer,
            &request_b,
            Body::File(wiremux_proto::File {
                path: "b".to_owned(),
                kind: wiremux_proto::FileKind::File,
                content: "B".to_owned(),
            }),
        );
        reply(
            &peer,
            &request_a,
            Body::File(wiremux_proto::File {
                path: "a".to_owned(),
                kind: wiremux_proto::FileKind::File,
                content: "A".to_owned(),
            }),
        );

        let resolved_b = response_b.await.unwrap();
        let resolved_a = response_a.await.unwrap();
        assert!(matches!(resolved_a.body, Some(Body::File(f)) if f.content == "A"));
        assert!(matches!(resolved_b.body, Some(Body::File(f)) if f.content == "B"));
    }

    #[tokio::test]
    async fn test_duplicate_channel_name_leaves_no_side_effects() {
        let (client, mut peer) = connected().await;

        let opener = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .open_channel("shell", Some("main"), OpenChannelAction::AttachOrCreate)
                    .await
            })
        };
        let open = recv_command(&mut peer).await;
        reply(&peer, &open, open_res(1));
        opener.await.unwrap().unwrap();

        let err = client
            .open_channel("shell", Some("main"), OpenChannelAction::AttachOrCreate)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::DuplicateChannelName(name) if name == "main"));
        assert_eq!(client.channels().len(), 1);

        // The rejected open never reached the wire.
        let quiet = tokio::time::timeout(Duration::from_millis(50), peer.recv()).await;
        assert!(quiet.is_err());
    }

    #[tokio::test]
    async fn test_close_channel_removes_record_despite_remote_error() {
        let (client, mut peer) = connected().await;

        let opener = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .open_channel("shell", None, OpenChannelAction::AttachOrCreate)
                    .await
            })
        };
        let open = recv_command(&mut peer).await;
        reply(&peer, &open, open_res(5));
        let channel = opener.await.unwrap().unwrap();

        let closer = tokio::spawn(async move { channel.close(CloseChannelAction::TryClose).await });
        let close = recv_command(&mut peer).await;
        reply(
            &peer,
            &close,
            Body::Error {
                message: "no such channel".to_owned(),
            },
        );

        let err = closer.await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
        assert!(client.channels().is_empty());
    }

    #[tokio::test]
    async fn test_close_channel_returns_remote_status() {
        let (client, mut peer) = connected().await;

        let opener = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .open_channel("shell", None, OpenChannelAction::AttachOrCreate)
                    .await
            })
        };
        let open = recv_command(&mut peer).await;
        reply(&peer, &open, open_res(2));
        opener.await.unwrap().unwrap();

        let client2 = client.clone();
        let closer =
            tokio::spawn(
                async move { client2.close_channel(2, CloseChannelAction::TryClose).await },
            );
        let close = recv_command(&mut peer).await;
        reply(
            &peer,
            &close,
            Body::CloseChanRes(wiremux_proto::CloseChanRes {
                id: 2,
                status: CloseChannelStatus::Closed,
            }),
        );

        let res = closer.await.unwrap().unwrap();
        assert_eq!(res.status, CloseChannelStatus::Closed);
        assert!(client.channels().is_empty());
    }

    #[tokio::test]
    async fn test_channel_send_stamps_its_id() {
        let (client, mut peer) = connected().await;

        let opener = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .open_channel("shell", None, OpenChannelAction::AttachOrCreate)
                    .await
            })
        };
        let open = recv_command(&mut peer).await;
        reply(&peer, &open, open_res(3));
        let channel = opener.await.unwrap().unwrap();

        let _response = channel.request(Command::read("x")).await.unwrap();
        let request = recv_command(&mut peer).await;
        assert_eq!(request.channel, 3);

        let rendered = format!("{channel:?}");
        assert!(rendered.contains("id: 3"));
        assert!(rendered.contains("shell"));
    }

    #[tokio::test]
    async fn test_disconnect_twice_notifies_once() {
        let (client, _peer) = connected().await;
        let mut events = client.subscribe();

        assert!(client.disconnect(false).await);
        assert_eq!(client.status(), ConnectionStatus::Closed);
        assert!(matches!(events.recv().await.unwrap(), Event::Disconnect));

        assert!(!client.disconnect(false).await);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_closes_channels_first() {
        let (client, mut peer) = connected().await;

        let opener = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .open_channel("shell", None, OpenChannelAction::AttachOrCreate)
                    .await
            })
        };
        let open = recv_command(&mut peer).await;
        reply(&peer, &open, open_res(1));
        opener.await.unwrap().unwrap();

        let disconnector = {
            let client = client.clone();
            tokio::spawn(async move { client.disconnect(true).await })
        };
        let close = recv_command(&mut peer).await;
        match &close.body {
            Some(Body::CloseChan(req)) => assert_eq!(req.id, 1),
            other => panic!("unexpected body: {other:?}"),
        }
        reply(
            &peer,
            &close,
            Body::CloseChanRes(wiremux_proto::CloseChanRes {
                id: 1,
                status: CloseChannelStatus::Closed,
            }),
        );

        assert!(disconnector.await.unwrap());
        assert!(client.channels().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_rejects_all_pending_requests() {
        let (client, mut peer) = connected().await;

        let response = client.request(Command::read("a")).await.unwrap();
        let _request = recv_command(&mut peer).await;

        assert!(client.disconnect(false).await);
        let err = response.await.unwrap_err();
        assert!(matches!(err, ClientError::Disconnected));
    }

    #[tokio::test]
    async fn test_undecodable_frames_are_discarded() {
        let (client, mut peer) = connected().await;

        peer.send(Bytes::from_static(b"\x00not json")).unwrap();
        peer.send(Bytes::from_static(b"{\"channel\":0,\"type\":\"mystery\"}"))
            .unwrap();

        // The session keeps working.
        let response = client.request(Command::read("ok")).await.unwrap();
        let request = recv_command(&mut peer).await;
        reply(&peer, &request, Body::Ok {});
        assert!(matches!(response.await.unwrap().body, Some(Body::Ok {})));
    }

    #[tokio::test]
    async fn test_lifecycle_signals_overwrite_cache() {
        let (client, peer) = connected().await;
        let mut events = client.subscribe();

        assert_eq!(client.boot_stage(), None);
        send_on(
            &peer,
            0,
            Body::BootStatus {
                stage: BootStage::Complete,
            },
        );
        send_on(
            &peer,
            0,
            Body::ContainerState {
                state: ContainerPhase::Ready,
            },
        );

        let mut seen = 0;
        while seen < 2 {
            if matches!(events.recv().await.unwrap(), Event::Message(_)) {
                seen += 1;
            }
        }
        assert_eq!(client.boot_stage(), Some(BootStage::Complete));
        assert_eq!(client.container_phase(), Some(ContainerPhase::Ready));
    }

    #[tokio::test]
    async fn test_toast_gets_its_own_event() {
        let (client, peer) = connected().await;
        let mut events = client.subscribe();

        send_on(
            &peer,
            0,
            Body::Toast {
                text: "disk is almost full".to_owned(),
            },
        );

        loop {
            match events.recv().await.unwrap() {
                Event::Toast { text } => {
                    assert_eq!(text, "disk is almost full");
                    break;
                }
                Event::Message(_) => {}
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_protocol_error_rejects_or_resolves_by_option() {
        let (client, mut peer) = connected().await;

        let throwing = client.request(Command::read("a")).await.unwrap();
        let request = recv_command(&mut peer).await;
        reply(
            &peer,
            &request,
            Body::Error {
                message: "denied".to_owned(),
            },
        );
        let err = throwing.await.unwrap_err();
        assert!(matches!(err, ClientError::Protocol(message) if message == "denied"));

        let lenient = client
            .request_with(
                Command::read("b"),
                SendOptions {
                    throw_errors: false,
                    ..SendOptions::default()
                },
            )
            .await
            .unwrap();
        let request = recv_command(&mut peer).await;
        reply(
            &peer,
            &request,
            Body::Error {
                message: "denied".to_owned(),
            },
        );
        let resolved = lenient.await.unwrap();
        assert!(matches!(resolved.body, Some(Body::Error { message }) if message == "denied"));
    }

    #[tokio::test]
    async fn test_request_without_ref_is_refused() {
        let (client, _peer) = connected().await;
        let err = client
            .request_with(
                Command::read("a"),
                SendOptions {
                    auto_ref: false,
                    throw_errors: true,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::MissingRef));
    }

    #[tokio::test]
    async fn test_configuration_locked_while_open() {
        let (client, _peer) = connected().await;

        assert!(matches!(
            client.set_url("mem://elsewhere"),
            Err(ClientError::ConfigurationLocked)
        ));
        assert!(matches!(
            client.set_adapter(StaticAdapter::new("mem://elsewhere")),
            Err(ClientError::ConfigurationLocked)
        ));

        client.disconnect(false).await;
        assert!(client.set_url("mem://elsewhere").is_ok());
    }

    #[tokio::test]
    async fn test_connect_twice_fails() {
        let (client, _peer) = connected().await;
        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, ClientError::AlreadyConnected));
    }

    #[tokio::test]
    async fn test_adapter_resolves_endpoint() {
        let (connector, _peer) = MemoryConnector::pair();
        let client = Client::builder()
            .adapter(adapter::from_fn(|| async {
                Ok(AdapterResult::with_url("mem://resolved"))
            }))
            .connector(connector)
            .build();

        client.connect().await.unwrap();
        assert_eq!(client.status(), ConnectionStatus::Open);
    }

    #[tokio::test]
    async fn test_adapter_failure_aborts_connect() {
        let (connector, _peer) = MemoryConnector::pair();
        let client = Client::builder()
            .url("mem://configured")
            .adapter(adapter::from_fn(|| async {
                Err(AdapterError::Resolution("no credentials".to_owned()))
            }))
            .connector(connector)
            .build();

        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, ClientError::Adapter(_)));
        assert_eq!(client.status(), ConnectionStatus::Closed);
    }

    #[tokio::test]
    async fn test_connect_without_url_fails() {
        let (connector, _peer) = MemoryConnector::pair();
        let client = Client::builder().connector(connector).build();
        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, ClientError::MissingUrl));
        assert_eq!(client.status(), ConnectionStatus::Closed);
    }
}
