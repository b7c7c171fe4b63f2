//! Client error types.

use thiserror::Error;
use wiremux_proto::CodecError;
use wiremux_transport::TransportError;

use crate::adapter::AdapterError;

/// Client error.
///
/// Protocol errors are local to the request that provoked them and never
/// invalidate the session; [`ClientError::Disconnected`] is the only error
/// produced by session teardown.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("adapter failed: {0}")]
    Adapter(#[from] AdapterError),
    #[error("no endpoint URL configured")]
    MissingUrl,
    #[error("configuration can only change while disconnected")]
    ConfigurationLocked,
    #[error("already connected")]
    AlreadyConnected,
    #[error("not connected")]
    NotConnected,
    #[error("request carries no correlation ref")]
    MissingRef,
    #[error("duplicate channel name: {0}")]
    DuplicateChannelName(String),
    #[error("remote reported an error: {0}")]
    Protocol(String),
    #[error("an execution is already in flight")]
    ExecInProgress,
    #[error("disconnected before completion")]
    Disconnected,
    #[error("unexpected response payload")]
    UnexpectedResponse,
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}
