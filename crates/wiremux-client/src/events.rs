//! Typed session notifications.

use wiremux_proto::Command;

/// The closed set of session events.
///
/// Subscribe via [`Client::subscribe`](crate::Client::subscribe); events are
/// broadcast, so every subscriber sees every event.
#[derive(Debug, Clone)]
pub enum Event {
    /// The session reached the open state.
    Connect,
    /// The session was torn down.
    Disconnect,
    /// An inbound message was dispatched.
    Message(Command),
    /// An outbound message was transmitted.
    MessageSent(Command),
    /// A channel was opened and registered.
    ChannelOpened {
        id: i32,
        service: String,
        name: Option<String>,
    },
    /// A channel was closed and deregistered.
    ChannelClosed { id: i32 },
    /// The remote surfaced a user-facing notice.
    Toast { text: String },
}
