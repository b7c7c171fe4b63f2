//! Multiplexing client for a remote execution environment.
//!
//! One physical connection carries many logical channels, each addressed by a
//! remote-assigned integer id. This crate provides:
//! - [`Client`]: the multiplexer (connect, correlated request/response,
//!   channel lifecycle, disconnect)
//! - [`Channel`]: a handle bound to one multiplexed id
//! - [`Event`]: the closed set of session notifications
//! - [`Adapter`]: the endpoint resolution seam
//! - Utility operations (file I/O, remote execution, edit history) built on
//!   per-service singleton channels

pub mod adapter;
pub mod channel;
pub mod client;
pub mod error;
pub mod events;
pub mod services;

pub use adapter::{Adapter, AdapterError, AdapterResult, StaticAdapter};
pub use channel::Channel;
pub use client::{
    ChannelRecord, Client, ClientBuilder, ConnectionStatus, ResponseFuture, SendOptions,
};
pub use error::ClientError;
pub use events::Event;
pub use services::{EXEC_SERVICE, FILES_SERVICE, OT_SERVICE};

#[cfg(test)]
pub(crate) mod testutil;
