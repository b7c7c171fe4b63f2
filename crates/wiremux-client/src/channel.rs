//! Channel handles.

use std::fmt;

use wiremux_proto::{CloseChanRes, CloseChannelAction, Command};

use crate::{
    client::{ChannelRecord, Client, ResponseFuture, SendOptions},
    error::ClientError,
};

/// A handle bound to one multiplexed channel id.
///
/// Sends stamp the command with the handle's id and inherit the client's
/// ref/response contract. The id, service, and name are fixed at open time.
#[derive(Clone)]
pub struct Channel {
    client: Client,
    id: i32,
    service: String,
    name: Option<String>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("service", &self.service)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Channel {
    pub(crate) fn new(client: Client, id: i32, service: String, name: Option<String>) -> Self {
        Self {
            client,
            id,
            service,
            name,
        }
    }

    pub(crate) fn from_record(client: Client, record: &ChannelRecord) -> Self {
        Self::new(
            client,
            record.id,
            record.service.clone(),
            record.name.clone(),
        )
    }

    /// The remote-assigned channel id.
    #[must_use]
    pub fn id(&self) -> i32 {
        self.id
    }

    /// The service this channel is attached to.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// The channel's session-unique name, if one was supplied at open time.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Send a correlated command on this channel.
    ///
    /// # Errors
    /// As [`Client::request`].
    pub async fn request(&self, mut command: Command) -> Result<ResponseFuture, ClientError> {
        command.channel = self.id;
        self.client.request(command).await
    }

    /// Send a correlated command with explicit options.
    ///
    /// # Errors
    /// As [`Client::request_with`].
    pub async fn request_with(
        &self,
        mut command: Command,
        options: SendOptions,
    ) -> Result<ResponseFuture, ClientError> {
        command.channel = self.id;
        self.client.request_with(command, options).await
    }

    /// Send an uncorrelated command on this channel.
    ///
    /// # Errors
    /// As [`Client::post`].
    pub async fn post(&self, mut command: Command) -> Result<(), ClientError> {
        command.channel = self.id;
        self.client.post(command).await
    }

    /// Close this channel.
    ///
    /// # Errors
    /// As [`Client::close_channel`].
    pub async fn close(&self, action: CloseChannelAction) -> Result<CloseChanRes, ClientError> {
        self.client.close_channel(self.id, action).await
    }
}
