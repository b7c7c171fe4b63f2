//! Utility operations built atop per-service singleton channels.
//!
//! File I/O, remote command execution, and edit-history retrieval are all
//! pre-scripted request/response exchanges over channels that are opened
//! lazily and memoized per service key.

use std::collections::HashMap;

use tokio::sync::oneshot;
use wiremux_proto::{Body, Command, File, OpenChannelAction, OtPacket, StatResult};

use crate::{
    channel::Channel,
    client::{Client, ExecSlot},
    error::ClientError,
};

/// File service key.
pub const FILES_SERVICE: &str = "gcsfiles";
/// Remote execution service key.
pub const EXEC_SERVICE: &str = "exec";
/// Collaborative-editing service key.
pub const OT_SERVICE: &str = "ot";

/// Normalize a path for the edit-version cache and channel naming.
pub(crate) fn normalize_path(path: &str) -> String {
    let mut path = path.trim();
    while let Some(rest) = path.strip_prefix("./") {
        path = rest;
    }
    path.trim_start_matches('/').to_owned()
}

impl Client {
    /// Lazily open (or return the memoized) channel for a utility service.
    ///
    /// At most one channel exists per `service` key; a distinct `name` (e.g.
    /// per-file editing channels) gets its own entry. A channel already open
    /// under `name` is adopted rather than reopened.
    ///
    /// # Errors
    /// As [`Client::open_channel`].
    pub async fn util_channel(
        &self,
        service: &str,
        name: Option<&str>,
    ) -> Result<Channel, ClientError> {
        let key = name.map_or_else(|| service.to_owned(), |name| format!("{service}/{name}"));
        let existing = {
            let state = self.state();
            state
                .util_channels
                .get(&key)
                .copied()
                .or_else(|| name.and_then(|name| state.names.get(name).copied()))
                .and_then(|id| state.channels.get(&id).cloned())
        };
        if let Some(record) = existing {
            self.state().util_channels.insert(key, record.id);
            return Ok(Channel::from_record(self.clone(), &record));
        }

        let channel = self
            .open_channel(service, name, OpenChannelAction::AttachOrCreate)
            .await?;
        self.state().util_channels.insert(key, channel.id());
        Ok(channel)
    }

    /// Read a file's content.
    ///
    /// # Errors
    /// Fails with the remote's error, or if the session is not open.
    pub async fn read_file(&self, path: &str) -> Result<String, ClientError> {
        let channel = self.util_channel(FILES_SERVICE, None).await?;
        let response = channel.request(Command::read(path)).await?.await?;
        match response.body {
            Some(Body::File(file)) => Ok(file.content),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Write a file.
    ///
    /// # Errors
    /// Fails with the remote's error, or if the session is not open.
    pub async fn write_file(&self, path: &str, content: &str) -> Result<(), ClientError> {
        let channel = self.util_channel(FILES_SERVICE, None).await?;
        let response = channel.request(Command::write(path, content)).await?.await?;
        match response.body {
            Some(Body::Ok {}) => Ok(()),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Stat a file.
    ///
    /// # Errors
    /// Fails with the remote's error, or if the session is not open.
    pub async fn stat_file(&self, path: &str) -> Result<StatResult, ClientError> {
        let channel = self.util_channel(FILES_SERVICE, None).await?;
        let response = channel.request(Command::stat(path)).await?.await?;
        match response.body {
            Some(Body::StatRes(stat)) => Ok(stat),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// List a directory.
    ///
    /// # Errors
    /// Fails with the remote's error, or if the session is not open.
    pub async fn read_dir(&self, path: &str) -> Result<Vec<File>, ClientError> {
        let channel = self.util_channel(FILES_SERVICE, None).await?;
        let response = channel.request(Command::readdir(path)).await?.await?;
        match response.body {
            Some(Body::Files { files }) => Ok(files),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Create a directory.
    ///
    /// # Errors
    /// Fails with the remote's error, or if the session is not open.
    pub async fn create_dir(&self, path: &str) -> Result<(), ClientError> {
        let channel = self.util_channel(FILES_SERVICE, None).await?;
        let response = channel.request(Command::mkdir(path)).await?.await?;
        match response.body {
            Some(Body::Ok {}) => Ok(()),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Run a remote command and collect its output.
    ///
    /// At most one execution may be in flight per session; a second attempt
    /// fails fast with [`ClientError::ExecInProgress`]. Streamed output
    /// fragments are concatenated in arrival order; the future resolves on
    /// the execution's stop signal, or rejects with
    /// [`ClientError::Disconnected`] if the session is torn down first.
    ///
    /// # Errors
    /// As above, or any channel-open/send failure.
    pub async fn exec(
        &self,
        args: Vec<String>,
        env: Option<HashMap<String, String>>,
    ) -> Result<String, ClientError> {
        let rx = {
            let mut state = self.state();
            if state.exec.is_some() {
                return Err(ClientError::ExecInProgress);
            }
            let (tx, rx) = oneshot::channel();
            state.exec = Some(ExecSlot {
                channel: None,
                output: String::new(),
                tx,
            });
            rx
        };

        if let Err(e) = self.start_exec(args, env).await {
            self.state().exec.take();
            return Err(e);
        }

        rx.await.unwrap_or(Err(ClientError::Disconnected))
    }

    async fn start_exec(
        &self,
        args: Vec<String>,
        env: Option<HashMap<String, String>>,
    ) -> Result<(), ClientError> {
        let channel = self.util_channel(EXEC_SERVICE, None).await?;
        if let Some(slot) = self.state().exec.as_mut() {
            slot.channel = Some(channel.id());
        }
        // The direct response is a bare ack; completion arrives as a state
        // signal handled by the dispatcher.
        let _ack = channel.request(Command::exec(args, env.unwrap_or_default())).await?;
        Ok(())
    }

    /// Fetch edit-history packets for `path` over the range `[from, to]`.
    ///
    /// When `to` is unset it defaults to the last observed edit version for
    /// the path, if any. Each path gets its own editing channel, named
    /// `ot:<path>` and memoized like any other utility channel.
    ///
    /// # Errors
    /// Fails with the remote's error, or if the session is not open.
    pub async fn file_history(
        &self,
        path: &str,
        from: u64,
        to: Option<u64>,
    ) -> Result<Vec<OtPacket>, ClientError> {
        let path = normalize_path(path);
        let to = to.or_else(|| self.state().versions.get(&path).copied());

        let name = format!("ot:{path}");
        let channel = self.util_channel(OT_SERVICE, Some(&name)).await?;
        let response = channel.request(Command::ot_fetch(from, to)).await?.await?;
        match response.body {
            Some(Body::OtFetchRes { packets }) => Ok(packets),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Last observed edit version for `path`, or `None` before any editing
    /// status signal has been seen for it.
    #[must_use]
    pub fn latest_file_version(&self, path: &str) -> Option<u64> {
        self.state().versions.get(&normalize_path(path)).copied()
    }
}
