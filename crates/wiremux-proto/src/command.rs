//! The `Command` envelope and its body union.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Codec error.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One wire message: envelope fields plus an optional tagged body.
///
/// A missing body is legal (some signals are envelope-only); a body whose tag
/// is unknown or whose fields are malformed fails to decode, and the
/// dispatcher discards the frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    /// Target channel; 0 is the control plane.
    #[serde(default)]
    pub channel: i32,
    /// Correlation token echoed on the response; empty means uncorrelated.
    #[serde(rename = "ref", default, skip_serializing_if = "String::is_empty")]
    pub reference: String,
    #[serde(flatten)]
    pub body: Option<Body>,
}

// Flattening `Option<Body>` directly would swallow unknown tags and malformed
// bodies as `None`; decoding goes through the raw envelope so a present
// `type` tag must parse.
impl<'de> Deserialize<'de> for Command {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default)]
            channel: i32,
            #[serde(rename = "ref", default)]
            reference: String,
            #[serde(flatten)]
            rest: serde_json::Map<String, serde_json::Value>,
        }

        let raw = Raw::deserialize(deserializer)?;
        let body = if raw.rest.contains_key("type") {
            let body = serde_json::from_value(serde_json::Value::Object(raw.rest))
                .map_err(serde::de::Error::custom)?;
            Some(body)
        } else {
            None
        };
        Ok(Self {
            channel: raw.channel,
            reference: raw.reference,
            body,
        })
    }
}

impl Command {
    /// Create a control-plane command with the given body.
    #[must_use]
    pub fn with_body(body: Body) -> Self {
        Self {
            channel: 0,
            reference: String::new(),
            body: Some(body),
        }
    }

    /// Open-channel request (control plane).
    #[must_use]
    pub fn open_chan(service: &str, name: Option<&str>, action: OpenChannelAction) -> Self {
        Self::with_body(Body::OpenChan(OpenChan {
            service: service.to_owned(),
            name: name.unwrap_or_default().to_owned(),
            action,
        }))
    }

    /// Close-channel request (control plane).
    #[must_use]
    pub fn close_chan(id: i32, action: CloseChannelAction) -> Self {
        Self::with_body(Body::CloseChan(CloseChan { id, action }))
    }

    /// File read request.
    #[must_use]
    pub fn read(path: &str) -> Self {
        Self::with_body(Body::Read {
            path: path.to_owned(),
        })
    }

    /// File write request.
    #[must_use]
    pub fn write(path: &str, content: &str) -> Self {
        Self::with_body(Body::Write(File {
            path: path.to_owned(),
            kind: FileKind::File,
            content: content.to_owned(),
        }))
    }

    /// File stat request.
    #[must_use]
    pub fn stat(path: &str) -> Self {
        Self::with_body(Body::Stat {
            path: path.to_owned(),
        })
    }

    /// Directory listing request.
    #[must_use]
    pub fn readdir(path: &str) -> Self {
        Self::with_body(Body::Readdir {
            path: path.to_owned(),
        })
    }

    /// Directory creation request.
    #[must_use]
    pub fn mkdir(path: &str) -> Self {
        Self::with_body(Body::Mkdir {
            path: path.to_owned(),
        })
    }

    /// Remote command execution request.
    #[must_use]
    pub fn exec(args: Vec<String>, env: HashMap<String, String>) -> Self {
        Self::with_body(Body::Exec { args, env })
    }

    /// Edit-history fetch request for the version range `[from, to]`.
    #[must_use]
    pub fn ot_fetch(version_from: u64, version_to: Option<u64>) -> Self {
        Self::with_body(Body::OtFetch(OtFetch {
            version_from,
            version_to,
        }))
    }

    /// Protocol-level error payload.
    #[must_use]
    pub fn protocol_error(message: &str) -> Self {
        Self::with_body(Body::Error {
            message: message.to_owned(),
        })
    }

    /// Encode to a wire frame.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from a wire frame.
    ///
    /// # Errors
    /// Returns an error if the frame is not a well-formed command.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// The fixed set of message payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Body {
    /// Open a logical channel (control plane).
    OpenChan(OpenChan),
    /// Response to [`Body::OpenChan`].
    OpenChanRes(OpenChanRes),
    /// Close a logical channel (control plane).
    CloseChan(CloseChan),
    /// Response to [`Body::CloseChan`].
    CloseChanRes(CloseChanRes),
    /// Protocol-level failure, local to the request that provoked it.
    Error { message: String },
    /// User-facing notice.
    Toast { text: String },
    /// Remote environment boot progress signal.
    BootStatus { stage: BootStage },
    /// Remote container lifecycle signal.
    ContainerState { state: ContainerPhase },
    /// Read a file.
    Read { path: String },
    /// Write a file.
    Write(File),
    /// Stat a file.
    Stat { path: String },
    /// Response to [`Body::Stat`].
    StatRes(StatResult),
    /// List a directory.
    Readdir { path: String },
    /// Response to [`Body::Readdir`].
    Files { files: Vec<File> },
    /// Create a directory.
    Mkdir { path: String },
    /// A single file, as a response payload.
    File(File),
    /// Bare acknowledgement.
    Ok {},
    /// Start a remote command execution.
    Exec {
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        env: HashMap<String, String>,
    },
    /// Streamed output fragment from an execution.
    Output { data: String },
    /// Execution state transition.
    State { state: ProcessState },
    /// Fetch a range of edit-history packets.
    OtFetch(OtFetch),
    /// Response to [`Body::OtFetch`].
    OtFetchRes { packets: Vec<OtPacket> },
    /// Collaborative-edit version signal for the channel's linked file.
    OtStatus(OtStatus),
}

/// Open-channel request payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenChan {
    pub service: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub action: OpenChannelAction,
}

/// Open-channel response payload. The id is assigned by the remote side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenChanRes {
    pub id: i32,
    pub state: OpenChannelState,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// Close-channel request payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseChan {
    pub id: i32,
    pub action: CloseChannelAction,
}

/// Close-channel response payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseChanRes {
    pub id: i32,
    #[serde(default)]
    pub status: CloseChannelStatus,
}

/// How to open a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenChannelAction {
    /// Attach to an existing channel with this service/name, else create one.
    AttachOrCreate,
    /// Always create a new channel.
    Create,
    /// Only attach to an existing channel.
    Attach,
}

/// Outcome of an open-channel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenChannelState {
    Created,
    Attached,
    Error,
}

/// How to close a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseChannelAction {
    /// Close if this is the last client attached.
    TryClose,
    /// Close unconditionally.
    Close,
}

/// Outcome of a close-channel request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseChannelStatus {
    Closed,
    #[default]
    Nothing,
    Error,
}

/// Remote environment boot stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootStage {
    Handshake,
    Acquiring,
    PullFiles,
    LoadBlock,
    Complete,
}

/// Remote container lifecycle phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerPhase {
    Init,
    Starting,
    Ready,
    Sleep,
}

/// Remote execution states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Running,
    Stopped,
}

/// A file entry, used by both requests and responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct File {
    pub path: String,
    #[serde(default)]
    pub kind: FileKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
}

/// File entry kinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    #[default]
    Unspecified,
    File,
    Directory,
}

/// Stat response payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatResult {
    pub exists: bool,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub kind: FileKind,
    #[serde(default)]
    pub mod_time: i64,
}

/// Edit-history fetch request payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtFetch {
    pub version_from: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_to: Option<u64>,
}

/// One edit-history packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtPacket {
    pub version: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ops: Vec<serde_json::Value>,
}

/// Edit-version signal payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtStatus {
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_file: Option<File>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_chan_shape() {
        let mut cmd = Command::open_chan("gcsfiles", None, OpenChannelAction::AttachOrCreate);
        cmd.reference = "r1".to_owned();

        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"type\":\"open_chan\""));
        assert!(json.contains("\"service\":\"gcsfiles\""));
        assert!(json.contains("\"ref\":\"r1\""));
        assert!(json.contains("\"channel\":0"));
        // Empty name is omitted entirely
        assert!(!json.contains("\"name\""));
    }

    #[test]
    fn test_response_roundtrip() {
        let raw = r#"{"channel":0,"ref":"r1","type":"open_chan_res","id":3,"state":"created"}"#;
        let cmd = Command::from_bytes(raw.as_bytes()).unwrap();
        assert_eq!(cmd.reference, "r1");
        match cmd.body {
            Some(Body::OpenChanRes(res)) => {
                assert_eq!(res.id, 3);
                assert_eq!(res.state, OpenChannelState::Created);
                assert!(res.error.is_empty());
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn test_envelope_without_body() {
        let raw = r#"{"channel":4,"ref":"abc"}"#;
        let cmd = Command::from_bytes(raw.as_bytes()).unwrap();
        assert_eq!(cmd.channel, 4);
        assert!(cmd.body.is_none());
    }

    #[test]
    fn test_unknown_tag_is_an_error() {
        let raw = r#"{"channel":0,"type":"mystery"}"#;
        assert!(Command::from_bytes(raw.as_bytes()).is_err());
    }

    #[test]
    fn test_malformed_tagged_body_is_an_error() {
        // Known tag, but the mandatory `id` field is missing.
        let raw = r#"{"channel":0,"ref":"r1","type":"open_chan_res","state":"created"}"#;
        assert!(Command::from_bytes(raw.as_bytes()).is_err());
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(Command::from_bytes(b"\x00\x01\x02").is_err());
    }

    #[test]
    fn test_exec_omits_empty_env() {
        let cmd = Command::exec(vec!["echo".into(), "hi".into()], HashMap::new());
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"type\":\"exec\""));
        assert!(!json.contains("\"env\""));
    }

    #[test]
    fn test_ot_fetch_range() {
        let cmd = Command::ot_fetch(1, Some(7));
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"version_from\":1"));
        assert!(json.contains("\"version_to\":7"));

        let open_ended = Command::ot_fetch(1, None);
        let json = serde_json::to_string(&open_ended).unwrap();
        assert!(!json.contains("version_to"));
    }

    #[test]
    fn test_file_roundtrip() {
        let raw = r#"{"channel":2,"ref":"r9","type":"file","path":"test.txt","content":"hello"}"#;
        let cmd = Command::from_bytes(raw.as_bytes()).unwrap();
        match cmd.body {
            Some(Body::File(file)) => {
                assert_eq!(file.path, "test.txt");
                assert_eq!(file.content, "hello");
                assert_eq!(file.kind, FileKind::Unspecified);
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }
}
