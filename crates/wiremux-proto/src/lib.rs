//! Wire message schema for the multiplexed session protocol.
//!
//! Every frame on the wire is one [`Command`]: an envelope (`channel`, `ref`)
//! plus a tagged body drawn from a fixed set of variants. Channel 0 is the
//! control plane (open/close channel); assigned channels carry per-service
//! payloads. The schema itself is fixed by the remote side; this crate only
//! models and codecs it.

pub mod command;

pub use command::{
    Body, BootStage, CloseChan, CloseChanRes, CloseChannelAction, CloseChannelStatus, CodecError,
    Command, ContainerPhase, File, FileKind, OpenChan, OpenChanRes, OpenChannelAction,
    OpenChannelState, OtFetch, OtPacket, OtStatus, ProcessState, StatResult,
};

/// The control-plane channel id.
pub const CONTROL_CHANNEL: i32 = 0;
