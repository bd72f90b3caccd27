//! Typed payloads for every packet kind.
//!
//! Payloads are JSON. Each message type is tied to its packet identifier via
//! [`Message::IDENTIFIER`]; requests also name their success reply.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{PeerError, Result};
use crate::model::{Frame, StripConfiguration, StripId, StripIndex, StripStatus};
use crate::packet::{CommunicationPacket, PacketIdentifier};

/// A payload bound to one packet identifier.
pub trait Message: Serialize + DeserializeOwned + Send + 'static {
    const IDENTIFIER: PacketIdentifier;

    fn to_packet(&self) -> Result<CommunicationPacket> {
        Ok(CommunicationPacket::new(
            Self::IDENTIFIER,
            serde_json::to_vec(self)?,
        ))
    }

    fn from_packet(packet: &CommunicationPacket) -> Result<Self> {
        if packet.identifier != Self::IDENTIFIER {
            return Err(PeerError::unexpected_reply(
                Self::IDENTIFIER,
                packet.identifier,
            ));
        }
        Ok(serde_json::from_slice(&packet.payload)?)
    }
}

/// A message that expects a typed reply.
pub trait Request: Message {
    type Reply: Message;
}

/// Category of an [`ErrorReply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The receiver has no handler for the request.
    Unimplemented,
    /// The request was understood but its content is unacceptable.
    InvalidArgument,
    /// The target is busy or in the wrong mode.
    InvalidState,
    /// The addressed strip does not exist.
    NotFound,
    /// The handler failed unexpectedly.
    Internal,
    /// The packet could not be understood at all.
    Communication,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Unimplemented => "unimplemented",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::InvalidState => "invalid state",
            ErrorKind::NotFound => "not found",
            ErrorKind::Internal => "internal",
            ErrorKind::Communication => "communication",
        })
    }
}

macro_rules! message {
    ($ty:ty => $id:ident) => {
        impl Message for $ty {
            const IDENTIFIER: PacketIdentifier = PacketIdentifier::$id;
        }
    };
    ($ty:ty => $id:ident, reply $reply:ty) => {
        message!($ty => $id);
        impl Request for $ty {
            type Reply = $reply;
        }
    };
}

/// Portal greeting. The token identifies the configuration the portal
/// believes is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub protocol_version: String,
    pub concurrency_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectReply {
    /// `false` means the portal must upload its configuration first.
    pub configuration_valid: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetConfigurationRequest {
    pub concurrency_token: String,
    pub strips: Vec<StripConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetConfigurationReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetDriverStatusRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strip_id: Option<StripId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StripStatusEntry {
    pub strip_id: StripId,
    pub index: StripIndex,
    pub status: StripStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetDriverStatusReply {
    pub strips: Vec<StripStatusEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartAnimationRequest {
    pub strip: StripIndex,
    pub frequency_hz: u32,
    pub initial_frames: Vec<Frame>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseAnimationRequest {
    pub strip: StripIndex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopAnimationRequest {
    pub strip: StripIndex,
}

/// Driver-initiated refill request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnimationBufferRequest {
    pub strip: StripIndex,
    pub count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnimationBufferReply {
    pub frames: Vec<Frame>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayFrameRequest {
    pub strip: StripIndex,
    pub frame: Frame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearStripRequest {
    pub strip: StripIndex,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessReply {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorReply {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Encode as an `ErrorReply` packet.
    pub fn into_packet(self) -> CommunicationPacket {
        let payload = serde_json::to_vec(&self).unwrap_or_default();
        CommunicationPacket::new(PacketIdentifier::ErrorReply, payload)
    }
}

message!(ConnectRequest => ConnectRequest, reply ConnectReply);
message!(ConnectReply => ConnectReply);
message!(SetConfigurationRequest => SetConfigurationRequest, reply SetConfigurationReply);
message!(SetConfigurationReply => SetConfigurationReply);
message!(GetDriverStatusRequest => GetDriverStatusRequest, reply GetDriverStatusReply);
message!(GetDriverStatusReply => GetDriverStatusReply);
message!(StartAnimationRequest => StartAnimationRequest, reply SuccessReply);
message!(PauseAnimationRequest => PauseAnimationRequest, reply SuccessReply);
message!(StopAnimationRequest => StopAnimationRequest, reply SuccessReply);
message!(AnimationBufferRequest => AnimationBufferRequest, reply AnimationBufferReply);
message!(AnimationBufferReply => AnimationBufferReply);
message!(DisplayFrameRequest => DisplayFrameRequest, reply SuccessReply);
message!(ClearStripRequest => ClearStripRequest, reply SuccessReply);
message!(SuccessReply => SuccessReply);
message!(ErrorReply => ErrorReply);
