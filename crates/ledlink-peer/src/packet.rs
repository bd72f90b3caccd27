use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{PeerError, Result};

/// Size of the identifier prefix on every packet.
pub const IDENTIFIER_SIZE: usize = 2;

/// Closed set of packet kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum PacketIdentifier {
    ConnectRequest = 1,
    ConnectReply = 2,
    SetConfigurationRequest = 3,
    SetConfigurationReply = 4,
    GetDriverStatusRequest = 5,
    GetDriverStatusReply = 6,
    StartAnimationRequest = 7,
    PauseAnimationRequest = 8,
    StopAnimationRequest = 9,
    AnimationBufferRequest = 10,
    AnimationBufferReply = 11,
    DisplayFrameRequest = 12,
    ClearStripRequest = 13,
    SuccessReply = 14,
    ErrorReply = 15,
    KeepAlive = 16,
    Disconnect = 17,
}

impl PacketIdentifier {
    pub const ALL: [PacketIdentifier; 17] = [
        PacketIdentifier::ConnectRequest,
        PacketIdentifier::ConnectReply,
        PacketIdentifier::SetConfigurationRequest,
        PacketIdentifier::SetConfigurationReply,
        PacketIdentifier::GetDriverStatusRequest,
        PacketIdentifier::GetDriverStatusReply,
        PacketIdentifier::StartAnimationRequest,
        PacketIdentifier::PauseAnimationRequest,
        PacketIdentifier::StopAnimationRequest,
        PacketIdentifier::AnimationBufferRequest,
        PacketIdentifier::AnimationBufferReply,
        PacketIdentifier::DisplayFrameRequest,
        PacketIdentifier::ClearStripRequest,
        PacketIdentifier::SuccessReply,
        PacketIdentifier::ErrorReply,
        PacketIdentifier::KeepAlive,
        PacketIdentifier::Disconnect,
    ];

    /// The reply a successful answer to this request carries. `ErrorReply` is
    /// always acceptable in addition.
    pub fn expected_reply(self) -> Option<PacketIdentifier> {
        use PacketIdentifier::*;
        match self {
            ConnectRequest => Some(ConnectReply),
            SetConfigurationRequest => Some(SetConfigurationReply),
            GetDriverStatusRequest => Some(GetDriverStatusReply),
            AnimationBufferRequest => Some(AnimationBufferReply),
            StartAnimationRequest | PauseAnimationRequest | StopAnimationRequest
            | DisplayFrameRequest | ClearStripRequest => Some(SuccessReply),
            ConnectReply | SetConfigurationReply | GetDriverStatusReply | AnimationBufferReply
            | SuccessReply | ErrorReply | KeepAlive | Disconnect => None,
        }
    }

    pub fn is_request(self) -> bool {
        self.expected_reply().is_some()
    }
}

impl TryFrom<u16> for PacketIdentifier {
    type Error = PeerError;

    fn try_from(value: u16) -> Result<Self> {
        PacketIdentifier::ALL
            .into_iter()
            .find(|id| *id as u16 == value)
            .ok_or(PeerError::UnknownPacket(value))
    }
}

/// `[identifier: u16 LE][payload]`, carried as the content of a packet frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommunicationPacket {
    pub identifier: PacketIdentifier,
    pub payload: Bytes,
}

impl CommunicationPacket {
    pub fn new(identifier: PacketIdentifier, payload: impl Into<Bytes>) -> Self {
        Self {
            identifier,
            payload: payload.into(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(IDENTIFIER_SIZE + self.payload.len());
        out.put_u16_le(self.identifier as u16);
        out.put_slice(&self.payload);
        out.freeze()
    }

    pub fn decode(mut content: Bytes) -> Result<Self> {
        if content.len() < IDENTIFIER_SIZE {
            return Err(PeerError::MalformedPacket(format!(
                "{} bytes is too short for a packet identifier",
                content.len()
            )));
        }
        let identifier = PacketIdentifier::try_from(content.get_u16_le())?;
        Ok(Self {
            identifier,
            payload: content,
        })
    }
}
