//! Request/reply messaging between a portal and its drivers.
//!
//! A [`Channel`] multiplexes outbound request/reply exchanges and inbound
//! requests over one keep-alive aware [`ledlink_frame::Connection`]. On top of
//! it, [`MessageRouter`] sends typed requests and [`Dispatcher`] answers them
//! from a table of typed handlers.

pub mod channel;
pub mod connector;
pub mod error;
pub mod handshake;
pub mod listener;
pub mod messages;
pub mod model;
pub mod packet;
pub mod router;

pub use channel::{Channel, ChannelConfig, InboundHandler, PeerConfig};
pub use connector::{connect, connect_with_config};
pub use error::{PeerError, Result};
pub use handshake::{
    answer_connect, portal_handshake, HandshakeConfig, HandshakeResult, PROTOCOL_VERSION,
};
pub use listener::PeerListener;
pub use messages::{
    AnimationBufferReply, AnimationBufferRequest, ClearStripRequest, ConnectReply,
    ConnectRequest, DisplayFrameRequest, ErrorKind, ErrorReply, GetDriverStatusReply,
    GetDriverStatusRequest, Message, PauseAnimationRequest, Request, SetConfigurationReply,
    SetConfigurationRequest, StartAnimationRequest, StopAnimationRequest, StripStatusEntry,
    SuccessReply,
};
pub use model::{
    Color, ColorSpectrum, DeviceConfiguration, Frame, StripConfiguration, StripId, StripIndex,
    StripStatus,
};
pub use packet::{CommunicationPacket, PacketIdentifier};
pub use router::{
    decode_reply, Dispatcher, DispatcherBuilder, HandlerError, HandlerResult, MessageRouter,
};
