//! Typed stream framing for portal/driver links.
//!
//! Every unit on the wire is framed with a fixed 5-byte header:
//! - 1 byte frame type (`0` packet, `1` keep-alive, `2` disconnect)
//! - 4 byte little-endian content length (zero for keep-alive/disconnect)
//!
//! Heartbeats and payloads share one stream. [`Connection`] layers the
//! keep-alive timer, the background poller and the cooperative disconnect
//! on top of the plain [`FrameReader`]/[`FrameWriter`] pair.

pub mod codec;
pub mod connection;
pub mod error;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod link_codec;

pub use codec::{
    decode_frame, encode_frame, Frame, FrameConfig, FrameHeader, FrameType, DEFAULT_MAX_PAYLOAD,
    HEADER_SIZE,
};
pub use connection::{Connection, ConnectionConfig, ConnectionState, DisconnectReason};
pub use error::{ConnectionError, FrameError, Result};
#[cfg(feature = "async")]
pub use link_codec::LinkCodec;
pub use reader::FrameReader;
pub use writer::FrameWriter;
