use std::time::Duration;

use ledlink_transport::TransportError;

use crate::connection::DisconnectReason;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The header carries a frame type byte we do not know.
    #[error("invalid frame type {0:#04x}")]
    InvalidFrameType(u8),

    /// A keep-alive or disconnect header announced content.
    #[error("{frame_type:?} frame must not carry content ({len} bytes announced)")]
    UnexpectedContent { frame_type: crate::FrameType, len: usize },

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    /// Read timeouts surface as `WouldBlock` or `TimedOut` depending on platform.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            FrameError::Io(err)
                if matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut)
        )
    }
}

/// Errors surfaced by [`crate::Connection`].
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// `send`/`receive` before `connect`.
    #[error("connection not established")]
    NotConnected,

    /// `connect` on a connection that already went through its lifecycle.
    #[error("connection already established")]
    AlreadyConnected,

    /// The connection was torn down earlier; instances are never reused.
    #[error("connection disposed ({0})")]
    Disposed(DisconnectReason),

    /// Dialing the remote end failed (refused, unreachable, timed out).
    #[error("connect failed: {0}")]
    Connect(#[source] TransportError),

    /// Socket setup failed on an established stream.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A frame could not be written or read. Socket-level variants are fatal.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// No data frame arrived before the deadline. Not fatal.
    #[error("receive timed out after {0:?}")]
    Timeout(Duration),

    /// This call observed the connection going down.
    #[error("disconnected: {0}")]
    Disconnected(DisconnectReason),
}

impl ConnectionError {
    /// True when the connection is gone and a new one must be constructed.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ConnectionError::Timeout(_)
                | ConnectionError::NotConnected
                | ConnectionError::AlreadyConnected
                | ConnectionError::Frame(FrameError::PayloadTooLarge { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
