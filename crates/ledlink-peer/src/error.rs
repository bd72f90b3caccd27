use std::time::Duration;

use crate::messages::ErrorKind;
use crate::packet::PacketIdentifier;

/// Errors that can occur in peer operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] ledlink_transport::TransportError),

    /// Connection-level error. Fatal variants have already torn the link down.
    #[error("connection error: {0}")]
    Connection(#[from] ledlink_frame::ConnectionError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Packet carried an identifier outside the known set.
    #[error("unknown packet identifier {0}")]
    UnknownPacket(u16),

    /// Packet content too short to hold an identifier.
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    /// The remote answered with a packet kind we did not expect.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The remote reported a failure with an error reply.
    #[error("remote error ({kind}): {message}")]
    Remote { kind: ErrorKind, message: String },

    /// The remote does not support the request.
    #[error("not implemented by remote: {0}")]
    NotImplemented(String),

    /// No reply arrived before the deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Connect handshake failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// The channel was closed locally.
    #[error("channel closed")]
    Closed,
}

impl PeerError {
    pub(crate) fn unexpected_reply(expected: PacketIdentifier, got: PacketIdentifier) -> Self {
        PeerError::Protocol(format!(
            "unexpected reply kind {got:?} (expected {expected:?})"
        ))
    }

    /// True when the underlying connection is gone.
    pub fn is_fatal(&self) -> bool {
        match self {
            PeerError::Transport(_) | PeerError::Closed => true,
            PeerError::Connection(err) => err.is_fatal(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PeerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use ledlink_frame::{ConnectionError, DisconnectReason};

    #[test]
    fn timeouts_and_remote_errors_are_recoverable() {
        assert!(!PeerError::Timeout(Duration::from_secs(1)).is_fatal());
        assert!(!PeerError::Remote {
            kind: ErrorKind::InvalidState,
            message: "busy".to_string(),
        }
        .is_fatal());
        assert!(!PeerError::Protocol("odd".to_string()).is_fatal());
    }

    #[test]
    fn connection_loss_is_fatal() {
        let err = PeerError::from(ConnectionError::Disposed(DisconnectReason::Remote));
        assert!(err.is_fatal());
        assert!(PeerError::Closed.is_fatal());
    }

    #[test]
    fn remote_error_display_names_kind() {
        let err = PeerError::Remote {
            kind: ErrorKind::NotFound,
            message: "strip 4".to_string(),
        };
        assert_eq!(err.to_string(), "remote error (not found): strip 4");
    }
}
