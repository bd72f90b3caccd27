use std::fmt;
use std::io;

use ledlink_driver::DriverError;
use ledlink_frame::{ConnectionError, FrameError};
use ledlink_peer::{ErrorKind, PeerError};
use ledlink_portal::PortalError;
use ledlink_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
/// The driver refused a request (wrong state, unknown strip).
pub const REJECTED: i32 = 40;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const CONFIG_INVALID: i32 = 78;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::AddrInUse
        | io::ErrorKind::AddrNotAvailable => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::Unresolved(_) => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::PayloadTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn connection_error(context: &str, err: ConnectionError) -> CliError {
    match err {
        ConnectionError::Connect(err) | ConnectionError::Transport(err) => {
            transport_error(context, err)
        }
        ConnectionError::Frame(err) => frame_error(context, err),
        ConnectionError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        ConnectionError::Disconnected(_) | ConnectionError::Disposed(_) => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn peer_error(context: &str, err: PeerError) -> CliError {
    match err {
        PeerError::Transport(err) => transport_error(context, err),
        PeerError::Connection(err) => connection_error(context, err),
        PeerError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        PeerError::Json(_) | PeerError::MalformedPacket(_) | PeerError::UnknownPacket(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        PeerError::Remote { kind, .. } => {
            let code = match kind {
                ErrorKind::InvalidState | ErrorKind::NotFound => REJECTED,
                ErrorKind::InvalidArgument => DATA_INVALID,
                _ => FAILURE,
            };
            CliError::new(code, format!("{context}: {err}"))
        }
        PeerError::HandshakeFailed(_) | PeerError::Closed => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn driver_error(context: &str, err: DriverError) -> CliError {
    match err {
        DriverError::Peer(err) => peer_error(context, err),
        DriverError::Config(_) => CliError::new(CONFIG_INVALID, format!("{context}: {err}")),
        DriverError::Store(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

pub fn portal_error(context: &str, err: PortalError) -> CliError {
    match err {
        PortalError::Peer(err) => peer_error(context, err),
        PortalError::InvalidConfiguration(_) | PortalError::UnknownEffect(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        PortalError::ConfigurationRejected(_) => {
            CliError::new(REJECTED, format!("{context}: {err}"))
        }
        PortalError::UnknownStrip(_) => CliError::new(USAGE, format!("{context}: {err}")),
        PortalError::NoAnimation(_) => CliError::new(REJECTED, format!("{context}: {err}")),
    }
}
