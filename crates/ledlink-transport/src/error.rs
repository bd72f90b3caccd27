use std::io::ErrorKind;
use std::net::SocketAddr;

/// Errors that can occur in link transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// The address did not resolve to anything we can dial.
    #[error("address {0} did not resolve")]
    Unresolved(String),

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

impl TransportError {
    /// Remote address involved in a failed connect, if known.
    pub fn connect_addr(addr: SocketAddr, source: std::io::Error) -> Self {
        Self::Connect {
            addr: addr.to_string(),
            source,
        }
    }
}

/// Whether an I/O error means the socket can no longer be used.
///
/// Plain read timeouts (`WouldBlock`/`TimedOut` on a read) are not fatal; the
/// caller decides. Everything that signals a dead peer or a dead route is.
pub fn is_fatal_io(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionRefused
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof
            | ErrorKind::HostUnreachable
            | ErrorKind::NetworkUnreachable
            | ErrorKind::NetworkDown
    )
}

pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_and_unreachable_are_fatal() {
        assert!(is_fatal_io(&std::io::Error::from(ErrorKind::ConnectionReset)));
        assert!(is_fatal_io(&std::io::Error::from(ErrorKind::BrokenPipe)));
        assert!(is_fatal_io(&std::io::Error::from(
            ErrorKind::NetworkUnreachable
        )));
    }

    #[test]
    fn read_timeouts_are_not_fatal() {
        assert!(!is_fatal_io(&std::io::Error::from(ErrorKind::WouldBlock)));
        assert!(!is_fatal_io(&std::io::Error::from(ErrorKind::TimedOut)));
        assert!(!is_fatal_io(&std::io::Error::from(ErrorKind::Interrupted)));
    }
}
