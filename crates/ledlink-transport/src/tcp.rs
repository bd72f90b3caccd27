use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::LinkStream;

/// TCP listener that hands out [`LinkStream`]s.
pub struct LinkListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl LinkListener {
    /// Bind and listen on `addr` (e.g. `0.0.0.0:7700`, or `127.0.0.1:0` for an
    /// ephemeral port).
    pub fn bind(addr: impl ToSocketAddrs + std::fmt::Display) -> Result<Self> {
        let display = addr.to_string();
        let listener = TcpListener::bind(&addr).map_err(|source| TransportError::Bind {
            addr: display.clone(),
            source,
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TransportError::Bind {
                addr: display,
                source,
            })?;

        info!(%local_addr, "listening for link connections");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<LinkStream> {
        let (stream, peer) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(%peer, "accepted link connection");
        Ok(LinkStream::from_tcp(stream))
    }

    /// Connect to a listening peer, trying each resolved address in turn.
    pub fn connect(
        addr: impl ToSocketAddrs + std::fmt::Display,
        timeout: Duration,
    ) -> Result<LinkStream> {
        let display = addr.to_string();
        let candidates = addr
            .to_socket_addrs()
            .map_err(|source| TransportError::Connect {
                addr: display.clone(),
                source,
            })?;

        let mut last_err = None;
        for candidate in candidates {
            match TcpStream::connect_timeout(&candidate, timeout) {
                Ok(stream) => {
                    debug!(peer = %candidate, "connected link");
                    return Ok(LinkStream::from_tcp(stream));
                }
                Err(source) => last_err = Some(TransportError::connect_addr(candidate, source)),
            }
        }

        Err(last_err.unwrap_or(TransportError::Unresolved(display)))
    }

    /// The address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "tcp"
    }
}

/// A connected pair of streams over the loopback interface.
///
/// Used by tests throughout the workspace in place of a real device link.
pub fn loopback_pair() -> Result<(LinkStream, LinkStream)> {
    let listener = LinkListener::bind("127.0.0.1:0")?;
    let client = LinkListener::connect(listener.local_addr(), Duration::from_secs(5))?;
    let server = listener.accept()?;
    Ok((client, server))
}
