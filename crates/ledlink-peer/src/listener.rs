use std::net::SocketAddr;

use ledlink_frame::Connection;
use ledlink_transport::LinkListener;
use tracing::info;

use crate::channel::{Channel, PeerConfig};
use crate::error::Result;

/// Listens for and accepts portal connections.
pub struct PeerListener {
    listener: LinkListener,
    config: PeerConfig,
}

impl PeerListener {
    /// Bind and listen on `addr` (e.g. `0.0.0.0:7700`).
    pub fn bind(addr: impl std::net::ToSocketAddrs + std::fmt::Display) -> Result<Self> {
        Ok(Self {
            listener: LinkListener::bind(addr)?,
            config: PeerConfig::default(),
        })
    }

    /// Override connection and channel tuning for accepted peers.
    pub fn with_config(mut self, config: PeerConfig) -> Self {
        self.config = config;
        self
    }

    /// Accept the next connection.
    ///
    /// The returned channel is connected but not yet open: install the
    /// inbound handler first, then call [`Channel::open`].
    pub fn accept(&self) -> Result<Channel> {
        let stream = self.listener.accept()?;
        let connection = Connection::from_stream(stream, self.config.connection.clone())?;
        info!(peer = ?connection.peer_addr(), "peer accepted");
        Ok(Channel::new(connection, self.config.channel.clone()))
    }

    /// Bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }
}
