use std::net::ToSocketAddrs;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use ledlink_frame::DisconnectReason;
use ledlink_peer::{
    AnimationBufferRequest, Channel, Frame, MessageRouter, PeerError, PeerListener, StripIndex,
    StripStatusEntry,
};
use tracing::{info, warn};

use crate::config::DriverConfig;
use crate::context::StripContext;
use crate::error::Result;
use crate::handlers::{self, DriverState};
use crate::player::FrameSupplier;
use crate::store::ConfigurationStore;
use crate::strip::StripBackend;

/// Pulls frames from the portal with `AnimationBufferRequest`.
///
/// Holds the channel weakly: a refill racing with session teardown fails with
/// [`PeerError::Closed`] instead of keeping the link alive.
#[derive(Debug, Clone)]
pub struct ChannelFrameSupplier {
    channel: Weak<Channel>,
    timeout: Duration,
}

impl ChannelFrameSupplier {
    pub fn new(channel: &Arc<Channel>, timeout: Duration) -> Self {
        Self {
            channel: Arc::downgrade(channel),
            timeout,
        }
    }
}

impl FrameSupplier for ChannelFrameSupplier {
    fn request_frames(&self, strip: StripIndex, count: usize) -> ledlink_peer::Result<Vec<Frame>> {
        let channel = self.channel.upgrade().ok_or(PeerError::Closed)?;
        let request = AnimationBufferRequest {
            strip,
            count: u32::try_from(count).unwrap_or(u32::MAX),
        };
        let reply = MessageRouter::new(channel).send_with_timeout(&request, self.timeout)?;
        Ok(reply.frames)
    }
}

/// The device side of the link: strips, their configuration and the portal
/// sessions that drive them.
pub struct Driver {
    config: DriverConfig,
    state: Arc<DriverState>,
}

impl Driver {
    pub fn new(
        config: DriverConfig,
        backend: Arc<dyn StripBackend>,
        store: Arc<dyn ConfigurationStore>,
    ) -> Result<Self> {
        config.validate()?;
        let context = StripContext::new(backend, store, config.player.clone())?;
        let state = Arc::new(DriverState {
            context: Mutex::new(context),
            handshake: config.handshake_config(),
        });
        Ok(Self { config, state })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Listen for portals with this driver's link settings.
    pub fn bind(&self, addr: impl ToSocketAddrs + std::fmt::Display) -> Result<PeerListener> {
        Ok(PeerListener::bind(addr)?.with_config(self.config.peer_config()))
    }

    /// Serve portals one at a time until accepting fails.
    pub fn run(&self, listener: &PeerListener) -> Result<()> {
        info!(addr = %listener.local_addr(), "driver listening");
        loop {
            let channel = listener.accept()?;
            if let Err(err) = self.serve(channel) {
                warn!(error = %err, "portal session failed");
            }
        }
    }

    /// Answer requests on `channel` until it closes, then put every strip
    /// back to idle and dark.
    pub fn serve(&self, channel: Channel) -> Result<DisconnectReason> {
        let channel = Arc::new(channel);
        let supplier: Arc<dyn FrameSupplier> =
            Arc::new(ChannelFrameSupplier::new(&channel, self.config.request_timeout));
        channel.set_inbound_handler(Arc::new(handlers::dispatcher(
            Arc::clone(&self.state),
            supplier,
        )));

        if let Err(err) = channel.open() {
            channel.close();
            return Err(err.into());
        }
        info!(peer = ?channel.peer_addr(), "portal session started");

        let reason = channel.wait_closed(None).unwrap_or(DisconnectReason::Local);
        channel.close();
        self.shutdown();
        info!(%reason, "portal session ended");
        Ok(reason)
    }

    /// Stop all activity and clear every strip.
    pub fn shutdown(&self) {
        self.state.context().reset_all();
    }

    /// Current status of every configured strip.
    pub fn status(&self) -> Vec<StripStatusEntry> {
        self.state.context().status(None).unwrap_or_default()
    }

    pub fn concurrency_token(&self) -> Option<String> {
        self.state.context().concurrency_token().map(str::to_string)
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
