//! One portal-to-driver session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use ledlink_frame::DisconnectReason;
use ledlink_peer::{
    connect_with_config, portal_handshake, AnimationBufferReply, AnimationBufferRequest, Channel,
    ClearStripRequest, DeviceConfiguration, Dispatcher, DisplayFrameRequest, ErrorKind, Frame,
    GetDriverStatusRequest, HandlerError, HandshakeConfig, MessageRouter, PauseAnimationRequest,
    PeerConfig, PeerError, SetConfigurationRequest, StartAnimationRequest, StopAnimationRequest, StripId,
    StripIndex, StripStatusEntry,
};
use tracing::{debug, info};

use crate::effect::EffectEngine;
use crate::error::{PortalError, Result};

/// Upper bound on frames rendered for one refill request.
pub const MAX_REFILL_FRAMES: u32 = 1024;

type Engines = Arc<Mutex<HashMap<StripIndex, Box<dyn EffectEngine>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Link and handshake settings for a session.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub peer: PeerConfig,
    pub handshake: HandshakeConfig,
}

/// Answers the driver's refill requests from the per-strip effect engines.
fn refill_dispatcher(engines: Engines) -> Dispatcher {
    Dispatcher::builder()
        .on(move |request: AnimationBufferRequest| {
            let mut engines = lock(&engines);
            let engine = engines.get_mut(&request.strip).ok_or_else(|| {
                HandlerError::not_found(format!("no animation on strip {}", request.strip))
            })?;
            let count = request.count.min(MAX_REFILL_FRAMES) as usize;
            debug!(strip = request.strip, requested = request.count, count, "serving refill");
            Ok(AnimationBufferReply {
                frames: engine.frames(count),
            })
        })
        .build()
}

/// Controls one driver: keeps its configuration current, starts and stops
/// animations and feeds them frames on demand.
pub struct DriverSession {
    router: MessageRouter,
    configuration: DeviceConfiguration,
    engines: Engines,
    uploaded: bool,
}

impl DriverSession {
    /// Dial the driver at `addr` and synchronize `configuration`.
    pub fn connect(addr: impl Into<String>, configuration: DeviceConfiguration) -> Result<Self> {
        Self::connect_with_config(addr, configuration, &SessionConfig::default())
    }

    pub fn connect_with_config(
        addr: impl Into<String>,
        configuration: DeviceConfiguration,
        config: &SessionConfig,
    ) -> Result<Self> {
        configuration
            .validate()
            .map_err(PortalError::InvalidConfiguration)?;

        let engines = Engines::default();
        let channel = connect_with_config(
            addr,
            &config.peer,
            Some(Arc::new(refill_dispatcher(Arc::clone(&engines)))),
        )?;
        Self::start(channel, configuration, engines, &config.handshake)
    }

    /// Run a session over an already connected, unopened channel.
    pub fn from_channel(
        channel: Channel,
        configuration: DeviceConfiguration,
        handshake: &HandshakeConfig,
    ) -> Result<Self> {
        configuration
            .validate()
            .map_err(PortalError::InvalidConfiguration)?;

        let engines = Engines::default();
        channel.set_inbound_handler(Arc::new(refill_dispatcher(Arc::clone(&engines))));
        channel.open()?;
        Self::start(channel, configuration, engines, handshake)
    }

    fn start(
        channel: Channel,
        configuration: DeviceConfiguration,
        engines: Engines,
        handshake: &HandshakeConfig,
    ) -> Result<Self> {
        let mut session = Self {
            router: MessageRouter::new(Arc::new(channel)),
            configuration,
            engines,
            uploaded: false,
        };
        session.synchronize(handshake)?;
        Ok(session)
    }

    /// Handshake, then upload the configuration if the driver's is stale.
    fn synchronize(&mut self, handshake: &HandshakeConfig) -> Result<()> {
        let token = self.configuration.concurrency_token.clone();
        let result = portal_handshake(&self.router, &token, handshake)?;
        if result.configuration_valid {
            info!(token = %token, "driver configuration current");
            return Ok(());
        }

        info!(token = %token, strips = self.configuration.strips.len(), "uploading configuration");
        let reply = self.router.send(&SetConfigurationRequest {
            concurrency_token: token,
            strips: self.configuration.strips.clone(),
        })?;
        if !reply.success {
            return Err(PortalError::ConfigurationRejected(
                reply.error_message.unwrap_or_default(),
            ));
        }
        self.uploaded = true;
        Ok(())
    }

    pub fn configuration(&self) -> &DeviceConfiguration {
        &self.configuration
    }

    /// Whether this session had to upload its configuration.
    pub fn uploaded_configuration(&self) -> bool {
        self.uploaded
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// Start `engine` on `strip`, seeding the driver with `initial_frames`
    /// frames. Later refills are rendered by the same engine.
    pub fn start_animation(
        &self,
        strip: StripIndex,
        frequency_hz: u32,
        mut engine: Box<dyn EffectEngine>,
        initial_frames: usize,
    ) -> Result<()> {
        self.require_strip(strip)?;
        let frames = engine.frames(initial_frames);
        lock(&self.engines).insert(strip, engine);

        let request = StartAnimationRequest {
            strip,
            frequency_hz,
            initial_frames: frames,
        };
        if let Err(err) = self.router.send(&request) {
            lock(&self.engines).remove(&strip);
            return Err(err.into());
        }
        info!(strip, frequency_hz, initial = initial_frames, "animation started");
        Ok(())
    }

    /// Replay the strip's effect from its first frame. An animation still
    /// attached on the driver (running or paused) is stopped first.
    pub fn restart_animation(
        &self,
        strip: StripIndex,
        frequency_hz: u32,
        initial_frames: usize,
    ) -> Result<()> {
        self.require_strip(strip)?;
        let mut engine = lock(&self.engines)
            .remove(&strip)
            .ok_or(PortalError::NoAnimation(strip))?;

        match self.router.send(&StopAnimationRequest { strip }) {
            Ok(_) => {}
            // Nothing attached any more, e.g. the animation ran dry.
            Err(PeerError::Remote {
                kind: ErrorKind::InvalidState,
                ..
            }) => debug!(strip, "no animation to stop before restart"),
            Err(err) => return Err(err.into()),
        }

        engine.reset();
        self.start_animation(strip, frequency_hz, engine, initial_frames)
    }

    pub fn pause_animation(&self, strip: StripIndex) -> Result<()> {
        self.require_strip(strip)?;
        self.router.send(&PauseAnimationRequest { strip })?;
        Ok(())
    }

    /// Stop the animation and forget its engine.
    pub fn stop_animation(&self, strip: StripIndex) -> Result<()> {
        self.require_strip(strip)?;
        self.router.send(&StopAnimationRequest { strip })?;
        lock(&self.engines).remove(&strip);
        Ok(())
    }

    pub fn display_frame(&self, strip: StripIndex, frame: Frame) -> Result<()> {
        self.require_strip(strip)?;
        self.router.send(&DisplayFrameRequest { strip, frame })?;
        Ok(())
    }

    pub fn clear(&self, strip: StripIndex) -> Result<()> {
        self.require_strip(strip)?;
        self.router.send(&ClearStripRequest { strip })?;
        Ok(())
    }

    /// Status of every strip, or of the one with `strip_id`.
    pub fn status(&self, strip_id: Option<StripId>) -> Result<Vec<StripStatusEntry>> {
        let reply = self.router.send(&GetDriverStatusRequest { strip_id })?;
        Ok(reply.strips)
    }

    /// Block until the driver goes away or `timeout` passes.
    pub fn wait_closed(&self, timeout: Option<Duration>) -> Option<DisconnectReason> {
        self.router.channel().wait_closed(timeout)
    }

    pub fn is_open(&self) -> bool {
        self.router.channel().is_open()
    }

    /// Disconnect. The driver returns every strip to idle.
    pub fn close(&self) {
        lock(&self.engines).clear();
        self.router.channel().close();
    }

    fn require_strip(&self, strip: StripIndex) -> Result<()> {
        if self.configuration.strip(strip).is_none() {
            return Err(PortalError::UnknownStrip(strip));
        }
        Ok(())
    }
}

impl std::fmt::Debug for DriverSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverSession")
            .field("token", &self.configuration.concurrency_token)
            .field("peer", &self.router.channel().peer_addr())
            .finish_non_exhaustive()
    }
}
