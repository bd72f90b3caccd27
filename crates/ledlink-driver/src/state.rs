//! Per-strip activity state.
//!
//! | from \ op        | start | pause | stop | display | clear |
//! |------------------|-------|-------|------|---------|-------|
//! | Idle             | yes   |       |      | yes     | yes   |
//! | DisplayingFrame  |       |       |      | yes     | yes   |
//! | Playing          |       | yes   | yes  |         |       |
//! | Paused           |       |       | yes  |         |       |
//!
//! Every other combination fails with [`DriverError::InvalidState`] and leaves
//! the state untouched.

use std::sync::Arc;

use ledlink_peer::{Frame, StripConfiguration, StripIndex, StripStatus};
use tracing::{debug, warn};

use crate::config::PlayerConfig;
use crate::error::{DriverError, Result};
use crate::player::{AnimationPlayer, FrameSupplier};
use crate::strip::StripProxy;

enum Activity {
    Idle,
    DisplayingFrame,
    Playing(AnimationPlayer),
    /// The player is gone but the animation still counts as attached.
    Paused,
}

/// Drives one strip through idle, still-frame and animation states.
pub struct StripStateMachine {
    config: StripConfiguration,
    proxy: Arc<dyn StripProxy>,
    player_config: PlayerConfig,
    activity: Activity,
}

impl StripStateMachine {
    pub fn new(
        config: StripConfiguration,
        proxy: Arc<dyn StripProxy>,
        player_config: PlayerConfig,
    ) -> Self {
        Self {
            config,
            proxy,
            player_config,
            activity: Activity::Idle,
        }
    }

    pub fn index(&self) -> StripIndex {
        self.config.index
    }

    pub fn configuration(&self) -> &StripConfiguration {
        &self.config
    }

    /// Pure projection of the current state. A player that ended on its own
    /// reads as idle.
    pub fn status(&self) -> StripStatus {
        match &self.activity {
            Activity::Idle => StripStatus::Idle,
            Activity::DisplayingFrame => StripStatus::DisplayingFrame,
            Activity::Playing(player) if player.is_running() => StripStatus::Playing,
            Activity::Playing(_) => StripStatus::Idle,
            Activity::Paused => StripStatus::Paused,
        }
    }

    pub fn has_animation(&self) -> bool {
        matches!(self.status(), StripStatus::Playing | StripStatus::Paused)
    }

    pub fn start_animation(
        &mut self,
        frequency_hz: u32,
        initial_frames: Vec<Frame>,
        supplier: Arc<dyn FrameSupplier>,
    ) -> Result<()> {
        self.settle();
        self.require(StripStatus::Idle, "start an animation")?;
        if let Some(bad) = initial_frames.iter().position(|frame| !self.config.accepts(frame)) {
            return Err(DriverError::InvalidArgument(format!(
                "initial frame {bad} does not fit strip {} ({} pixels)",
                self.config.index, self.config.pixel_count
            )));
        }

        let mut player = AnimationPlayer::new(
            self.config.index,
            usize::from(self.config.pixel_count),
            Arc::clone(&self.proxy),
            supplier,
            self.player_config.clone(),
        );
        player.start(frequency_hz, initial_frames)?;
        self.activity = Activity::Playing(player);
        Ok(())
    }

    pub fn pause_animation(&mut self) -> Result<()> {
        self.settle();
        self.require(StripStatus::Playing, "pause")?;
        if let Activity::Playing(mut player) = std::mem::replace(&mut self.activity, Activity::Paused) {
            if let Err(err) = player.stop() {
                warn!(strip = self.config.index, error = %err, "player stop failed while pausing");
            }
        }
        debug!(strip = self.config.index, "animation paused");
        Ok(())
    }

    pub fn stop_animation(&mut self) -> Result<()> {
        self.settle();
        if !self.has_animation() {
            return Err(self.illegal("stop an animation"));
        }
        self.reset();
        debug!(strip = self.config.index, "animation stopped");
        Ok(())
    }

    pub fn display_frame(&mut self, frame: &Frame) -> Result<()> {
        self.settle();
        if self.has_animation() {
            return Err(self.illegal("display a frame"));
        }
        if !self.config.accepts(frame) {
            return Err(DriverError::InvalidArgument(format!(
                "frame of {} pixels does not fit strip {} ({} pixels)",
                frame.len(),
                self.config.index,
                self.config.pixel_count
            )));
        }

        if let Err(err) = self.proxy.set_colors(frame) {
            self.activity = Activity::Idle;
            self.clear_strip();
            return Err(err.into());
        }
        self.activity = Activity::DisplayingFrame;
        Ok(())
    }

    pub fn clear_frame(&mut self) -> Result<()> {
        self.settle();
        if self.has_animation() {
            return Err(self.illegal("clear"));
        }
        self.activity = Activity::Idle;
        self.proxy.clear()?;
        Ok(())
    }

    /// Force the strip back to idle and dark, whatever it was doing.
    pub fn reset(&mut self) {
        if let Activity::Playing(mut player) = std::mem::replace(&mut self.activity, Activity::Idle) {
            if let Err(err) = player.stop() {
                debug!(strip = self.config.index, error = %err, "player already stopped");
            }
        }
        self.clear_strip();
    }

    /// Drop a player that ended on its own. It has already cleared the strip.
    fn settle(&mut self) {
        if matches!(&self.activity, Activity::Playing(player) if !player.is_running()) {
            if let Activity::Playing(player) = std::mem::replace(&mut self.activity, Activity::Idle) {
                debug!(
                    strip = self.config.index,
                    reason = ?player.stop_reason(),
                    "animation ended on its own"
                );
            }
        }
    }

    fn require(&self, wanted: StripStatus, action: &str) -> Result<()> {
        if self.status() == wanted {
            Ok(())
        } else {
            Err(self.illegal(action))
        }
    }

    fn illegal(&self, action: &str) -> DriverError {
        DriverError::InvalidState(format!(
            "cannot {action} on strip {} while {}",
            self.config.index,
            self.status()
        ))
    }

    fn clear_strip(&self) {
        if let Err(err) = self.proxy.clear() {
            warn!(strip = self.config.index, error = %err, "failed to clear strip");
        }
    }
}

impl std::fmt::Debug for StripStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripStateMachine")
            .field("index", &self.config.index)
            .field("status", &self.status())
            .finish()
    }
}
