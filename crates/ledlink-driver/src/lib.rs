//! Device side of a ledlink: strips, their state machines and buffered
//! animation playback fed by the portal.
//!
//! A [`Driver`] owns a [`StripContext`] (the configured strips, keyed by
//! index) and serves one portal session at a time. Each strip runs a
//! [`StripStateMachine`]; animations are played by an [`AnimationPlayer`]
//! that asks the portal for more frames before its buffer runs dry.

pub mod config;
pub mod context;
pub mod driver;
pub mod error;
mod handlers;
pub mod player;
pub mod state;
pub mod store;
pub mod strip;

pub use config::{DriverConfig, PlayerConfig};
pub use context::StripContext;
pub use driver::{ChannelFrameSupplier, Driver};
pub use error::{DriverError, PlayerError, Result, StoreError, StripError};
pub use player::{AnimationPlayer, Backpressure, FrameSupplier, StopReason, MAX_FREQUENCY_HZ};
pub use state::StripStateMachine;
pub use store::{ConfigurationStore, JsonFileStore, MemoryStore};
pub use strip::{
    LoggingBackend, LoggingStrip, RecordingBackend, RecordingStrip, StripBackend, StripEvent,
    StripProxy,
};
