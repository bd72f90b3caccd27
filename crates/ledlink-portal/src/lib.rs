//! Controller side of a ledlink.
//!
//! A [`DriverSession`] connects to a driver, makes sure it runs the portal's
//! configuration, then starts animations whose frames come from an
//! [`EffectEngine`]. The driver pulls more frames as it needs them; the
//! session answers those requests from the engine registered for the strip.

pub mod effect;
pub mod error;
pub mod session;

pub use effect::{hsv, ChaseEffect, EffectEngine, EffectKind, RainbowEffect, SolidEffect};
pub use error::{PortalError, Result};
pub use session::{DriverSession, SessionConfig, MAX_REFILL_FRAMES};
