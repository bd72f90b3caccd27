//! Stream LED animations from a portal to a strip driver.
//!
//! A portal connects to a driver over a framed TCP link, synchronizes the
//! strip configuration, and starts animations that the driver plays at a
//! fixed frequency. The driver asks the portal for more frames as its
//! buffers drain.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP stream abstraction
//! - [`frame`]: typed frames, keep-alive and the polled connection
//! - [`peer`]: packets, the request/reply channel and the message router
//! - [`driver`]: strip state machines and the animation player (behind `driver` feature)
//! - [`portal`]: effect engines and the portal session (behind `portal` feature)

/// Re-export transport types.
pub mod transport {
    pub use ledlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use ledlink_frame::*;
}

/// Re-export peer types.
pub mod peer {
    pub use ledlink_peer::*;
}

/// Re-export driver types (requires `driver` feature).
#[cfg(feature = "driver")]
pub mod driver {
    pub use ledlink_driver::*;
}

/// Re-export portal types (requires `portal` feature).
#[cfg(feature = "portal")]
pub mod portal {
    pub use ledlink_portal::*;
}
