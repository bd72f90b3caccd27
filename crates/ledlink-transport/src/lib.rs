//! Stream transport for portal/driver links.
//!
//! This is the lowest layer of ledlink. It owns socket setup (listen, dial,
//! timeouts, peeking) and nothing else. Everything above builds on the
//! [`LinkStream`] type provided here.

pub mod error;
pub mod tcp;
pub mod traits;

pub use error::{is_fatal_io, Result, TransportError};
pub use tcp::{loopback_pair, LinkListener};
pub use traits::LinkStream;
