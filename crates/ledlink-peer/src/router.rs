//! Typed dispatch on top of a [`Channel`].
//!
//! [`Dispatcher`] answers inbound requests from a table of typed handlers and
//! always produces a reply for a recognized request. [`MessageRouter`] sends
//! typed requests and turns the reply back into a typed value or an error.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::channel::{Channel, InboundHandler};
use crate::error::{PeerError, Result};
use crate::messages::{ErrorKind, ErrorReply, Message, Request};
use crate::packet::{CommunicationPacket, PacketIdentifier};

/// Failure reported by a request handler; sent back as an [`ErrorReply`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct HandlerError {
    pub kind: ErrorKind,
    pub message: String,
}

impl HandlerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<HandlerError> for ErrorReply {
    fn from(err: HandlerError) -> Self {
        ErrorReply::new(err.kind, err.message)
    }
}

pub type HandlerResult<T> = std::result::Result<T, HandlerError>;

type BoxedHandler =
    Box<dyn Fn(&CommunicationPacket) -> HandlerResult<CommunicationPacket> + Send + Sync>;

/// Lookup table from request identifier to typed handler.
pub struct Dispatcher {
    handlers: HashMap<PacketIdentifier, BoxedHandler>,
}

/// Builds a [`Dispatcher`].
#[derive(Default)]
pub struct DispatcherBuilder {
    handlers: HashMap<PacketIdentifier, BoxedHandler>,
}

impl DispatcherBuilder {
    /// Register the handler for request type `R`, replacing any earlier one.
    pub fn on<R, F>(mut self, handler: F) -> Self
    where
        R: Request,
        F: Fn(R) -> HandlerResult<R::Reply> + Send + Sync + 'static,
    {
        let boxed: BoxedHandler = Box::new(move |packet: &CommunicationPacket| {
            let request: R = serde_json::from_slice(&packet.payload).map_err(|err| {
                HandlerError::internal(format!("cannot decode {:?}: {err}", R::IDENTIFIER))
            })?;
            let reply = handler(request)?;
            reply
                .to_packet()
                .map_err(|err| HandlerError::internal(format!("cannot encode reply: {err}")))
        });
        self.handlers.insert(R::IDENTIFIER, boxed);
        self
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            handlers: self.handlers,
        }
    }
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    /// Whether a handler is registered for `identifier`.
    pub fn handles(&self, identifier: PacketIdentifier) -> bool {
        self.handlers.contains_key(&identifier)
    }

    /// Run the handler for `packet` and produce the reply packet.
    ///
    /// Never fails: decode errors, handler errors and panics all become an
    /// [`ErrorReply`].
    pub fn dispatch(&self, packet: &CommunicationPacket) -> CommunicationPacket {
        if !packet.identifier.is_request() {
            return ErrorReply::new(
                ErrorKind::Communication,
                format!("{:?} is not a request", packet.identifier),
            )
            .into_packet();
        }

        let Some(handler) = self.handlers.get(&packet.identifier) else {
            debug!(identifier = ?packet.identifier, "no handler registered");
            return ErrorReply::new(
                ErrorKind::Unimplemented,
                format!("{:?} is not supported", packet.identifier),
            )
            .into_packet();
        };

        match catch_unwind(AssertUnwindSafe(|| handler(packet))) {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => {
                debug!(identifier = ?packet.identifier, error = %err, "handler rejected request");
                ErrorReply::from(err).into_packet()
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(identifier = ?packet.identifier, %message, "handler panicked");
                ErrorReply::new(ErrorKind::Internal, message).into_packet()
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

impl InboundHandler for Dispatcher {
    fn handle(&self, packet: CommunicationPacket) -> Option<CommunicationPacket> {
        Some(self.dispatch(&packet))
    }

    fn handle_malformed(&self, error: &PeerError) -> Option<CommunicationPacket> {
        Some(ErrorReply::new(ErrorKind::Communication, error.to_string()).into_packet())
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.handlers.keys().collect();
        ids.sort_by_key(|id| **id as u16);
        f.debug_struct("Dispatcher").field("handlers", &ids).finish()
    }
}

/// Sends typed requests over a shared [`Channel`].
#[derive(Debug, Clone)]
pub struct MessageRouter {
    channel: Arc<Channel>,
}

impl MessageRouter {
    pub fn new(channel: Arc<Channel>) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    /// Send `request` and decode its typed reply.
    ///
    /// An `ErrorReply` becomes [`PeerError::NotImplemented`] for kind
    /// `Unimplemented` and [`PeerError::Remote`] otherwise. Any other reply
    /// kind is a [`PeerError::Protocol`] error.
    pub fn send<R: Request>(&self, request: &R) -> Result<R::Reply> {
        let packet = request.to_packet()?;
        let reply = self.channel.send(packet)?;
        decode_reply::<R>(&reply)
    }

    /// Like [`MessageRouter::send`] with an explicit deadline.
    pub fn send_with_timeout<R: Request>(&self, request: &R, timeout: Duration) -> Result<R::Reply> {
        let packet = request.to_packet()?;
        let reply = self.channel.send_with_timeout(packet, timeout)?;
        decode_reply::<R>(&reply)
    }
}

/// Map a reply packet onto the typed reply of `R`.
pub fn decode_reply<R: Request>(reply: &CommunicationPacket) -> Result<R::Reply> {
    let expected = <R::Reply as Message>::IDENTIFIER;
    if reply.identifier == expected {
        return <R::Reply as Message>::from_packet(reply);
    }

    if reply.identifier == PacketIdentifier::ErrorReply {
        let error = ErrorReply::from_packet(reply)?;
        return Err(match error.kind {
            ErrorKind::Unimplemented => PeerError::NotImplemented(error.message),
            kind => PeerError::Remote {
                kind,
                message: error.message,
            },
        });
    }

    Err(PeerError::unexpected_reply(expected, reply.identifier))
}
