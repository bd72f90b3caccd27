use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock, TryLockError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use ledlink_frame::{Connection, ConnectionConfig, ConnectionError, ConnectionState, DisconnectReason};
use tracing::{debug, info, warn};

use crate::error::{PeerError, Result};
use crate::messages::{ErrorKind, ErrorReply};
use crate::packet::CommunicationPacket;

/// Channel tuning.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Deadline for one request/reply exchange.
    pub request_timeout: Duration,
    /// How long the receive loop waits for data before re-checking state.
    pub poll_interval: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// Everything needed to bring up one peer link.
#[derive(Debug, Clone, Default)]
pub struct PeerConfig {
    pub connection: ConnectionConfig,
    pub channel: ChannelConfig,
}

/// Receives packets the remote pushes without us asking.
pub trait InboundHandler: Send + Sync {
    /// Handle an inbound request. The returned packet is written back as the
    /// reply.
    fn handle(&self, packet: CommunicationPacket) -> Option<CommunicationPacket>;

    /// Called for inbound content that does not decode as a packet.
    fn handle_malformed(&self, error: &PeerError) -> Option<CommunicationPacket> {
        let _ = error;
        None
    }
}

/// Request/reply exchanges and an inbound hook over one [`Connection`].
///
/// Outbound requests and inbound dispatch share a single exchange lock, so at
/// most one packet is in flight at a time and a reply can never be read by
/// anyone but the caller waiting for it.
pub struct Channel {
    inner: Arc<Inner>,
    receive_loop: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    connection: Connection,
    config: ChannelConfig,
    exchange: Mutex<()>,
    in_flight: AtomicBool,
    running: AtomicBool,
    handler: RwLock<Option<Arc<dyn InboundHandler>>>,
    closed: Mutex<Option<DisconnectReason>>,
    closed_changed: Condvar,
}

/// Marks an exchange as in flight for as long as it lives.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Channel {
    /// Wrap a connection. Nothing is started until [`Channel::open`].
    pub fn new(connection: Connection, config: ChannelConfig) -> Self {
        let inner = Arc::new(Inner {
            connection,
            config,
            exchange: Mutex::new(()),
            in_flight: AtomicBool::new(false),
            running: AtomicBool::new(false),
            handler: RwLock::new(None),
            closed: Mutex::new(None),
            closed_changed: Condvar::new(),
        });

        let weak = Arc::downgrade(&inner);
        inner.connection.on_disconnect(move |reason| {
            if let Some(inner) = weak.upgrade() {
                inner.mark_closed(reason);
            }
        });

        Self {
            inner,
            receive_loop: Mutex::new(None),
        }
    }

    /// Install the handler for unsolicited inbound requests. Set it before
    /// [`Channel::open`] so no early request goes unanswered.
    pub fn set_inbound_handler(&self, handler: Arc<dyn InboundHandler>) {
        *self
            .inner
            .handler
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handler);
    }

    /// Connect (if needed) and start the background receive loop.
    pub fn open(&self) -> Result<()> {
        match self.inner.connection.state() {
            ConnectionState::Unconnected => self.inner.connection.connect()?,
            ConnectionState::Connected => {}
            ConnectionState::Disconnected => return Err(PeerError::Closed),
        }

        if self.inner.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let inner = Arc::clone(&self.inner);
        let handle = std::thread::Builder::new()
            .name("ledlink-channel".to_string())
            .spawn(move || inner.receive_loop())
            .map_err(|err| PeerError::Transport(err.into()))?;
        *lock(&self.receive_loop) = Some(handle);

        info!(peer = ?self.peer_addr(), "channel open");
        Ok(())
    }

    /// Stop the receive loop and disconnect. Idempotent.
    pub fn close(&self) {
        self.inner.running.store(false, Ordering::Release);
        self.inner
            .handler
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        self.inner.connection.disconnect();
        self.inner.mark_closed(DisconnectReason::Local);

        if let Some(handle) = lock(&self.receive_loop).take() {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.running.load(Ordering::Acquire) && self.inner.connection.is_connected()
    }

    /// Send a request and wait for its reply using the configured timeout.
    pub fn send(&self, packet: CommunicationPacket) -> Result<CommunicationPacket> {
        self.send_with_timeout(packet, self.inner.config.request_timeout)
    }

    /// Send a request and wait up to `timeout` for its reply.
    ///
    /// A timeout is reported, not retried. Requests the remote sends while
    /// ours is in flight are answered in place.
    pub fn send_with_timeout(
        &self,
        packet: CommunicationPacket,
        timeout: Duration,
    ) -> Result<CommunicationPacket> {
        if !self.inner.running.load(Ordering::Acquire) {
            return Err(PeerError::Closed);
        }

        let _exchange = lock(&self.inner.exchange);
        let _in_flight = InFlight::enter(&self.inner.in_flight);

        self.inner.connection.send(&packet.encode())?;
        debug!(identifier = ?packet.identifier, "request sent");

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(PeerError::Timeout(timeout));
            }

            let content = match self.inner.connection.receive(Some(remaining)) {
                Ok(content) => content,
                Err(ConnectionError::Timeout(_)) => {
                    warn!(identifier = ?packet.identifier, ?timeout, "request timed out");
                    return Err(PeerError::Timeout(timeout));
                }
                Err(err) => return Err(err.into()),
            };

            let reply = CommunicationPacket::decode(content)?;
            if reply.identifier.is_request() {
                debug!(identifier = ?reply.identifier, "answering crossing request");
                self.inner.answer(reply)?;
                continue;
            }

            debug!(identifier = ?reply.identifier, "reply received");
            return Ok(reply);
        }
    }

    /// Register a callback for when the underlying connection goes down.
    pub fn on_disconnect(&self, callback: impl FnOnce(DisconnectReason) + Send + 'static) {
        self.inner.connection.on_disconnect(callback);
    }

    /// Block until the channel is closed by either side, or `timeout` passes.
    pub fn wait_closed(&self, timeout: Option<Duration>) -> Option<DisconnectReason> {
        let closed = lock(&self.inner.closed);
        let closed = match timeout {
            None => self
                .inner
                .closed_changed
                .wait_while(closed, |closed| closed.is_none())
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
            Some(timeout) => {
                self.inner
                    .closed_changed
                    .wait_timeout_while(closed, timeout, |closed| closed.is_none())
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .0
            }
        };
        *closed
    }

    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.connection.peer_addr()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("open", &self.is_open())
            .field("connection", &self.inner.connection)
            .finish()
    }
}

impl Inner {
    fn mark_closed(&self, reason: DisconnectReason) {
        let mut closed = lock(&self.closed);
        if closed.is_none() {
            *closed = Some(reason);
        }
        drop(closed);
        self.closed_changed.notify_all();
    }

    fn handler(&self) -> Option<Arc<dyn InboundHandler>> {
        self.handler
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn reply(&self, reply: Option<CommunicationPacket>) -> Result<()> {
        if let Some(reply) = reply {
            self.connection.send(&reply.encode())?;
            debug!(identifier = ?reply.identifier, "reply sent");
        }
        Ok(())
    }

    /// Run the inbound handler for a request and write its reply.
    fn answer(&self, request: CommunicationPacket) -> Result<()> {
        let reply = match self.handler() {
            Some(handler) => handler.handle(request),
            None => Some(
                ErrorReply::new(ErrorKind::Unimplemented, "no inbound handler installed")
                    .into_packet(),
            ),
        };
        self.reply(reply)
    }

    fn dispatch(&self, content: Bytes) {
        let result = match CommunicationPacket::decode(content) {
            Ok(packet) if packet.identifier.is_request() => {
                debug!(identifier = ?packet.identifier, "inbound request");
                self.answer(packet)
            }
            Ok(packet) => {
                warn!(identifier = ?packet.identifier, "dropping reply nobody is waiting for");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "malformed inbound packet");
                let reply = match self.handler() {
                    Some(handler) => handler.handle_malformed(&err),
                    None => {
                        Some(ErrorReply::new(ErrorKind::Communication, err.to_string()).into_packet())
                    }
                };
                self.reply(reply)
            }
        };

        if let Err(err) = result {
            warn!(error = %err, "failed to answer inbound packet");
        }
    }

    fn receive_loop(&self) {
        debug!("receive loop started");
        let poll = self.config.poll_interval;

        while self.running.load(Ordering::Acquire) && self.connection.is_connected() {
            if !self.connection.wait_for_data(poll) {
                continue;
            }
            if self.in_flight.load(Ordering::Acquire) {
                std::thread::sleep(poll);
                continue;
            }

            let _exchange = match self.exchange.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => {
                    std::thread::sleep(poll);
                    continue;
                }
            };
            // A request/reply exchange may have taken the frame meanwhile.
            if !self.connection.is_data_available() {
                continue;
            }

            match self.connection.receive(Some(poll)) {
                Ok(content) => self.dispatch(content),
                Err(ConnectionError::Timeout(_)) => {}
                Err(err) => {
                    debug!(error = %err, "receive loop stopping");
                    break;
                }
            }
        }
        debug!("receive loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use ledlink_transport::loopback_pair;

    use super::*;
    use crate::packet::PacketIdentifier;

    /// Replies to every request with its expected reply kind, echoing the payload.
    struct Echo {
        delay_first: Option<Duration>,
        calls: AtomicUsize,
    }

    impl Echo {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                delay_first: None,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl InboundHandler for Echo {
        fn handle(&self, packet: CommunicationPacket) -> Option<CommunicationPacket> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                if let Some(delay) = self.delay_first {
                    std::thread::sleep(delay);
                }
            }
            let reply = packet.identifier.expected_reply()?;
            Some(CommunicationPacket::new(reply, packet.payload))
        }
    }

    fn config() -> PeerConfig {
        PeerConfig {
            connection: ConnectionConfig {
                poll_interval: Duration::from_millis(2),
                ..ConnectionConfig::default()
            },
            channel: ChannelConfig {
                request_timeout: Duration::from_secs(2),
                poll_interval: Duration::from_millis(2),
            },
        }
    }

    fn open_pair(
        left_handler: Option<Arc<dyn InboundHandler>>,
        right_handler: Option<Arc<dyn InboundHandler>>,
        config: PeerConfig,
    ) -> (Channel, Channel) {
        let (left, right) = loopback_pair().unwrap();
        let make = |stream, handler: Option<Arc<dyn InboundHandler>>| {
            let connection = Connection::from_stream(stream, config.connection.clone()).unwrap();
            let channel = Channel::new(connection, config.channel.clone());
            if let Some(handler) = handler {
                channel.set_inbound_handler(handler);
            }
            channel.open().unwrap();
            channel
        };
        (make(left, left_handler), make(right, right_handler))
    }

    fn request(tag: &str) -> CommunicationPacket {
        CommunicationPacket::new(
            PacketIdentifier::ClearStripRequest,
            Bytes::copy_from_slice(tag.as_bytes()),
        )
    }

    #[test]
    fn request_gets_matching_reply() {
        let (portal, _driver) = open_pair(None, Some(Echo::new()), config());

        let reply = portal.send(request("one")).unwrap();

        assert_eq!(reply.identifier, PacketIdentifier::SuccessReply);
        assert_eq!(reply.payload.as_ref(), b"one");
    }

    #[test]
    fn concurrent_sends_never_cross() {
        let (portal, _driver) = open_pair(None, Some(Echo::new()), config());
        let portal = Arc::new(portal);

        let workers: Vec<_> = (0..6)
            .map(|worker| {
                let portal = Arc::clone(&portal);
                std::thread::spawn(move || {
                    for n in 0..15 {
                        let tag = format!("w{worker}-n{n}");
                        let reply = portal.send(request(&tag)).unwrap();
                        assert_eq!(reply.payload.as_ref(), tag.as_bytes());
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
    }

    #[test]
    fn crossing_requests_are_both_answered() {
        let (left, right) = open_pair(Some(Echo::new()), Some(Echo::new()), config());
        let left = Arc::new(left);
        let right = Arc::new(right);

        let spawn = |channel: Arc<Channel>, side: &'static str| {
            std::thread::spawn(move || {
                for n in 0..20 {
                    let tag = format!("{side}-{n}");
                    let reply = channel.send(request(&tag)).unwrap();
                    assert_eq!(reply.payload.as_ref(), tag.as_bytes());
                }
            })
        };
        let a = spawn(Arc::clone(&left), "left");
        let b = spawn(Arc::clone(&right), "right");

        a.join().unwrap();
        b.join().unwrap();
    }

    #[test]
    fn inbound_request_larger_than_socket_buffer_is_answered() {
        let (portal, _driver) = open_pair(None, Some(Echo::new()), config());
        let payload = Bytes::from(vec![b'x'; 4 * 1024 * 1024]);

        let reply = portal
            .send_with_timeout(
                CommunicationPacket::new(PacketIdentifier::StartAnimationRequest, payload.clone()),
                Duration::from_secs(10),
            )
            .unwrap();

        assert_eq!(reply.identifier, PacketIdentifier::SuccessReply);
        assert_eq!(reply.payload, payload);
        assert!(portal.is_open());
    }

    #[test]
    fn timeout_is_reported_and_channel_survives() {
        let slow = Arc::new(Echo {
            delay_first: Some(Duration::from_millis(200)),
            calls: AtomicUsize::new(0),
        });
        let (portal, _driver) = open_pair(None, Some(slow), config());

        let err = portal
            .send_with_timeout(request("slow"), Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, PeerError::Timeout(_)));
        assert!(!err.is_fatal());

        // Let the late reply arrive and be discarded by the receive loop.
        std::thread::sleep(Duration::from_millis(400));
        assert!(portal.is_open());
        let reply = portal.send(request("fast")).unwrap();
        assert_eq!(reply.payload.as_ref(), b"fast");
    }

    #[test]
    fn missing_handler_answers_unimplemented() {
        let (portal, _driver) = open_pair(None, None, config());

        let reply = portal.send(request("anyone?")).unwrap();

        assert_eq!(reply.identifier, PacketIdentifier::ErrorReply);
        let error: ErrorReply = serde_json::from_slice(&reply.payload).unwrap();
        assert_eq!(error.kind, ErrorKind::Unimplemented);
    }

    #[test]
    fn malformed_inbound_gets_communication_error() {
        let (left, right) = loopback_pair().unwrap();
        let channel = Channel::new(
            Connection::from_stream(left, config().connection).unwrap(),
            config().channel,
        );
        channel.open().unwrap();
        let raw = Connection::from_stream(right, config().connection).unwrap();

        raw.send(&[0xee, 0xee, b'x']).unwrap();
        let content = raw.receive(Some(Duration::from_secs(2))).unwrap();

        let reply = CommunicationPacket::decode(content).unwrap();
        assert_eq!(reply.identifier, PacketIdentifier::ErrorReply);
        let error: ErrorReply = serde_json::from_slice(&reply.payload).unwrap();
        assert_eq!(error.kind, ErrorKind::Communication);
    }

    #[test]
    fn remote_close_is_observed() {
        let (portal, driver) = open_pair(None, Some(Echo::new()), config());

        portal.close();

        assert_eq!(
            driver.wait_closed(Some(Duration::from_secs(2))),
            Some(DisconnectReason::Remote)
        );
        let err = driver.send(request("late")).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(portal.send(request("x")), Err(PeerError::Closed)));
    }

    #[test]
    fn wait_closed_times_out_while_open() {
        let (portal, _driver) = open_pair(None, None, config());
        assert_eq!(portal.wait_closed(Some(Duration::from_millis(20))), None);
    }

    #[test]
    fn open_on_closed_channel_fails() {
        let (portal, _driver) = open_pair(None, None, config());
        portal.close();
        assert!(matches!(portal.open(), Err(PeerError::Closed)));
    }
}
