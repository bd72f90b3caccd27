use std::fmt;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, TryLockError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use ledlink_transport::{is_fatal_io, LinkListener, LinkStream};
use tracing::{debug, info, warn};

use crate::codec::{FrameConfig, FrameHeader, FrameType, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
use crate::error::{ConnectionError, FrameError};
use crate::reader::FrameReader;
use crate::writer::FrameWriter;

type DisconnectCallback = Box<dyn FnOnce(DisconnectReason) + Send>;

/// Connection tuning.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Idle time after which a keep-alive frame is emitted.
    pub max_idle_time: Duration,
    /// Sleep between poller checks; also the socket read timeout.
    pub poll_interval: Duration,
    /// How long the poller waits for a reader to pick up a ready frame.
    pub handoff_timeout: Duration,
    /// Dial timeout for [`Connection::connect`].
    pub connect_timeout: Duration,
    /// Socket write timeout. Exceeding it is fatal.
    pub write_timeout: Option<Duration>,
    /// Maximum packet content size.
    pub max_payload_size: usize,
    /// Shut the socket down as soon as a fatal error is seen, instead of
    /// leaving it to [`Connection::disconnect`] or drop.
    pub dispose_on_disconnect: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_idle_time: Duration::from_secs(2),
            poll_interval: Duration::from_millis(10),
            handoff_timeout: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(5),
            write_timeout: Some(Duration::from_secs(5)),
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            dispose_on_disconnect: true,
        }
    }
}

/// Lifecycle of a [`Connection`]. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Connected,
    Disconnected,
}

/// Why a connection went down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called locally.
    Local,
    /// The remote sent a disconnect frame.
    Remote,
    /// The stream hit EOF without a disconnect frame.
    StreamClosed,
    /// A keep-alive frame could not be written.
    KeepAliveFailed,
    /// The stream carried bytes that are not a valid frame.
    Protocol,
    /// A socket-level failure (reset, unreachable, write timeout).
    Socket(ErrorKind),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Local => f.write_str("closed locally"),
            DisconnectReason::Remote => f.write_str("closed by remote"),
            DisconnectReason::StreamClosed => f.write_str("stream closed"),
            DisconnectReason::KeepAliveFailed => f.write_str("keep-alive failed"),
            DisconnectReason::Protocol => f.write_str("invalid frame on stream"),
            DisconnectReason::Socket(kind) => write!(f, "socket error: {kind}"),
        }
    }
}

/// One framed, keep-alive aware link to a remote peer.
///
/// A connection is created unconnected, becomes connected once, and is
/// terminated for good on disconnect. A background poller thread emits
/// keep-alives, swallows incoming keep-alive frames, reacts to disconnect
/// frames and reports when a data frame has started arriving, all without
/// consuming data frames meant for [`Connection::receive`].
pub struct Connection {
    shared: Arc<Shared>,
    target: Option<String>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    config: ConnectionConfig,
    state: Mutex<ConnectionState>,
    reason: Mutex<Option<DisconnectReason>>,
    link: OnceLock<Link>,
    last_activity: Mutex<Instant>,
    ready: Mutex<bool>,
    ready_changed: Condvar,
    listeners: Mutex<Vec<DisconnectCallback>>,
}

struct Link {
    control: LinkStream,
    reader: Mutex<FrameReader<LinkStream>>,
    writer: Mutex<FrameWriter<LinkStream>>,
}

enum PollOutcome {
    /// Nothing arrived within one poll interval.
    Idle,
    /// A reader is mid-frame or a ready frame is still unclaimed.
    Busy,
    /// A keep-alive was consumed.
    KeepAlive,
    /// A data frame header is sitting in the socket buffer.
    DataReady,
    /// The link is gone.
    Closed(DisconnectReason),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Connection {
    /// An unconnected connection that will dial `addr` on [`Connection::connect`].
    pub fn new(addr: impl Into<String>, config: ConnectionConfig) -> Self {
        Self {
            shared: Arc::new(Shared::new(config)),
            target: Some(addr.into()),
            poller: Mutex::new(None),
        }
    }

    /// Wrap an already connected stream (e.g. one accepted by a listener).
    pub fn from_stream(stream: LinkStream, config: ConnectionConfig) -> Result<Self, ConnectionError> {
        let connection = Self {
            shared: Arc::new(Shared::new(config)),
            target: None,
            poller: Mutex::new(None),
        };
        connection.attach(stream)?;
        Ok(connection)
    }

    /// Establish the socket. Fails with [`ConnectionError::Connect`] on
    /// refusal or timeout.
    pub fn connect(&self) -> Result<(), ConnectionError> {
        match self.state() {
            ConnectionState::Unconnected => {}
            ConnectionState::Connected => return Err(ConnectionError::AlreadyConnected),
            ConnectionState::Disconnected => return Err(self.shared.disposed()),
        }

        let Some(target) = self.target.as_deref() else {
            return Err(ConnectionError::NotConnected);
        };
        let stream = LinkListener::connect(target, self.shared.config.connect_timeout)
            .map_err(ConnectionError::Connect)?;
        self.attach(stream)
    }

    fn attach(&self, stream: LinkStream) -> Result<(), ConnectionError> {
        let config = &self.shared.config;
        stream.set_read_timeout(Some(config.poll_interval))?;
        stream.set_write_timeout(config.write_timeout)?;

        let frame_config = FrameConfig {
            max_payload_size: config.max_payload_size,
            read_timeout: Some(config.poll_interval),
            write_timeout: config.write_timeout,
        };
        let link = Link {
            reader: Mutex::new(FrameReader::with_config(
                stream.try_clone()?,
                frame_config.clone(),
            )),
            writer: Mutex::new(FrameWriter::with_config(stream.try_clone()?, frame_config)),
            control: stream,
        };

        {
            let mut state = lock(&self.shared.state);
            if *state != ConnectionState::Unconnected || self.shared.link.set(link).is_err() {
                return Err(ConnectionError::AlreadyConnected);
            }
            *state = ConnectionState::Connected;
        }
        self.shared.touch();

        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("ledlink-poller".to_string())
            .spawn(move || shared.poll_loop())
            .map_err(|err| ConnectionError::Transport(err.into()))?;
        *lock(&self.poller) = Some(handle);

        info!(peer = ?self.peer_addr(), "connection established");
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *lock(&self.shared.state)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Why the connection went down, once it has.
    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        *lock(&self.shared.reason)
    }

    /// Remote address, once connected.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared.link.get().and_then(|link| link.control.peer_addr())
    }

    /// Register a callback fired exactly once when the connection goes down.
    ///
    /// Registering after the fact fires the callback immediately.
    pub fn on_disconnect(&self, callback: impl FnOnce(DisconnectReason) + Send + 'static) {
        let mut listeners = lock(&self.shared.listeners);
        if let Some(reason) = *lock(&self.shared.reason) {
            drop(listeners);
            callback(reason);
            return;
        }
        listeners.push(Box::new(callback));
    }

    /// Wrap `payload` in a packet frame and write it atomically.
    ///
    /// A socket failure tears the connection down and fires the disconnect
    /// callbacks before the error is returned.
    pub fn send(&self, payload: &[u8]) -> Result<(), ConnectionError> {
        let link = self.shared.connected_link()?;
        let result = lock(&link.writer).send_packet(payload);
        match result {
            Ok(()) => {
                self.shared.touch();
                Ok(())
            }
            Err(err @ FrameError::PayloadTooLarge { .. }) => Err(err.into()),
            Err(err) => {
                let reason = reason_for(&err);
                warn!(error = %err, "send failed; dropping connection");
                self.shared.teardown(reason);
                Err(err.into())
            }
        }
    }

    /// Block until a data frame arrives and return its content.
    ///
    /// Keep-alive frames are consumed silently. A disconnect frame tears the
    /// connection down and returns [`ConnectionError::Disconnected`]. With a
    /// `timeout`, waiting past it returns [`ConnectionError::Timeout`] and
    /// leaves the connection up.
    pub fn receive(&self, timeout: Option<Duration>) -> Result<Bytes, ConnectionError> {
        let link = self.shared.connected_link()?;
        let deadline = timeout.map(|timeout| (Instant::now() + timeout, timeout));
        let mut reader = lock(&link.reader);

        loop {
            if !self.is_connected() {
                return Err(self.shared.disposed());
            }

            match reader.read_frame() {
                Ok(frame) => {
                    self.shared.touch();
                    match frame.frame_type {
                        FrameType::Packet => {
                            drop(reader);
                            self.shared.set_ready(false);
                            return Ok(frame.content);
                        }
                        FrameType::KeepAlive => {
                            debug!("keep-alive received");
                        }
                        FrameType::Disconnect => {
                            drop(reader);
                            self.shared.teardown(DisconnectReason::Remote);
                            return Err(ConnectionError::Disconnected(DisconnectReason::Remote));
                        }
                    }
                }
                Err(err) if err.is_timeout() => {
                    if let Some((deadline, timeout)) = deadline {
                        if Instant::now() >= deadline {
                            return Err(ConnectionError::Timeout(timeout));
                        }
                    }
                }
                Err(err) => {
                    drop(reader);
                    let reason = reason_for(&err);
                    if self.shared.teardown(reason) {
                        warn!(error = %err, "receive failed; dropping connection");
                    }
                    return Err(ConnectionError::Disconnected(
                        self.disconnect_reason().unwrap_or(reason),
                    ));
                }
            }
        }
    }

    /// Whether the poller has seen a data frame that nobody has read yet.
    pub fn is_data_available(&self) -> bool {
        *lock(&self.shared.ready)
    }

    /// Wait up to `timeout` for a data frame to become available.
    ///
    /// Returns `false` on timeout or once the connection is down.
    pub fn wait_for_data(&self, timeout: Duration) -> bool {
        let ready = lock(&self.shared.ready);
        let (ready, _) = self
            .shared
            .ready_changed
            .wait_timeout_while(ready, timeout, |ready| !*ready && self.is_connected())
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *ready && self.is_connected()
    }

    /// Send a disconnect frame (best effort) and tear the socket down.
    pub fn disconnect(&self) {
        match self.state() {
            ConnectionState::Unconnected => {
                *lock(&self.shared.state) = ConnectionState::Disconnected;
                *lock(&self.shared.reason) = Some(DisconnectReason::Local);
            }
            ConnectionState::Connected => {
                if let Some(link) = self.shared.link.get() {
                    if let Err(err) = lock(&link.writer).send_disconnect() {
                        debug!(error = %err, "disconnect frame not delivered");
                    }
                }
                self.shared.teardown(DisconnectReason::Local);
            }
            ConnectionState::Disconnected => {}
        }
        self.shared.close_socket();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
        if let Some(handle) = lock(&self.poller).take() {
            // A disconnect callback may drop the last handle from the poller
            // thread itself.
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("peer", &self.peer_addr())
            .finish()
    }
}

impl Shared {
    fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ConnectionState::Unconnected),
            reason: Mutex::new(None),
            link: OnceLock::new(),
            last_activity: Mutex::new(Instant::now()),
            ready: Mutex::new(false),
            ready_changed: Condvar::new(),
            listeners: Mutex::new(Vec::new()),
        }
    }

    fn connected_link(&self) -> Result<&Link, ConnectionError> {
        match *lock(&self.state) {
            ConnectionState::Unconnected => Err(ConnectionError::NotConnected),
            ConnectionState::Disconnected => Err(self.disposed()),
            ConnectionState::Connected => self.link.get().ok_or(ConnectionError::NotConnected),
        }
    }

    fn disposed(&self) -> ConnectionError {
        ConnectionError::Disposed(lock(&self.reason).unwrap_or(DisconnectReason::Local))
    }

    fn touch(&self) {
        *lock(&self.last_activity) = Instant::now();
    }

    fn set_ready(&self, ready: bool) {
        *lock(&self.ready) = ready;
        self.ready_changed.notify_all();
    }

    /// Move to `Disconnected` and notify listeners. Returns `false` if the
    /// connection was not connected, so each lifecycle notifies once.
    fn teardown(&self, reason: DisconnectReason) -> bool {
        {
            let mut state = lock(&self.state);
            if *state != ConnectionState::Connected {
                return false;
            }
            *state = ConnectionState::Disconnected;
            *lock(&self.reason) = Some(reason);
        }

        info!(%reason, "connection closed");
        if self.config.dispose_on_disconnect {
            self.close_socket();
        }
        // Waiters re-check the state under the ready lock.
        drop(lock(&self.ready));
        self.ready_changed.notify_all();

        let listeners = std::mem::take(&mut *lock(&self.listeners));
        for listener in listeners {
            listener(reason);
        }
        true
    }

    fn close_socket(&self) {
        if let Some(link) = self.link.get() {
            let _ = link.control.shutdown();
        }
    }

    fn poll_loop(&self) {
        debug!("poller started");
        while *lock(&self.state) == ConnectionState::Connected {
            if !self.keep_alive_if_idle() {
                break;
            }

            match self.poll_once() {
                PollOutcome::Idle | PollOutcome::KeepAlive => {}
                PollOutcome::Busy => std::thread::sleep(self.config.poll_interval),
                PollOutcome::DataReady => self.hand_off(),
                PollOutcome::Closed(reason) => {
                    self.teardown(reason);
                    break;
                }
            }
        }
        debug!("poller stopped");
    }

    /// Emit a keep-alive if the link has been idle too long. Returns `false`
    /// if that failed and the connection is gone.
    fn keep_alive_if_idle(&self) -> bool {
        if lock(&self.last_activity).elapsed() < self.config.max_idle_time {
            return true;
        }
        let Some(link) = self.link.get() else {
            return false;
        };

        let result = lock(&link.writer).send_keep_alive();
        match result {
            Ok(()) => {
                debug!("keep-alive sent");
                self.touch();
                true
            }
            Err(err) => {
                warn!(error = %err, "keep-alive failed");
                self.teardown(DisconnectReason::KeepAliveFailed);
                false
            }
        }
    }

    /// Peek at the socket without taking data frames away from readers.
    fn poll_once(&self) -> PollOutcome {
        let Some(link) = self.link.get() else {
            return PollOutcome::Closed(DisconnectReason::StreamClosed);
        };
        if *lock(&self.ready) {
            return PollOutcome::Busy;
        }
        let mut reader = match link.reader.try_lock() {
            Ok(reader) => reader,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return PollOutcome::Busy,
        };
        if reader.buffered() > 0 {
            return PollOutcome::Busy;
        }

        let mut head = [0u8; HEADER_SIZE];
        let peeked = match link.control.peek(&mut head) {
            Ok(0) => return PollOutcome::Closed(DisconnectReason::StreamClosed),
            Ok(n) => n,
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return PollOutcome::Idle;
            }
            Err(err) if is_fatal_io(&err) => {
                return PollOutcome::Closed(DisconnectReason::Socket(err.kind()));
            }
            Err(_) => return PollOutcome::Idle,
        };

        let header = match FrameHeader::decode(&head[..peeked], self.config.max_payload_size) {
            Ok(Some(header)) => header,
            Ok(None) => return PollOutcome::Busy,
            Err(err) => {
                warn!(error = %err, "invalid frame header on stream");
                return PollOutcome::Closed(DisconnectReason::Protocol);
            }
        };

        match header.frame_type {
            FrameType::KeepAlive => match reader.read_frame() {
                Ok(_) => {
                    debug!("keep-alive received");
                    self.touch();
                    PollOutcome::KeepAlive
                }
                Err(err) if err.is_timeout() => PollOutcome::Busy,
                Err(err) => PollOutcome::Closed(reason_for(&err)),
            },
            FrameType::Disconnect => {
                let _ = reader.read_frame();
                info!("disconnect frame received");
                PollOutcome::Closed(DisconnectReason::Remote)
            }
            // The body may exceed the socket buffer; the reader assembles it.
            FrameType::Packet => PollOutcome::DataReady,
        }
    }

    /// Flag the frame as ready, wake waiters and give a reader a bounded
    /// window to take it before polling resumes.
    fn hand_off(&self) {
        let ready = {
            let mut ready = lock(&self.ready);
            *ready = true;
            ready
        };
        self.ready_changed.notify_all();

        let _ = self
            .ready_changed
            .wait_timeout_while(ready, self.config.handoff_timeout, |ready| {
                *ready && *lock(&self.state) == ConnectionState::Connected
            });
    }
}

fn reason_for(err: &FrameError) -> DisconnectReason {
    match err {
        FrameError::Io(io) => DisconnectReason::Socket(io.kind()),
        FrameError::ConnectionClosed => DisconnectReason::StreamClosed,
        _ => DisconnectReason::Protocol,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use ledlink_transport::loopback_pair;

    use super::*;
    use crate::reader::FrameReader;
    use crate::writer::FrameWriter;

    fn fast_config() -> ConnectionConfig {
        ConnectionConfig {
            max_idle_time: Duration::from_secs(30),
            poll_interval: Duration::from_millis(5),
            handoff_timeout: Duration::from_millis(200),
            ..ConnectionConfig::default()
        }
    }

    fn connected_pair(config: ConnectionConfig) -> (Connection, Connection) {
        let (left, right) = loopback_pair().unwrap();
        (
            Connection::from_stream(left, config.clone()).unwrap(),
            Connection::from_stream(right, config).unwrap(),
        )
    }

    /// A connection on one end, raw frame reader/writer on the other.
    fn raw_pair(config: ConnectionConfig) -> (Connection, FrameReader<LinkStream>, FrameWriter<LinkStream>) {
        let (left, right) = loopback_pair().unwrap();
        let reader = FrameReader::new(right.try_clone().unwrap());
        let writer = FrameWriter::new(right);
        (Connection::from_stream(left, config).unwrap(), reader, writer)
    }

    #[test]
    fn send_and_receive_packet() {
        let (a, b) = connected_pair(fast_config());

        a.send(b"hello").unwrap();
        let content = b.receive(Some(Duration::from_secs(2))).unwrap();

        assert_eq!(content.as_ref(), b"hello");
    }

    #[test]
    fn receive_times_out_without_tearing_down() {
        let (a, _b) = connected_pair(fast_config());

        let err = a.receive(Some(Duration::from_millis(30))).unwrap_err();

        assert!(matches!(err, ConnectionError::Timeout(_)));
        assert!(a.is_connected());
    }

    #[test]
    fn poller_flags_data_without_consuming_it() {
        let (a, b) = connected_pair(fast_config());

        a.send(b"waiting").unwrap();
        assert!(b.wait_for_data(Duration::from_secs(2)));
        assert!(b.is_data_available());

        // Give the poller several more cycles; the frame must still be there.
        std::thread::sleep(Duration::from_millis(50));
        let content = b.receive(Some(Duration::from_secs(1))).unwrap();
        assert_eq!(content.as_ref(), b"waiting");
        assert!(!b.is_data_available());
    }

    #[test]
    fn poller_consumes_keep_alives_only() {
        let (conn, _reader, mut writer) = raw_pair(fast_config());

        writer.send_keep_alive().unwrap();
        writer.send_keep_alive().unwrap();
        writer.send_packet(b"data").unwrap();

        assert!(conn.wait_for_data(Duration::from_secs(2)));
        let content = conn.receive(Some(Duration::from_secs(1))).unwrap();
        assert_eq!(content.as_ref(), b"data");
    }

    #[test]
    fn idle_connection_emits_keep_alive() {
        let config = ConnectionConfig {
            max_idle_time: Duration::from_millis(20),
            ..fast_config()
        };
        let (_conn, mut reader, _writer) = raw_pair(config);

        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.frame_type, FrameType::KeepAlive);
    }

    #[test]
    fn disconnect_frame_fires_callback_once() {
        let (a, b) = connected_pair(fast_config());
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        b.on_disconnect(move |reason| {
            assert_eq!(reason, DisconnectReason::Remote);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        a.disconnect();

        let deadline = Instant::now() + Duration::from_secs(2);
        while b.is_connected() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(b.state(), ConnectionState::Disconnected);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        assert!(matches!(b.send(b"late"), Err(ConnectionError::Disposed(_))));
        assert!(matches!(
            b.receive(Some(Duration::from_millis(10))),
            Err(ConnectionError::Disposed(_))
        ));
    }

    #[test]
    fn blocked_receive_observes_remote_disconnect() {
        let (conn, _reader, mut writer) = raw_pair(fast_config());
        let conn = Arc::new(conn);

        let waiter = {
            let conn = Arc::clone(&conn);
            std::thread::spawn(move || conn.receive(None))
        };
        std::thread::sleep(Duration::from_millis(20));
        writer.send_disconnect().unwrap();

        let result = waiter.join().unwrap();
        assert!(matches!(
            result,
            Err(ConnectionError::Disconnected(DisconnectReason::Remote))
                | Err(ConnectionError::Disposed(DisconnectReason::Remote))
        ));
        assert_eq!(conn.disconnect_reason(), Some(DisconnectReason::Remote));
    }

    #[test]
    fn peer_vanishing_is_reported() {
        let (a, b) = connected_pair(fast_config());
        let (tx, rx) = std::sync::mpsc::channel();
        a.on_disconnect(move |reason| {
            let _ = tx.send(reason);
        });

        drop(b);

        let reason = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(
            reason,
            DisconnectReason::Remote | DisconnectReason::StreamClosed | DisconnectReason::Socket(_)
        ));
    }

    #[test]
    fn fatal_send_tears_down_and_disposes() {
        let config = ConnectionConfig {
            write_timeout: Some(Duration::from_millis(50)),
            max_payload_size: 128 * 1024 * 1024,
            ..fast_config()
        };
        // The raw end never reads, so a large write stalls past the timeout.
        let (conn, _reader, _writer) = raw_pair(config);
        let fired = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&fired);
        conn.on_disconnect(move |reason| seen.lock().unwrap().push(reason));

        let err = conn.send(&vec![0x5a; 64 * 1024 * 1024]).unwrap_err();

        assert!(matches!(err, ConnectionError::Frame(FrameError::Io(_))));
        assert!(err.is_fatal());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        let reasons = fired.lock().unwrap().clone();
        assert_eq!(reasons.len(), 1);
        assert!(matches!(
            reasons[0],
            DisconnectReason::Socket(_) | DisconnectReason::StreamClosed
        ));
        assert!(matches!(conn.send(b"again"), Err(ConnectionError::Disposed(_))));
    }

    #[test]
    fn send_to_vanished_peer_fails_once() {
        let (conn, reader, writer) = raw_pair(fast_config());
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        conn.on_disconnect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        reader.get_ref().shutdown().unwrap();
        drop(reader);
        drop(writer);

        let deadline = Instant::now() + Duration::from_secs(2);
        let err = loop {
            match conn.send(b"anyone there?") {
                Ok(()) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(5)),
                Ok(()) => panic!("send kept succeeding after the peer went away"),
                Err(err) => break err,
            }
        };

        assert!(err.is_fatal());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(matches!(conn.send(b"late"), Err(ConnectionError::Disposed(_))));
    }

    #[test]
    fn callback_registered_late_fires_immediately() {
        let (a, _b) = connected_pair(fast_config());
        a.disconnect();

        let (tx, rx) = std::sync::mpsc::channel();
        a.on_disconnect(move |reason| {
            let _ = tx.send(reason);
        });
        assert_eq!(rx.try_recv().unwrap(), DisconnectReason::Local);
    }

    #[test]
    fn unconnected_operations_fail() {
        let conn = Connection::new("127.0.0.1:1", fast_config());
        assert_eq!(conn.state(), ConnectionState::Unconnected);
        assert!(matches!(conn.send(b"x"), Err(ConnectionError::NotConnected)));
        assert!(matches!(
            conn.receive(Some(Duration::from_millis(1))),
            Err(ConnectionError::NotConnected)
        ));
    }

    #[test]
    fn connect_refused_is_connection_error() {
        let addr = {
            let listener = LinkListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr()
        };
        let conn = Connection::new(
            addr.to_string(),
            ConnectionConfig {
                connect_timeout: Duration::from_millis(200),
                ..fast_config()
            },
        );

        assert!(matches!(conn.connect(), Err(ConnectionError::Connect(_))));
    }

    #[test]
    fn connect_dials_listener() {
        let listener = LinkListener::bind("127.0.0.1:0").unwrap();
        let conn = Connection::new(listener.local_addr().to_string(), fast_config());

        conn.connect().unwrap();
        let server = Connection::from_stream(listener.accept().unwrap(), fast_config()).unwrap();

        conn.send(b"dialed").unwrap();
        assert_eq!(
            server.receive(Some(Duration::from_secs(1))).unwrap().as_ref(),
            b"dialed"
        );
        assert!(matches!(
            conn.connect(),
            Err(ConnectionError::AlreadyConnected)
        ));
    }
}
