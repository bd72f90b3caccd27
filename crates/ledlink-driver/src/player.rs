//! Buffered, fixed-rate playback of a remote frame stream onto one strip.
//!
//! The player owns a FIFO of pending frames. A dedicated thread pops one frame
//! per tick and pushes it to the strip. Whenever the buffer falls under
//! `target_stack_size * request_threshold` the player asks its
//! [`FrameSupplier`] for enough frames to get back to the target, on a
//! separate thread so playback never waits for the network.
//!
//! An empty buffer ends the animation and clears the strip.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ledlink_peer::{Frame, PeerError, StripIndex};
use tracing::{debug, info, warn};

use crate::config::PlayerConfig;
use crate::error::PlayerError;
use crate::strip::StripProxy;

/// Highest accepted playback frequency.
pub const MAX_FREQUENCY_HZ: u32 = 240;

/// Longest single sleep of the playback loop, so a stop is noticed quickly.
const SLEEP_SLICE: Duration = Duration::from_millis(2);
const JOIN_POLL: Duration = Duration::from_millis(1);

/// Source of additional frames, usually the portal on the other end of the
/// link.
pub trait FrameSupplier: Send + Sync {
    fn request_frames(&self, strip: StripIndex, count: usize) -> ledlink_peer::Result<Vec<Frame>>;
}

/// Why playback ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// [`AnimationPlayer::stop`] was called.
    Requested,
    /// The buffer ran dry.
    Starved,
    /// The supplier failed for good.
    RefillFailed,
    /// The strip rejected a frame.
    StripFailed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StopReason::Requested => "requested",
            StopReason::Starved => "buffer starved",
            StopReason::RefillFailed => "refill failed",
            StopReason::StripFailed => "strip write failed",
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Refill gate: at most one request outstanding, issued only under the
/// threshold.
#[derive(Debug)]
pub struct Backpressure {
    target: usize,
    threshold: f64,
    outstanding: AtomicBool,
}

impl Backpressure {
    pub fn new(config: &PlayerConfig) -> Self {
        Self {
            target: config.target_stack_size,
            threshold: config.request_threshold,
            outstanding: AtomicBool::new(false),
        }
    }

    /// True when `buffered` frames is under the refill threshold.
    pub fn is_low(&self, buffered: usize) -> bool {
        (buffered as f64) < self.target as f64 * self.threshold
    }

    /// If a refill is due for `buffered` frames and none is outstanding,
    /// claim the request slot and return how many frames to ask for.
    pub fn check(&self, buffered: usize) -> Option<usize> {
        if !self.is_low(buffered) {
            return None;
        }
        self.outstanding
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(self.target.saturating_sub(buffered))
    }

    /// Release the request slot.
    pub fn complete(&self) {
        self.outstanding.store(false, Ordering::Release);
    }

    pub fn is_outstanding(&self) -> bool {
        self.outstanding.load(Ordering::Acquire)
    }
}

/// Failures that end playback at once rather than being retried.
fn ends_playback(err: &PeerError) -> bool {
    err.is_fatal()
        || matches!(
            err,
            PeerError::Remote { .. } | PeerError::NotImplemented(_)
        )
}

/// State shared between the player, its playback thread and refill threads.
struct Playback {
    strip: StripIndex,
    pixel_count: usize,
    proxy: Arc<dyn StripProxy>,
    supplier: Arc<dyn FrameSupplier>,
    buffer: Mutex<VecDeque<Frame>>,
    running: AtomicBool,
    stop_reason: Mutex<Option<StopReason>>,
    backpressure: Backpressure,
    failures: AtomicU32,
    max_failures: u32,
    played: AtomicU64,
}

impl Playback {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// End playback for `reason`. Only the first caller wins; returns whether
    /// that was us.
    fn finish(&self, reason: StopReason) -> bool {
        let mut slot = lock(&self.stop_reason);
        if self.running.swap(false, Ordering::AcqRel) {
            *slot = Some(reason);
            true
        } else {
            false
        }
    }

    fn run(self: Arc<Self>, tick: Duration) {
        let mut next_tick = Instant::now();

        while self.is_running() {
            let frame = lock(&self.buffer).pop_front();
            let Some(frame) = frame else {
                warn!(
                    strip = self.strip,
                    played = self.played.load(Ordering::Relaxed),
                    "frame buffer starved, ending animation"
                );
                self.finish(StopReason::Starved);
                break;
            };

            if let Err(err) = self.proxy.set_colors(&frame) {
                warn!(strip = self.strip, error = %err, "strip write failed, ending animation");
                self.finish(StopReason::StripFailed);
                break;
            }
            self.played.fetch_add(1, Ordering::Relaxed);
            self.check_backpressure();

            next_tick += tick;
            let now = Instant::now();
            if now > next_tick {
                // Skip missed ticks instead of replaying them back to back.
                let behind = now.duration_since(next_tick);
                let missed = u32::try_from(behind.as_nanos() / tick.as_nanos()).unwrap_or(u32::MAX - 1);
                next_tick += tick * (missed + 1);
                debug!(strip = self.strip, missed, "playback overran");
            }
            self.sleep_until(next_tick);
        }

        let reason = *lock(&self.stop_reason);
        if reason != Some(StopReason::Requested) {
            if let Err(err) = self.proxy.clear() {
                warn!(strip = self.strip, error = %err, "failed to clear strip");
            }
        }
        info!(
            strip = self.strip,
            reason = %reason.unwrap_or(StopReason::Requested),
            played = self.played.load(Ordering::Relaxed),
            "playback ended"
        );
    }

    fn sleep_until(&self, deadline: Instant) {
        while self.is_running() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }

    fn check_backpressure(self: &Arc<Self>) {
        if !self.is_running() {
            return;
        }
        let buffered = lock(&self.buffer).len();
        let Some(count) = self.backpressure.check(buffered) else {
            return;
        };
        debug!(strip = self.strip, buffered, count, "requesting refill");

        let playback = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("ledlink-refill-{}", self.strip))
            .spawn(move || playback.refill(count));
        if let Err(err) = spawned {
            warn!(strip = self.strip, error = %err, "failed to spawn refill thread");
            self.backpressure.complete();
        }
    }

    fn refill(&self, count: usize) {
        if self.is_running() {
            match self.supplier.request_frames(self.strip, count) {
                Ok(frames) if frames.iter().any(|frame| frame.len() != self.pixel_count) => {
                    warn!(
                        strip = self.strip,
                        pixels = self.pixel_count,
                        "refill carried frames that do not fit the strip, ending animation"
                    );
                    self.finish(StopReason::RefillFailed);
                }
                Ok(frames) if !frames.is_empty() => {
                    self.failures.store(0, Ordering::Relaxed);
                    if self.is_running() {
                        let mut buffer = lock(&self.buffer);
                        let added = frames.len();
                        buffer.extend(frames);
                        debug!(strip = self.strip, added, buffered = buffer.len(), "refill received");
                    }
                }
                Ok(_) => self.transient_failure(&"supplier returned no frames"),
                Err(err) if ends_playback(&err) => {
                    warn!(strip = self.strip, error = %err, "refill failed, ending animation");
                    self.finish(StopReason::RefillFailed);
                }
                Err(err) => self.transient_failure(&err),
            }
        }
        self.backpressure.complete();
    }

    fn transient_failure(&self, error: &dyn fmt::Display) {
        let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.max_failures {
            warn!(strip = self.strip, failures, error = %error, "refill keeps failing, ending animation");
            self.finish(StopReason::RefillFailed);
        } else {
            debug!(strip = self.strip, failures, error = %error, "refill failed, will retry");
        }
    }
}

/// Plays frames on one strip at a fixed frequency.
///
/// `Stopped -> Running` on [`start`](Self::start), `Running -> Stopped` on
/// [`stop`](Self::stop), starvation, strip failure or refill failure.
pub struct AnimationPlayer {
    strip: StripIndex,
    pixel_count: usize,
    proxy: Arc<dyn StripProxy>,
    supplier: Arc<dyn FrameSupplier>,
    config: PlayerConfig,
    playback: Option<Arc<Playback>>,
    thread: Option<JoinHandle<()>>,
}

impl AnimationPlayer {
    /// A stopped player for strip `strip`. Refilled frames must carry
    /// exactly `pixel_count` pixels.
    pub fn new(
        strip: StripIndex,
        pixel_count: usize,
        proxy: Arc<dyn StripProxy>,
        supplier: Arc<dyn FrameSupplier>,
        config: PlayerConfig,
    ) -> Self {
        Self {
            strip,
            pixel_count,
            proxy,
            supplier,
            config,
            playback: None,
            thread: None,
        }
    }

    pub fn strip(&self) -> StripIndex {
        self.strip
    }

    /// Seed the buffer with `initial_frames` and start playing at
    /// `frequency_hz`.
    pub fn start(&mut self, frequency_hz: u32, initial_frames: Vec<Frame>) -> Result<(), PlayerError> {
        if self.is_running() {
            return Err(PlayerError::AlreadyRunning);
        }
        if !(1..=MAX_FREQUENCY_HZ).contains(&frequency_hz) {
            return Err(PlayerError::InvalidFrequency(frequency_hz));
        }
        if initial_frames.is_empty() {
            return Err(PlayerError::NoInitialFrames);
        }
        // A previous run may have ended on its own.
        self.join();

        let seeded = initial_frames.len();
        let playback = Arc::new(Playback {
            strip: self.strip,
            pixel_count: self.pixel_count,
            proxy: Arc::clone(&self.proxy),
            supplier: Arc::clone(&self.supplier),
            buffer: Mutex::new(VecDeque::from(initial_frames)),
            running: AtomicBool::new(true),
            stop_reason: Mutex::new(None),
            backpressure: Backpressure::new(&self.config),
            failures: AtomicU32::new(0),
            max_failures: self.config.max_consecutive_failures,
            played: AtomicU64::new(0),
        });

        let tick = Duration::from_secs(1) / frequency_hz;
        let worker = Arc::clone(&playback);
        let handle = thread::Builder::new()
            .name(format!("ledlink-player-{}", self.strip))
            .spawn(move || worker.run(tick))
            .map_err(PlayerError::Spawn)?;

        self.playback = Some(playback);
        self.thread = Some(handle);
        info!(strip = self.strip, frequency_hz, frames = seeded, "animation started");
        Ok(())
    }

    /// Stop playback, join the playback thread (bounded) and drop buffered
    /// frames. The last frame stays on the strip.
    pub fn stop(&mut self) -> Result<(), PlayerError> {
        let Some(playback) = self.playback.clone() else {
            return Err(PlayerError::AlreadyStopped);
        };
        let requested = playback.finish(StopReason::Requested);
        self.join();
        lock(&playback.buffer).clear();

        if requested {
            info!(
                strip = self.strip,
                played = playback.played.load(Ordering::Relaxed),
                "animation stopped"
            );
            Ok(())
        } else {
            Err(PlayerError::AlreadyStopped)
        }
    }

    pub fn is_running(&self) -> bool {
        self.playback
            .as_ref()
            .is_some_and(|playback| playback.is_running())
    }

    /// Frames waiting to be shown.
    pub fn buffered(&self) -> usize {
        self.playback
            .as_ref()
            .map_or(0, |playback| lock(&playback.buffer).len())
    }

    /// Frames shown by the current (or last) run.
    pub fn frames_played(&self) -> u64 {
        self.playback
            .as_ref()
            .map_or(0, |playback| playback.played.load(Ordering::Relaxed))
    }

    /// Why the current (or last) run ended. `None` while running.
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.playback
            .as_ref()
            .and_then(|playback| *lock(&playback.stop_reason))
    }

    fn join(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };
        let deadline = Instant::now() + self.config.stop_timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(strip = self.strip, "playback thread did not stop in time, detaching");
                return;
            }
            thread::sleep(JOIN_POLL);
        }
        if handle.join().is_err() {
            warn!(strip = self.strip, "playback thread panicked");
        }
    }
}

impl Drop for AnimationPlayer {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}

impl fmt::Debug for AnimationPlayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnimationPlayer")
            .field("strip", &self.strip)
            .field("running", &self.is_running())
            .field("buffered", &self.buffered())
            .finish()
    }
}
