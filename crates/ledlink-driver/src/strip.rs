//! The seam to the physical strip.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use ledlink_peer::{Frame, StripConfiguration, StripIndex};
use tracing::debug;

use crate::error::StripError;

/// Writes pixels to one strip.
pub trait StripProxy: Send + Sync {
    fn set_colors(&self, frame: &Frame) -> Result<(), StripError>;

    /// Turn every pixel off.
    fn clear(&self) -> Result<(), StripError>;
}

/// Opens a [`StripProxy`] for each configured strip.
pub trait StripBackend: Send + Sync {
    fn open(&self, config: &StripConfiguration) -> Result<Arc<dyn StripProxy>, StripError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A virtual strip that only logs what it would show.
#[derive(Debug)]
pub struct LoggingStrip {
    index: StripIndex,
    frames: AtomicU64,
}

impl LoggingStrip {
    pub fn new(index: StripIndex) -> Self {
        Self {
            index,
            frames: AtomicU64::new(0),
        }
    }

    /// Frames written so far.
    pub fn frames_shown(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl StripProxy for LoggingStrip {
    fn set_colors(&self, frame: &Frame) -> Result<(), StripError> {
        let shown = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            strip = self.index,
            pixels = frame.len(),
            first = ?frame.pixels().first(),
            shown,
            "set colors"
        );
        Ok(())
    }

    fn clear(&self) -> Result<(), StripError> {
        debug!(strip = self.index, "clear");
        Ok(())
    }
}

/// Backend producing [`LoggingStrip`]s.
#[derive(Debug, Default)]
pub struct LoggingBackend;

impl StripBackend for LoggingBackend {
    fn open(&self, config: &StripConfiguration) -> Result<Arc<dyn StripProxy>, StripError> {
        debug!(strip = config.index, pixels = config.pixel_count, name = %config.name, "virtual strip opened");
        Ok(Arc::new(LoggingStrip::new(config.index)))
    }
}

/// What a [`RecordingStrip`] was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StripEvent {
    Colors(Frame),
    Clear,
}

/// Keeps every call for inspection; can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingStrip {
    events: Mutex<Vec<StripEvent>>,
    fail: AtomicBool,
}

impl RecordingStrip {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `set_colors` calls fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<StripEvent> {
        lock(&self.events).clone()
    }

    /// Frames shown, in order.
    pub fn frames(&self) -> Vec<Frame> {
        lock(&self.events)
            .iter()
            .filter_map(|event| match event {
                StripEvent::Colors(frame) => Some(frame.clone()),
                StripEvent::Clear => None,
            })
            .collect()
    }

    pub fn clear_count(&self) -> usize {
        lock(&self.events)
            .iter()
            .filter(|event| matches!(event, StripEvent::Clear))
            .count()
    }

    pub fn last(&self) -> Option<StripEvent> {
        lock(&self.events).last().cloned()
    }
}

impl StripProxy for RecordingStrip {
    fn set_colors(&self, frame: &Frame) -> Result<(), StripError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StripError("write rejected".to_string()));
        }
        lock(&self.events).push(StripEvent::Colors(frame.clone()));
        Ok(())
    }

    fn clear(&self) -> Result<(), StripError> {
        lock(&self.events).push(StripEvent::Clear);
        Ok(())
    }
}

/// Hands out one [`RecordingStrip`] per index and keeps them reachable.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    strips: Mutex<BTreeMap<StripIndex, Arc<RecordingStrip>>>,
    refuse: AtomicBool,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `open` calls fail.
    pub fn refuse_open(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// The most recently opened strip at `index`.
    pub fn strip(&self, index: StripIndex) -> Option<Arc<RecordingStrip>> {
        lock(&self.strips).get(&index).cloned()
    }
}

impl StripBackend for RecordingBackend {
    fn open(&self, config: &StripConfiguration) -> Result<Arc<dyn StripProxy>, StripError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(StripError(format!("strip {} unavailable", config.index)));
        }
        let strip = Arc::new(RecordingStrip::new());
        lock(&self.strips).insert(config.index, Arc::clone(&strip));
        Ok(strip)
    }
}

#[cfg(test)]
mod tests {
    use ledlink_peer::{Color, ColorSpectrum};

    use super::*;

    #[test]
    fn recording_strip_keeps_order() {
        let strip = RecordingStrip::new();
        let red = Frame::solid(ColorSpectrum::Rgb, 2, Color::rgb(255, 0, 0));
        strip.set_colors(&red).unwrap();
        strip.clear().unwrap();

        assert_eq!(
            strip.events(),
            vec![StripEvent::Colors(red.clone()), StripEvent::Clear]
        );
        assert_eq!(strip.frames(), vec![red]);
        assert_eq!(strip.clear_count(), 1);
        assert_eq!(strip.last(), Some(StripEvent::Clear));
    }

    #[test]
    fn failing_writes_are_not_recorded() {
        let strip = RecordingStrip::new();
        strip.fail_writes(true);
        assert!(strip.set_colors(&Frame::blank(ColorSpectrum::Rgb, 1)).is_err());
        assert!(strip.events().is_empty());
    }

    #[test]
    fn backend_tracks_latest_strip_per_index() {
        let backend = RecordingBackend::new();
        let config = StripConfiguration::new(3, 10, ColorSpectrum::Rgbw);
        let proxy = backend.open(&config).unwrap();
        proxy.clear().unwrap();
        assert_eq!(backend.strip(3).unwrap().clear_count(), 1);

        backend.refuse_open(true);
        assert!(backend.open(&config).is_err());
        assert!(backend.strip(4).is_none());
    }

    #[test]
    fn logging_strip_counts_frames() {
        let strip = LoggingStrip::new(0);
        strip.set_colors(&Frame::blank(ColorSpectrum::Rgb, 4)).unwrap();
        strip.set_colors(&Frame::blank(ColorSpectrum::Rgb, 4)).unwrap();
        strip.clear().unwrap();
        assert_eq!(strip.frames_shown(), 2);
    }
}
