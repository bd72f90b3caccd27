//! Deterministic frame generators.
//!
//! Effects advance one step per rendered frame rather than by wall clock, so
//! the same effect always produces the same frame sequence. Playback speed is
//! the driver's frequency.

use std::fmt;
use std::str::FromStr;

use ledlink_peer::{Color, ColorSpectrum, Frame, StripConfiguration};
use serde::{Deserialize, Serialize};

use crate::error::PortalError;

/// Produces frames for one strip, one per call.
pub trait EffectEngine: Send {
    fn next_frame(&mut self) -> Frame;

    /// The next `count` frames, in order.
    fn frames(&mut self, count: usize) -> Vec<Frame> {
        (0..count).map(|_| self.next_frame()).collect()
    }

    /// Restart from the first frame.
    fn reset(&mut self) {}
}

/// Convert 8-bit HSV to RGB.
pub fn hsv(hue: u8, saturation: u8, value: u8) -> Color {
    if saturation == 0 {
        return Color::rgb(value, value, value);
    }

    let region = hue / 43;
    let remainder = u16::from(hue - region * 43) * 6;
    let (s, v) = (u16::from(saturation), u16::from(value));

    let p = ((v * (255 - s)) >> 8) as u8;
    let q = ((v * (255 - ((s * remainder) >> 8))) >> 8) as u8;
    let t = ((v * (255 - ((s * (255 - remainder)) >> 8))) >> 8) as u8;

    match region {
        0 => Color::rgb(value, t, p),
        1 => Color::rgb(q, value, p),
        2 => Color::rgb(p, value, t),
        3 => Color::rgb(p, q, value),
        4 => Color::rgb(t, p, value),
        _ => Color::rgb(value, p, q),
    }
}

/// Every pixel the same color.
#[derive(Debug, Clone)]
pub struct SolidEffect {
    frame: Frame,
}

impl SolidEffect {
    pub fn new(strip: &StripConfiguration, color: Color) -> Self {
        Self {
            frame: Frame::solid(strip.spectrum, usize::from(strip.pixel_count), color),
        }
    }
}

impl EffectEngine for SolidEffect {
    fn next_frame(&mut self) -> Frame {
        self.frame.clone()
    }
}

/// A lit segment running along the strip and wrapping around.
#[derive(Debug, Clone)]
pub struct ChaseEffect {
    spectrum: ColorSpectrum,
    pixels: usize,
    color: Color,
    background: Color,
    width: usize,
    position: usize,
}

impl ChaseEffect {
    pub fn new(strip: &StripConfiguration, color: Color) -> Self {
        Self {
            spectrum: strip.spectrum,
            pixels: usize::from(strip.pixel_count),
            color,
            background: Color::BLACK,
            width: 1,
            position: 0,
        }
    }

    /// Length of the lit segment.
    #[must_use]
    pub fn with_width(mut self, width: usize) -> Self {
        self.width = width.max(1);
        self
    }

    #[must_use]
    pub fn with_background(mut self, background: Color) -> Self {
        self.background = background;
        self
    }
}

impl EffectEngine for ChaseEffect {
    fn next_frame(&mut self) -> Frame {
        let mut pixels = vec![self.background; self.pixels];
        if self.pixels > 0 {
            for offset in 0..self.width.min(self.pixels) {
                pixels[(self.position + offset) % self.pixels] = self.color;
            }
            self.position = (self.position + 1) % self.pixels;
        }
        Frame::new(self.spectrum, pixels)
    }

    fn reset(&mut self) {
        self.position = 0;
    }
}

/// A hue gradient across the strip that shifts every frame.
#[derive(Debug, Clone)]
pub struct RainbowEffect {
    spectrum: ColorSpectrum,
    pixels: usize,
    hue: u8,
    speed: u8,
    saturation: u8,
    value: u8,
}

impl RainbowEffect {
    pub fn new(strip: &StripConfiguration) -> Self {
        Self {
            spectrum: strip.spectrum,
            pixels: usize::from(strip.pixel_count),
            hue: 0,
            speed: 2,
            saturation: 255,
            value: 255,
        }
    }

    /// Hue steps per frame.
    #[must_use]
    pub fn with_speed(mut self, speed: u8) -> Self {
        self.speed = speed;
        self
    }

    #[must_use]
    pub fn with_saturation(mut self, saturation: u8) -> Self {
        self.saturation = saturation;
        self
    }

    /// Brightness.
    #[must_use]
    pub fn with_value(mut self, value: u8) -> Self {
        self.value = value;
        self
    }
}

impl EffectEngine for RainbowEffect {
    fn next_frame(&mut self) -> Frame {
        let span = self.pixels.max(1);
        let pixels = (0..self.pixels)
            .map(|index| {
                #[allow(clippy::cast_possible_truncation)]
                let offset = ((index * 256) / span) as u8;
                hsv(self.hue.wrapping_add(offset), self.saturation, self.value)
            })
            .collect();
        self.hue = self.hue.wrapping_add(self.speed);
        Frame::new(self.spectrum, pixels)
    }

    fn reset(&mut self) {
        self.hue = 0;
    }
}

/// Built-in effects, selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    Solid,
    Chase,
    Rainbow,
}

impl EffectKind {
    /// Build an engine for `strip`. `color` is ignored by the rainbow.
    pub fn build(self, strip: &StripConfiguration, color: Color) -> Box<dyn EffectEngine> {
        match self {
            EffectKind::Solid => Box::new(SolidEffect::new(strip, color)),
            EffectKind::Chase => Box::new(
                ChaseEffect::new(strip, color).with_width(usize::from(strip.pixel_count / 10).max(1)),
            ),
            EffectKind::Rainbow => Box::new(RainbowEffect::new(strip)),
        }
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EffectKind::Solid => "solid",
            EffectKind::Chase => "chase",
            EffectKind::Rainbow => "rainbow",
        })
    }
}

impl FromStr for EffectKind {
    type Err = PortalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "solid" => Ok(EffectKind::Solid),
            "chase" => Ok(EffectKind::Chase),
            "rainbow" => Ok(EffectKind::Rainbow),
            _ => Err(PortalError::UnknownEffect(s.to_string())),
        }
    }
}
