//! Strip and frame data shared by portal and driver.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Device-local strip index used to address a strip on the wire.
pub type StripIndex = u8;

/// Stable strip identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StripId(Uuid);

impl StripId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for StripId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StripId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for StripId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Which channels each pixel of a strip carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorSpectrum {
    #[default]
    Rgb,
    Rgbw,
    Rgbww,
}

impl ColorSpectrum {
    /// Bytes per pixel.
    pub fn channels(self) -> usize {
        match self {
            ColorSpectrum::Rgb => 3,
            ColorSpectrum::Rgbw => 4,
            ColorSpectrum::Rgbww => 5,
        }
    }
}

/// One pixel. White channels are ignored by RGB strips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub w: u8,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub ww: u8,
}

fn is_zero(value: &u8) -> bool {
    *value == 0
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, w: 0, ww: 0 }
    }

    pub const fn rgbw(r: u8, g: u8, b: u8, w: u8) -> Self {
        Self { r, g, b, w, ww: 0 }
    }

    /// Scale every channel by `level / 255`.
    pub fn dimmed(self, level: u8) -> Self {
        let scale = |c: u8| ((c as u16 * level as u16) / 255) as u8;
        Self {
            r: scale(self.r),
            g: scale(self.g),
            b: scale(self.b),
            w: scale(self.w),
            ww: scale(self.ww),
        }
    }
}

/// One complete set of pixel colors for a strip. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    spectrum: ColorSpectrum,
    pixels: Vec<Color>,
}

impl Frame {
    pub fn new(spectrum: ColorSpectrum, pixels: Vec<Color>) -> Self {
        Self { spectrum, pixels }
    }

    /// Every pixel set to `color`.
    pub fn solid(spectrum: ColorSpectrum, len: usize, color: Color) -> Self {
        Self::new(spectrum, vec![color; len])
    }

    /// Every pixel off.
    pub fn blank(spectrum: ColorSpectrum, len: usize) -> Self {
        Self::solid(spectrum, len, Color::BLACK)
    }

    pub fn spectrum(&self) -> ColorSpectrum {
        self.spectrum
    }

    pub fn pixels(&self) -> &[Color] {
        &self.pixels
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
}

/// One strip as declared by the portal's configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StripConfiguration {
    pub id: StripId,
    pub index: StripIndex,
    #[serde(default)]
    pub name: String,
    pub pixel_count: u16,
    #[serde(default)]
    pub spectrum: ColorSpectrum,
}

impl StripConfiguration {
    pub fn new(index: StripIndex, pixel_count: u16, spectrum: ColorSpectrum) -> Self {
        Self {
            id: StripId::new(),
            index,
            name: format!("strip-{index}"),
            pixel_count,
            spectrum,
        }
    }

    /// Whether `frame` fits this strip.
    pub fn accepts(&self, frame: &Frame) -> bool {
        frame.len() == self.pixel_count as usize
    }
}

/// A complete device configuration, identified by its concurrency token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfiguration {
    pub concurrency_token: String,
    pub strips: Vec<StripConfiguration>,
}

impl DeviceConfiguration {
    pub fn new(concurrency_token: impl Into<String>, strips: Vec<StripConfiguration>) -> Self {
        Self {
            concurrency_token: concurrency_token.into(),
            strips,
        }
    }

    /// Check the invariants a driver relies on: a token, unique ids, unique
    /// indices and non-empty strips.
    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency_token.is_empty() {
            return Err("concurrency token must not be empty".to_string());
        }

        let mut ids = HashSet::with_capacity(self.strips.len());
        let mut indices = HashSet::with_capacity(self.strips.len());
        for strip in &self.strips {
            if !ids.insert(strip.id) {
                return Err(format!("duplicate strip id {}", strip.id));
            }
            if !indices.insert(strip.index) {
                return Err(format!("duplicate strip index {}", strip.index));
            }
            if strip.pixel_count == 0 {
                return Err(format!("strip {} has no pixels", strip.index));
            }
        }
        Ok(())
    }

    pub fn strip(&self, index: StripIndex) -> Option<&StripConfiguration> {
        self.strips.iter().find(|strip| strip.index == index)
    }
}

/// What a strip is doing, as reported by status queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StripStatus {
    Idle,
    DisplayingFrame,
    Playing,
    Paused,
}

impl fmt::Display for StripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StripStatus::Idle => "idle",
            StripStatus::DisplayingFrame => "displaying frame",
            StripStatus::Playing => "playing",
            StripStatus::Paused => "paused",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(strips: Vec<StripConfiguration>) -> DeviceConfiguration {
        DeviceConfiguration::new("tok-A", strips)
    }

    #[test]
    fn strip_id_roundtrips_through_string() {
        let id = StripId::new();
        let parsed: StripId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<StripId>().is_err());
    }

    #[test]
    fn strip_id_serializes_as_plain_uuid() {
        let id = StripId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }

    #[test]
    fn rgb_color_omits_white_channels() {
        let json = serde_json::to_string(&Color::rgb(1, 2, 3)).unwrap();
        assert_eq!(json, r#"{"r":1,"g":2,"b":3}"#);
        let back: Color = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Color::rgb(1, 2, 3));
    }

    #[test]
    fn dimming_scales_channels() {
        assert_eq!(Color::rgb(255, 100, 0).dimmed(0), Color::BLACK);
        assert_eq!(Color::rgb(255, 100, 0).dimmed(255), Color::rgb(255, 100, 0));
        assert_eq!(Color::rgbw(200, 0, 0, 100).dimmed(128).w, 50);
    }

    #[test]
    fn spectrum_channels() {
        assert_eq!(ColorSpectrum::Rgb.channels(), 3);
        assert_eq!(ColorSpectrum::Rgbw.channels(), 4);
        assert_eq!(ColorSpectrum::Rgbww.channels(), 5);
    }

    #[test]
    fn strip_accepts_matching_frames_only() {
        let strip = StripConfiguration::new(0, 8, ColorSpectrum::Rgb);
        assert!(strip.accepts(&Frame::blank(ColorSpectrum::Rgb, 8)));
        assert!(!strip.accepts(&Frame::blank(ColorSpectrum::Rgb, 7)));
    }

    #[test]
    fn validate_accepts_well_formed_configuration() {
        let cfg = config(vec![
            StripConfiguration::new(0, 30, ColorSpectrum::Rgb),
            StripConfiguration::new(1, 60, ColorSpectrum::Rgbw),
        ]);
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.strip(1).map(|s| s.pixel_count), Some(60));
    }

    #[test]
    fn validate_rejects_duplicates_and_empty_strips() {
        let a = StripConfiguration::new(0, 30, ColorSpectrum::Rgb);
        let mut same_id = StripConfiguration::new(1, 30, ColorSpectrum::Rgb);
        same_id.id = a.id;
        assert!(config(vec![a.clone(), same_id])
            .validate()
            .unwrap_err()
            .contains("duplicate strip id"));

        let same_index = StripConfiguration::new(0, 30, ColorSpectrum::Rgb);
        assert!(config(vec![a.clone(), same_index])
            .validate()
            .unwrap_err()
            .contains("duplicate strip index"));

        let empty = StripConfiguration::new(2, 0, ColorSpectrum::Rgb);
        assert!(config(vec![a, empty])
            .validate()
            .unwrap_err()
            .contains("no pixels"));

        assert!(DeviceConfiguration::new("", vec![]).validate().is_err());
    }
}
