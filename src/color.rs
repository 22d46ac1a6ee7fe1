// MIT License - Copyright (c) 2026 Peter Wright
// Color model: RGB/HSV conversion and LED mode classification

use std::fmt;

use crate::constants::{DEFAULT_MODES, MODE_OFF, MODE_UNKNOWN};

/// Color currently shown by the panel LED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl DeviceColor {
    pub const WHITE: Self = Self::new(255, 255, 255);
    pub const OFF: Self = Self::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#RRGGBB` (the leading `#` is optional).
    pub fn from_hex(value: &str) -> Option<Self> {
        let hex = value.strip_prefix('#').unwrap_or(value);
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
        let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
        let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
        Some(Self::new(r, g, b))
    }

    /// `#RRGGBB` with upper-case digits.
    pub fn to_hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }

    pub fn is_off(&self) -> bool {
        *self == Self::OFF
    }

    pub fn to_hsv(&self) -> Hsv {
        rgb_to_hsv(*self)
    }

    /// Scale the color so its dominant channel is 255.
    ///
    /// Black stays black.
    pub fn normalized(&self) -> Self {
        let max = u32::from(self.r.max(self.g).max(self.b));
        if max == 0 {
            return *self;
        }
        let scale = |ch: u8| ((u32::from(ch) * 255 + max / 2) / max) as u8;
        Self::new(scale(self.r), scale(self.g), scale(self.b))
    }

    fn within(&self, other: &Self, tolerance: u8) -> bool {
        self.r.abs_diff(other.r) <= tolerance
            && self.g.abs_diff(other.g) <= tolerance
            && self.b.abs_diff(other.b) <= tolerance
    }
}

impl Default for DeviceColor {
    fn default() -> Self {
        Self::WHITE
    }
}

impl fmt::Display for DeviceColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Hue in degrees `[0, 360)`, saturation and value in percent `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hsv {
    pub h: f64,
    pub s: f64,
    pub v: f64,
}

impl Hsv {
    /// Hue rounded to whole degrees, wrapped into `0..360`.
    pub fn hue(&self) -> u16 {
        (self.h.round() as u16) % 360
    }

    pub fn saturation(&self) -> u8 {
        self.s.round().clamp(0.0, 100.0) as u8
    }

    pub fn brightness(&self) -> u8 {
        self.v.round().clamp(0.0, 100.0) as u8
    }
}

/// Convert RGB to HSV. Achromatic colors get hue 0.
pub fn rgb_to_hsv(color: DeviceColor) -> Hsv {
    let r = f64::from(color.r) / 255.0;
    let g = f64::from(color.g) / 255.0;
    let b = f64::from(color.b) / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let s = if max == 0.0 { 0.0 } else { delta / max };

    Hsv {
        h: if h >= 360.0 { h - 360.0 } else { h },
        s: s * 100.0,
        v: max * 100.0,
    }
}

/// Convert HSV back to RGB, rounding each channel to the nearest integer.
///
/// Out-of-range inputs are clamped (hue wraps).
pub fn hsv_to_rgb(h: f64, s: f64, v: f64) -> DeviceColor {
    let h = if h.is_finite() { h.rem_euclid(360.0) } else { 0.0 };
    let s = if s.is_finite() { s.clamp(0.0, 100.0) / 100.0 } else { 0.0 };
    let v = if v.is_finite() { v.clamp(0.0, 100.0) / 100.0 } else { 0.0 };

    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = match ((h / 60.0).floor() as u32) % 6 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    let channel = |value: f64| ((value + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    DeviceColor::new(channel(r), channel(g), channel(b))
}

/// Algorithm used to map an LED color onto a mode name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeMatch {
    /// Scale both the LED color and each table color to full brightness on
    /// their dominant channel, then require exact equality. A dimmed red
    /// still reads as "red".
    Normalized,
    /// Accept a table entry when every channel is within the given absolute
    /// difference. No normalization.
    Tolerance(u8),
}

impl Default for ModeMatch {
    fn default() -> Self {
        Self::Normalized
    }
}

/// Result of classifying an LED color.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Off,
    Named(String),
    Unknown,
}

impl Mode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Off => MODE_OFF,
            Self::Named(name) => name,
            Self::Unknown => MODE_UNKNOWN,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered mode name to canonical color table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeTable {
    entries: Vec<(String, DeviceColor)>,
}

impl ModeTable {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Replace the color of an existing mode or append a new one.
    pub fn with_mode(mut self, name: impl Into<String>, color: DeviceColor) -> Self {
        let name = name.into().to_lowercase();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = color,
            None => self.entries.push((name, color)),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<DeviceColor> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, c)| *c)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, DeviceColor)> {
        self.entries.iter().map(|(n, c)| (n.as_str(), *c))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ModeTable {
    fn default() -> Self {
        DEFAULT_MODES
            .iter()
            .fold(Self::empty(), |table, (name, (r, g, b))| {
                table.with_mode(*name, DeviceColor::new(*r, *g, *b))
            })
    }
}

/// Map an LED color onto a mode name from the table.
pub fn classify_mode(color: DeviceColor, table: &ModeTable, matching: ModeMatch) -> Mode {
    if color.is_off() {
        return Mode::Off;
    }

    let found = match matching {
        ModeMatch::Normalized => {
            let normalized = color.normalized();
            table
                .iter()
                .find(|(_, entry)| entry.normalized() == normalized)
        }
        ModeMatch::Tolerance(tolerance) => table
            .iter()
            .find(|(_, entry)| color.within(entry, tolerance)),
    };

    match found {
        Some((name, _)) => Mode::Named(name.to_string()),
        None => Mode::Unknown,
    }
}

/// Resolve a `#RRGGBB` literal or a mode name from the table.
pub fn parse_color_value(value: &str, table: &ModeTable) -> Option<DeviceColor> {
    let value = value.trim();
    if value.starts_with('#') {
        DeviceColor::from_hex(value)
    } else {
        table.get(value)
    }
}
