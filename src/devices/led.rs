// MIT License - Copyright (c) 2026 Peter Wright

use crate::color::DeviceColor;

/// Light state as seen by the home-automation side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightState {
    pub on: bool,
    /// Degrees, 0-359.
    pub hue: u16,
    /// Percent, 0-100.
    pub saturation: u8,
    /// Percent, 0-100.
    pub brightness: u8,
    pub color: DeviceColor,
}

impl LightState {
    pub fn from_color(color: DeviceColor) -> Self {
        let hsv = color.to_hsv();
        Self {
            on: !color.is_off(),
            hue: hsv.hue(),
            saturation: hsv.saturation(),
            brightness: hsv.brightness(),
            color,
        }
    }
}

/// The panel's RGB LED.
#[derive(Debug, Clone)]
pub struct Led {
    color: DeviceColor,
    /// Whether the panel has reported its color at least once.
    confirmed: bool,
}

impl Led {
    pub fn new(initial: DeviceColor) -> Self {
        Self {
            color: initial,
            confirmed: false,
        }
    }

    pub fn color(&self) -> DeviceColor {
        self.color
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    pub fn light_state(&self) -> LightState {
        LightState::from_color(self.color)
    }

    /// Apply a color reported by the panel.
    ///
    /// Returns the new light state when the color changed, or on the first
    /// report after startup.
    pub fn apply_report(&mut self, color: DeviceColor) -> Option<LightState> {
        let first = !self.confirmed;
        self.confirmed = true;
        if first || color != self.color {
            self.color = color;
            Some(self.light_state())
        } else {
            None
        }
    }

    /// Record a color we just sent, ahead of the panel's confirmation.
    pub fn set_optimistic(&mut self, color: DeviceColor) -> Option<LightState> {
        if color != self.color {
            self.color = color;
            Some(self.light_state())
        } else {
            None
        }
    }
}
