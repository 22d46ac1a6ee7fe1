// MIT License - Copyright (c) 2026 Peter Wright

pub mod button;
pub mod led;

pub use button::{ButtonBank, ButtonPhase, ButtonState, PressClassification, PressKind};
pub use led::{Led, LightState};
