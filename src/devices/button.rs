// MIT License - Copyright (c) 2026 Peter Wright
// Per-button press classification

use std::fmt;

use tokio::time::{Duration, Instant};
use tracing::debug;

use crate::constants::{BUTTON_COUNT, DEFAULT_DOUBLE_PRESS_WINDOW_MS, DEFAULT_LONG_PRESS_MS};
use crate::protocol::ButtonEvent;

/// Raw state values carried by button events.
const RAW_PRESSED: i64 = 1;
const RAW_RELEASED: i64 = 0;

/// How button transitions are turned into presses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PressClassification {
    /// Every press/release pair is a single press.
    #[default]
    SingleOnly,
    /// Single, double and long presses.
    ///
    /// A release starts a `double_press_window` wait; a second press inside
    /// that window turns the pair into a double press. Holding a press for
    /// `long_press` reports a long press without waiting for the release.
    /// Single presses are therefore reported `double_press_window` after
    /// their release.
    Timed {
        double_press_window: Duration,
        long_press: Duration,
    },
}

impl PressClassification {
    /// Timed classification with the default 500 ms / 800 ms windows.
    pub fn timed() -> Self {
        Self::Timed {
            double_press_window: Duration::from_millis(DEFAULT_DOUBLE_PRESS_WINDOW_MS),
            long_press: Duration::from_millis(DEFAULT_LONG_PRESS_MS),
        }
    }
}

/// Classified press.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PressKind {
    Single,
    Double,
    Long,
}

impl PressKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Double => "double",
            Self::Long => "long",
        }
    }
}

impl fmt::Display for PressKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ButtonPhase {
    #[default]
    Idle,
    Pressed,
}

/// State of one physical button.
#[derive(Debug, Clone, Copy, Default)]
pub struct ButtonState {
    phase: ButtonPhase,
    last_press_start: Option<Instant>,
    /// Pending long-press timer.
    long_press_at: Option<Instant>,
    long_reported: bool,
    /// Released once; waiting to see whether a second press follows.
    single_pending_until: Option<Instant>,
    /// Current press started inside the double-press window.
    second_press: bool,
}

impl ButtonState {
    pub fn phase(&self) -> ButtonPhase {
        self.phase
    }

    pub fn last_press_start(&self) -> Option<Instant> {
        self.last_press_start
    }

    /// Apply a raw transition. Stray releases and repeated presses are ignored.
    pub fn on_event(
        &mut self,
        raw_state: i64,
        now: Instant,
        classification: &PressClassification,
    ) -> Option<PressKind> {
        match (self.phase, raw_state) {
            (ButtonPhase::Idle, RAW_PRESSED) => {
                self.phase = ButtonPhase::Pressed;
                self.last_press_start = Some(now);
                if let PressClassification::Timed { long_press, .. } = classification {
                    self.long_press_at = Some(now + *long_press);
                    self.long_reported = false;
                    self.second_press = self.single_pending_until.take().is_some();
                }
                None
            }
            (ButtonPhase::Pressed, RAW_RELEASED) => {
                self.phase = ButtonPhase::Idle;
                self.long_press_at = None;
                match classification {
                    PressClassification::SingleOnly => Some(PressKind::Single),
                    PressClassification::Timed {
                        double_press_window,
                        long_press,
                    } => {
                        if self.long_reported {
                            self.long_reported = false;
                            return None;
                        }
                        let held = self
                            .last_press_start
                            .map(|start| now.saturating_duration_since(start))
                            .unwrap_or_default();
                        if held >= *long_press {
                            self.second_press = false;
                            Some(PressKind::Long)
                        } else if std::mem::take(&mut self.second_press) {
                            Some(PressKind::Double)
                        } else {
                            self.single_pending_until = Some(now + *double_press_window);
                            None
                        }
                    }
                }
            }
            (ButtonPhase::Idle, RAW_RELEASED) => {
                debug!("Ignoring stray release");
                None
            }
            (ButtonPhase::Pressed, RAW_PRESSED) => None,
            (_, other) => {
                debug!("Ignoring unknown button state {}", other);
                None
            }
        }
    }

    /// Fire any timer that is due at `now`.
    pub fn on_timer(&mut self, now: Instant) -> Option<PressKind> {
        if let Some(at) = self.long_press_at
            && now >= at
            && self.phase == ButtonPhase::Pressed
        {
            self.long_press_at = None;
            self.long_reported = true;
            self.second_press = false;
            return Some(PressKind::Long);
        }
        if let Some(until) = self.single_pending_until
            && now >= until
        {
            self.single_pending_until = None;
            return Some(PressKind::Single);
        }
        None
    }

    /// Earliest pending timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.long_press_at, self.single_pending_until) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Button states for the whole panel.
#[derive(Debug, Clone)]
pub struct ButtonBank {
    states: [ButtonState; BUTTON_COUNT],
    classification: PressClassification,
}

impl ButtonBank {
    pub fn new(classification: PressClassification) -> Self {
        Self {
            states: [ButtonState::default(); BUTTON_COUNT],
            classification,
        }
    }

    pub fn classification(&self) -> PressClassification {
        self.classification
    }

    pub fn state(&self, index: usize) -> Option<&ButtonState> {
        self.states.get(index)
    }

    /// Apply one decoded event. Overdue timers for the same button fire first
    /// so that presses are reported in order.
    pub fn handle(&mut self, event: ButtonEvent, now: Instant) -> Vec<PressKind> {
        let Some(state) = self.states.get_mut(event.index) else {
            debug!("Ignoring event for unknown button index {}", event.index);
            return Vec::new();
        };
        let mut presses = Vec::new();
        if let Some(kind) = state.on_timer(now) {
            presses.push(kind);
        }
        if let Some(kind) = state.on_event(event.state, now, &self.classification) {
            presses.push(kind);
        }
        presses
    }

    /// Fire all due timers, returning `(index, kind)` pairs.
    pub fn poll_timers(&mut self, now: Instant) -> Vec<(usize, PressKind)> {
        self.states
            .iter_mut()
            .enumerate()
            .filter_map(|(index, state)| state.on_timer(now).map(|kind| (index, kind)))
            .collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.states.iter().filter_map(ButtonState::next_deadline).min()
    }
}
