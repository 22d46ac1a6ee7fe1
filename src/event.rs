// MIT License - Copyright (c) 2026 Peter Wright

use crate::devices::{LightState, PressKind};

/// All events that can be emitted by the panel session.
///
/// Users subscribe via `panel.subscribe()` to receive a
/// `tokio::sync::broadcast::Receiver<PanelEvent>`.
#[derive(Debug, Clone, PartialEq)]
pub enum PanelEvent {
    /// TCP connection to panel established
    Connected,
    /// TCP connection lost or closed
    Disconnected,
    /// Panel reachability changed. Emitted once per transition.
    Reachability(bool),
    /// A button press was classified
    ButtonPressed {
        /// 0-based index
        index: usize,
        kind: PressKind,
    },
    /// LED color changed (reported by the panel or set by us)
    LightStateChanged(LightState),
    /// Virtual trigger pulse edge
    TriggerChanged { name: String, active: bool },
    /// Session stopped after an explicit shutdown
    Shutdown,
}

/// Type alias for the broadcast sender.
pub type EventSender = tokio::sync::broadcast::Sender<PanelEvent>;

/// Type alias for the broadcast receiver.
pub type EventReceiver = tokio::sync::broadcast::Receiver<PanelEvent>;

/// Create a new event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    tokio::sync::broadcast::channel(capacity)
}
