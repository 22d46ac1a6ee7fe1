// MIT License - Copyright (c) 2026 Peter Wright
// Holds button events until the consuming side is ready

use std::collections::VecDeque;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::constants::MAX_QUEUED_EVENTS;
use crate::protocol::ButtonEvent;

/// A button event waiting for the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedEvent {
    pub event: ButtonEvent,
    /// Arrival time, so press timing survives the wait.
    pub received_at: Instant,
}

/// FIFO of button events received before the consumer signalled readiness.
///
/// Once ready, the queue stays open: events pass straight through. While
/// closed it holds at most `capacity` events, dropping the oldest.
#[derive(Debug)]
pub struct EventQueue {
    pending: VecDeque<QueuedEvent>,
    ready: bool,
    capacity: usize,
    dropped: usize,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::with_capacity(MAX_QUEUED_EVENTS)
    }
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            ready: false,
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    /// Events discarded because the queue was full.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Queue the event if the consumer is not ready, otherwise hand it back.
    pub fn offer(&mut self, event: ButtonEvent, received_at: Instant) -> Option<QueuedEvent> {
        let queued = QueuedEvent { event, received_at };
        if self.ready {
            Some(queued)
        } else {
            debug!(
                "Consumer not ready, queueing event for button {} ({} pending)",
                event.number(),
                self.pending.len() + 1
            );
            if self.pending.len() >= self.capacity
                && let Some(oldest) = self.pending.pop_front()
            {
                self.dropped += 1;
                warn!(
                    "Event queue full ({} events), dropping event for button {}",
                    self.capacity,
                    oldest.event.number()
                );
            }
            self.pending.push_back(queued);
            None
        }
    }

    /// Mark the consumer ready and take everything queued, oldest first.
    pub fn mark_ready(&mut self) -> Vec<QueuedEvent> {
        self.ready = true;
        self.pending.drain(..).collect()
    }
}
