// MIT License - Copyright (c) 2026 Peter Wright

pub mod command;
pub mod direct;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::PanelError;
use crate::transport::command::CommandWriter;

/// Everything the reader side of a connection can report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One complete line from the panel, terminator stripped.
    Data(Vec<u8>),
    /// Read error. The connection is unusable.
    Error(String),
    /// Peer closed the stream.
    Closed,
    /// No data for longer than the idle timeout.
    TimedOut,
}

/// Message from a connection attempt or its reader task to the session.
///
/// Every message carries the id of the connection attempt that produced it
/// so that late events from a replaced connection can be dropped.
#[derive(Debug)]
pub enum LinkEvent {
    Established {
        session: u64,
        writer: CommandWriter,
        reader: JoinHandle<()>,
    },
    Failed {
        session: u64,
        error: PanelError,
    },
    Transport {
        session: u64,
        event: TransportEvent,
    },
}

impl LinkEvent {
    pub fn session(&self) -> u64 {
        match self {
            LinkEvent::Established { session, .. }
            | LinkEvent::Failed { session, .. }
            | LinkEvent::Transport { session, .. } => *session,
        }
    }
}

pub type LinkSender = mpsc::Sender<LinkEvent>;
pub type LinkReceiver = mpsc::Receiver<LinkEvent>;

/// Create the channel connecting transport tasks to the session.
pub fn link_channel(capacity: usize) -> (LinkSender, LinkReceiver) {
    mpsc::channel(capacity)
}
