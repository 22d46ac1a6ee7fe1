// MIT License - Copyright (c) 2026 Peter Wright
// Write half of the panel connection

use std::fmt;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, Duration};
use tracing::{debug, error, warn};

use crate::constants::DEFAULT_TIMEOUT_MS;
use crate::error::{PanelError, Result};
use crate::protocol::Command;

type BoxedWriter = Box<dyn AsyncWrite + Send + Sync + Unpin>;

/// Owns the write half of the transport and frames outgoing commands.
///
/// Only the connection manager holds one of these.
pub struct CommandWriter {
    writer: BoxedWriter,
    write_timeout: Duration,
}

impl CommandWriter {
    pub fn new(writer: impl AsyncWrite + Send + Sync + Unpin + 'static) -> Self {
        Self {
            writer: Box::new(writer),
            write_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    /// Fail a `send` that cannot hand its bytes to the peer within `limit`.
    pub fn with_write_timeout(mut self, limit: Duration) -> Self {
        self.write_timeout = limit;
        self
    }

    /// Encode and write a command.
    ///
    /// A peer that stops reading fails the write with
    /// [`PanelError::WriteTimeout`] once the write timeout elapses.
    pub async fn send(&mut self, command: &Command) -> Result<()> {
        debug!("Sending command: {}", command.to_wire_string());
        let encoded = command.encode();
        let writer = &mut self.writer;
        let written = timeout(self.write_timeout, async {
            writer.write_all(&encoded).await?;
            writer.flush().await
        })
        .await;
        match written {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!("Failed to write command: {}", e);
                Err(PanelError::Io(e))
            }
            Err(_) => {
                error!("Write stalled for {:?}", self.write_timeout);
                Err(PanelError::WriteTimeout {
                    ms: self.write_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Flush pending writes within `grace`, then shut the stream down.
    pub async fn close(mut self, grace: Duration) {
        let drained = timeout(grace, async {
            self.writer.flush().await?;
            self.writer.shutdown().await
        })
        .await;
        match drained {
            Ok(Ok(())) => debug!("Transport closed cleanly"),
            Ok(Err(e)) => warn!("Error while closing transport: {}", e),
            Err(_) => warn!("Shutdown grace period of {:?} elapsed, dropping transport", grace),
        }
    }
}

impl fmt::Debug for CommandWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandWriter").finish_non_exhaustive()
    }
}
