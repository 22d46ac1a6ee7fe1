// MIT License - Copyright (c) 2026 Peter Wright
// Direct TCP transport to the panel

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

use crate::constants::{CR, LF, MAX_PARTIAL_LINE, READ_BUFFER_SIZE};
use crate::error::{PanelError, Result};
use crate::protocol::{decode_frame, Frame};
use crate::transport::command::CommandWriter;
use crate::transport::{LinkEvent, LinkSender, TransportEvent};

/// Direct TCP transport: one outbound stream to `ip:port`.
#[derive(Debug, Clone)]
pub struct DirectTcpTransport {
    pub ip: String,
    pub port: u16,
    pub connect_timeout: Duration,
    /// `None` keeps a silent connection open indefinitely.
    pub idle_timeout: Option<Duration>,
}

impl DirectTcpTransport {
    /// Open the stream and start the reader task.
    ///
    /// Reader events are posted to `link_tx` tagged with `session`.
    pub async fn connect(
        &self,
        session: u64,
        link_tx: LinkSender,
    ) -> Result<(CommandWriter, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.ip, self.port);
        info!("Connecting to panel at {}", addr);

        let stream = match timeout(self.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!("TCP connect to {} failed: {}", addr, e);
                return Err(PanelError::Io(e));
            }
            Err(_) => {
                warn!("TCP connect to {} timed out after {:?}", addr, self.connect_timeout);
                return Err(PanelError::ConnectionTimeout);
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY: {}", e);
        }
        debug!("TCP socket connected");

        let (reader, writer) = stream.into_split();
        let reader_handle = spawn_reader_task(reader, session, self.idle_timeout, link_tx);
        let writer = CommandWriter::new(writer).with_write_timeout(self.connect_timeout);
        Ok((writer, reader_handle))
    }

    /// Run a connection attempt in the background and report the outcome.
    pub fn spawn_connect(&self, session: u64, link_tx: LinkSender) -> JoinHandle<()> {
        let transport = self.clone();
        tokio::spawn(async move {
            let event = match transport.connect(session, link_tx.clone()).await {
                Ok((writer, reader)) => LinkEvent::Established {
                    session,
                    writer,
                    reader,
                },
                Err(error) => LinkEvent::Failed { session, error },
            };
            if let Err(e) = link_tx.send(event).await {
                // Session is gone; stop the reader we may have started.
                if let LinkEvent::Established { reader, .. } = e.0 {
                    reader.abort();
                }
            }
        })
    }
}

/// Spawn the reader task that turns incoming bytes into line events.
///
/// Ends after the first terminal event: an error, a close, or no data for
/// `idle_timeout` when one is set.
pub fn spawn_reader_task<R>(
    mut reader: R,
    session: u64,
    idle_timeout: Option<Duration>,
    link_tx: LinkSender,
) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut lines = LineSplitter::default();

        loop {
            let read = reader.read(&mut buf);
            let outcome = match idle_timeout {
                Some(limit) => timeout(limit, read).await,
                None => Ok(read.await),
            };
            let event = match outcome {
                Ok(Ok(0)) => {
                    debug!("Reader: connection closed");
                    TransportEvent::Closed
                }
                Ok(Ok(n)) => {
                    for line in lines.push(&buf[..n]) {
                        let event = LinkEvent::Transport {
                            session,
                            event: TransportEvent::Data(line),
                        };
                        if link_tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    continue;
                }
                Ok(Err(e)) => {
                    error!("Reader: read error: {}", e);
                    TransportEvent::Error(e.to_string())
                }
                Err(_) => {
                    warn!("Reader: no data for {:?}", idle_timeout.unwrap_or_default());
                    TransportEvent::TimedOut
                }
            };
            let _ = link_tx.send(LinkEvent::Transport { session, event }).await;
            break;
        }
    })
}

/// Splits the byte stream into `\r` / `\n` terminated lines.
///
/// A trailing segment without terminator is emitted immediately when it
/// already decodes to a complete frame (some firmware sends bare JSON), and
/// is otherwise kept until more data arrives.
#[derive(Debug, Default)]
pub struct LineSplitter {
    leftover: Vec<u8>,
}

impl LineSplitter {
    pub fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        self.leftover.extend_from_slice(data);

        let mut lines = Vec::new();
        let mut start = 0;
        for i in 0..self.leftover.len() {
            let b = self.leftover[i];
            if b == CR || b == LF {
                if i > start {
                    lines.push(self.leftover[start..i].to_vec());
                }
                start = i + 1;
            }
        }
        self.leftover.drain(..start);

        if !self.leftover.is_empty() {
            let complete = std::str::from_utf8(&self.leftover)
                .map(|s| !matches!(decode_frame(s), Frame::Unrecognized(_)))
                .unwrap_or(false);
            if complete {
                lines.push(std::mem::take(&mut self.leftover));
            } else if self.leftover.len() > MAX_PARTIAL_LINE {
                warn!("Discarding {} bytes of unterminated data", self.leftover.len());
                self.leftover.clear();
            }
        }

        lines
    }

    pub fn pending(&self) -> usize {
        self.leftover.len()
    }
}
