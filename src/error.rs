// MIT License - Copyright (c) 2026 Peter Wright

/// All errors that can occur in the led-panel-bridge library.
#[derive(Debug, thiserror::Error)]
pub enum PanelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("Idle timeout: no data from panel for {ms} ms")]
    IdleTimeout { ms: u64 },

    #[error("Write timeout: panel stopped reading for {ms} ms")]
    WriteTimeout { ms: u64 },

    #[error("Socket disconnected")]
    Disconnected,

    #[error("Panel session has shut down")]
    ChannelClosed,

    #[error("Invalid color value: {value}")]
    InvalidColor { value: String },

    #[error("Unknown mode: {name}")]
    UnknownMode { name: String },

    #[error("Invalid button number: {number} (max: {max})")]
    InvalidButton { number: u8, max: u8 },

    #[error("Device not found: {name}")]
    DeviceNotFound { name: String },

    #[error("Unsupported operation: {details}")]
    Unsupported { details: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status} from {url}")]
    HttpStatus { status: u16, url: String },
}

impl PanelError {
    /// Whether this error is a transport fault that the reconnect path recovers from.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PanelError::Io(_)
                | PanelError::ConnectionTimeout
                | PanelError::IdleTimeout { .. }
                | PanelError::WriteTimeout { .. }
                | PanelError::Disconnected
        )
    }
}

pub type Result<T> = std::result::Result<T, PanelError>;
