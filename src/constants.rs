// MIT License - Copyright (c) 2026 Peter Wright
// Protocol, timing and color constants

/// Line terminator used by the panel in both directions.
pub const CR: u8 = b'\r';
/// Some firmware revisions terminate JSON replies with `\r\n`.
pub const LF: u8 = b'\n';

/// Default panel address and TCP port.
pub const DEFAULT_PANEL_IP: &str = "192.168.2.12";
pub const DEFAULT_PANEL_PORT: u16 = 10001;

/// Connect and idle timeout (ms).
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
/// Fixed delay between a lost connection and the next attempt (ms).
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;
/// Interval between keepalive `led=?` queries (ms).
pub const DEFAULT_KEEPALIVE_INTERVAL_MS: u64 = 5_000;
/// How long a virtual trigger stays on before it is reset (ms).
pub const DEFAULT_TRIGGER_RESET_DELAY_MS: u64 = 500;
/// Grace period for in-flight writes during shutdown (ms).
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 2_000;

/// Timed press classification windows (ms).
pub const DEFAULT_DOUBLE_PRESS_WINDOW_MS: u64 = 500;
pub const DEFAULT_LONG_PRESS_MS: u64 = 800;

/// Per-channel tolerance for the absolute-difference mode match.
pub const DEFAULT_MODE_TOLERANCE: u8 = 50;

/// Number of physical buttons on the panel.
pub const BUTTON_COUNT: usize = 10;

/// Button number (1-based) reserved for cycling the LED color.
pub const COLOR_CYCLE_BUTTON: u8 = 10;

/// Read buffer size for the transport reader.
pub const READ_BUFFER_SIZE: usize = 4096;

/// Upper bound for an unterminated partial line kept between reads.
pub const MAX_PARTIAL_LINE: usize = 8192;

/// Button events held while the consumer is not ready; older ones are dropped.
pub const MAX_QUEUED_EVENTS: usize = 256;

/// Built-in mode names and their canonical colors, in classification order.
pub const DEFAULT_MODES: [(&str, (u8, u8, u8)); 6] = [
    ("red", (255, 0, 0)),
    ("green", (0, 255, 0)),
    ("blue", (0, 0, 255)),
    ("yellow", (255, 255, 0)),
    ("purple", (128, 0, 128)),
    ("white", (255, 255, 255)),
];

/// Order in which the cycle button walks through the mode colors.
pub const COLOR_CYCLE: [&str; 6] = ["red", "green", "blue", "yellow", "purple", "white"];

/// Mode name returned for a black (all channels zero) LED.
pub const MODE_OFF: &str = "off";
/// Mode name returned when no table entry matches.
pub const MODE_UNKNOWN: &str = "unknown";
/// Wildcard mode selector in button mappings.
pub const MODE_ANY: &str = "any";
