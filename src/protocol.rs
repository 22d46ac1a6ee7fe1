// MIT License - Copyright (c) 2026 Peter Wright
// Wire codec for the panel line protocol

use serde::Deserialize;
use tracing::debug;

use crate::color::DeviceColor;
use crate::constants::BUTTON_COUNT;

/// Commands that can be sent to the panel.
///
/// Every command is framed as `\r<body>\r`. There is no handshake and no
/// acknowledgement; the panel answers queries asynchronously with an LED
/// report on the same stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `led=RRRGGGBBB`: set the LED color, 3-digit zero-padded decimal fields.
    SetLed(DeviceColor),
    /// `led=?`: ask the panel to report its LED color. Also used as keepalive.
    QueryLed,
}

impl Command {
    /// Body of the command without framing.
    pub fn to_wire_string(&self) -> String {
        match self {
            Command::SetLed(c) => format!("led={:03}{:03}{:03}", c.r, c.g, c.b),
            Command::QueryLed => "led=?".to_string(),
        }
    }

    /// Framed bytes ready to be written to the transport.
    pub fn encode(&self) -> Vec<u8> {
        format!("\r{}\r", self.to_wire_string()).into_bytes()
    }
}

/// One button transition reported by the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonEvent {
    /// 0-based button index.
    pub index: usize,
    /// 1 = pressed, 0 = released. Other values are passed through untouched.
    pub state: i64,
}

impl ButtonEvent {
    /// 1-based button number as printed on the panel.
    pub fn number(&self) -> u8 {
        (self.index + 1) as u8
    }
}

/// A decoded line from the panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    LedReport(DeviceColor),
    ButtonEvents(Vec<ButtonEvent>),
    /// Anything else. Kept only for diagnostics.
    Unrecognized(String),
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    led: Option<serde_json::Value>,
    #[serde(default)]
    events: Option<Vec<WireEvent>>,
}

#[derive(Debug, Deserialize)]
struct WireEvent {
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    state: Option<serde_json::Value>,
}

/// Decode one received line.
///
/// Never fails: malformed input yields [`Frame::Unrecognized`].
pub fn decode_frame(raw: &str) -> Frame {
    let line = raw.trim();

    if line.starts_with('{') {
        if let Ok(msg) = serde_json::from_str::<WireMessage>(line) {
            return decode_json(msg, line);
        }
        debug!("Malformed JSON from panel: {}", line);
    }

    if let Some(pos) = line.find("led=") {
        let value = &line[pos + 4..];
        return decode_led_value(value)
            .map(Frame::LedReport)
            .unwrap_or_else(|| Frame::Unrecognized(line.to_string()));
    }

    // Legacy positional reply: a bare RRRGGGBBB string
    if line.len() == 9 && line.bytes().all(|b| b.is_ascii_digit()) {
        if let Some(color) = decode_led_value(line) {
            return Frame::LedReport(color);
        }
    }

    Frame::Unrecognized(line.to_string())
}

fn decode_json(msg: WireMessage, line: &str) -> Frame {
    if let Some(led) = msg.led {
        let value = match led {
            serde_json::Value::String(s) => Some(s),
            // Numeric reports lose their leading zeros
            serde_json::Value::Number(n) => n.as_u64().map(|n| format!("{:09}", n)),
            _ => None,
        };
        return value
            .as_deref()
            .and_then(decode_led_value)
            .map(Frame::LedReport)
            .unwrap_or_else(|| Frame::Unrecognized(line.to_string()));
    }

    if let Some(events) = msg.events {
        let decoded: Vec<ButtonEvent> = events.iter().filter_map(decode_event).collect();
        if decoded.is_empty() && !events.is_empty() {
            return Frame::Unrecognized(line.to_string());
        }
        return Frame::ButtonEvents(decoded);
    }

    Frame::Unrecognized(line.to_string())
}

fn decode_event(event: &WireEvent) -> Option<ButtonEvent> {
    let index = parse_key_label(event.label.as_deref()?)?;
    let state = match event.state.as_ref()? {
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok()?,
        serde_json::Value::Number(n) => n.as_i64()?,
        _ => return None,
    };
    Some(ButtonEvent { index, state })
}

/// `"Key N"` (1-based) to a 0-based index.
pub fn parse_key_label(label: &str) -> Option<usize> {
    let number: usize = label.trim().strip_prefix("Key")?.trim().parse().ok()?;
    if (1..=BUTTON_COUNT).contains(&number) {
        Some(number - 1)
    } else {
        None
    }
}

/// Decode an LED value: `#RRGGBB` hex or `RRRGGGBBB` decimal.
///
/// Returns `None` for anything out of range or malformed.
pub fn decode_led_value(value: &str) -> Option<DeviceColor> {
    let value = value.trim();
    if let Some(hex) = value.strip_prefix('#') {
        let hex = hex.get(..6)?;
        return DeviceColor::from_hex(hex);
    }

    let digits = value.get(..9)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let field = |range: std::ops::Range<usize>| -> Option<u8> {
        digits[range].parse::<u16>().ok().and_then(|v| u8::try_from(v).ok())
    };
    Some(DeviceColor::new(field(0..3)?, field(3..6)?, field(6..9)?))
}
