// MIT License - Copyright (c) 2026 Peter Wright
// Session configuration

use crate::color::{DeviceColor, ModeMatch, ModeTable};
use crate::constants::{
    DEFAULT_KEEPALIVE_INTERVAL_MS, DEFAULT_PANEL_IP, DEFAULT_PANEL_PORT,
    DEFAULT_RECONNECT_DELAY_MS, DEFAULT_SHUTDOWN_GRACE_MS, DEFAULT_TIMEOUT_MS,
    DEFAULT_TRIGGER_RESET_DELAY_MS,
};
use crate::devices::PressClassification;
use crate::dispatch::DispatchMode;
use crate::mapping::ButtonMapping;

/// Default HTTP request timeout for url actions.
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 5_000;

/// Configuration for one LED panel session.
#[derive(Debug, Clone)]
pub struct PanelConfig {
    /// Panel IP address
    pub ip: String,
    /// Panel TCP port (default: 10001)
    pub port: u16,
    /// Connect, write and read idle timeout in milliseconds.
    /// The idle timeout only applies while keepalive is enabled.
    pub timeout_ms: u64,
    /// Delay before reconnecting after a loss, in milliseconds
    pub reconnect_delay_ms: u64,
    /// LED query interval while connected; 0 disables keepalive and the
    /// idle timeout
    pub keepalive_interval_ms: u64,
    /// How long a virtual trigger stays set
    pub trigger_reset_delay_ms: u64,
    /// Upper bound on flushing the socket at shutdown
    pub shutdown_grace_ms: u64,
    /// Timeout for url actions
    pub http_timeout_ms: u64,
    /// Display name, used for default trigger names
    pub name: String,
    /// Assumed LED color until the panel reports one
    pub default_color: DeviceColor,
    pub mode_table: ModeTable,
    pub mode_match: ModeMatch,
    pub press_classification: PressClassification,
    pub dispatch_mode: DispatchMode,
    pub button_mappings: Vec<ButtonMapping>,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            ip: DEFAULT_PANEL_IP.to_string(),
            port: DEFAULT_PANEL_PORT,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            keepalive_interval_ms: DEFAULT_KEEPALIVE_INTERVAL_MS,
            trigger_reset_delay_ms: DEFAULT_TRIGGER_RESET_DELAY_MS,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            http_timeout_ms: DEFAULT_HTTP_TIMEOUT_MS,
            name: "LED Panel".to_string(),
            default_color: DeviceColor::WHITE,
            mode_table: ModeTable::default(),
            mode_match: ModeMatch::default(),
            press_classification: PressClassification::default(),
            dispatch_mode: DispatchMode::default(),
            button_mappings: Vec::new(),
        }
    }
}

impl PanelConfig {
    /// Create a new config builder starting from defaults.
    pub fn builder() -> PanelConfigBuilder {
        PanelConfigBuilder::default()
    }
}

/// Builder for PanelConfig.
#[derive(Debug, Clone, Default)]
pub struct PanelConfigBuilder {
    config: PanelConfig,
}

impl PanelConfigBuilder {
    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.config.ip = ip.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.config.timeout_ms = ms;
        self
    }

    pub fn reconnect_delay_ms(mut self, ms: u64) -> Self {
        self.config.reconnect_delay_ms = ms;
        self
    }

    pub fn keepalive_interval_ms(mut self, ms: u64) -> Self {
        self.config.keepalive_interval_ms = ms;
        self
    }

    pub fn trigger_reset_delay_ms(mut self, ms: u64) -> Self {
        self.config.trigger_reset_delay_ms = ms;
        self
    }

    pub fn shutdown_grace_ms(mut self, ms: u64) -> Self {
        self.config.shutdown_grace_ms = ms;
        self
    }

    pub fn http_timeout_ms(mut self, ms: u64) -> Self {
        self.config.http_timeout_ms = ms;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn default_color(mut self, color: DeviceColor) -> Self {
        self.config.default_color = color;
        self
    }

    pub fn mode_table(mut self, table: ModeTable) -> Self {
        self.config.mode_table = table;
        self
    }

    /// Override or add a single mode color.
    pub fn mode(mut self, name: impl Into<String>, color: DeviceColor) -> Self {
        self.config.mode_table = self.config.mode_table.with_mode(name, color);
        self
    }

    pub fn mode_match(mut self, matching: ModeMatch) -> Self {
        self.config.mode_match = matching;
        self
    }

    pub fn press_classification(mut self, classification: PressClassification) -> Self {
        self.config.press_classification = classification;
        self
    }

    pub fn dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.config.dispatch_mode = mode;
        self
    }

    pub fn button_mappings(mut self, mappings: Vec<ButtonMapping>) -> Self {
        self.config.button_mappings = mappings;
        self
    }

    pub fn button_mapping(mut self, mapping: ButtonMapping) -> Self {
        self.config.button_mappings.push(mapping);
        self
    }

    pub fn build(self) -> PanelConfig {
        self.config
    }
}
