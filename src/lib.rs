// MIT License - Copyright (c) 2026 Peter Wright
//
//! # led-panel-bridge
//!
//! Client for networked RGB-LED push-button panels: ten buttons and one
//! RGB LED behind a plain-text TCP protocol.
//!
//! The LED color doubles as a "mode": each button can be mapped to a
//! different action per mode, and button 10 cycles through the mode colors.
//! Actions switch external devices through a [`DeviceRegistry`], change the
//! LED, call HTTP endpoints, activate scenes, or pulse a virtual trigger for
//! an external automation layer.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use led_panel_bridge::{ButtonMapping, LedPanel, NoDevices, PanelConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PanelConfig::builder()
//!         .ip("192.168.2.12")
//!         .button_mapping(ButtonMapping::led(1, "any", "blue"))
//!         .button_mapping(ButtonMapping::led(2, "blue", "#FF8000"))
//!         .build();
//!
//!     let mut panel = LedPanel::start(config, Arc::new(NoDevices));
//!
//!     let mut events = panel.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     tokio::signal::ctrl_c().await?;
//!     panel.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod color;
pub mod comm;
pub mod config;
pub mod constants;
pub mod devices;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod mapping;
pub mod panel;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod transport;

// Re-exports for convenience
pub use color::{DeviceColor, Mode, ModeMatch, ModeTable};
pub use comm::ConnectionPhase;
pub use config::{PanelConfig, PanelConfigBuilder};
pub use devices::{LightState, PressClassification, PressKind};
pub use dispatch::{DispatchMode, Effect};
pub use error::{PanelError, Result};
pub use event::{EventReceiver, PanelEvent};
pub use mapping::{ActionType, ButtonMapping, DeviceAction, HttpMethod};
pub use panel::{LedPanel, PanelSnapshot};
pub use registry::{DeviceHandle, DeviceRegistry, NoDevices};
