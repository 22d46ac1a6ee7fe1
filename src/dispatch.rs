// MIT License - Copyright (c) 2026 Peter Wright
// Mode-aware button action dispatch

use reqwest::header::CONTENT_TYPE;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::color::{classify_mode, parse_color_value, DeviceColor, Mode, ModeMatch, ModeTable};
use crate::config::PanelConfig;
use crate::constants::{COLOR_CYCLE, COLOR_CYCLE_BUTTON};
use crate::error::{PanelError, Result};
use crate::event::{EventSender, PanelEvent};
use crate::mapping::{select_mapping, ActionType, ButtonMapping, DeviceAction, HttpMethod};
use crate::registry::{apply_device_action, DeviceRegistry};

/// How a matched mapping takes effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Perform the mapped action from the session.
    #[default]
    Direct,
    /// Pulse a named trigger and let the external automation react.
    VirtualTrigger,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub method: HttpMethod,
    pub body: Option<String>,
}

/// Outcome of resolving a single press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    SetLed(DeviceColor),
    Device { target: String, action: DeviceAction },
    Http(HttpRequest),
    Scene(String),
    Trigger(String),
}

/// Resolves button presses against the current LED mode and the mappings.
pub struct Dispatcher {
    mappings: Vec<ButtonMapping>,
    mode_table: ModeTable,
    mode_match: ModeMatch,
    dispatch_mode: DispatchMode,
    panel_name: String,
    cycle: Vec<(String, DeviceColor)>,
    http: reqwest::Client,
}

impl Dispatcher {
    pub fn new(config: &PanelConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.http_timeout_ms))
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build HTTP client ({}), using defaults", e);
                reqwest::Client::new()
            });

        let cycle = COLOR_CYCLE
            .iter()
            .filter_map(|name| config.mode_table.get(name).map(|c| (name.to_string(), c)))
            .collect();

        Self {
            mappings: config.button_mappings.clone(),
            mode_table: config.mode_table.clone(),
            mode_match: config.mode_match,
            dispatch_mode: config.dispatch_mode,
            panel_name: config.name.clone(),
            cycle,
            http,
        }
    }

    pub fn classify(&self, color: DeviceColor) -> Mode {
        classify_mode(color, &self.mode_table, self.mode_match)
    }

    /// Color following the current one in the fixed cycle.
    ///
    /// Colors outside the cycle restart it at the first entry.
    pub fn next_cycle_color(&self, current: DeviceColor) -> Option<DeviceColor> {
        let mode = self.classify(current);
        let next = match self.cycle.iter().position(|(name, _)| name == mode.as_str()) {
            Some(pos) => (pos + 1) % self.cycle.len(),
            None => 0,
        };
        self.cycle.get(next).map(|(_, color)| *color)
    }

    /// Decide what a single press of `button_number` (1-based) does.
    ///
    /// Returns `None` when nothing is mapped or the mapping is incomplete;
    /// both are logged, neither is an error.
    pub fn resolve(&self, button_number: u8, current: DeviceColor) -> Option<Effect> {
        if button_number == COLOR_CYCLE_BUTTON {
            let next = self.next_cycle_color(current)?;
            info!("Button {}: cycling LED color to {}", button_number, next);
            return Some(Effect::SetLed(next));
        }

        let mode = self.classify(current);
        let Some(mapping) = select_mapping(&self.mappings, button_number, mode.as_str()) else {
            info!("Button {}: no mapping for mode {}", button_number, mode);
            return None;
        };
        debug!(
            "Button {}: mode {} matched {} mapping ({})",
            button_number, mode, mapping.action_type, mapping.mode_color
        );

        if self.dispatch_mode == DispatchMode::VirtualTrigger {
            return Some(Effect::Trigger(self.trigger_name(mapping)));
        }

        match mapping.action_type {
            ActionType::Device => {
                let Some(target) = mapping.target_name.clone() else {
                    warn!("Button {}: device action without target_name", button_number);
                    return None;
                };
                let Some(action) = mapping.device_action() else {
                    warn!(
                        "Button {}: unsupported device action '{}' for {}",
                        button_number, mapping.action, target
                    );
                    return None;
                };
                Some(Effect::Device { target, action })
            }
            ActionType::Led => {
                let value = mapping.value.as_deref().unwrap_or_default();
                match parse_color_value(value, &self.mode_table) {
                    Some(color) => Some(Effect::SetLed(color)),
                    None => {
                        warn!("Button {}: invalid LED value '{}'", button_number, value);
                        None
                    }
                }
            }
            ActionType::Url => match &mapping.url {
                Some(url) => Some(Effect::Http(HttpRequest {
                    url: url.clone(),
                    method: mapping.method,
                    body: mapping.body.clone(),
                })),
                None => {
                    warn!("Button {}: url action without url", button_number);
                    None
                }
            },
            ActionType::Scene => match mapping.scene_name() {
                Some(scene) => Some(Effect::Scene(scene.to_string())),
                None => {
                    warn!("Button {}: scene action without scene name", button_number);
                    None
                }
            },
        }
    }

    /// Trigger name for a mapping: explicit `trigger_name`, or
    /// `"<panel> Button <n> <mode>"`.
    pub fn trigger_name(&self, mapping: &ButtonMapping) -> String {
        mapping.trigger_name.clone().unwrap_or_else(|| {
            format!(
                "{} Button {} {}",
                self.panel_name, mapping.button_number, mapping.mode_color
            )
        })
    }

    /// Fire an HTTP request in the background. Failures are logged only.
    pub fn spawn_http(&self, request: HttpRequest) -> JoinHandle<()> {
        let client = self.http.clone();
        tokio::spawn(async move {
            match send_http(&client, &request).await {
                Ok(status) => info!("HTTP {:?} {} -> {}", request.method, request.url, status),
                Err(e) => warn!("HTTP {:?} {} failed: {}", request.method, request.url, e),
            }
        })
    }
}

/// Issue the request and discard the response body.
pub async fn send_http(client: &reqwest::Client, request: &HttpRequest) -> Result<u16> {
    let builder = match request.method {
        HttpMethod::Get => client.get(&request.url),
        HttpMethod::Post => {
            let builder = client.post(&request.url);
            match &request.body {
                Some(body) => {
                    let content_type = if serde_json::from_str::<serde_json::Value>(body).is_ok() {
                        "application/json"
                    } else {
                        "text/plain"
                    };
                    builder.header(CONTENT_TYPE, content_type).body(body.clone())
                }
                None => builder,
            }
        }
    };

    let response = builder.send().await?;
    let status = response.status();
    let _ = response.bytes().await;
    if !status.is_success() {
        return Err(PanelError::HttpStatus {
            status: status.as_u16(),
            url: request.url.clone(),
        });
    }
    Ok(status.as_u16())
}

/// Apply a device action through the registry. Unknown targets and
/// unsupported operations are logged and dropped.
pub fn perform_device_action(registry: &dyn DeviceRegistry, target: &str, action: DeviceAction) {
    let Some(device) = registry.resolve_by_name(target) else {
        warn!("Device '{}' not found, ignoring {:?}", target, action);
        return;
    };
    match apply_device_action(device.as_ref(), action) {
        Ok(()) => info!("Device '{}': {:?}", target, action),
        Err(e) => warn!("Device '{}': {:?} failed: {}", target, action, e),
    }
}

pub fn perform_scene(registry: &dyn DeviceRegistry, scene: &str) {
    match registry.activate_scene(scene) {
        Ok(()) => info!("Scene '{}' activated", scene),
        Err(e) => warn!("Scene '{}' not activated: {}", scene, e),
    }
}

/// Set the trigger, then reset it after `reset_delay`.
pub fn pulse_trigger(events: &EventSender, name: String, reset_delay: Duration) -> JoinHandle<()> {
    info!("Pulsing trigger '{}'", name);
    let _ = events.send(PanelEvent::TriggerChanged {
        name: name.clone(),
        active: true,
    });
    let events = events.clone();
    tokio::spawn(async move {
        sleep(reset_delay).await;
        let _ = events.send(PanelEvent::TriggerChanged {
            name,
            active: false,
        });
    })
}
