// MIT License - Copyright (c) 2026 Peter Wright
// MQTT bridge

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

use led_panel_bridge::color::{classify_mode, parse_color_value};
use led_panel_bridge::constants::{
    BUTTON_COUNT, DEFAULT_DOUBLE_PRESS_WINDOW_MS, DEFAULT_KEEPALIVE_INTERVAL_MS,
    DEFAULT_LONG_PRESS_MS, DEFAULT_MODE_TOLERANCE, DEFAULT_PANEL_PORT,
    DEFAULT_RECONNECT_DELAY_MS, DEFAULT_SHUTDOWN_GRACE_MS, DEFAULT_TIMEOUT_MS,
    DEFAULT_TRIGGER_RESET_DELAY_MS,
};
use led_panel_bridge::config::DEFAULT_HTTP_TIMEOUT_MS;
use led_panel_bridge::{
    ButtonMapping, DeviceColor, DeviceHandle, DeviceRegistry, DispatchMode, LedPanel, LightState,
    ModeMatch, ModeTable, PanelConfig, PanelError, PanelEvent, PanelSnapshot,
    PressClassification, PressKind,
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "ledpanel2mqtt")]
#[command(about = "Bridge between an RGB-LED button panel and MQTT")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Config {
    panel: PanelToml,
    mqtt: MqttToml,
    /// Mode name -> "#RRGGBB"; overrides or extends the built-in table.
    #[serde(default)]
    modes: BTreeMap<String, String>,
    #[serde(default)]
    buttons: Vec<ButtonMapping>,
    #[serde(default)]
    devices: HashMap<String, DeviceToml>,
}

#[derive(Debug, Deserialize)]
struct PanelToml {
    #[serde(default = "default_panel_ip")]
    ip: String,
    #[serde(default = "default_panel_port")]
    port: u16,
    #[serde(default = "default_timeout", alias = "timeout")]
    timeout_ms: u64,
    #[serde(default = "default_reconnect_delay", alias = "reconnectDelay")]
    reconnect_delay_ms: u64,
    #[serde(default = "default_keepalive_interval")]
    keepalive_interval_ms: u64,
    #[serde(default = "default_trigger_reset_delay", alias = "triggerResetDelay")]
    trigger_reset_delay_ms: u64,
    #[serde(default = "default_shutdown_grace")]
    shutdown_grace_ms: u64,
    #[serde(default = "default_http_timeout")]
    http_timeout_ms: u64,
    #[serde(default = "default_panel_name")]
    name: String,
    #[serde(default)]
    default_color: Option<String>,
    #[serde(default)]
    press_classification: PressToml,
    #[serde(default = "default_double_press_window")]
    double_press_window_ms: u64,
    #[serde(default = "default_long_press")]
    long_press_ms: u64,
    #[serde(default)]
    mode_match: ModeMatchToml,
    #[serde(default = "default_mode_tolerance")]
    mode_tolerance: u8,
    #[serde(default)]
    dispatch_mode: DispatchToml,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum PressToml {
    #[default]
    Single,
    Timed,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ModeMatchToml {
    #[default]
    Normalized,
    Tolerance,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum DispatchToml {
    #[default]
    Direct,
    VirtualTrigger,
}

fn default_panel_ip() -> String {
    led_panel_bridge::constants::DEFAULT_PANEL_IP.to_string()
}
fn default_panel_port() -> u16 {
    DEFAULT_PANEL_PORT
}
fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_MS
}
fn default_reconnect_delay() -> u64 {
    DEFAULT_RECONNECT_DELAY_MS
}
fn default_keepalive_interval() -> u64 {
    DEFAULT_KEEPALIVE_INTERVAL_MS
}
fn default_trigger_reset_delay() -> u64 {
    DEFAULT_TRIGGER_RESET_DELAY_MS
}
fn default_shutdown_grace() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_MS
}
fn default_http_timeout() -> u64 {
    DEFAULT_HTTP_TIMEOUT_MS
}
fn default_panel_name() -> String {
    "LED Panel".to_string()
}
fn default_double_press_window() -> u64 {
    DEFAULT_DOUBLE_PRESS_WINDOW_MS
}
fn default_long_press() -> u64 {
    DEFAULT_LONG_PRESS_MS
}
fn default_mode_tolerance() -> u8 {
    DEFAULT_MODE_TOLERANCE
}

/// An external device switched by publishing to its command topic.
#[derive(Debug, Clone, Deserialize)]
struct DeviceToml {
    command_topic: String,
    #[serde(default)]
    dimmable: bool,
}

#[derive(Debug, Deserialize)]
struct MqttToml {
    url: String,
    #[serde(default = "default_client_id")]
    client_id: String,
    #[serde(default = "default_subscribe_topic")]
    subscribe_topic: String,
    #[serde(default = "default_publish_topic")]
    publish_topic: String,
    #[serde(default)]
    scene_topic: Option<String>,
    #[serde(default = "default_snapshot_interval")]
    snapshot_interval_secs: u64,
}

fn default_client_id() -> String {
    "ledpanel-bridge".to_string()
}
fn default_subscribe_topic() -> String {
    "ledpanel/cmd".to_string()
}
fn default_publish_topic() -> String {
    "ledpanel".to_string()
}
fn default_snapshot_interval() -> u64 {
    60
}

fn build_panel_config(config: &Config) -> Result<PanelConfig> {
    let toml = &config.panel;

    let mut mode_table = ModeTable::default();
    for (name, hex) in &config.modes {
        let color = DeviceColor::from_hex(hex)
            .with_context(|| format!("Invalid color {hex:?} for mode {name:?}"))?;
        mode_table = mode_table.with_mode(name, color);
    }

    let default_color = match &toml.default_color {
        Some(value) => parse_color_value(value, &mode_table)
            .with_context(|| format!("Invalid default_color {value:?}"))?,
        None => DeviceColor::WHITE,
    };

    for mapping in &config.buttons {
        if mapping.button_number == 0 || usize::from(mapping.button_number) > BUTTON_COUNT {
            anyhow::bail!(PanelError::InvalidButton {
                number: mapping.button_number,
                max: BUTTON_COUNT as u8,
            });
        }
    }

    let press_classification = match toml.press_classification {
        PressToml::Single => PressClassification::SingleOnly,
        PressToml::Timed => PressClassification::Timed {
            double_press_window: Duration::from_millis(toml.double_press_window_ms),
            long_press: Duration::from_millis(toml.long_press_ms),
        },
    };
    let mode_match = match toml.mode_match {
        ModeMatchToml::Normalized => ModeMatch::Normalized,
        ModeMatchToml::Tolerance => ModeMatch::Tolerance(toml.mode_tolerance),
    };
    let dispatch_mode = match toml.dispatch_mode {
        DispatchToml::Direct => DispatchMode::Direct,
        DispatchToml::VirtualTrigger => DispatchMode::VirtualTrigger,
    };

    Ok(PanelConfig::builder()
        .ip(&toml.ip)
        .port(toml.port)
        .timeout_ms(toml.timeout_ms)
        .reconnect_delay_ms(toml.reconnect_delay_ms)
        .keepalive_interval_ms(toml.keepalive_interval_ms)
        .trigger_reset_delay_ms(toml.trigger_reset_delay_ms)
        .shutdown_grace_ms(toml.shutdown_grace_ms)
        .http_timeout_ms(toml.http_timeout_ms)
        .name(&toml.name)
        .default_color(default_color)
        .mode_table(mode_table)
        .mode_match(mode_match)
        .press_classification(press_classification)
        .dispatch_mode(dispatch_mode)
        .button_mappings(config.buttons.clone())
        .build())
}

// ---------------------------------------------------------------------------
// Device registry backed by MQTT
// ---------------------------------------------------------------------------

struct MqttDevice {
    name: String,
    command_topic: String,
    dimmable: bool,
    client: AsyncClient,
}

impl MqttDevice {
    fn publish(&self, payload: String) -> led_panel_bridge::Result<()> {
        debug!("Device {}: {} -> {}", self.name, payload, self.command_topic);
        self.client
            .try_publish(&self.command_topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| PanelError::Io(std::io::Error::other(e.to_string())))
    }
}

impl DeviceHandle for MqttDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_on(&self, on: bool) -> led_panel_bridge::Result<()> {
        self.publish(if on { "ON" } else { "OFF" }.to_string())
    }

    fn toggle(&self) -> led_panel_bridge::Result<()> {
        self.publish("TOGGLE".to_string())
    }

    fn set_brightness(&self, level: u8) -> led_panel_bridge::Result<()> {
        if !self.dimmable {
            return Err(PanelError::Unsupported {
                details: format!("{} has no brightness", self.name),
            });
        }
        self.publish(level.to_string())
    }
}

struct MqttRegistry {
    devices: HashMap<String, Arc<MqttDevice>>,
    scene_topic: Option<String>,
    client: AsyncClient,
    /// Set once the broker has acknowledged our connection.
    ready: Arc<AtomicBool>,
}

impl MqttRegistry {
    fn new(
        devices: &HashMap<String, DeviceToml>,
        scene_topic: Option<String>,
        client: AsyncClient,
        ready: Arc<AtomicBool>,
    ) -> Self {
        let devices = devices
            .iter()
            .map(|(name, device)| {
                let handle = MqttDevice {
                    name: name.clone(),
                    command_topic: device.command_topic.clone(),
                    dimmable: device.dimmable,
                    client: client.clone(),
                };
                (name.clone(), Arc::new(handle))
            })
            .collect();
        Self {
            devices,
            scene_topic,
            client,
            ready,
        }
    }
}

impl DeviceRegistry for MqttRegistry {
    fn resolve_by_name(&self, name: &str) -> Option<Arc<dyn DeviceHandle>> {
        let device = self.devices.get(name).or_else(|| {
            self.devices
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, d)| d)
        })?;
        Some(Arc::clone(device) as Arc<dyn DeviceHandle>)
    }

    fn ready_for_events(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn activate_scene(&self, name: &str) -> led_panel_bridge::Result<()> {
        let Some(topic) = &self.scene_topic else {
            return Err(PanelError::Unsupported {
                details: format!("scene activation ({name}): no scene_topic configured"),
            });
        };
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, name.to_string())
            .map_err(|e| PanelError::Io(std::io::Error::other(e.to_string())))
    }
}

// ---------------------------------------------------------------------------
// MQTT JSON types
// ---------------------------------------------------------------------------

// Published messages share a flat {now, op, ...} structure

#[derive(Serialize)]
struct MqttSnapshot {
    now: u64,
    op: String,
    state: MqttSnapshotState,
}

#[derive(Serialize)]
struct MqttSnapshotState {
    phase: String,
    color: String,
    mode: String,
    on: bool,
    hue: u16,
    saturation: u8,
    brightness: u8,
    #[serde(rename = "lastError", skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
    #[serde(rename = "lastUnrecognized", skip_serializing_if = "Option::is_none")]
    last_unrecognized: Option<String>,
    #[serde(rename = "queuedEvents")]
    queued_events: usize,
    #[serde(rename = "eventsReady")]
    events_ready: bool,
}

// {now, op, button, kind}
#[derive(Serialize)]
struct MqttButtonEvent {
    now: u64,
    op: String,
    button: usize,
    kind: String,
}

#[derive(Serialize)]
struct MqttLightState {
    now: u64,
    op: String,
    on: bool,
    hue: u16,
    saturation: u8,
    brightness: u8,
    color: String,
    mode: String,
}

#[derive(Serialize)]
struct MqttReachability {
    now: u64,
    op: String,
    reachable: bool,
}

#[derive(Serialize)]
struct MqttTrigger {
    now: u64,
    op: String,
    trigger: String,
    active: bool,
}

// CMD_ACK response
#[derive(Serialize)]
struct MqttCmdAck {
    now: u64,
    op: String,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    src: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
}

// Inbound command (subscribed)
#[derive(Deserialize)]
struct MqttCommand {
    op: String,
    #[serde(default)]
    #[allow(dead_code)]
    op_id: Option<String>,
    /// "#RRGGBB" or a mode name, for SET_LED
    #[serde(default)]
    color: Option<String>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn now_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

async fn publish_json(client: &AsyncClient, topic: &str, payload: &impl Serialize, retain: bool) {
    match serde_json::to_string(payload) {
        Ok(json) => {
            if let Err(e) = client.publish(topic, QoS::AtLeastOnce, retain, json).await {
                error!("Failed to publish to {topic}: {e}");
            }
        }
        Err(e) => error!("Failed to serialize MQTT payload: {e}"),
    }
}

async fn publish_cmd_ack(
    client: &AsyncClient,
    topic: &str,
    outcome: std::result::Result<Option<serde_json::Value>, String>,
    src: Option<serde_json::Value>,
) {
    let (success, data, error) = match outcome {
        Ok(data) => (true, data, None),
        Err(e) => (false, None, Some(e)),
    };
    let msg = MqttCmdAck {
        now: now_epoch_ms(),
        op: "CMD_ACK".to_string(),
        success,
        error,
        src,
        data,
    };
    publish_json(client, topic, &msg, false).await;
}

fn build_snapshot(snapshot: &PanelSnapshot) -> MqttSnapshot {
    MqttSnapshot {
        now: now_epoch_ms(),
        op: "SNAPSHOT".to_string(),
        state: MqttSnapshotState {
            phase: snapshot.phase.as_str().to_string(),
            color: snapshot.color.to_hex(),
            mode: snapshot.mode.clone(),
            on: snapshot.light.on,
            hue: snapshot.light.hue,
            saturation: snapshot.light.saturation,
            brightness: snapshot.light.brightness,
            last_error: snapshot.last_error.clone(),
            last_unrecognized: snapshot.last_unrecognized.clone(),
            queued_events: snapshot.queued_events,
            events_ready: snapshot.events_ready,
        },
    }
}

async fn publish_snapshot(client: &AsyncClient, topic: &str, panel: &LedPanel) {
    let snapshot = build_snapshot(&panel.snapshot().await);
    publish_json(client, topic, &snapshot, true).await;
}

fn light_state_message(state: &LightState, table: &ModeTable, matching: ModeMatch) -> MqttLightState {
    MqttLightState {
        now: now_epoch_ms(),
        op: "LIGHT_STATE".to_string(),
        on: state.on,
        hue: state.hue,
        saturation: state.saturation,
        brightness: state.brightness,
        color: state.color.to_hex(),
        mode: classify_mode(state.color, table, matching).to_string(),
    }
}

// ---------------------------------------------------------------------------
// Panel event → MQTT
// ---------------------------------------------------------------------------

async fn handle_panel_event(
    event: PanelEvent,
    client: &AsyncClient,
    topic: &str,
    panel_config: &PanelConfig,
) {
    match event {
        PanelEvent::ButtonPressed { index, kind } => {
            let msg = MqttButtonEvent {
                now: now_epoch_ms(),
                op: "BUTTON_PRESS".to_string(),
                button: index + 1,
                kind: kind.as_str().to_string(),
            };
            if kind != PressKind::Single {
                debug!("Button {} {} press (notify only)", index + 1, kind);
            }
            publish_json(client, topic, &msg, false).await;
        }

        PanelEvent::LightStateChanged(state) => {
            let msg = light_state_message(&state, &panel_config.mode_table, panel_config.mode_match);
            publish_json(client, topic, &msg, true).await;
        }

        PanelEvent::Reachability(reachable) => {
            if reachable {
                info!("Panel reachable");
            } else {
                warn!("Panel unreachable");
            }
            let msg = MqttReachability {
                now: now_epoch_ms(),
                op: "REACHABILITY".to_string(),
                reachable,
            };
            publish_json(client, topic, &msg, true).await;
        }

        PanelEvent::TriggerChanged { name, active } => {
            let msg = MqttTrigger {
                now: now_epoch_ms(),
                op: "TRIGGER".to_string(),
                trigger: name,
                active,
            };
            publish_json(client, topic, &msg, false).await;
        }

        PanelEvent::Connected => {
            info!("Panel connected");
        }

        PanelEvent::Disconnected => {
            warn!("Panel disconnected");
        }

        PanelEvent::Shutdown => {
            info!("Panel session stopped");
        }
    }
}

// ---------------------------------------------------------------------------
// MQTT command handler
// ---------------------------------------------------------------------------

async fn handle_command(
    payload_str: &str,
    cmd: MqttCommand,
    client: &AsyncClient,
    topic: &str,
    panel: &LedPanel,
    panel_config: &PanelConfig,
) {
    // Parse the raw payload as a JSON value for the CMD_ACK src field
    let src_json = serde_json::from_str::<serde_json::Value>(payload_str).ok();

    match cmd.op.as_str() {
        "SNAPSHOT" => {
            debug!("Command: SNAPSHOT");
            let snapshot = build_snapshot(&panel.snapshot().await);
            let snapshot_value = serde_json::to_value(&snapshot).ok();
            publish_json(client, topic, &snapshot, true).await;
            publish_cmd_ack(client, topic, Ok(snapshot_value), src_json).await;
        }

        "PING" => {
            info!("Command: PING");
            publish_cmd_ack(client, topic, Ok(None), src_json).await;
        }

        "SET_LED" => {
            let Some(value) = cmd.color else {
                warn!("SET_LED: missing color");
                publish_cmd_ack(client, topic, Err("missing color".to_string()), src_json).await;
                return;
            };
            let Some(color) = parse_color_value(&value, &panel_config.mode_table) else {
                warn!("SET_LED: invalid color {value:?}");
                let err = PanelError::InvalidColor { value };
                publish_cmd_ack(client, topic, Err(err.to_string()), src_json).await;
                return;
            };
            info!("Command: SET_LED {color}");
            let outcome = panel.set_led(color).await.map(|()| None).map_err(|e| {
                error!("SET_LED {color} failed: {e}");
                e.to_string()
            });
            publish_cmd_ack(client, topic, outcome, src_json).await;
        }

        "QUERY_LED" => {
            info!("Command: QUERY_LED");
            let outcome = panel.query_led().await.map(|()| None).map_err(|e| {
                error!("QUERY_LED failed: {e}");
                e.to_string()
            });
            publish_cmd_ack(client, topic, outcome, src_json).await;
        }

        other => {
            warn!("Unknown command: {other}");
            publish_cmd_ack(client, topic, Err(format!("unknown op {other}")), src_json).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity (e.g. RUST_LOG=debug or RUST_LOG=led_panel_bridge=trace).
    // Default: info.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // systemd journal already adds timestamps, so omit them when running under systemd
    if std::env::var_os("JOURNAL_STREAM").is_some() {
        tracing_subscriber::fmt().without_time().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let cli = Cli::parse();

    let mut config = load_config(&cli.config)?;
    let mut panel_config = build_panel_config(&config)?;
    let (mut mqtt_host, mut mqtt_port) = parse_mqtt_url(&config.mqtt.url)?;

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    loop {
        let publish_topic = config.mqtt.publish_topic.clone();
        let subscribe_topic = config.mqtt.subscribe_topic.clone();
        let shared_config = Arc::new(panel_config.clone());

        // Set up MQTT
        let mut mqtt_opts = MqttOptions::new(&config.mqtt.client_id, &mqtt_host, mqtt_port);
        mqtt_opts.set_keep_alive(Duration::from_secs(30));
        let (client, mut eventloop) = AsyncClient::new(mqtt_opts, 256);

        let ready = Arc::new(AtomicBool::new(false));
        let registry = MqttRegistry::new(
            &config.devices,
            config.mqtt.scene_topic.clone(),
            client.clone(),
            Arc::clone(&ready),
        );
        info!(
            "{} external device(s) configured, {} button mapping(s)",
            registry.devices.len(),
            panel_config.button_mappings.len()
        );

        // Start the panel session; it reconnects on its own
        let panel = Arc::new(LedPanel::start(panel_config.clone(), Arc::new(registry)));

        // Task 1: Panel event listener
        let client_events = client.clone();
        let topic_events = publish_topic.clone();
        let config_events = Arc::clone(&shared_config);
        let mut event_rx = panel.subscribe();
        let event_handle = tokio::spawn(async move {
            loop {
                match event_rx.recv().await {
                    Ok(event) => {
                        handle_panel_event(event, &client_events, &topic_events, &config_events)
                            .await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Event receiver lagged, missed {n} events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        info!("Event channel closed");
                        break;
                    }
                }
            }
        });

        // Task 2: MQTT event loop (receives messages, handles commands)
        let panel_cmds = Arc::clone(&panel);
        let client_cmds = client.clone();
        let topic_cmds = publish_topic.clone();
        let config_cmds = Arc::clone(&shared_config);
        let sub_topic = subscribe_topic.clone();
        let ready_cmds = Arc::clone(&ready);
        let mqtt_handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        // rumqttc does not resubscribe after a broker reconnect
                        info!("MQTT: connected, subscribing to {sub_topic}");
                        if let Err(e) = client_cmds.subscribe(&sub_topic, QoS::AtLeastOnce).await {
                            error!("Failed to subscribe to {sub_topic}: {e}");
                        }
                        if !ready_cmds.swap(true, Ordering::SeqCst) {
                            if let Err(e) = panel_cmds.events_ready().await {
                                warn!("Could not release queued button events: {e}");
                            }
                            publish_snapshot(&client_cmds, &topic_cmds, &panel_cmds).await;
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(msg))) => {
                        if msg.topic == sub_topic {
                            let payload = String::from_utf8_lossy(&msg.payload);
                            match serde_json::from_str::<MqttCommand>(&payload) {
                                Ok(cmd) => {
                                    if cmd.op == "SNAPSHOT" {
                                        debug!("MQTT command received: {payload}");
                                    } else {
                                        info!("MQTT command received: {payload}");
                                    }
                                    handle_command(
                                        &payload,
                                        cmd,
                                        &client_cmds,
                                        &topic_cmds,
                                        &panel_cmds,
                                        &config_cmds,
                                    )
                                    .await;
                                }
                                Err(e) => {
                                    warn!("Failed to parse MQTT command: {e}");
                                }
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("MQTT event loop error: {e}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        // Task 3: Snapshot timer
        let panel_snap = Arc::clone(&panel);
        let client_snap = client.clone();
        let topic_snap = publish_topic.clone();
        let snapshot_interval_secs = config.mqtt.snapshot_interval_secs.max(1);
        let snap_handle = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(snapshot_interval_secs));
            // Skip the first immediate tick; a snapshot goes out on broker connect
            ticker.tick().await;
            loop {
                ticker.tick().await;
                publish_snapshot(&client_snap, &topic_snap, &panel_snap).await;
            }
        });

        // Wait for a signal
        info!("MQTT bridge running. Send SIGHUP to restart, SIGINT/SIGTERM to stop.");
        let restart = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down...");
                false
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                false
            }
            _ = sighup.recv() => {
                info!("Received SIGHUP, reloading config and restarting connections...");
                true
            }
        };

        // Abort tasks and wait for them so their panel references are released
        mqtt_handle.abort();
        snap_handle.abort();
        let _ = mqtt_handle.await;
        let _ = snap_handle.await;

        match Arc::try_unwrap(panel) {
            Ok(mut p) => {
                if let Err(e) = p.shutdown().await {
                    warn!("Error shutting down panel session: {e}");
                }
            }
            Err(_arc) => {
                warn!("Could not unwrap panel Arc for clean shutdown (tasks still hold references)");
            }
        }
        // The event channel closes once the session is gone
        let mut event_handle = event_handle;
        if tokio::time::timeout(Duration::from_secs(2), &mut event_handle).await.is_err() {
            event_handle.abort();
        }
        if let Err(e) = client.disconnect().await {
            debug!("MQTT disconnect: {e}");
        }

        if !restart {
            break;
        }

        // Reload config from disk; keep previous config on failure
        info!("Reloading config from {}", cli.config);
        match load_config(&cli.config).and_then(|new_config| {
            let new_panel_config = build_panel_config(&new_config)?;
            let (host, port) = parse_mqtt_url(&new_config.mqtt.url)?;
            Ok((new_config, new_panel_config, host, port))
        }) {
            Ok((new_config, new_panel_config, host, port)) => {
                config = new_config;
                panel_config = new_panel_config;
                mqtt_host = host;
                mqtt_port = port;
                info!("Config reloaded successfully");
            }
            Err(e) => warn!("Failed to reload config, keeping previous: {e:#}"),
        }

        info!("Reconnecting...");
    }

    info!("Shutdown complete");
    Ok(())
}

fn load_config(path: &str) -> Result<Config> {
    let text = std::fs::read_to_string(path).context("Failed to read config file")?;
    toml::from_str(&text).context("Failed to parse config file")
}

/// Parse an MQTT URL like "mqtt://host:port" into (host, port).
fn parse_mqtt_url(url: &str) -> Result<(String, u16)> {
    let stripped = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    let (host, port_str) = stripped
        .rsplit_once(':')
        .context("MQTT URL must be in format mqtt://host:port")?;

    let port: u16 = port_str.parse().context("Invalid MQTT port number")?;

    Ok((host.to_string(), port))
}
