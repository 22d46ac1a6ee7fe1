// Session tests against a loopback panel
//
// A TcpListener on 127.0.0.1 plays the panel: it reads the commands the
// session writes and answers with panel lines.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use led_panel_bridge::{
    ButtonMapping, ConnectionPhase, DeviceColor, DeviceHandle, DeviceRegistry, DispatchMode,
    EventReceiver, LedPanel, NoDevices, PanelConfig, PanelEvent, PressClassification, PressKind,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};

const WAIT: Duration = Duration::from_secs(5);

struct FakePanel {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl FakePanel {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = timeout(WAIT, listener.accept())
            .await
            .expect("session did not connect")
            .unwrap();
        Self {
            stream,
            buf: Vec::new(),
        }
    }

    /// Next `\r`-framed command body, e.g. `led=?`.
    async fn next_command(&mut self) -> String {
        loop {
            while self.buf.first() == Some(&b'\r') {
                self.buf.remove(0);
            }
            if let Some(end) = self.buf.iter().position(|&b| b == b'\r') {
                let body: Vec<u8> = self.buf.drain(..end).collect();
                return String::from_utf8(body).unwrap();
            }
            let mut chunk = [0u8; 256];
            let n = timeout(WAIT, self.stream.read(&mut chunk))
                .await
                .expect("no command from session")
                .unwrap();
            assert!(n > 0, "session closed the connection");
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    async fn send_line(&mut self, line: &str) {
        self.stream.write_all(format!("{line}\r").as_bytes()).await.unwrap();
    }

    async fn key(&mut self, number: u8, state: u8) {
        self.send_line(&format!(
            r#"{{"events":[{{"label":"Key {number}","state":"{state}"}}]}}"#
        ))
        .await;
    }

    async fn click(&mut self, number: u8) {
        self.key(number, 1).await;
        self.key(number, 0).await;
    }
}

fn config(port: u16) -> led_panel_bridge::PanelConfigBuilder {
    PanelConfig::builder()
        .ip("127.0.0.1")
        .port(port)
        .keepalive_interval_ms(0)
        .reconnect_delay_ms(200)
}

async fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// Receive events until `pred` matches; returns everything received.
async fn collect_until(
    events: &mut EventReceiver,
    pred: impl Fn(&PanelEvent) -> bool,
) -> Vec<PanelEvent> {
    let mut seen = Vec::new();
    loop {
        let event = timeout(WAIT, events.recv())
            .await
            .expect("timed out waiting for panel event")
            .unwrap();
        let done = pred(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

fn presses(events: &[PanelEvent]) -> Vec<(usize, PressKind)> {
    events
        .iter()
        .filter_map(|e| match e {
            PanelEvent::ButtonPressed { index, kind } => Some((*index, *kind)),
            _ => None,
        })
        .collect()
}

fn is_led(color: DeviceColor) -> impl Fn(&PanelEvent) -> bool {
    move |e| matches!(e, PanelEvent::LightStateChanged(s) if s.color == color)
}

struct RecordingDevice {
    name: String,
    calls: Mutex<Vec<String>>,
}

impl DeviceHandle for RecordingDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_on(&self, on: bool) -> led_panel_bridge::Result<()> {
        self.calls.lock().unwrap().push(if on { "on" } else { "off" }.to_string());
        Ok(())
    }

    fn toggle(&self) -> led_panel_bridge::Result<()> {
        self.calls.lock().unwrap().push("toggle".to_string());
        Ok(())
    }
}

struct GatedRegistry {
    lamp: Arc<RecordingDevice>,
    ready: AtomicBool,
}

impl DeviceRegistry for GatedRegistry {
    fn resolve_by_name(&self, name: &str) -> Option<Arc<dyn DeviceHandle>> {
        (name == self.lamp.name).then(|| Arc::clone(&self.lamp) as Arc<dyn DeviceHandle>)
    }

    fn ready_for_events(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

fn gated_registry(ready: bool) -> Arc<GatedRegistry> {
    Arc::new(GatedRegistry {
        lamp: Arc::new(RecordingDevice {
            name: "Lamp".to_string(),
            calls: Mutex::new(Vec::new()),
        }),
        ready: AtomicBool::new(ready),
    })
}

#[tokio::test]
async fn queries_led_on_connect_and_tracks_reports() {
    let (listener, port) = listener().await;
    let mut panel = LedPanel::start(config(port).build(), Arc::new(NoDevices));
    let mut events = panel.subscribe();

    let mut fake = FakePanel::accept(&listener).await;
    assert_eq!(fake.next_command().await, "led=?");

    fake.send_line("led=#FF8000").await;
    collect_until(&mut events, is_led(DeviceColor::new(255, 128, 0))).await;

    fake.send_line(r#"{"led":"000000255"}"#).await;
    collect_until(&mut events, is_led(DeviceColor::new(0, 0, 255))).await;

    // Garbage is ignored and the color is kept
    fake.send_line("led=999999999").await;
    fake.send_line("255000000").await;
    collect_until(&mut events, is_led(DeviceColor::new(255, 0, 0))).await;

    panel.shutdown().await.unwrap();
}

#[tokio::test]
async fn press_and_release_is_one_single_press() {
    let (listener, port) = listener().await;
    let mut panel = LedPanel::start(config(port).build(), Arc::new(NoDevices));
    let mut events = panel.subscribe();
    let mut fake = FakePanel::accept(&listener).await;
    fake.next_command().await;

    fake.key(3, 1).await;
    fake.key(3, 1).await;
    fake.key(3, 0).await;
    fake.key(3, 0).await;
    // Marker: lines are processed in order, so everything above is done
    fake.send_line("led=000255000").await;
    let seen = collect_until(&mut events, is_led(DeviceColor::new(0, 255, 0))).await;

    assert_eq!(presses(&seen), vec![(2, PressKind::Single)]);
    panel.shutdown().await.unwrap();
}

#[tokio::test]
async fn cycle_button_advances_one_color_per_press() {
    let (listener, port) = listener().await;
    let mappings = vec![ButtonMapping::led(10, "any", "#123456")];
    let mut panel = LedPanel::start(
        config(port).button_mappings(mappings).build(),
        Arc::new(NoDevices),
    );
    let mut fake = FakePanel::accept(&listener).await;
    assert_eq!(fake.next_command().await, "led=?");

    fake.send_line("led=255000000").await;
    fake.click(10).await;
    assert_eq!(fake.next_command().await, "led=000255000");

    fake.send_line("led=000255000").await;
    fake.click(10).await;
    assert_eq!(fake.next_command().await, "led=000000255");

    // White wraps around to red
    fake.send_line("led=255255255").await;
    fake.click(10).await;
    assert_eq!(fake.next_command().await, "led=255000000");

    panel.shutdown().await.unwrap();
}

#[tokio::test]
async fn mode_selects_mapping() {
    let (listener, port) = listener().await;
    let registry = gated_registry(true);
    let mappings = vec![
        ButtonMapping::device(1, "any", "Lamp", "toggle", None),
        ButtonMapping::device(1, "blue", "Lamp", "off", None),
        ButtonMapping::led(2, "blue", "yellow"),
    ];
    let mut panel = LedPanel::start(
        config(port).button_mappings(mappings).build(),
        registry.clone(),
    );
    let mut events = panel.subscribe();
    let mut fake = FakePanel::accept(&listener).await;
    fake.next_command().await;

    // Dimmed blue still reads as blue under normalized matching
    fake.send_line("led=000000128").await;
    collect_until(&mut events, is_led(DeviceColor::new(0, 0, 128))).await;
    fake.click(1).await;
    fake.click(2).await;
    assert_eq!(fake.next_command().await, "led=255255000");

    fake.click(1).await;
    fake.send_line("led=255255000").await;
    collect_until(&mut events, |e| {
        matches!(e, PanelEvent::ButtonPressed { index: 0, .. })
    })
    .await;

    // LED is now yellow (optimistic), so the wildcard mapping applies
    let mut calls = registry.lamp.calls.lock().unwrap().clone();
    for _ in 0..50 {
        if calls.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        calls = registry.lamp.calls.lock().unwrap().clone();
    }
    assert_eq!(calls, vec!["off", "toggle"]);
    panel.shutdown().await.unwrap();
}

#[tokio::test]
async fn queued_events_flush_in_order_when_ready() {
    let (listener, port) = listener().await;
    let registry = gated_registry(false);
    let mappings = vec![
        ButtonMapping::device(1, "any", "Lamp", "toggle", None),
        ButtonMapping::device(2, "any", "Lamp", "on", None),
    ];
    let mut panel = LedPanel::start(
        config(port).button_mappings(mappings).build(),
        registry.clone(),
    );
    let mut events = panel.subscribe();
    let mut fake = FakePanel::accept(&listener).await;
    fake.next_command().await;

    fake.click(1).await;
    fake.click(2).await;
    fake.send_line("led=255000000").await;
    let seen = collect_until(&mut events, is_led(DeviceColor::new(255, 0, 0))).await;
    assert!(presses(&seen).is_empty());
    assert!(registry.lamp.calls.lock().unwrap().is_empty());

    panel.events_ready().await.unwrap();
    let seen = collect_until(&mut events, |e| {
        matches!(e, PanelEvent::ButtonPressed { index: 1, .. })
    })
    .await;
    assert_eq!(
        presses(&seen),
        vec![(0, PressKind::Single), (1, PressKind::Single)]
    );
    assert_eq!(*registry.lamp.calls.lock().unwrap(), vec!["toggle", "on"]);

    // Once ready, events pass straight through
    fake.click(2).await;
    collect_until(&mut events, |e| {
        matches!(e, PanelEvent::ButtonPressed { index: 1, .. })
    })
    .await;
    assert_eq!(panel.snapshot().await.queued_events, 0);
    panel.shutdown().await.unwrap();
}

#[tokio::test]
async fn reconnects_once_after_close() {
    let (listener, port) = listener().await;
    let mut panel = LedPanel::start(config(port).build(), Arc::new(NoDevices));
    let mut events = panel.subscribe();

    let mut fake = FakePanel::accept(&listener).await;
    fake.next_command().await;
    collect_until(&mut events, |e| *e == PanelEvent::Reachability(true)).await;

    drop(fake);
    let mut fake = FakePanel::accept(&listener).await;
    assert_eq!(fake.next_command().await, "led=?");

    let seen = collect_until(&mut events, |e| *e == PanelEvent::Reachability(true)).await;
    let unreachable = seen
        .iter()
        .filter(|e| **e == PanelEvent::Reachability(false))
        .count();
    let disconnects = seen.iter().filter(|e| **e == PanelEvent::Disconnected).count();
    assert_eq!(unreachable, 1);
    assert_eq!(disconnects, 1);

    panel.shutdown().await.unwrap();
}

#[tokio::test]
async fn quiet_panel_without_keepalive_stays_connected() {
    let (listener, port) = listener().await;
    let mut panel = LedPanel::start(
        config(port).timeout_ms(300).build(),
        Arc::new(NoDevices),
    );
    let mut events = panel.subscribe();
    let mut fake = FakePanel::accept(&listener).await;
    assert_eq!(fake.next_command().await, "led=?");
    collect_until(&mut events, |e| *e == PanelEvent::Reachability(true)).await;

    // Several timeout periods of silence
    tokio::time::sleep(Duration::from_secs(1)).await;
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, PanelEvent::Reachability(false) | PanelEvent::Disconnected),
            "silent panel was dropped: {event:?}"
        );
    }
    assert_eq!(panel.snapshot().await.phase, ConnectionPhase::Connected);
    assert!(
        timeout(Duration::from_millis(100), listener.accept())
            .await
            .is_err()
    );

    // Same connection still delivers
    fake.send_line("led=000255000").await;
    collect_until(&mut events, is_led(DeviceColor::new(0, 255, 0))).await;
    panel.shutdown().await.unwrap();
}

#[tokio::test]
async fn timed_classification_reports_long_double_and_single() {
    let (listener, port) = listener().await;
    let mut panel = LedPanel::start(
        config(port)
            .press_classification(PressClassification::timed())
            .build(),
        Arc::new(NoDevices),
    );
    let mut events = panel.subscribe();
    let mut fake = FakePanel::accept(&listener).await;
    fake.next_command().await;
    let is_press = |e: &PanelEvent| matches!(e, PanelEvent::ButtonPressed { .. });

    // Long press fires from the timer while the button is still held
    fake.key(1, 1).await;
    let seen = collect_until(&mut events, is_press).await;
    assert_eq!(presses(&seen), vec![(0, PressKind::Long)]);
    fake.key(1, 0).await;

    fake.click(3).await;
    fake.click(3).await;
    let seen = collect_until(&mut events, is_press).await;
    assert_eq!(presses(&seen), vec![(2, PressKind::Double)]);

    // A lone click is confirmed once the double-press window passes
    fake.click(2).await;
    let seen = collect_until(&mut events, is_press).await;
    assert_eq!(presses(&seen), vec![(1, PressKind::Single)]);

    // Nothing left over from the long press release
    fake.send_line("led=000000255").await;
    let seen = collect_until(&mut events, is_led(DeviceColor::new(0, 0, 255))).await;
    assert!(presses(&seen).is_empty());

    panel.shutdown().await.unwrap();
}

#[tokio::test]
async fn keepalive_queries_periodically() {
    let (listener, port) = listener().await;
    let mut panel = LedPanel::start(
        config(port).keepalive_interval_ms(100).build(),
        Arc::new(NoDevices),
    );
    let mut fake = FakePanel::accept(&listener).await;
    for _ in 0..3 {
        assert_eq!(fake.next_command().await, "led=?");
    }
    panel.shutdown().await.unwrap();
}

#[tokio::test]
async fn virtual_trigger_pulses() {
    let (listener, port) = listener().await;
    let mappings = vec![ButtonMapping::scene(4, "any", "Movie")];
    let mut panel = LedPanel::start(
        config(port)
            .name("Hall Panel")
            .dispatch_mode(DispatchMode::VirtualTrigger)
            .trigger_reset_delay_ms(50)
            .button_mappings(mappings)
            .build(),
        Arc::new(NoDevices),
    );
    let mut events = panel.subscribe();
    let mut fake = FakePanel::accept(&listener).await;
    fake.next_command().await;

    fake.click(4).await;
    let seen = collect_until(&mut events, |e| {
        matches!(e, PanelEvent::TriggerChanged { active: false, .. })
    })
    .await;
    let triggers: Vec<_> = seen
        .iter()
        .filter_map(|e| match e {
            PanelEvent::TriggerChanged { name, active } => Some((name.as_str(), *active)),
            _ => None,
        })
        .collect();
    assert_eq!(
        triggers,
        vec![("Hall Panel Button 4 any", true), ("Hall Panel Button 4 any", false)]
    );
    panel.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_closes_transport_and_stops_reconnecting() {
    let (listener, port) = listener().await;
    let mut panel = LedPanel::start(config(port).build(), Arc::new(NoDevices));
    let mut events = panel.subscribe();
    let mut fake = FakePanel::accept(&listener).await;
    fake.next_command().await;

    panel.shutdown().await.unwrap();
    collect_until(&mut events, |e| *e == PanelEvent::Shutdown).await;

    let mut chunk = [0u8; 16];
    let n = timeout(WAIT, fake.stream.read(&mut chunk)).await.unwrap().unwrap();
    assert_eq!(n, 0);

    // No new connection attempt follows
    assert!(
        timeout(Duration::from_millis(500), listener.accept())
            .await
            .is_err()
    );
}
