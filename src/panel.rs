// MIT License - Copyright (c) 2026 Peter Wright
// Public panel handle and the session task behind it

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant, Interval};
use tracing::{debug, info, warn};

use crate::color::{DeviceColor, ModeTable};
use crate::comm::{ConnectionPhase, PanelComm};
use crate::config::PanelConfig;
use crate::devices::{ButtonBank, LightState, PressKind};
use crate::dispatch::{perform_device_action, perform_scene, pulse_trigger, Dispatcher, Effect};
use crate::error::{PanelError, Result};
use crate::event::{event_channel, EventReceiver, EventSender, PanelEvent};
use crate::protocol::ButtonEvent;
use crate::queue::{EventQueue, QueuedEvent};
use crate::registry::DeviceRegistry;
use crate::transport::{link_channel, LinkReceiver};

/// Point-in-time view of the session, for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelSnapshot {
    pub phase: ConnectionPhase,
    pub color: DeviceColor,
    /// Classified mode of `color`.
    pub mode: String,
    pub light: LightState,
    pub last_error: Option<String>,
    /// Last line that did not decode to a frame.
    pub last_unrecognized: Option<String>,
    pub queued_events: usize,
    pub events_ready: bool,
}

enum Request {
    SetLed {
        color: DeviceColor,
        reply: oneshot::Sender<Result<()>>,
    },
    QueryLed {
        reply: oneshot::Sender<Result<()>>,
    },
    EventsReady,
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running LED panel session.
///
/// All state lives in a single background task; this handle only sends it
/// requests. Dropping the handle shuts the session down.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use led_panel_bridge::{LedPanel, NoDevices, PanelConfig, PanelEvent};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = PanelConfig::builder()
///         .ip("192.168.2.12")
///         .name("Hall Panel")
///         .build();
///
///     let mut panel = LedPanel::start(config, Arc::new(NoDevices));
///
///     let mut events = panel.subscribe();
///     tokio::spawn(async move {
///         while let Ok(event) = events.recv().await {
///             if let PanelEvent::ButtonPressed { index, kind } = event {
///                 println!("Button {} {}", index + 1, kind);
///             }
///         }
///     });
///
///     panel.set_mode("blue").await?;
///
///     tokio::signal::ctrl_c().await?;
///     panel.shutdown().await?;
///     Ok(())
/// }
/// ```
pub struct LedPanel {
    request_tx: mpsc::Sender<Request>,
    event_tx: EventSender,
    snapshot: Arc<RwLock<PanelSnapshot>>,
    mode_table: ModeTable,
    task: Option<JoinHandle<()>>,
}

impl LedPanel {
    /// Spawn the session task and start connecting.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: PanelConfig, registry: Arc<dyn DeviceRegistry>) -> Self {
        let (event_tx, _event_rx) = event_channel(256);
        let (link_tx, link_rx) = link_channel(64);
        let (request_tx, request_rx) = mpsc::channel(32);

        let comm = PanelComm::new(&config, link_tx, event_tx.clone());
        let dispatcher = Dispatcher::new(&config);
        let initial = PanelSnapshot {
            phase: comm.phase(),
            color: comm.color(),
            mode: dispatcher.classify(comm.color()).to_string(),
            light: comm.led().light_state(),
            last_error: None,
            last_unrecognized: None,
            queued_events: 0,
            events_ready: false,
        };
        let snapshot = Arc::new(RwLock::new(initial));

        let session = Session {
            comm,
            buttons: ButtonBank::new(config.press_classification),
            queue: EventQueue::new(),
            dispatcher,
            registry,
            event_tx: event_tx.clone(),
            trigger_reset_delay: Duration::from_millis(config.trigger_reset_delay_ms),
            snapshot: Arc::clone(&snapshot),
        };
        info!("Starting panel session '{}' for {}:{}", config.name, config.ip, config.port);
        let task = tokio::spawn(session.run(request_rx, link_rx));

        Self {
            request_tx,
            event_tx,
            snapshot,
            mode_table: config.mode_table,
            task: Some(task),
        }
    }

    /// Subscribe to panel events.
    pub fn subscribe(&self) -> EventReceiver {
        self.event_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Set the LED color. Fails with `Disconnected` while not connected.
    pub async fn set_led(&self, color: DeviceColor) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(Request::SetLed { color, reply }).await?;
        rx.await.map_err(|_| PanelError::ChannelClosed)?
    }

    /// Set the LED to the canonical color of a named mode.
    pub async fn set_mode(&self, name: &str) -> Result<()> {
        let color = self.mode_table.get(name).ok_or_else(|| PanelError::UnknownMode {
            name: name.to_string(),
        })?;
        self.set_led(color).await
    }

    /// Ask the panel for its LED color; the answer arrives as an event.
    pub async fn query_led(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(Request::QueryLed { reply }).await?;
        rx.await.map_err(|_| PanelError::ChannelClosed)?
    }

    /// Signal that the consumer is ready; queued button events are replayed.
    pub async fn events_ready(&self) -> Result<()> {
        self.request(Request::EventsReady).await
    }

    pub async fn snapshot(&self) -> PanelSnapshot {
        self.snapshot.read().await.clone()
    }

    /// Stop the session: no reconnects, transport released after the grace
    /// period. Calling it again is a no-op.
    pub async fn shutdown(&mut self) -> Result<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        let (reply, done) = oneshot::channel();
        if self.request(Request::Shutdown { reply }).await.is_ok() {
            let _ = done.await;
        }
        if let Err(e) = task.await {
            warn!("Panel session task ended abnormally: {}", e);
        }
        Ok(())
    }

    async fn request(&self, request: Request) -> Result<()> {
        self.request_tx
            .send(request)
            .await
            .map_err(|_| PanelError::ChannelClosed)
    }
}

/// State owned by the session task.
struct Session {
    comm: PanelComm,
    buttons: ButtonBank,
    queue: EventQueue,
    dispatcher: Dispatcher,
    registry: Arc<dyn DeviceRegistry>,
    event_tx: EventSender,
    trigger_reset_delay: Duration,
    snapshot: Arc<RwLock<PanelSnapshot>>,
}

impl Session {
    async fn run(mut self, mut requests: mpsc::Receiver<Request>, mut link_rx: LinkReceiver) {
        self.comm.connect();
        self.publish().await;

        loop {
            let reconnect_at = self.comm.reconnect_at();
            let button_deadline = self.buttons.next_deadline();

            tokio::select! {
                request = requests.recv() => match request {
                    Some(Request::Shutdown { reply }) => {
                        self.comm.shutdown().await;
                        self.publish().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(request) => self.handle_request(request).await,
                    None => {
                        debug!("Panel handle dropped");
                        self.comm.shutdown().await;
                        self.publish().await;
                        break;
                    }
                },
                Some(link) = link_rx.recv() => {
                    let events = self.comm.handle_link(link).await;
                    if !events.is_empty() {
                        self.on_button_events(events).await;
                    }
                }
                _ = tick_opt(self.comm.keepalive_timer()) => {
                    self.comm.keepalive().await;
                }
                _ = sleep_until_opt(reconnect_at) => {
                    self.comm.reconnect_due();
                }
                _ = sleep_until_opt(button_deadline) => {
                    for (index, kind) in self.buttons.poll_timers(Instant::now()) {
                        self.on_press(index, kind).await;
                    }
                }
            }

            self.publish().await;
        }
        info!("Panel session stopped");
    }

    async fn handle_request(&mut self, request: Request) {
        match request {
            Request::SetLed { color, reply } => {
                let _ = reply.send(self.comm.set_led(color).await);
            }
            Request::QueryLed { reply } => {
                let _ = reply.send(self.comm.query_led().await);
            }
            Request::EventsReady => self.flush_queue().await,
            Request::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    async fn on_button_events(&mut self, events: Vec<ButtonEvent>) {
        let now = Instant::now();
        if !self.queue.is_ready() && self.registry.ready_for_events() {
            self.flush_queue().await;
        }
        for event in events {
            if let Some(queued) = self.queue.offer(event, now) {
                self.process(queued).await;
            }
        }
    }

    async fn flush_queue(&mut self) {
        let queued = self.queue.mark_ready();
        if !queued.is_empty() {
            info!("Consumer ready, replaying {} queued button events", queued.len());
        }
        for event in queued {
            self.process(event).await;
        }
    }

    async fn process(&mut self, queued: QueuedEvent) {
        let index = queued.event.index;
        for kind in self.buttons.handle(queued.event, queued.received_at) {
            self.on_press(index, kind).await;
        }
    }

    /// Notify the press outward; single presses are also dispatched.
    async fn on_press(&mut self, index: usize, kind: PressKind) {
        info!("Button {}: {} press", index + 1, kind);
        let _ = self.event_tx.send(PanelEvent::ButtonPressed { index, kind });
        if kind != PressKind::Single {
            return;
        }
        let Ok(number) = u8::try_from(index + 1) else {
            return;
        };
        if let Some(effect) = self.dispatcher.resolve(number, self.comm.color()) {
            self.apply(effect).await;
        }
    }

    async fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::SetLed(color) => {
                if let Err(e) = self.comm.set_led(color).await {
                    warn!("LED action for {} not applied: {}", color, e);
                }
            }
            Effect::Device { target, action } => {
                perform_device_action(self.registry.as_ref(), &target, action);
            }
            Effect::Http(request) => {
                self.dispatcher.spawn_http(request);
            }
            Effect::Scene(scene) => perform_scene(self.registry.as_ref(), &scene),
            Effect::Trigger(name) => {
                pulse_trigger(&self.event_tx, name, self.trigger_reset_delay);
            }
        }
    }

    async fn publish(&self) {
        let color = self.comm.color();
        let snapshot = PanelSnapshot {
            phase: self.comm.phase(),
            color,
            mode: self.dispatcher.classify(color).to_string(),
            light: self.comm.led().light_state(),
            last_error: self.comm.last_error().map(str::to_string),
            last_unrecognized: self.comm.last_unrecognized().map(str::to_string),
            queued_events: self.queue.len(),
            events_ready: self.queue.is_ready(),
        };
        *self.snapshot.write().await = snapshot;
    }
}

async fn tick_opt(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
