// MIT License - Copyright (c) 2026 Peter Wright
// Connection lifecycle for one panel session

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::color::DeviceColor;
use crate::config::PanelConfig;
use crate::devices::Led;
use crate::error::{PanelError, Result};
use crate::event::{EventSender, PanelEvent};
use crate::protocol::{decode_frame, ButtonEvent, Command, Frame};
use crate::transport::command::CommandWriter;
use crate::transport::direct::DirectTcpTransport;
use crate::transport::{LinkEvent, LinkSender, TransportEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl ConnectionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
        }
    }
}

/// Connection manager.
///
/// Exclusively owns the write half of the transport and the LED color.
/// Every connection attempt gets a fresh session id; link events from older
/// sessions are dropped.
pub struct PanelComm {
    transport: DirectTcpTransport,
    link_tx: LinkSender,
    event_tx: EventSender,
    phase: ConnectionPhase,
    session: u64,
    writer: Option<CommandWriter>,
    reader: Option<JoinHandle<()>>,
    connector: Option<JoinHandle<()>>,
    led: Led,
    keepalive_period: Option<Duration>,
    keepalive: Option<Interval>,
    reconnect_delay: Duration,
    reconnect_at: Option<Instant>,
    shutdown_grace: Duration,
    /// Last reported reachability; `None` until the first outcome.
    reachable: Option<bool>,
    terminated: bool,
    last_error: Option<String>,
    last_unrecognized: Option<String>,
}

impl PanelComm {
    pub fn new(config: &PanelConfig, link_tx: LinkSender, event_tx: EventSender) -> Self {
        let keepalive_period = (config.keepalive_interval_ms > 0)
            .then(|| Duration::from_millis(config.keepalive_interval_ms));
        // Without keepalive queries a healthy panel may stay silent forever
        let idle_timeout = keepalive_period.map(|_| Duration::from_millis(config.timeout_ms));
        let transport = DirectTcpTransport {
            ip: config.ip.clone(),
            port: config.port,
            connect_timeout: Duration::from_millis(config.timeout_ms),
            idle_timeout,
        };

        Self {
            transport,
            link_tx,
            event_tx,
            phase: ConnectionPhase::Disconnected,
            session: 0,
            writer: None,
            reader: None,
            connector: None,
            led: Led::new(config.default_color),
            keepalive_period,
            keepalive: None,
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
            reconnect_at: None,
            shutdown_grace: Duration::from_millis(config.shutdown_grace_ms),
            reachable: None,
            terminated: false,
            last_error: None,
            last_unrecognized: None,
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn is_connected(&self) -> bool {
        self.phase == ConnectionPhase::Connected
    }

    /// True once shutdown has completed; no reconnects happen after this.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn color(&self) -> DeviceColor {
        self.led.color()
    }

    pub fn led(&self) -> &Led {
        &self.led
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn reconnect_at(&self) -> Option<Instant> {
        self.reconnect_at
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn last_unrecognized(&self) -> Option<&str> {
        self.last_unrecognized.as_deref()
    }

    /// Keepalive timer, present only while connected.
    pub fn keepalive_timer(&mut self) -> &mut Option<Interval> {
        &mut self.keepalive
    }

    /// Start a connection attempt unless one is active or we are shutting down.
    pub fn connect(&mut self) {
        if self.terminated || self.phase != ConnectionPhase::Disconnected {
            debug!("connect() ignored in phase {}", self.phase.as_str());
            return;
        }
        let session = self.begin_session();
        self.connector = Some(self.transport.spawn_connect(session, self.link_tx.clone()));
    }

    fn begin_session(&mut self) -> u64 {
        self.session += 1;
        self.phase = ConnectionPhase::Connecting;
        self.reconnect_at = None;
        debug!("Starting connection session {}", self.session);
        self.session
    }

    /// Called when the reconnect deadline has passed.
    pub fn reconnect_due(&mut self) {
        if self.reconnect_at.take().is_some() {
            info!("Reconnecting to panel");
            self.connect();
        }
    }

    /// Feed a link event into the state machine.
    ///
    /// Returns decoded button events for the caller to route through the
    /// event queue; everything else is handled here.
    pub async fn handle_link(&mut self, event: LinkEvent) -> Vec<ButtonEvent> {
        if event.session() != self.session {
            debug!("Dropping event from stale session {}", event.session());
            if let LinkEvent::Established { reader, .. } = event {
                reader.abort();
            }
            return Vec::new();
        }

        match event {
            LinkEvent::Established { writer, reader, .. } => {
                self.on_established(writer, reader).await;
                Vec::new()
            }
            LinkEvent::Failed { error, .. } => {
                self.on_lost(error.to_string());
                Vec::new()
            }
            LinkEvent::Transport { event, .. } => match event {
                TransportEvent::Data(line) => self.on_data(&line),
                TransportEvent::Closed => {
                    self.on_lost("connection closed by panel".to_string());
                    Vec::new()
                }
                TransportEvent::Error(e) => {
                    self.on_lost(e);
                    Vec::new()
                }
                TransportEvent::TimedOut => {
                    self.on_lost(PanelError::IdleTimeout {
                        ms: self
                            .transport
                            .idle_timeout
                            .map_or(0, |limit| limit.as_millis() as u64),
                    }
                    .to_string());
                    Vec::new()
                }
            },
        }
    }

    async fn on_established(&mut self, writer: CommandWriter, reader: JoinHandle<()>) {
        self.connector = None;
        if self.phase != ConnectionPhase::Connecting {
            debug!("Connection established in phase {}, dropping it", self.phase.as_str());
            reader.abort();
            return;
        }

        info!("Connected to panel at {}:{}", self.transport.ip, self.transport.port);
        self.writer = Some(writer);
        self.reader = Some(reader);
        self.phase = ConnectionPhase::Connected;
        self.last_error = None;
        self.keepalive = self.keepalive_period.map(|period| {
            let mut timer = interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer
        });

        let _ = self.event_tx.send(PanelEvent::Connected);
        self.set_reachable(true);

        if let Err(e) = self.query_led().await {
            warn!("Initial LED query failed: {}", e);
        }
    }

    fn on_data(&mut self, line: &[u8]) -> Vec<ButtonEvent> {
        let text = String::from_utf8_lossy(line);
        match decode_frame(&text) {
            Frame::LedReport(color) => {
                debug!("LED report: {}", color);
                if let Some(state) = self.led.apply_report(color) {
                    let _ = self.event_tx.send(PanelEvent::LightStateChanged(state));
                }
                Vec::new()
            }
            Frame::ButtonEvents(events) => events,
            Frame::Unrecognized(raw) => {
                debug!("Ignoring unrecognized data: {:?}", raw);
                self.last_unrecognized = Some(raw);
                Vec::new()
            }
        }
    }

    /// Transport failure or close. Schedules exactly one reconnect.
    fn on_lost(&mut self, reason: String) {
        match self.phase {
            ConnectionPhase::Closing => return,
            ConnectionPhase::Disconnected => {
                debug!("Ignoring loss while already disconnected: {}", reason);
                return;
            }
            ConnectionPhase::Connecting | ConnectionPhase::Connected => {}
        }

        let was_connected = self.phase == ConnectionPhase::Connected;
        warn!("Panel connection lost: {}", reason);
        self.phase = ConnectionPhase::Disconnected;
        self.last_error = Some(reason);
        self.keepalive = None;
        self.writer = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.connector = None;

        if was_connected {
            let _ = self.event_tx.send(PanelEvent::Disconnected);
        }
        self.set_reachable(false);

        if self.reconnect_at.is_none() {
            info!("Reconnecting in {:?}", self.reconnect_delay);
            self.reconnect_at = Some(Instant::now() + self.reconnect_delay);
        }
    }

    fn set_reachable(&mut self, reachable: bool) {
        if self.reachable != Some(reachable) {
            self.reachable = Some(reachable);
            let _ = self.event_tx.send(PanelEvent::Reachability(reachable));
        }
    }

    async fn send(&mut self, command: Command) -> Result<()> {
        if self.phase != ConnectionPhase::Connected {
            debug!("Not connected, dropping {}", command.to_wire_string());
            return Err(PanelError::Disconnected);
        }
        let Some(writer) = self.writer.as_mut() else {
            return Err(PanelError::Disconnected);
        };
        if let Err(e) = writer.send(&command).await {
            self.on_lost(e.to_string());
            return Err(e);
        }
        Ok(())
    }

    /// Send a set command and record the color ahead of confirmation.
    ///
    /// Returns `Disconnected` without writing when not connected.
    pub async fn set_led(&mut self, color: DeviceColor) -> Result<()> {
        self.send(Command::SetLed(color)).await?;
        info!("LED set to {}", color);
        if let Some(state) = self.led.set_optimistic(color) {
            let _ = self.event_tx.send(PanelEvent::LightStateChanged(state));
        }
        Ok(())
    }

    /// Ask the panel for its LED color. The reply arrives as a link event.
    pub async fn query_led(&mut self) -> Result<()> {
        self.send(Command::QueryLed).await
    }

    pub async fn keepalive(&mut self) {
        if let Err(e) = self.query_led().await {
            debug!("Keepalive query skipped: {}", e);
        }
    }

    /// Stop for good: cancel timers, give in-flight writes the grace period,
    /// release the transport.
    pub async fn shutdown(&mut self) {
        if self.terminated {
            return;
        }
        info!("Shutting down panel connection");
        let was_connected = self.phase == ConnectionPhase::Connected;
        self.phase = ConnectionPhase::Closing;
        self.keepalive = None;
        self.reconnect_at = None;
        if let Some(connector) = self.connector.take() {
            connector.abort();
        }

        if let Some(writer) = self.writer.take() {
            writer.close(self.shutdown_grace).await;
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }

        self.phase = ConnectionPhase::Disconnected;
        self.terminated = true;
        if was_connected {
            let _ = self.event_tx.send(PanelEvent::Disconnected);
        }
        let _ = self.event_tx.send(PanelEvent::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{event_channel, EventReceiver};
    use crate::transport::{link_channel, LinkReceiver};
    use tokio::io::{AsyncReadExt, DuplexStream};

    fn comm() -> (PanelComm, LinkReceiver, EventReceiver) {
        let config = PanelConfig::builder()
            .ip("127.0.0.1")
            .reconnect_delay_ms(5_000)
            .build();
        let (link_tx, link_rx) = link_channel(16);
        let (event_tx, event_rx) = event_channel(64);
        (PanelComm::new(&config, link_tx, event_tx), link_rx, event_rx)
    }

    async fn establish(comm: &mut PanelComm) -> DuplexStream {
        let session = comm.begin_session();
        let (client, server) = tokio::io::duplex(256);
        let reader = tokio::spawn(async {});
        comm.handle_link(LinkEvent::Established {
            session,
            writer: CommandWriter::new(client),
            reader,
        })
        .await;
        server
    }

    fn drain(rx: &mut EventReceiver) -> Vec<PanelEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    async fn read_some(server: &mut DuplexStream) -> String {
        let mut buf = [0u8; 64];
        let n = server.read(&mut buf).await.unwrap();
        String::from_utf8_lossy(&buf[..n]).to_string()
    }

    #[test]
    fn test_idle_timeout_follows_keepalive() {
        let (link_tx, _link_rx) = link_channel(1);
        let (event_tx, _event_rx) = event_channel(1);
        let config = PanelConfig::builder().timeout_ms(300).build();
        let comm = PanelComm::new(&config, link_tx.clone(), event_tx.clone());
        assert_eq!(comm.transport.idle_timeout, Some(Duration::from_millis(300)));

        let quiet = PanelConfig::builder()
            .timeout_ms(300)
            .keepalive_interval_ms(0)
            .build();
        let comm = PanelComm::new(&quiet, link_tx, event_tx);
        assert_eq!(comm.transport.idle_timeout, None);
        assert_eq!(comm.transport.connect_timeout, Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_established_queries_led() {
        let (mut comm, _link_rx, mut events) = comm();
        let mut server = establish(&mut comm).await;
        assert_eq!(comm.phase(), ConnectionPhase::Connected);
        assert!(comm.keepalive_timer().is_some());
        assert_eq!(read_some(&mut server).await, "\rled=?\r");
        assert_eq!(
            drain(&mut events),
            vec![PanelEvent::Connected, PanelEvent::Reachability(true)]
        );
    }

    #[tokio::test]
    async fn test_led_report_updates_color() {
        let (mut comm, _link_rx, mut events) = comm();
        let _server = establish(&mut comm).await;
        drain(&mut events);

        let session = comm.session();
        let buttons = comm
            .handle_link(LinkEvent::Transport {
                session,
                event: TransportEvent::Data(b"led=#0000FF".to_vec()),
            })
            .await;
        assert!(buttons.is_empty());
        assert_eq!(comm.color(), DeviceColor::new(0, 0, 255));
        assert!(matches!(
            drain(&mut events).as_slice(),
            [PanelEvent::LightStateChanged(state)] if state.hue == 240
        ));
    }

    #[tokio::test]
    async fn test_button_events_returned_and_garbage_kept() {
        let (mut comm, _link_rx, _events) = comm();
        let _server = establish(&mut comm).await;
        let session = comm.session();

        let buttons = comm
            .handle_link(LinkEvent::Transport {
                session,
                event: TransportEvent::Data(br#"{"events":[{"label":"Key 3","state":"1"}]}"#.to_vec()),
            })
            .await;
        assert_eq!(buttons, vec![ButtonEvent { index: 2, state: 1 }]);

        comm.handle_link(LinkEvent::Transport {
            session,
            event: TransportEvent::Data(b"hello".to_vec()),
        })
        .await;
        assert_eq!(comm.last_unrecognized(), Some("hello"));
        assert_eq!(comm.color(), DeviceColor::WHITE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loss_schedules_single_reconnect() {
        let (mut comm, _link_rx, mut events) = comm();
        let _server = establish(&mut comm).await;
        drain(&mut events);
        let session = comm.session();

        let before = Instant::now();
        comm.handle_link(LinkEvent::Transport {
            session,
            event: TransportEvent::Error("reset by peer".to_string()),
        })
        .await;
        comm.handle_link(LinkEvent::Transport {
            session,
            event: TransportEvent::Closed,
        })
        .await;

        assert_eq!(comm.phase(), ConnectionPhase::Disconnected);
        assert!(comm.keepalive_timer().is_none());
        assert_eq!(comm.last_error(), Some("reset by peer"));
        assert_eq!(comm.reconnect_at(), Some(before + Duration::from_millis(5_000)));
        assert_eq!(
            drain(&mut events),
            vec![PanelEvent::Disconnected, PanelEvent::Reachability(false)]
        );
    }

    #[tokio::test]
    async fn test_failed_connect_reports_unreachable_once() {
        let (mut comm, _link_rx, mut events) = comm();
        for _ in 0..2 {
            let session = comm.begin_session();
            comm.handle_link(LinkEvent::Failed {
                session,
                error: PanelError::ConnectionTimeout,
            })
            .await;
        }
        assert_eq!(drain(&mut events), vec![PanelEvent::Reachability(false)]);
        assert!(comm.reconnect_at().is_some());
    }

    #[tokio::test]
    async fn test_stale_session_ignored() {
        let (mut comm, _link_rx, mut events) = comm();
        let _server = establish(&mut comm).await;
        drain(&mut events);
        let stale = comm.session() - 1;
        comm.handle_link(LinkEvent::Transport {
            session: stale,
            event: TransportEvent::Closed,
        })
        .await;
        assert_eq!(comm.phase(), ConnectionPhase::Connected);
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn test_set_led_requires_connection() {
        let (mut comm, _link_rx, mut events) = comm();
        let err = comm.set_led(DeviceColor::new(255, 0, 0)).await.unwrap_err();
        assert!(matches!(err, PanelError::Disconnected));
        assert_eq!(comm.color(), DeviceColor::WHITE);
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn test_set_led_writes_and_updates_optimistically() {
        let (mut comm, _link_rx, mut events) = comm();
        let mut server = establish(&mut comm).await;
        read_some(&mut server).await;
        drain(&mut events);

        comm.set_led(DeviceColor::new(255, 128, 0)).await.unwrap();
        assert_eq!(read_some(&mut server).await, "\rled=255128000\r");
        assert_eq!(comm.color(), DeviceColor::new(255, 128, 0));
        assert_eq!(drain(&mut events).len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_is_terminal() {
        let (mut comm, _link_rx, mut events) = comm();
        let _server = establish(&mut comm).await;
        drain(&mut events);

        comm.shutdown().await;
        assert!(comm.is_terminated());
        assert_eq!(comm.phase(), ConnectionPhase::Disconnected);
        assert!(comm.reconnect_at().is_none());
        assert_eq!(
            drain(&mut events),
            vec![PanelEvent::Disconnected, PanelEvent::Shutdown]
        );

        comm.connect();
        assert_eq!(comm.phase(), ConnectionPhase::Disconnected);
        assert!(comm.query_led().await.is_err());
    }
}
