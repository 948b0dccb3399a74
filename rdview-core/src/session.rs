//! Session display controller.
//!
//! Drives one remote-desktop viewing session bound to one viewport:
//! opens the tunnel, attaches the display client's surface, keeps it
//! scaled while the viewport or the remote display changes size, and
//! tears everything down in a fixed order.
//!
//! ```text
//!  Idle ──start──► Connecting ──tunnel open──► Active
//!   ▲                  │                         │
//!   │                  └──── async error ────────┴──► Failed
//!   └────────────────────────── stop ◄───────────────────┘
//! ```
//!
//! All work happens on the owner's task: [`SessionController::start`] and
//! [`SessionController::stop`] are synchronous, and
//! [`SessionController::next_event`] is the single pump through which
//! tunnel events, resize notifications and keep-alives are processed, in
//! the order they arrive.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::display::{DisplayClient, DisplaySize, DisplayUpdate, Surface};
use crate::error::ConnectionError;
use crate::params::ConnectionParameters;
use crate::protocol::Status;
use crate::transport::{TransportChannel, TransportConnector, TransportEvent};
use crate::viewport::{ResizeSubscription, Viewport, ViewportSize, compute_scale};

// ── Public types ─────────────────────────────────────────────────

/// Controller lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    /// `start` accepted; the tunnel is not open yet.
    Connecting,
    Active,
    /// Ended by a transport or protocol error. Only `stop` helps.
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Active => write!(f, "Active"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// What [`SessionController::next_event`] reports.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The gateway opened the tunnel.
    Connected { uuid: String },
    /// The remote display changed its logical size. `scale` is the factor
    /// applied as a result, if the viewport allowed computing one.
    DisplayResized { size: DisplaySize, scale: Option<f64> },
    /// The viewport changed size and the surface was rescaled.
    Rescaled(f64),
    /// The session ended with an error. The last frame stays attached.
    Failed(ConnectionError),
}

/// Tuning for the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    /// Minimum spacing between two viewport-driven rescales. Resize
    /// notifications arriving faster are coalesced into one. Zero
    /// rescales on every notification.
    pub frame_interval: Duration,
}

impl ControllerSettings {
    /// No pacing: every notification is applied as it arrives.
    pub const fn immediate() -> Self {
        Self {
            frame_interval: Duration::ZERO,
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(16),
        }
    }
}

// ── ActiveSession ────────────────────────────────────────────────

/// Network side of a session: the display client over its transport and
/// the transport's event stream.
struct Link {
    client: DisplayClient,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Link {
    /// Say goodbye, release the client, then close and release the
    /// transport. Whatever the tunnel reports afterwards is discarded.
    fn close(self) {
        let Link { mut client, events } = self;
        client.disconnect();
        let mut transport = client.into_transport();
        transport.disconnect();
        drop(transport);
        drop(events);
    }
}

/// Everything one started session owns.
struct ActiveSession {
    surface: Surface,
    /// `None` once the session failed; the surface stays until `stop`.
    link: Option<Link>,
    viewport: Arc<dyn Viewport>,
    resize: ResizeSubscription,
    resize_open: bool,
    resize_pending: bool,
    last_rescale: Option<Instant>,
}

impl ActiveSession {
    /// Recompute and apply the scale for `viewport`. `None` when the
    /// display size is not known yet.
    fn rescale(&mut self, viewport: ViewportSize) -> Option<f64> {
        self.resize_pending = false;
        let Some(scale) = compute_scale(viewport, self.surface.size()) else {
            trace!("display size unknown; rescale skipped");
            return None;
        };
        self.surface.apply_scale(scale);
        self.last_rescale = Some(Instant::now());
        Some(scale)
    }

    /// When a pending viewport rescale may run.
    fn repaint_at(&self, frame_interval: Duration) -> Option<Instant> {
        if !self.resize_pending {
            return None;
        }
        Some(match self.last_rescale {
            Some(at) => at + frame_interval,
            None => Instant::now(),
        })
    }
}

/// Why the pump woke up.
enum Wake {
    Transport(Option<TransportEvent>),
    ViewportResized(Option<ViewportSize>),
    Repaint,
    KeepAlive,
}

// ── SessionController ────────────────────────────────────────────

/// Owns at most one session at a time.
///
/// Dropping the controller stops the session.
pub struct SessionController {
    connector: Arc<dyn TransportConnector>,
    settings: ControllerSettings,
    state: SessionState,
    session: Option<ActiveSession>,
    last_error: Option<ConnectionError>,
}

impl SessionController {
    pub fn new(connector: Arc<dyn TransportConnector>) -> Self {
        Self {
            connector,
            settings: ControllerSettings::default(),
            state: SessionState::Idle,
            session: None,
            last_error: None,
        }
    }

    pub fn with_settings(mut self, settings: ControllerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Error that moved the session to `Failed`, until the next `start`.
    pub fn last_error(&self) -> Option<&ConnectionError> {
        self.last_error.as_ref()
    }

    /// Surface of the current session.
    pub fn surface(&self) -> Option<&Surface> {
        self.session.as_ref().map(|s| &s.surface)
    }

    /// Logical size of the remote display of the current session.
    pub fn display_size(&self) -> Option<DisplaySize> {
        self.session.as_ref().map(|s| s.surface.size())
    }

    /// Start a session shown in `viewport`.
    ///
    /// A session that is still around is stopped first. `Ok` means the
    /// connection was initiated, not that it is established; the outcome
    /// arrives through [`next_event`](Self::next_event).
    pub fn start(
        &mut self,
        params: &ConnectionParameters,
        viewport: Arc<dyn Viewport>,
    ) -> Result<(), ConnectionError> {
        if self.session.is_some() {
            debug!(state = %self.state, "replacing running session");
            self.stop();
        }
        self.last_error = None;

        let url = params.tunnel_url()?;
        info!(
            gateway = %params.gateway.host,
            connection = %params.connection_id,
            width = params.width,
            height = params.height,
            "starting session"
        );

        let TransportChannel { transport, events } = self.connector.open(&url)?;
        let mut client = DisplayClient::new(transport);
        client.connect()?;

        let surface = client.surface().clone();
        viewport.detach();
        viewport.attach(surface.clone());

        let resize = viewport.subscribe_resize();
        let mut session = ActiveSession {
            surface,
            link: Some(Link { client, events }),
            viewport,
            resize,
            resize_open: true,
            resize_pending: false,
            last_rescale: None,
        };
        session.rescale(session.viewport.client_size());

        self.session = Some(session);
        self.state = SessionState::Connecting;
        Ok(())
    }

    /// Tear the session down. Safe to call in any state, any number of
    /// times. Does not wait for the network.
    pub fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            self.state = SessionState::Idle;
            return;
        };
        let ActiveSession {
            link,
            viewport,
            resize,
            ..
        } = session;

        // A failed session already closed its link.
        if let Some(link) = link {
            link.close();
        }
        resize.release();
        viewport.detach();

        self.state = SessionState::Idle;
        info!("session stopped");
    }

    /// Process session activity until something worth reporting happens.
    ///
    /// Returns `None` right away when there is no live session (`Idle` or
    /// `Failed`).
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            if !matches!(self.state, SessionState::Connecting | SessionState::Active) {
                return None;
            }
            let frame_interval = self.settings.frame_interval;
            let session = self.session.as_mut()?;

            let repaint_at = session.repaint_at(frame_interval);
            let resize_open = session.resize_open;
            let ActiveSession { link, resize, .. } = session;
            let link = link.as_mut()?;
            let keep_alive_at = link.client.keep_alive_deadline();

            let wake = tokio::select! {
                event = link.events.recv() => Wake::Transport(event),
                size = resize.changed(), if resize_open => Wake::ViewportResized(size),
                _ = sleep_until_opt(repaint_at), if repaint_at.is_some() => Wake::Repaint,
                _ = sleep_until_opt(keep_alive_at), if keep_alive_at.is_some() => Wake::KeepAlive,
            };

            if let Some(event) = self.on_wake(wake) {
                return Some(event);
            }
        }
    }

    fn on_wake(&mut self, wake: Wake) -> Option<SessionEvent> {
        match wake {
            Wake::Transport(Some(event)) => self.on_transport_event(event),
            Wake::Transport(None) => Some(self.fail(ConnectionError::transport(
                Status::ResourceClosed,
                "tunnel ended without a reason",
            ))),
            Wake::ViewportResized(None) => {
                debug!("viewport stopped reporting resizes");
                if let Some(session) = self.session.as_mut() {
                    session.resize_open = false;
                }
                None
            }
            Wake::ViewportResized(Some(size)) => {
                let interval = self.settings.frame_interval;
                let session = self.session.as_mut()?;
                session.resize_pending = true;
                let due = session.repaint_at(interval)?;
                if due > Instant::now() {
                    // Coalesce with whatever else arrives before the frame.
                    return None;
                }
                session.rescale(size).map(SessionEvent::Rescaled)
            }
            Wake::Repaint => {
                let session = self.session.as_mut()?;
                let size = session.resize.latest();
                session.rescale(size).map(SessionEvent::Rescaled)
            }
            Wake::KeepAlive => {
                let result = self.session.as_mut()?.link.as_mut()?.client.keep_alive();
                result.err().map(|e| self.fail(e))
            }
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) -> Option<SessionEvent> {
        match event {
            TransportEvent::Opened { uuid } => {
                self.session.as_mut()?.link.as_mut()?.client.tunnel_opened();
                if self.state != SessionState::Connecting {
                    return None;
                }
                self.state = SessionState::Active;
                info!(%uuid, "session connected");
                Some(SessionEvent::Connected { uuid })
            }
            TransportEvent::Instruction(instruction) => {
                let session = self.session.as_mut()?;
                let update = session.link.as_mut()?.client.handle_instruction(&instruction);
                match update {
                    Ok(Some(DisplayUpdate::Resized(size))) => {
                        let scale = session.rescale(session.viewport.client_size());
                        Some(SessionEvent::DisplayResized { size, scale })
                    }
                    Ok(Some(DisplayUpdate::Frame(_)) | None) => None,
                    Err(e) => Some(self.fail(e)),
                }
            }
            TransportEvent::Failed(e) => Some(self.fail(e)),
            TransportEvent::Closed(status) => {
                let status = if status.is_error() {
                    status
                } else {
                    Status::SessionClosed
                };
                Some(self.fail(ConnectionError::transport(
                    status,
                    "gateway closed the tunnel",
                )))
            }
        }
    }

    /// Mark the session failed and close its link. The surface stays
    /// attached and the resize subscription held until `stop`.
    fn fail(&mut self, error: ConnectionError) -> SessionEvent {
        warn!(state = %self.state, "session failed: {error}");
        if let Some(link) = self.session.as_mut().and_then(|s| s.link.take()) {
            link.close();
            debug!("link closed after failure");
        }
        self.state = SessionState::Failed;
        self.last_error = Some(error.clone());
        SessionEvent::Failed(error)
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{AuthToken, GatewayEndpoint, TunnelScheme};
    use crate::protocol::Instruction;
    use crate::transport::{JournalEntry, MemoryConnector};
    use crate::viewport::MemoryViewport;

    fn params() -> ConnectionParameters {
        ConnectionParameters::new(
            GatewayEndpoint::new(TunnelScheme::Ws, "gw:8080", "/guacamole/websocket-tunnel"),
            AuthToken::new("secret"),
            "postgresql",
            "1",
        )
    }

    fn setup(width: u32, height: u32) -> (SessionController, MemoryConnector, Arc<MemoryViewport>) {
        let connector = MemoryConnector::new();
        let controller = SessionController::new(Arc::new(connector.clone()))
            .with_settings(ControllerSettings::immediate());
        (controller, connector, Arc::new(MemoryViewport::new(width, height)))
    }

    async fn next(controller: &mut SessionController) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(2), controller.next_event())
            .await
            .expect("timeout")
            .expect("no event")
    }

    async fn quiet(controller: &mut SessionController) -> bool {
        tokio::time::timeout(Duration::from_millis(100), controller.next_event())
            .await
            .is_err()
    }

    fn size(width: u32, height: u32) -> Instruction {
        Instruction::new("size", ["0".to_string(), width.to_string(), height.to_string()])
    }

    #[tokio::test]
    async fn start_attaches_surface_and_connects() {
        let (mut ctl, connector, viewport) = setup(800, 600);
        ctl.start(&params(), viewport.clone()).unwrap();
        assert_eq!(ctl.state(), SessionState::Connecting);
        assert_eq!(viewport.attached().len(), 1);
        assert_eq!(viewport.hub().listener_count(), 1);

        let gateway = connector.last().unwrap();
        assert!(gateway.url().as_str().contains("GUAC_ID=1"));
        gateway.open("tunnel-1");
        assert_eq!(
            next(&mut ctl).await,
            SessionEvent::Connected {
                uuid: "tunnel-1".into()
            }
        );
        assert_eq!(ctl.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn negotiated_display_size_sets_scale() {
        let (mut ctl, connector, viewport) = setup(800, 600);
        ctl.start(&params(), viewport.clone()).unwrap();
        let gateway = connector.last().unwrap();
        gateway.open("t");
        gateway.instruction(size(1024, 768));

        next(&mut ctl).await;
        assert_eq!(
            next(&mut ctl).await,
            SessionEvent::DisplayResized {
                size: DisplaySize::new(1024, 768),
                scale: Some(0.78125)
            }
        );
        assert_eq!(viewport.attached()[0].scale(), 0.78125);
    }

    #[tokio::test]
    async fn viewport_resize_rescales_without_teardown() {
        let (mut ctl, connector, viewport) = setup(800, 600);
        ctl.start(&params(), viewport.clone()).unwrap();
        let gateway = connector.last().unwrap();
        gateway.open("t");
        gateway.instruction(size(1024, 768));
        next(&mut ctl).await;
        next(&mut ctl).await;

        viewport.resize(1600, 900);
        assert_eq!(next(&mut ctl).await, SessionEvent::Rescaled(1.171875));
        assert_eq!(ctl.surface().unwrap().scale(), 1.171875);
        assert_eq!(ctl.state(), SessionState::Active);
        assert_eq!(connector.gateways().len(), 1);
        assert_eq!(gateway.disconnect_calls(), 0);
    }

    #[tokio::test]
    async fn resize_before_display_size_is_noop() {
        let (mut ctl, connector, viewport) = setup(800, 600);
        ctl.start(&params(), viewport.clone()).unwrap();
        connector.last().unwrap().open("t");
        next(&mut ctl).await;

        viewport.resize(1600, 900);
        assert!(quiet(&mut ctl).await);
        assert_eq!(ctl.surface().unwrap().scale(), 1.0);
        assert_eq!(ctl.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn rapid_resizes_coalesce_per_frame() {
        let connector = MemoryConnector::new();
        let mut ctl = SessionController::new(Arc::new(connector.clone())).with_settings(
            ControllerSettings {
                frame_interval: Duration::from_millis(50),
            },
        );
        let viewport = Arc::new(MemoryViewport::new(800, 600));
        ctl.start(&params(), viewport.clone()).unwrap();
        let gateway = connector.last().unwrap();
        gateway.open("t");
        gateway.instruction(size(1024, 768));
        next(&mut ctl).await;
        next(&mut ctl).await;

        viewport.resize(1000, 700);
        viewport.resize(1280, 720);
        viewport.resize(1600, 900);
        assert_eq!(next(&mut ctl).await, SessionEvent::Rescaled(1.171875));
        assert!(quiet(&mut ctl).await);
    }

    #[tokio::test]
    async fn stop_without_start_is_harmless() {
        let (mut ctl, _connector, viewport) = setup(800, 600);
        ctl.stop();
        ctl.stop();
        assert_eq!(ctl.state(), SessionState::Idle);
        assert_eq!(viewport.hub().listener_count(), 0);
        assert!(ctl.next_event().await.is_none());
    }

    #[tokio::test]
    async fn stop_tears_down_in_order_once() {
        let (mut ctl, connector, viewport) = setup(800, 600);
        ctl.start(&params(), viewport.clone()).unwrap();
        let gateway = connector.last().unwrap();
        gateway.open("t");
        next(&mut ctl).await;

        ctl.stop();
        ctl.stop();

        assert_eq!(ctl.state(), SessionState::Idle);
        assert_eq!(gateway.disconnect_calls(), 1);
        assert_eq!(gateway.sent(), vec![Instruction::bare("disconnect")]);
        // Client says goodbye before the tunnel goes down.
        assert_eq!(
            connector.journal()[1..],
            [
                JournalEntry::Send {
                    link: 0,
                    instruction: Instruction::bare("disconnect")
                },
                JournalEntry::Disconnect { link: 0 },
            ]
        );
        assert_eq!(viewport.hub().listener_count(), 0);
        assert!(viewport.attached().is_empty());
        assert!(ctl.surface().is_none());
    }

    #[tokio::test]
    async fn restart_tears_down_previous_session_first() {
        let (mut ctl, connector, viewport) = setup(800, 600);
        ctl.start(&params(), viewport.clone()).unwrap();
        ctl.start(&params(), viewport.clone()).unwrap();

        let journal = connector.journal();
        let first_closed = journal
            .iter()
            .position(|e| *e == JournalEntry::Disconnect { link: 0 })
            .unwrap();
        let second_opened = journal
            .iter()
            .position(|e| *e == JournalEntry::Open { link: 1 })
            .unwrap();
        assert!(first_closed < second_opened);

        assert_eq!(viewport.attached().len(), 1);
        assert_eq!(viewport.attach_calls(), 2);
        assert_eq!(viewport.max_simultaneous(), 1);
        assert_eq!(viewport.hub().listener_count(), 1);
        assert_eq!(connector.gateways()[0].disconnect_calls(), 1);
        assert_eq!(ctl.state(), SessionState::Connecting);
    }

    #[tokio::test]
    async fn late_success_after_stop_is_discarded() {
        let (mut ctl, connector, viewport) = setup(800, 600);
        ctl.start(&params(), viewport.clone()).unwrap();
        let gateway = connector.last().unwrap();
        ctl.stop();

        assert!(!gateway.open("too-late"));
        assert!(ctl.next_event().await.is_none());
        assert!(viewport.attached().is_empty());
        assert_eq!(ctl.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn transport_error_fails_session_and_ignores_resizes() {
        let (mut ctl, connector, viewport) = setup(800, 600);
        ctl.start(&params(), viewport.clone()).unwrap();
        let gateway = connector.last().unwrap();
        gateway.open("t");
        gateway.instruction(size(1024, 768));
        next(&mut ctl).await;
        next(&mut ctl).await;

        gateway.fail(Status::UpstreamTimeout, "network dropped");
        let event = next(&mut ctl).await;
        assert!(matches!(
            event,
            SessionEvent::Failed(ConnectionError::TransportFailure { .. })
        ));
        assert_eq!(ctl.state(), SessionState::Failed);
        assert_eq!(ctl.last_error().unwrap().status(), Some(Status::UpstreamTimeout));

        // The link is closed right away.
        assert_eq!(gateway.disconnect_calls(), 1);
        assert_eq!(gateway.sent(), vec![Instruction::bare("disconnect")]);
        assert!(!gateway.instruction(size(640, 480)));

        // Last frame stays visible; resizes no longer apply.
        viewport.resize(1600, 900);
        assert!(ctl.next_event().await.is_none());
        assert_eq!(viewport.attached().len(), 1);
        assert_eq!(viewport.attached()[0].scale(), 0.78125);

        ctl.stop();
        assert_eq!(ctl.state(), SessionState::Idle);
        assert_eq!(viewport.hub().listener_count(), 0);
        assert_eq!(gateway.disconnect_calls(), 1);
    }

    #[tokio::test]
    async fn malformed_instruction_closes_link_and_keeps_last_frame() {
        let (mut ctl, connector, viewport) = setup(800, 600);
        ctl.start(&params(), viewport.clone()).unwrap();
        let gateway = connector.last().unwrap();
        gateway.open("t");
        gateway.instruction(Instruction::new("sync", ["5"]));
        gateway.instruction(size(1024, 768));
        next(&mut ctl).await;
        next(&mut ctl).await;

        gateway.instruction(Instruction::new("size", ["0", "wide", "768"]));
        assert!(matches!(
            next(&mut ctl).await,
            SessionEvent::Failed(ConnectionError::ProtocolFailure { .. })
        ));

        assert_eq!(
            gateway.sent(),
            vec![Instruction::new("sync", ["5"]), Instruction::bare("disconnect")]
        );
        assert_eq!(gateway.disconnect_calls(), 1);
        // Nothing queues up behind a failed session.
        assert!(!gateway.instruction(Instruction::new("sync", ["6"])));
        assert!(!gateway.fail(Status::UpstreamError, "late"));

        assert_eq!(viewport.attached().len(), 1);
        assert_eq!(ctl.display_size(), Some(DisplaySize::new(1024, 768)));

        ctl.stop();
        ctl.stop();
        assert_eq!(gateway.disconnect_calls(), 1);
        assert!(viewport.attached().is_empty());
        assert_eq!(viewport.hub().listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_nop_sent_while_connected() {
        let (mut ctl, connector, viewport) = setup(800, 600);
        ctl.start(&params(), viewport).unwrap();
        let gateway = connector.last().unwrap();
        gateway.open("t");
        gateway.instruction(Instruction::new("sync", ["1"]));
        next(&mut ctl).await;

        // Keep-alives are not reported; run the pump past one interval.
        let pumped = tokio::time::timeout(Duration::from_millis(5_500), ctl.next_event()).await;
        assert!(pumped.is_err());

        let sent = gateway.sent();
        assert_eq!(
            sent,
            vec![Instruction::new("sync", ["1"]), Instruction::bare("nop")]
        );
        assert_eq!(sent[1].to_string(), "3.nop;");
        assert_eq!(ctl.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn protocol_error_fails_session() {
        let (mut ctl, connector, viewport) = setup(800, 600);
        ctl.start(&params(), viewport).unwrap();
        let gateway = connector.last().unwrap();
        gateway.open("t");
        gateway.instruction(Instruction::new("error", ["Upstream unavailable", "520"]));
        next(&mut ctl).await;

        match next(&mut ctl).await {
            SessionEvent::Failed(ConnectionError::ProtocolFailure { status, .. }) => {
                assert_eq!(status, Status::UpstreamUnavailable)
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failure_while_connecting() {
        let (mut ctl, connector, viewport) = setup(800, 600);
        ctl.start(&params(), viewport).unwrap();
        connector
            .last()
            .unwrap()
            .fail(Status::ClientUnauthorized, "token rejected");
        assert!(matches!(next(&mut ctl).await, SessionEvent::Failed(_)));
        assert_eq!(ctl.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn gateway_close_ends_session() {
        let (mut ctl, connector, viewport) = setup(800, 600);
        ctl.start(&params(), viewport).unwrap();
        let gateway = connector.last().unwrap();
        gateway.open("t");
        gateway.emit(TransportEvent::Closed(Status::Success));
        next(&mut ctl).await;
        assert_eq!(
            next(&mut ctl).await,
            SessionEvent::Failed(ConnectionError::transport(
                Status::SessionClosed,
                "gateway closed the tunnel"
            ))
        );
    }

    #[tokio::test]
    async fn sync_is_acknowledged_through_pump() {
        let (mut ctl, connector, viewport) = setup(800, 600);
        ctl.start(&params(), viewport).unwrap();
        let gateway = connector.last().unwrap();
        gateway.open("t");
        gateway.instruction(Instruction::new("sync", ["77"]));
        gateway.instruction(size(640, 480));
        next(&mut ctl).await;
        next(&mut ctl).await;
        assert_eq!(gateway.sent(), vec![Instruction::new("sync", ["77"])]);
        assert_eq!(ctl.surface().unwrap().frames(), 1);
    }

    #[tokio::test]
    async fn invalid_parameters_fail_synchronously() {
        let (mut ctl, connector, viewport) = setup(800, 600);
        let mut p = params();
        p.connection_id.clear();
        assert!(matches!(
            ctl.start(&p, viewport.clone()),
            Err(ConnectionError::InvalidParameters(_))
        ));
        assert!(connector.gateways().is_empty());
        assert_eq!(ctl.state(), SessionState::Idle);
        assert!(viewport.attached().is_empty());
    }

    #[tokio::test]
    async fn refused_open_leaves_controller_idle() {
        let (mut ctl, connector, viewport) = setup(800, 600);
        connector.refuse_next(ConnectionError::transport(Status::ServerBusy, "busy"));
        assert!(ctl.start(&params(), viewport.clone()).is_err());
        assert_eq!(ctl.state(), SessionState::Idle);
        assert_eq!(viewport.hub().listener_count(), 0);
    }

    #[tokio::test]
    async fn drop_stops_session() {
        let (mut ctl, connector, viewport) = setup(800, 600);
        ctl.start(&params(), viewport.clone()).unwrap();
        drop(ctl);
        assert_eq!(connector.last().unwrap().disconnect_calls(), 1);
        assert_eq!(viewport.hub().listener_count(), 0);
    }
}
