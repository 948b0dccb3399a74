//! WebSocket tunnel to the gateway.
//!
//! One background task per tunnel owns the socket. It connects, then
//! multiplexes:
//! - outbound instructions queued by [`WebSocketTransport::send`],
//! - inbound text frames, decoded with [`InstructionCodec`],
//! - internal pings every `ping_interval` once the tunnel is open,
//! - a receive deadline: silence for `receive_timeout` fails the tunnel.
//!
//! The first internal instruction from the gateway carries the tunnel
//! uuid and is reported as [`TransportEvent::Opened`]. Later internal
//! instructions are tunnel pings and are dropped.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{ConnectionError, ViewerError};
use crate::params::redacted;
use crate::protocol::{Instruction, InstructionCodec, Status};
use crate::transport::{Transport, TransportChannel, TransportConnector, TransportEvent};

/// WebSocket subprotocol spoken by the gateway.
pub const SUBPROTOCOL: &str = "guacamole";

/// How long a cancelled tunnel may spend on the close handshake.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

// ── TunnelSettings ───────────────────────────────────────────────

/// Timing knobs for the tunnel task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelSettings {
    /// Deadline for the TCP + WebSocket handshake.
    pub connect_timeout: Duration,
    /// Interval of internal pings sent while open.
    pub ping_interval: Duration,
    /// Maximum silence from the gateway before the tunnel fails.
    pub receive_timeout: Duration,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_millis(500),
            receive_timeout: Duration::from_secs(15),
        }
    }
}

// ── WebSocketConnector ───────────────────────────────────────────

/// Opens tunnels with tokio-tungstenite. Must be used inside a Tokio
/// runtime.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    settings: TunnelSettings,
}

impl WebSocketConnector {
    pub fn new(settings: TunnelSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &TunnelSettings {
        &self.settings
    }
}

fn tunnel_request(url: &Url) -> Result<Request, ConnectionError> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(ViewerError::from)?;
    request
        .headers_mut()
        .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));
    Ok(request)
}

impl TransportConnector for WebSocketConnector {
    fn open(&self, url: &Url) -> Result<TransportChannel, ConnectionError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ConnectionError::transport(Status::ServerError, e.to_string()))?;
        let request = tunnel_request(url)?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        runtime.spawn(run_tunnel(
            request,
            self.settings,
            redacted(url),
            outbound_rx,
            event_tx,
            cancel.clone(),
        ));

        Ok(TransportChannel {
            transport: Box::new(WebSocketTransport {
                outbound: outbound_tx,
                cancel,
                closed: false,
            }),
            events: event_rx,
        })
    }
}

// ── WebSocketTransport ───────────────────────────────────────────

/// Handle to a running tunnel task.
pub struct WebSocketTransport {
    outbound: mpsc::UnboundedSender<Instruction>,
    cancel: CancellationToken,
    closed: bool,
}

impl Transport for WebSocketTransport {
    fn send(&self, instruction: Instruction) -> Result<(), ConnectionError> {
        if self.closed {
            return Err(ConnectionError::transport(
                Status::ResourceClosed,
                "tunnel is closed",
            ));
        }
        self.outbound.send(instruction).map_err(|_| {
            ConnectionError::transport(Status::ResourceClosed, "tunnel task has exited")
        })
    }

    fn disconnect(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cancel.cancel();
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Tunnel task ──────────────────────────────────────────────────

fn timestamp_millis() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
        .to_string()
}

async fn run_tunnel(
    request: Request,
    settings: TunnelSettings,
    target: String,
    mut outbound: mpsc::UnboundedReceiver<Instruction>,
    events: mpsc::UnboundedSender<TransportEvent>,
    cancel: CancellationToken,
) {
    debug!("opening tunnel to {target}");

    let connect = tokio::time::timeout(
        settings.connect_timeout,
        tokio_tungstenite::connect_async(request),
    );
    let ws = tokio::select! {
        _ = cancel.cancelled() => {
            debug!("tunnel cancelled before connect completed");
            return;
        }
        result = connect => match result {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => {
                let _ = events.send(TransportEvent::Failed(ViewerError::from(e).into()));
                return;
            }
            Err(_) => {
                let _ = events.send(TransportEvent::Failed(ConnectionError::transport(
                    Status::UpstreamTimeout,
                    format!("no handshake within {:?}", settings.connect_timeout),
                )));
                return;
            }
        },
    };

    let (mut sink, mut stream) = ws.split();

    // The owner may have torn the session down while the handshake was in
    // flight. Close the fresh socket instead of reporting success.
    if cancel.is_cancelled() {
        debug!("tunnel cancelled during handshake; closing");
        let _ = tokio::time::timeout(CLOSE_GRACE, sink.close()).await;
        return;
    }

    let mut codec = InstructionCodec::new();
    let mut buffer = BytesMut::new();
    let mut opened = false;
    let mut ping = tokio::time::interval(settings.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let idle = tokio::time::sleep(settings.receive_timeout);
    tokio::pin!(idle);

    let outcome: Option<TransportEvent> = 'tunnel: loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                // Flush what the owner queued before closing (the client's
                // own `disconnect` instruction, typically).
                while let Ok(instruction) = outbound.try_recv() {
                    if sink.send(Message::Text(instruction.to_string())).await.is_err() {
                        break;
                    }
                }
                let _ = tokio::time::timeout(CLOSE_GRACE, sink.close()).await;
                debug!("tunnel to {target} closed by owner");
                break 'tunnel None;
            }

            Some(instruction) = outbound.recv() => {
                trace!(opcode = %instruction.opcode, "sending");
                if let Err(e) = sink.send(Message::Text(instruction.to_string())).await {
                    break 'tunnel Some(TransportEvent::Failed(ViewerError::from(e).into()));
                }
            }

            frame = stream.next() => {
                idle.as_mut().reset(Instant::now() + settings.receive_timeout);
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        buffer.extend_from_slice(text.as_bytes());
                        loop {
                            let instruction = match codec.decode(&mut buffer) {
                                Ok(Some(instruction)) => instruction,
                                Ok(None) => break,
                                Err(e) => {
                                    warn!("undecodable data from gateway: {e}");
                                    break 'tunnel Some(TransportEvent::Failed(e.into()));
                                }
                            };
                            let event = if instruction.is_internal() {
                                if opened {
                                    continue;
                                }
                                opened = true;
                                let uuid = instruction.arg(0).unwrap_or_default().to_string();
                                debug!(%uuid, "tunnel open");
                                TransportEvent::Opened { uuid }
                            } else {
                                TransportEvent::Instruction(instruction)
                            };
                            if events.send(event).is_err() {
                                // Owner is gone.
                                let _ = tokio::time::timeout(CLOSE_GRACE, sink.close()).await;
                                break 'tunnel None;
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let status = frame
                            .map(|f| Status::from_websocket_code(u16::from(f.code)))
                            .unwrap_or(Status::Success);
                        debug!(%status, "gateway closed tunnel");
                        break 'tunnel Some(TransportEvent::Closed(status));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break 'tunnel Some(TransportEvent::Failed(ViewerError::from(e).into())),
                    None => break 'tunnel Some(TransportEvent::Closed(Status::UpstreamNotFound)),
                }
            }

            _ = ping.tick(), if opened => {
                let ping = Instruction::internal(["ping".to_string(), timestamp_millis()]);
                if let Err(e) = sink.send(Message::Text(ping.to_string())).await {
                    break 'tunnel Some(TransportEvent::Failed(ViewerError::from(e).into()));
                }
            }

            _ = &mut idle => {
                break 'tunnel Some(TransportEvent::Failed(ConnectionError::transport(
                    Status::UpstreamTimeout,
                    format!("gateway silent for {:?}", settings.receive_timeout),
                )));
            }
        }
    };

    if let Some(event) = outcome {
        let _ = events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_asks_for_subprotocol() {
        let url = Url::parse("ws://127.0.0.1:9/tunnel?token=x").unwrap();
        let request = tunnel_request(&url).unwrap();
        assert_eq!(
            request.headers().get(SEC_WEBSOCKET_PROTOCOL).unwrap(),
            "guacamole"
        );
        assert_eq!(request.uri().query(), Some("token=x"));
    }

    #[test]
    fn open_requires_runtime() {
        let url = Url::parse("ws://127.0.0.1:9/tunnel").unwrap();
        assert!(WebSocketConnector::default().open(&url).is_err());
    }

    #[tokio::test]
    async fn unreachable_gateway_reports_failure() {
        // Bind then drop to get a port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = Url::parse(&format!("ws://{addr}/tunnel")).unwrap();
        let mut channel = WebSocketConnector::default().open(&url).unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), channel.events.recv())
            .await
            .expect("timeout")
            .expect("event");
        assert!(matches!(
            event,
            TransportEvent::Failed(ConnectionError::TransportFailure { .. })
        ));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let url = Url::parse("ws://127.0.0.1:9/tunnel").unwrap();
        let mut channel = WebSocketConnector::default().open(&url).unwrap();
        channel.transport.disconnect();
        channel.transport.disconnect();
        assert!(channel.transport.is_closed());
        assert!(channel.transport.send(Instruction::bare("nop")).is_err());
    }

    #[tokio::test]
    async fn client_disconnect_survives_exited_tunnel() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = Url::parse(&format!("ws://{addr}/tunnel")).unwrap();
        let mut channel = WebSocketConnector::default().open(&url).unwrap();
        let failed = tokio::time::timeout(Duration::from_secs(5), channel.events.recv())
            .await
            .expect("timeout");
        assert!(matches!(failed, Some(TransportEvent::Failed(_))));
        // The task is gone once its event sender is.
        assert!(channel.events.recv().await.is_none());

        let mut client = crate::display::DisplayClient::new(channel.transport);
        client.connect().unwrap();
        client.disconnect();
        assert_eq!(client.state(), crate::display::ClientState::Disconnected);
    }
}
