//! Remote display client.
//!
//! [`DisplayClient`] is the protocol state machine that sits on top of a
//! [`Transport`]: it consumes gateway instructions, keeps track of the
//! remote display's logical size, acknowledges frames, and owns the
//! renderable [`Surface`] that a viewport shows.
//!
//! ```text
//!  Idle ──connect──► Connecting ──tunnel open──► Waiting ──first sync──► Connected
//!                        │                          │                        │
//!                        └──────────────────────────┴──────── disconnect ────┴──► Disconnected
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::ConnectionError;
use crate::protocol::{Instruction, Status};
use crate::transport::Transport;

/// Interval between keep-alive `nop`s while connected.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// Layer whose size is the logical display size.
const DEFAULT_LAYER: i32 = 0;

// ── DisplaySize ──────────────────────────────────────────────────

/// Logical pixel size of the remote display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DisplaySize {
    pub width: u32,
    pub height: u32,
}

impl DisplaySize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Both dimensions have been negotiated.
    pub const fn is_known(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

// ── Surface ──────────────────────────────────────────────────────

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq)]
struct SurfaceState {
    size: DisplaySize,
    scale: f64,
    frames: u64,
}

impl Default for SurfaceState {
    fn default() -> Self {
        Self {
            size: DisplaySize::default(),
            scale: 1.0,
            frames: 0,
        }
    }
}

/// Renderable output of a [`DisplayClient`].
///
/// Clones share the same underlying surface. The client owns it; a
/// viewport only holds a clone while the surface is attached.
#[derive(Debug, Clone)]
pub struct Surface {
    inner: Arc<SurfaceInner>,
}

#[derive(Debug)]
struct SurfaceInner {
    id: u64,
    state: RwLock<SurfaceState>,
}

impl Surface {
    fn new() -> Self {
        Self {
            inner: Arc::new(SurfaceInner {
                id: NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed),
                state: RwLock::new(SurfaceState::default()),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn size(&self) -> DisplaySize {
        self.inner.state.read().size
    }

    pub fn scale(&self) -> f64 {
        self.inner.state.read().scale
    }

    pub fn frames(&self) -> u64 {
        self.inner.state.read().frames
    }

    /// On-screen size after scaling.
    pub fn scaled_size(&self) -> (f64, f64) {
        let state = self.inner.state.read();
        (
            f64::from(state.size.width) * state.scale,
            f64::from(state.size.height) * state.scale,
        )
    }

    pub fn apply_scale(&self, scale: f64) {
        self.inner.state.write().scale = scale;
    }

    fn set_size(&self, size: DisplaySize) {
        self.inner.state.write().size = size;
    }

    fn frame_completed(&self) -> u64 {
        let mut state = self.inner.state.write();
        state.frames += 1;
        state.frames
    }
}

// ── DisplayClient ────────────────────────────────────────────────

/// Client lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientState {
    #[default]
    Idle,
    /// `connect` called, tunnel not open yet.
    Connecting,
    /// Tunnel open, waiting for the first frame.
    Waiting,
    /// Frames are flowing.
    Connected,
    Disconnecting,
    Disconnected,
}

impl ClientState {
    fn is_live(self) -> bool {
        matches!(
            self,
            ClientState::Connecting | ClientState::Waiting | ClientState::Connected
        )
    }
}

/// Observable outcome of one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayUpdate {
    /// The default layer changed size.
    Resized(DisplaySize),
    /// A frame completed; carries the running frame count.
    Frame(u64),
}

/// Protocol state machine bound to one transport.
pub struct DisplayClient {
    transport: Box<dyn Transport>,
    surface: Surface,
    state: ClientState,
    layers: HashMap<i32, DisplaySize>,
    last_sent: Instant,
}

fn bad_argument(instruction: &Instruction, what: &str) -> ConnectionError {
    ConnectionError::protocol(
        Status::ClientBadType,
        format!("malformed {} instruction: {what}", instruction.opcode),
    )
}

fn parse_arg<T: std::str::FromStr>(
    instruction: &Instruction,
    index: usize,
    what: &str,
) -> Result<T, ConnectionError> {
    instruction
        .arg(index)
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| bad_argument(instruction, what))
}

impl DisplayClient {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            surface: Surface::new(),
            state: ClientState::Idle,
            layers: HashMap::new(),
            last_sent: Instant::now(),
        }
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Logical size of the default layer; zero until the gateway says.
    pub fn logical_size(&self) -> DisplaySize {
        self.layers.get(&DEFAULT_LAYER).copied().unwrap_or_default()
    }

    /// Size of any layer the gateway has announced.
    pub fn layer_size(&self, layer: i32) -> Option<DisplaySize> {
        self.layers.get(&layer).copied()
    }

    /// Begin the session. Valid from `Idle` only.
    pub fn connect(&mut self) -> Result<(), ConnectionError> {
        match self.state {
            ClientState::Idle => {
                self.state = ClientState::Connecting;
                Ok(())
            }
            other => Err(ConnectionError::protocol(
                Status::ClientBadRequest,
                format!("cannot connect from {other:?}"),
            )),
        }
    }

    /// The tunnel reported itself open.
    pub fn tunnel_opened(&mut self) {
        if self.state == ClientState::Connecting {
            self.state = ClientState::Waiting;
        }
    }

    fn send(&mut self, instruction: Instruction) -> Result<(), ConnectionError> {
        self.transport.send(instruction)?;
        self.last_sent = Instant::now();
        Ok(())
    }

    /// Apply one gateway instruction.
    pub fn handle_instruction(
        &mut self,
        instruction: &Instruction,
    ) -> Result<Option<DisplayUpdate>, ConnectionError> {
        match instruction.opcode.as_str() {
            "size" => {
                let layer: i32 = parse_arg(instruction, 0, "layer")?;
                let width: u32 = parse_arg(instruction, 1, "width")?;
                let height: u32 = parse_arg(instruction, 2, "height")?;
                let size = DisplaySize::new(width, height);
                let previous = self.layers.insert(layer, size);
                if layer != DEFAULT_LAYER || previous == Some(size) {
                    return Ok(None);
                }
                debug!(width, height, "remote display resized");
                self.surface.set_size(size);
                Ok(Some(DisplayUpdate::Resized(size)))
            }
            "sync" => {
                let timestamp = instruction
                    .arg(0)
                    .ok_or_else(|| bad_argument(instruction, "timestamp"))?
                    .to_string();
                self.send(Instruction::new("sync", [timestamp]))?;
                if self.state == ClientState::Waiting {
                    debug!("first frame received");
                    self.state = ClientState::Connected;
                }
                Ok(Some(DisplayUpdate::Frame(self.surface.frame_completed())))
            }
            "error" => {
                let message = instruction.arg(0).unwrap_or_default().to_string();
                let code: u16 = parse_arg(instruction, 1, "status")?;
                Err(ConnectionError::protocol(Status::from_code(code), message))
            }
            "disconnect" => {
                self.state = ClientState::Disconnected;
                Err(ConnectionError::transport(
                    Status::ResourceClosed,
                    "gateway ended the session",
                ))
            }
            opcode => {
                // Drawing, audio, clipboard and `nop` need no bookkeeping
                // here.
                trace!(opcode, "ignored");
                Ok(None)
            }
        }
    }

    /// When the next keep-alive is due, if the client is connected.
    pub fn keep_alive_deadline(&self) -> Option<Instant> {
        (self.state == ClientState::Connected).then(|| self.last_sent + KEEP_ALIVE_INTERVAL)
    }

    /// Send a `nop` if nothing else went out for a keep-alive interval.
    pub fn keep_alive(&mut self) -> Result<(), ConnectionError> {
        match self.keep_alive_deadline() {
            Some(deadline) if Instant::now() >= deadline => self.send(Instruction::bare("nop")),
            _ => Ok(()),
        }
    }

    /// Tell the gateway the session is over. Idempotent; the transport
    /// stays open until its owner disconnects it.
    pub fn disconnect(&mut self) {
        if self.state.is_live() {
            self.state = ClientState::Disconnecting;
            if !self.transport.is_closed() {
                if let Err(e) = self.transport.send(Instruction::bare("disconnect")) {
                    debug!("disconnect not delivered: {e}");
                }
            }
        }
        self.state = ClientState::Disconnected;
    }

    /// Release the client, handing back its transport.
    pub fn into_transport(self) -> Box<dyn Transport> {
        self.transport
    }
}
