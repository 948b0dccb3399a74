//! Duplex instruction channel between the viewer and the gateway.
//!
//! A [`TransportConnector`] opens a tunnel for a URL and hands back a
//! [`TransportChannel`]: the [`Transport`] used to send instructions and
//! tear the tunnel down, plus the receiver on which everything the
//! gateway does arrives as [`TransportEvent`]s.
//!
//! Opening is synchronous and only *initiates* the connection; the
//! outcome arrives later as `Opened` or `Failed`.
//!
//! | Module      | Purpose                                        |
//! |-------------|------------------------------------------------|
//! | `websocket` | tokio-tungstenite tunnel to a real gateway     |
//! | `memory`    | in-process gateway double for tests and demos  |

pub mod memory;
pub mod websocket;

use tokio::sync::mpsc;
use url::Url;

use crate::error::ConnectionError;
use crate::protocol::{Instruction, Status};

pub use memory::{JournalEntry, MemoryConnector, MemoryGateway, MemoryTransport};
pub use websocket::{TunnelSettings, WebSocketConnector, WebSocketTransport};

/// Something the tunnel reports to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The gateway accepted the tunnel and assigned it a uuid.
    Opened { uuid: String },
    /// A non-internal instruction from the gateway.
    Instruction(Instruction),
    /// The tunnel failed; no further events follow.
    Failed(ConnectionError),
    /// The gateway closed the tunnel; no further events follow.
    Closed(Status),
}

/// Sending half of a tunnel.
pub trait Transport: Send {
    /// Queue an instruction for the gateway. Never blocks.
    fn send(&self, instruction: Instruction) -> Result<(), ConnectionError>;

    /// Close the tunnel. Returns immediately; the close handshake runs in
    /// the background. Calling it again does nothing.
    fn disconnect(&mut self);

    /// Whether [`disconnect`](Self::disconnect) has been called.
    fn is_closed(&self) -> bool;
}

/// A freshly opened tunnel.
pub struct TransportChannel {
    pub transport: Box<dyn Transport>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Factory for tunnels.
pub trait TransportConnector: Send + Sync {
    fn open(&self, url: &Url) -> Result<TransportChannel, ConnectionError>;
}
