//! # rdview-core
//!
//! Viewer-side core for remote-desktop sessions brokered by a gateway
//! that streams display updates over a WebSocket tunnel.
//!
//! This crate contains:
//! - **Session**: `SessionController`: start/stop lifecycle, resize-driven
//!   scaling, ordered teardown
//! - **Display**: `DisplayClient` protocol state machine and its `Surface`
//! - **Viewport**: render-target capability, resize subscriptions, scale math
//! - **Transport**: `Transport`/`TransportConnector` seam, WebSocket tunnel,
//!   in-memory gateway double
//! - **Protocol**: `Instruction`, `InstructionCodec`, gateway `Status` codes
//! - **Params**: `ConnectionParameters` and the tunnel URL contract
//! - **Error**: `ViewerError` and `ConnectionError`

pub mod display;
pub mod error;
pub mod params;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod viewport;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use display::{ClientState, DisplayClient, DisplaySize, DisplayUpdate, Surface};
pub use error::{ConnectionError, ViewerError};
pub use params::{AuthToken, ConnectionKind, ConnectionParameters, GatewayEndpoint, TunnelScheme};
pub use protocol::{Instruction, InstructionCodec, Status};
pub use session::{ControllerSettings, SessionController, SessionEvent, SessionState};
pub use transport::{
    MemoryConnector, Transport, TransportChannel, TransportConnector, TransportEvent,
    TunnelSettings, WebSocketConnector,
};
pub use viewport::{
    MemoryViewport, ResizeHub, ResizeSubscription, Viewport, ViewportSize, compute_scale,
};
