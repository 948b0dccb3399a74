//! Error types for the viewer core.
//!
//! Two layers:
//! - [`ViewerError`]: everything that can go wrong below the session
//!   (codec, socket, URL parsing). Typed and recoverable.
//! - [`ConnectionError`]: what a session reports to its owner. Cheap to
//!   clone so it can be stored as the session's last error and handed out
//!   through [`SessionEvent`](crate::session::SessionEvent).

use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::protocol::Status;

/// The canonical low-level error type.
#[derive(Debug, Error)]
pub enum ViewerError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// An instruction element length was not a decimal number.
    #[error("invalid element length: {0:?}")]
    InvalidLength(String),

    /// An element was not followed by `,` or `;`.
    #[error("invalid element terminator: {0:?}")]
    InvalidTerminator(char),

    /// The instruction grew past the codec limit without terminating.
    #[error("instruction too large: {size} bytes (max {max})")]
    InstructionTooLarge { size: usize, max: usize },

    /// Received bytes were not valid UTF-8.
    #[error("invalid utf-8 in instruction")]
    InvalidUtf8,

    // ── Connection Errors ────────────────────────────────────────
    /// The socket layer reported an error. Required by the codec traits.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The WebSocket layer reported an error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// A gateway or tunnel URL could not be parsed.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

// ── ConnectionError ──────────────────────────────────────────────

/// Terminal session errors, plus the one synchronous `start` failure.
///
/// Transport and protocol failures are delivered asynchronously; both end
/// the session, and the owner decides whether to reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The tunnel dropped, timed out, or the gateway refused it.
    #[error("transport failure ({status}): {message}")]
    TransportFailure { status: Status, message: String },

    /// The gateway sent data the display client could not interpret, or
    /// reported an error for the remote session.
    #[error("protocol failure ({status}): {message}")]
    ProtocolFailure { status: Status, message: String },

    /// The connection parameters do not form a valid tunnel URL.
    #[error("invalid connection parameters: {0}")]
    InvalidParameters(String),
}

impl ConnectionError {
    pub fn transport(status: Status, message: impl Into<String>) -> Self {
        Self::TransportFailure {
            status,
            message: message.into(),
        }
    }

    pub fn protocol(status: Status, message: impl Into<String>) -> Self {
        Self::ProtocolFailure {
            status,
            message: message.into(),
        }
    }

    /// Gateway status attached to the failure, if any.
    pub fn status(&self) -> Option<Status> {
        match self {
            Self::TransportFailure { status, .. } | Self::ProtocolFailure { status, .. } => {
                Some(*status)
            }
            Self::InvalidParameters(_) => None,
        }
    }
}

impl From<ViewerError> for ConnectionError {
    fn from(e: ViewerError) -> Self {
        match e {
            ViewerError::InvalidLength(_)
            | ViewerError::InvalidTerminator(_)
            | ViewerError::InstructionTooLarge { .. }
            | ViewerError::InvalidUtf8 => Self::protocol(Status::ClientBadType, e.to_string()),
            ViewerError::Url(_) | ViewerError::WebSocket(tungstenite::Error::Url(_)) => {
                Self::InvalidParameters(e.to_string())
            }
            ViewerError::WebSocket(ref ws) => Self::transport(websocket_status(ws), e.to_string()),
            ViewerError::Io(_) => Self::transport(Status::UpstreamNotFound, e.to_string()),
        }
    }
}

/// Gateway status closest to a WebSocket-level failure.
fn websocket_status(e: &tungstenite::Error) -> Status {
    use tungstenite::Error;
    match e {
        Error::Http(response) => match response.status().as_u16() {
            401 => Status::ClientUnauthorized,
            403 => Status::ClientForbidden,
            404 => Status::ResourceNotFound,
            429 => Status::ClientTooMany,
            503 => Status::ServerBusy,
            _ => Status::ServerError,
        },
        Error::Io(_) => Status::UpstreamNotFound,
        Error::ConnectionClosed | Error::AlreadyClosed => Status::ResourceClosed,
        Error::Protocol(_) | Error::Utf8 => Status::ClientBadType,
        _ => Status::ServerError,
    }
}
