//! Gateway status codes.
//!
//! Carried by `error` instructions and derived from WebSocket close codes.

use std::fmt;

/// Status code reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    Unsupported,
    ServerError,
    ServerBusy,
    UpstreamTimeout,
    UpstreamError,
    ResourceNotFound,
    ResourceConflict,
    ResourceClosed,
    UpstreamNotFound,
    UpstreamUnavailable,
    SessionConflict,
    SessionTimeout,
    SessionClosed,
    ClientBadRequest,
    ClientUnauthorized,
    ClientForbidden,
    ClientTimeout,
    ClientOverrun,
    ClientBadType,
    ClientTooMany,
}

impl Status {
    /// Numeric wire value.
    pub const fn code(self) -> u16 {
        match self {
            Status::Success => 0x0000,
            Status::Unsupported => 0x0100,
            Status::ServerError => 0x0200,
            Status::ServerBusy => 0x0201,
            Status::UpstreamTimeout => 0x0202,
            Status::UpstreamError => 0x0203,
            Status::ResourceNotFound => 0x0204,
            Status::ResourceConflict => 0x0205,
            Status::ResourceClosed => 0x0206,
            Status::UpstreamNotFound => 0x0207,
            Status::UpstreamUnavailable => 0x0208,
            Status::SessionConflict => 0x0209,
            Status::SessionTimeout => 0x020A,
            Status::SessionClosed => 0x020B,
            Status::ClientBadRequest => 0x0300,
            Status::ClientUnauthorized => 0x0301,
            Status::ClientForbidden => 0x0303,
            Status::ClientTimeout => 0x0308,
            Status::ClientOverrun => 0x030D,
            Status::ClientBadType => 0x030F,
            Status::ClientTooMany => 0x031D,
        }
    }

    /// Map a wire value back to a status. Unknown codes are treated as a
    /// generic server error.
    pub fn from_code(code: u16) -> Self {
        match code {
            0x0000 => Status::Success,
            0x0100 => Status::Unsupported,
            0x0201 => Status::ServerBusy,
            0x0202 => Status::UpstreamTimeout,
            0x0203 => Status::UpstreamError,
            0x0204 => Status::ResourceNotFound,
            0x0205 => Status::ResourceConflict,
            0x0206 => Status::ResourceClosed,
            0x0207 => Status::UpstreamNotFound,
            0x0208 => Status::UpstreamUnavailable,
            0x0209 => Status::SessionConflict,
            0x020A => Status::SessionTimeout,
            0x020B => Status::SessionClosed,
            0x0300 => Status::ClientBadRequest,
            0x0301 => Status::ClientUnauthorized,
            0x0303 => Status::ClientForbidden,
            0x0308 => Status::ClientTimeout,
            0x030D => Status::ClientOverrun,
            0x030F => Status::ClientBadType,
            0x031D => Status::ClientTooMany,
            _ => Status::ServerError,
        }
    }

    /// Translate a WebSocket close code.
    ///
    /// The gateway reports its precise status in an `error` instruction
    /// before closing; the close code only distinguishes a clean close
    /// from an unreachable or unavailable upstream.
    pub fn from_websocket_code(code: u16) -> Self {
        match code {
            1000 => Status::Success,
            1006 | 1015 => Status::UpstreamNotFound,
            1001 | 1012 | 1013 | 1014 => Status::UpstreamUnavailable,
            _ => Status::ServerError,
        }
    }

    /// Whether this status denotes a failure.
    pub fn is_error(self) -> bool {
        !matches!(self, Status::Success)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?} (0x{:04X})", self.code())
    }
}
