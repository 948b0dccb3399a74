//! Connection parameters and the gateway tunnel URL.
//!
//! ## Tunnel URL
//!
//! ```text
//! {ws|wss}://{host}{path}?token=..&GUAC_DATA_SOURCE=..&GUAC_ID=..&GUAC_TYPE=..
//!     &GUAC_WIDTH=..&GUAC_HEIGHT=..&GUAC_DPI=..[&GUAC_TIMEZONE=..]
//!     (&GUAC_AUDIO=..)*(&GUAC_IMAGE=..)*
//! ```
//!
//! Audio and image MIME types are repeated in preference order; the
//! gateway picks the first one it supports.

use std::fmt;

use url::Url;

use crate::error::{ConnectionError, ViewerError};

/// Audio formats advertised when the caller does not override them.
pub const DEFAULT_AUDIO_MIMETYPES: &[&str] = &["audio/L8", "audio/L16"];

/// Image formats advertised when the caller does not override them.
pub const DEFAULT_IMAGE_MIMETYPES: &[&str] = &["image/jpeg", "image/png", "image/webp"];

pub const DEFAULT_DPI: u32 = 96;

// ── GatewayEndpoint ──────────────────────────────────────────────

/// WebSocket scheme of the tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TunnelScheme {
    #[default]
    Ws,
    Wss,
}

impl TunnelScheme {
    pub const fn as_str(self) -> &'static str {
        match self {
            TunnelScheme::Ws => "ws",
            TunnelScheme::Wss => "wss",
        }
    }
}

/// Where the gateway's WebSocket tunnel lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayEndpoint {
    pub scheme: TunnelScheme,
    /// `host` or `host:port`.
    pub host: String,
    /// Absolute tunnel path, e.g. `/guacamole/websocket-tunnel`.
    pub path: String,
}

impl GatewayEndpoint {
    pub fn new(scheme: TunnelScheme, host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            scheme,
            host: host.into(),
            path: path.into(),
        }
    }

    /// Parse `ws://host:port/path` (any query string is discarded).
    pub fn parse(text: &str) -> Result<Self, ConnectionError> {
        let url = Url::parse(text).map_err(ViewerError::from)?;
        let scheme = match url.scheme() {
            "ws" => TunnelScheme::Ws,
            "wss" => TunnelScheme::Wss,
            other => {
                return Err(ConnectionError::InvalidParameters(format!(
                    "unsupported tunnel scheme: {other}"
                )));
            }
        };
        let host = url
            .host_str()
            .ok_or_else(|| ConnectionError::InvalidParameters("gateway url has no host".into()))?;
        let host = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        Ok(Self::new(scheme, host, url.path()))
    }
}

// ── AuthToken ────────────────────────────────────────────────────

/// Gateway authorization token. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for building the tunnel URL only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(***)")
    }
}

impl fmt::Display for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

// ── ConnectionKind ───────────────────────────────────────────────

/// What `GUAC_ID` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionKind {
    /// A single configured connection.
    #[default]
    Connection,
    /// A balancing connection group.
    Group,
}

impl ConnectionKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            ConnectionKind::Connection => "c",
            ConnectionKind::Group => "g",
        }
    }
}

// ── ConnectionParameters ─────────────────────────────────────────

/// Fully resolved inputs for one viewing session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParameters {
    pub gateway: GatewayEndpoint,
    pub token: AuthToken,
    /// Gateway auth provider holding the connection (e.g. `postgresql`).
    pub data_source: String,
    pub connection_id: String,
    pub kind: ConnectionKind,
    /// Requested remote display width in pixels.
    pub width: u32,
    /// Requested remote display height in pixels.
    pub height: u32,
    pub dpi: u32,
    /// IANA timezone forwarded to the remote host.
    pub timezone: Option<String>,
    /// Supported audio formats, most preferred first.
    pub audio_mimetypes: Vec<String>,
    /// Supported image formats, most preferred first.
    pub image_mimetypes: Vec<String>,
}

impl ConnectionParameters {
    /// Parameters with default geometry and media preferences.
    pub fn new(
        gateway: GatewayEndpoint,
        token: AuthToken,
        data_source: impl Into<String>,
        connection_id: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            token,
            data_source: data_source.into(),
            connection_id: connection_id.into(),
            kind: ConnectionKind::Connection,
            width: 1024,
            height: 768,
            dpi: DEFAULT_DPI,
            timezone: None,
            audio_mimetypes: DEFAULT_AUDIO_MIMETYPES.iter().map(|s| s.to_string()).collect(),
            image_mimetypes: DEFAULT_IMAGE_MIMETYPES.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    fn validate(&self) -> Result<(), ConnectionError> {
        let fail = |what: &str| Err::<(), _>(ConnectionError::InvalidParameters(what.to_string()));
        if self.gateway.host.is_empty() {
            return fail("gateway host is empty");
        }
        if !self.gateway.path.starts_with('/') {
            return fail("gateway path must be absolute");
        }
        if self.token.expose().is_empty() {
            return fail("authorization token is empty");
        }
        if self.connection_id.is_empty() {
            return fail("connection id is empty");
        }
        if self.width == 0 || self.height == 0 || self.dpi == 0 {
            return fail("display geometry must be non-zero");
        }
        Ok(())
    }

    /// Build the tunnel URL the gateway expects.
    pub fn tunnel_url(&self) -> Result<Url, ConnectionError> {
        self.validate()?;

        let base = format!(
            "{}://{}{}",
            self.gateway.scheme.as_str(),
            self.gateway.host,
            self.gateway.path
        );
        let mut url = Url::parse(&base).map_err(ViewerError::from)?;

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("token", self.token.expose())
                .append_pair("GUAC_DATA_SOURCE", &self.data_source)
                .append_pair("GUAC_ID", &self.connection_id)
                .append_pair("GUAC_TYPE", self.kind.as_str())
                .append_pair("GUAC_WIDTH", &self.width.to_string())
                .append_pair("GUAC_HEIGHT", &self.height.to_string())
                .append_pair("GUAC_DPI", &self.dpi.to_string());
            if let Some(tz) = &self.timezone {
                query.append_pair("GUAC_TIMEZONE", tz);
            }
            for mimetype in &self.audio_mimetypes {
                query.append_pair("GUAC_AUDIO", mimetype);
            }
            for mimetype in &self.image_mimetypes {
                query.append_pair("GUAC_IMAGE", mimetype);
            }
        }

        Ok(url)
    }
}

/// Tunnel URL with the token value masked, safe to log.
pub fn redacted(url: &Url) -> String {
    let mut masked = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "token" { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    masked.query_pairs_mut().clear().extend_pairs(pairs);
    masked.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ConnectionParameters {
        ConnectionParameters::new(
            GatewayEndpoint::new(TunnelScheme::Ws, "192.168.1.4:8080", "/guacamole/websocket-tunnel"),
            AuthToken::new("FEB0D6502DDA"),
            "postgresql",
            "1",
        )
        .with_size(2560, 708)
        .with_timezone("Europe/Moscow")
    }

    #[test]
    fn tunnel_url_matches_gateway_contract() {
        let url = params().tunnel_url().unwrap();
        assert_eq!(
            url.as_str(),
            "ws://192.168.1.4:8080/guacamole/websocket-tunnel?token=FEB0D6502DDA\
             &GUAC_DATA_SOURCE=postgresql&GUAC_ID=1&GUAC_TYPE=c&GUAC_WIDTH=2560\
             &GUAC_HEIGHT=708&GUAC_DPI=96&GUAC_TIMEZONE=Europe%2FMoscow\
             &GUAC_AUDIO=audio%2FL8&GUAC_AUDIO=audio%2FL16&GUAC_IMAGE=image%2Fjpeg\
             &GUAC_IMAGE=image%2Fpng&GUAC_IMAGE=image%2Fwebp"
        );
    }

    #[test]
    fn mimetypes_keep_preference_order() {
        let mut p = params();
        p.image_mimetypes = vec!["image/webp".into(), "image/png".into()];
        let url = p.tunnel_url().unwrap();
        let images: Vec<String> = url
            .query_pairs()
            .filter(|(k, _)| k == "GUAC_IMAGE")
            .map(|(_, v)| v.into_owned())
            .collect();
        assert_eq!(images, ["image/webp", "image/png"]);
    }

    #[test]
    fn timezone_is_optional() {
        let mut p = params();
        p.timezone = None;
        let url = p.tunnel_url().unwrap();
        assert!(!url.query_pairs().any(|(k, _)| k == "GUAC_TIMEZONE"));
    }

    #[test]
    fn rejects_unresolved_parameters() {
        let mut p = params();
        p.token = AuthToken::new("");
        assert!(matches!(
            p.tunnel_url(),
            Err(ConnectionError::InvalidParameters(_))
        ));

        let p = params().with_size(0, 708);
        assert!(p.tunnel_url().is_err());
    }

    #[test]
    fn token_never_printed() {
        let p = params();
        let debug = format!("{p:?}");
        assert!(!debug.contains("FEB0D6502DDA"));
        let url = p.tunnel_url().unwrap();
        let masked = redacted(&url);
        assert!(!masked.contains("FEB0D6502DDA"));
        assert!(masked.contains("GUAC_ID=1"));
    }

    #[test]
    fn endpoint_parse() {
        let ep = GatewayEndpoint::parse("wss://gw.example.com/guacamole/websocket-tunnel").unwrap();
        assert_eq!(ep.scheme, TunnelScheme::Wss);
        assert_eq!(ep.host, "gw.example.com");
        assert_eq!(ep.path, "/guacamole/websocket-tunnel");

        let ep = GatewayEndpoint::parse("ws://10.0.0.2:8080/tunnel").unwrap();
        assert_eq!(ep.host, "10.0.0.2:8080");

        assert!(GatewayEndpoint::parse("http://gw/tunnel").is_err());
    }
}
