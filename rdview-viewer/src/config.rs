//! Viewer configuration.
//!
//! The auth token and the connection id are per-session secrets/inputs and
//! come from the command line or environment, never from this file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use rdview_core::params::{DEFAULT_AUDIO_MIMETYPES, DEFAULT_DPI, DEFAULT_IMAGE_MIMETYPES};
use rdview_core::{
    AuthToken, ConnectionError, ConnectionKind, ConnectionParameters, ControllerSettings,
    GatewayEndpoint, TunnelSettings,
};

/// Top-level configuration for the viewer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Gateway location.
    pub gateway: GatewayConfig,
    /// Requested remote display.
    pub display: DisplayConfig,
    /// Advertised media formats.
    pub media: MediaConfig,
    /// Tunnel timing.
    pub tunnel: TunnelConfig,
    /// Local viewport.
    pub viewport: ViewportConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Tunnel endpoint, e.g. `wss://gw.example.com/guacamole/websocket-tunnel`.
    pub url: String,
    /// Auth provider holding the connection.
    pub data_source: String,
    /// Connect to a balancing group instead of a single connection.
    pub group: bool,
}

/// Remote display settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub dpi: u32,
    /// IANA timezone forwarded to the remote host. Empty to omit.
    pub timezone: String,
}

/// Media formats, most preferred first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub audio: Vec<String>,
    pub image: Vec<String>,
}

/// Tunnel timing, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    pub connect_timeout_ms: u64,
    pub ping_interval_ms: u64,
    pub receive_timeout_ms: u64,
}

/// Local viewport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewportConfig {
    /// Initial viewport width.
    pub width: u32,
    /// Initial viewport height.
    pub height: u32,
    /// Minimum spacing between resize-driven rescales.
    pub frame_interval_ms: u64,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/guacamole/websocket-tunnel".into(),
            data_source: "postgresql".into(),
            group: false,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
            dpi: DEFAULT_DPI,
            timezone: String::new(),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            audio: DEFAULT_AUDIO_MIMETYPES.iter().map(|s| s.to_string()).collect(),
            image: DEFAULT_IMAGE_MIMETYPES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        let defaults = TunnelSettings::default();
        Self {
            connect_timeout_ms: defaults.connect_timeout.as_millis() as u64,
            ping_interval_ms: defaults.ping_interval.as_millis() as u64,
            receive_timeout_ms: defaults.receive_timeout.as_millis() as u64,
        }
    }
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 800,
            frame_interval_ms: ControllerSettings::default().frame_interval.as_millis() as u64,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ViewerConfig {
    /// Load from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write default config to a file.
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    // ── Conversions ──────────────────────────────────────────────

    /// Resolve the session parameters for `connection_id`.
    pub fn connection_parameters(
        &self,
        token: AuthToken,
        connection_id: &str,
    ) -> Result<ConnectionParameters, ConnectionError> {
        let gateway = GatewayEndpoint::parse(&self.gateway.url)?;
        let mut params =
            ConnectionParameters::new(gateway, token, &self.gateway.data_source, connection_id)
                .with_size(self.display.width, self.display.height);
        if self.gateway.group {
            params.kind = ConnectionKind::Group;
        }
        params.dpi = self.display.dpi;
        if !self.display.timezone.is_empty() {
            params = params.with_timezone(&self.display.timezone);
        }
        params.audio_mimetypes = self.media.audio.clone();
        params.image_mimetypes = self.media.image.clone();
        Ok(params)
    }

    pub fn tunnel_settings(&self) -> TunnelSettings {
        TunnelSettings {
            connect_timeout: Duration::from_millis(self.tunnel.connect_timeout_ms),
            ping_interval: Duration::from_millis(self.tunnel.ping_interval_ms),
            receive_timeout: Duration::from_millis(self.tunnel.receive_timeout_ms),
        }
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            frame_interval: Duration::from_millis(self.viewport.frame_interval_ms),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
