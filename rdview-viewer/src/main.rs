//! rdview viewer entry point.
//!
//! ```text
//! rdview-viewer --connection <id>        Connect with defaults (token from RDVIEW_TOKEN)
//! rdview-viewer --config <path> ...      Use custom config TOML
//! rdview-viewer --gen-config             Dump default config and exit
//! rdview-viewer --init-config            Write default config to --config and exit
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use rdview_core::{
    AuthToken, ConnectionError, MemoryViewport, SessionController, SessionEvent,
    WebSocketConnector,
};
use rdview_viewer::config::ViewerConfig;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "rdview-viewer", about = "Gateway-brokered remote desktop viewer")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "rdview-viewer.toml")]
    config: PathBuf,

    /// Gateway tunnel URL (overrides config).
    /// Example: wss://gw.example.com/guacamole/websocket-tunnel
    #[arg(short, long)]
    gateway: Option<String>,

    /// Gateway auth token.
    #[arg(long, env = "RDVIEW_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Connection (or group) identifier to open.
    #[arg(short = 'i', long, env = "RDVIEW_CONNECTION")]
    connection: Option<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Write the default configuration to the config path and exit.
    #[arg(long)]
    init_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ViewerConfig::default())?;
        println!("{text}");
        return Ok(());
    }
    if cli.init_config {
        ViewerConfig::write_default(&cli.config)?;
        println!("wrote {}", cli.config.display());
        return Ok(());
    }

    let mut config = ViewerConfig::load(&cli.config);
    if let Some(url) = cli.gateway {
        config.gateway.url = url;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("rdview-viewer v{}", env!("CARGO_PKG_VERSION"));

    let token = cli
        .token
        .ok_or_else(|| ConnectionError::InvalidParameters("no token (--token or RDVIEW_TOKEN)".into()))?;
    let connection = cli.connection.ok_or_else(|| {
        ConnectionError::InvalidParameters("no connection id (--connection or RDVIEW_CONNECTION)".into())
    })?;
    let params = config.connection_parameters(AuthToken::new(token), &connection)?;

    // ── 1. Start the session ────────────────────────────────────

    let viewport = Arc::new(MemoryViewport::new(
        config.viewport.width,
        config.viewport.height,
    ));
    let connector = Arc::new(WebSocketConnector::new(config.tunnel_settings()));
    let mut controller =
        SessionController::new(connector).with_settings(config.controller_settings());
    controller.start(&params, viewport)?;

    // ── 2. Event loop ───────────────────────────────────────────

    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted; closing session");
                break Ok(());
            }
            event = controller.next_event() => match event {
                Some(SessionEvent::Connected { uuid }) => {
                    info!(%uuid, "tunnel open");
                }
                Some(SessionEvent::DisplayResized { size, scale }) => {
                    info!(
                        width = size.width,
                        height = size.height,
                        ?scale,
                        "remote display resized"
                    );
                }
                Some(SessionEvent::Rescaled(scale)) => {
                    debug!(scale, "surface rescaled");
                }
                Some(SessionEvent::Failed(e)) => {
                    error!("session failed: {e}");
                    break Err(e);
                }
                None => break Ok(()),
            }
        }
    };

    // ── 3. Teardown ─────────────────────────────────────────────

    if let Some(surface) = controller.surface() {
        debug!(frames = surface.frames(), "frames rendered");
    }
    controller.stop();
    info!("session closed");

    outcome.map_err(Into::into)
}
