//! SE IP Connector client entry point.
//!
//! Connects to the server, announces its name, and serves requests against
//! a simulated terminal until the server disconnects it or Ctrl-C is pressed.
//!
//! ```text
//! main()
//!  └─ ClientConfig::parse()     -- CLI flags with SEIP_* env fallbacks
//!  └─ ClientEngine              -- SimulatedTerminal + default handlers
//!  └─ ClientSession::run()      -- until REQ_DISCONNECT, EOF, or Ctrl-C
//! ```

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use seip_client::{ClientEngine, ClientSession, SessionConfig, SimulatedTerminal};
use seip_core::hex;

/// Command-line configuration of the client.
#[derive(Debug, Parser)]
#[command(name = "seip-client", version, about = "SE IP connector terminal client")]
struct ClientConfig {
    /// Host name or IP address of the server.
    #[arg(long, env = "SEIP_SERVER_HOST", default_value = "127.0.0.1")]
    server_host: String,

    /// TCP port of the server.
    #[arg(long, env = "SEIP_SERVER_PORT", default_value_t = 9000)]
    server_port: u16,

    /// Name announced to the server during the handshake.
    #[arg(long, env = "SEIP_CLIENT_NAME", default_value = "seip-client")]
    name: String,

    /// Card identifier reported by the simulated terminal, as hex.
    #[arg(long)]
    card_uid: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ClientConfig::parse();
    info!("SE IP connector client starting");

    let mut terminal = SimulatedTerminal::new();
    if let Some(uid) = &config.card_uid {
        let uid = hex::decode(uid).with_context(|| format!("invalid --card-uid {uid:?}"))?;
        terminal = terminal.with_card_uid(uid);
    }
    let engine = Arc::new(ClientEngine::with_default_handlers(Arc::new(terminal)));

    let session = ClientSession::new(
        SessionConfig {
            server_addr: format!("{}:{}", config.server_host, config.server_port),
            name: config.name,
            ..SessionConfig::default()
        },
        engine,
    );

    tokio::select! {
        result = session.run() => match result {
            Ok(end) => info!("session ended: {end:?}"),
            Err(e) => {
                error!("session failed: {e}");
                return Err(e.into());
            }
        },
        _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
    }

    info!("SE IP connector client stopped");
    Ok(())
}
