//! SE IP Connector server entry point.
//!
//! Loads the configuration, starts listening, and keeps serving terminal
//! clients until Ctrl-C.  The test harness drives the engine through the
//! library; this binary only hosts it and logs who connects.
//!
//! ```text
//! main()
//!  └─ load_config()              -- path or inline JSON, defaults otherwise
//!  └─ ServerEngine::init_with_config()
//!  └─ ServerEngine::start_listening(ip, port)
//!  └─ ctrl_c ──► ServerEngine::stop_all_clients()
//! ```

use anyhow::{bail, Context};
use clap::Parser;
use seip_core::ResponsePacket;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use seip_server::{load_config, ServerConfig, ServerEngine};

#[derive(Debug, Parser)]
#[command(name = "seip-server", version, about = "SE IP connector test-control server")]
struct Args {
    /// Configuration file (`.json` or `.toml`) or an inline JSON object.
    #[arg(long, env = "SEIP_SERVER_CONFIG")]
    config: Option<String>,

    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1")]
    ip: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9000)]
    port: u16,
}

/// Turns a KO response from the engine into an error for `main`.
fn ensure_ok(step: &str, response: ResponsePacket) -> anyhow::Result<()> {
    if !response.is_ok() {
        bail!("{step} failed: {response}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(input) => load_config(input).context("loading server configuration")?,
        None => ServerConfig::default(),
    };

    // Initialise structured logging.  `RUST_LOG` overrides the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!("SE IP connector server starting");

    let engine = ServerEngine::new();
    engine
        .set_connection_callback(|id, name| info!("terminal client ready [id:{id}][name:{name}]"))
        .await;

    ensure_ok("init", engine.init_with_config(config).await)?;
    ensure_ok("start listening", engine.start_listening(&args.ip, args.port).await)?;

    info!("server ready on {}:{}.  Press Ctrl-C to exit.", args.ip, args.port);

    tokio::signal::ctrl_c()
        .await
        .context("waiting for the shutdown signal")?;
    info!("shutdown signal received");

    let stopped = engine.stop_all_clients().await;
    if !stopped.is_ok() {
        warn!("shutdown incomplete: {stopped}");
    }

    info!("SE IP connector server stopped");
    Ok(())
}
