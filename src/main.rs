//! Boxgate - public gateway for tunneled boxes
//!
//! Boxes without a public network presence connect over a persistent
//! WebSocket; inbound HTTP traffic under /proxy/{box_id} is tunneled to
//! them and their responses come back as ordinary HTTP responses.

use anyhow::Result;
use boxgate_api::{ApiServer, ApiServerConfig};
use boxgate_control::{Gateway, GatewayConfig, MemoryStatusStore};
use boxgate_identity::MemoryIdentityProvider;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Boxgate - expose boxes without a public address to inbound HTTP traffic
#[derive(Parser, Debug)]
#[command(name = "boxgate")]
#[command(about = "Boxgate - expose boxes without a public address to inbound HTTP traffic")]
#[command(version = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_HASH"),
    ", built ",
    env!("BUILD_TIME"),
    ")"
))]
#[command(long_about = r#"
Run the public gateway. Boxes connect to ws://<bind>/ws/box and identify
themselves; callers reach them through http://<bind>/proxy/<box_id>/...

EXAMPLES:
  # Open registration: any box id is accepted as-is
  boxgate --bind 0.0.0.0:8080

  # Closed registration with seeded identities
  boxgate --closed-registration --box edge-1=B1 --box edge-2=B2

ENVIRONMENT VARIABLES:
  BOXGATE_BIND              Bind address
  BOXGATE_RESPONSE_TIMEOUT  Seconds to wait for a box's response
  BOXGATE_JWT_SECRET        Secret used to sign session tokens
"#)]
struct Cli {
    /// Address to bind the gateway
    #[arg(long, env = "BOXGATE_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Seconds a proxied request waits for the box's response
    #[arg(long, env = "BOXGATE_RESPONSE_TIMEOUT", default_value = "10")]
    response_timeout: u64,

    /// Seed a box identity as PROVIDED=CANONICAL (repeatable). A bare id
    /// seeds itself.
    #[arg(long = "box", value_name = "PROVIDED=CANONICAL")]
    boxes: Vec<String>,

    /// Reject boxes whose identity is not seeded
    #[arg(long)]
    closed_registration: bool,

    /// Secret used to sign session tokens
    #[arg(
        long,
        env = "BOXGATE_JWT_SECRET",
        default_value = "change-me-in-production",
        hide_default_value = true
    )]
    jwt_secret: String,

    /// Disable the permissive development CORS layer
    #[arg(long)]
    no_cors: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Setup logging with the specified log level
fn setup_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    if cli.jwt_secret == "change-me-in-production" {
        warn!("Using the default JWT secret; set BOXGATE_JWT_SECRET in production");
    }

    let store = Arc::new(MemoryStatusStore::new(!cli.closed_registration));
    for seed in &cli.boxes {
        match seed.split_once('=') {
            Some((provided, canonical)) => store.seed_alias(provided, canonical),
            None => store.seed_alias(seed, seed),
        }
    }

    let gateway = Arc::new(Gateway::new(
        store,
        GatewayConfig {
            response_timeout: Duration::from_secs(cli.response_timeout),
        },
    ));
    let identity = Arc::new(MemoryIdentityProvider::new(cli.jwt_secret.as_bytes()));

    info!("Box tunnel endpoint: ws://{}/ws/box", cli.bind);
    info!("Proxy surface: http://{}/proxy/{{box_id}}/...", cli.bind);

    let server = ApiServer::new(
        ApiServerConfig {
            bind_addr: cli.bind,
            enable_cors: !cli.no_cors,
        },
        gateway,
        identity,
    );

    server.start().await
}
