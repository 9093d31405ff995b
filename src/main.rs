//! Cinnabar game server binary: config, logging, composition.

use cinnabar::config::ServerConfig;
use cinnabar::net::GameServer;
use cinnabar::store::{FlatMapLoader, MemoryStore};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "cinnabar", version, about = "Cinnabar game server")]
struct Args {
    /// Configuration file (TOML); defaults apply when absent.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen port override.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cinnabar=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match ServerConfig::load(path) {
            Ok(config) => config,
            Err(err) => {
                error!(%err, "failed to load config");
                return;
            }
        },
        None => ServerConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }

    info!("Cinnabar v{VERSION}");
    info!(
        port = config.port,
        max_clients = config.max_clients,
        tick_hz = config.tick_hz,
        "starting"
    );

    let store = Arc::new(MemoryStore::new());
    let loader = FlatMapLoader::new(config.maps.clone());
    let server = match GameServer::start(config, store, &loader).await {
        Ok(server) => server,
        Err(err) => {
            error!(%err, "failed to start server");
            return;
        }
    };

    // Wait for shutdown
    tokio::signal::ctrl_c().await.ok();
    info!("shutting down...");
    server.shutdown();
}
