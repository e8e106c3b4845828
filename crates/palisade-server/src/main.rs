//! Palisade channel server binary.
//!
//! # Usage
//!
//! ```bash
//! # Development defaults
//! palisade-server --bind 0.0.0.0:54001
//!
//! # Configuration file, with CLI overrides
//! palisade-server --config palisade.toml --max-connections 4000
//! ```

use std::path::PathBuf;

use clap::Parser;
use palisade_server::{Server, ServerConfig, transport};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Palisade channel server
#[derive(Parser, Debug)]
#[command(name = "palisade-server")]
#[command(about = "Palisade game channel server")]
#[command(version)]
struct Args {
    /// Address of the first channel; further channels use the following ports
    #[arg(short, long)]
    bind: Option<String>,

    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum concurrent connections per channel
    #[arg(long)]
    max_connections: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Palisade server starting");

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(max_connections) = args.max_connections {
        config.max_connections = max_connections;
    }
    config.validate()?;

    if args.config.is_none() {
        tracing::warn!("No configuration file - using the development transport secret");
    }

    let base: std::net::SocketAddr = config.bind_address.parse()?;
    let mut channels = Vec::with_capacity(usize::from(config.channel_count));
    let mut listeners = Vec::with_capacity(channels.capacity());
    for offset in 0..config.channel_count {
        let mut addr = base;
        addr.set_port(base.port().checked_add(offset).ok_or("channel port out of range")?);

        let channel_config = ServerConfig { bind_address: addr.to_string(), ..config.clone() };
        listeners.push(transport::bind(&channel_config.bind_address).await?);
        channels.push(Server::new(channel_config)?);
    }
    Server::link_channels(&channels);

    let mut tasks = tokio::task::JoinSet::new();
    for (server, listener) in channels.iter().cloned().zip(listeners) {
        tasks.spawn(server.run(listener));
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested");
        },
        Some(result) = tasks.join_next() => {
            result??;
        },
    }

    for server in &channels {
        server.shutdown();
    }
    while let Some(result) = tasks.join_next().await {
        result??;
    }

    Ok(())
}
