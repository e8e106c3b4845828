//! Deterministic network simulation for the Palisade channel server.
//!
//! Runs real [`palisade_server::Server`] instances on turmoil hosts and
//! drives them with [`SimClient`]s over simulated TCP, so latency, partitions
//! and timeouts replay identically from a seed.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod sim_client;
mod sim_listener;

use std::sync::Arc;

use palisade_crypto::TransportKeys;
use palisade_server::{Server, ServerConfig, ServerError};
pub use sim_client::SimClient;
pub use sim_listener::SimListener;

/// First channel port, matching the production default.
pub const BASE_PORT: u16 = 54001;

/// Configuration tuned for simulation: short idle timeout and sweep.
pub fn sim_config() -> ServerConfig {
    ServerConfig { idle_timeout_ms: 10_000, sweep_interval_ms: 1_000, ..ServerConfig::default() }
}

/// Transport keys clients need to reach a server running `config`.
///
/// # Errors
///
/// - `ServerError::Config` if the configured secret is invalid
pub fn client_keys(config: &ServerConfig) -> Result<TransportKeys, ServerError> {
    config.transport_keys()
}

/// Run `channels` linked channel servers on consecutive ports from
/// [`BASE_PORT`] on the current simulated host.
///
/// Returns when every channel has stopped accepting.
///
/// # Errors
///
/// - `ServerError::Config` if `config` is invalid
/// - `ServerError::Transport` if a port cannot be bound
pub async fn serve_channels(config: ServerConfig, channels: u16) -> Result<(), ServerError> {
    let mut servers = Vec::with_capacity(usize::from(channels));
    let mut listeners = Vec::with_capacity(usize::from(channels));

    for offset in 0..channels {
        let port = BASE_PORT + offset;
        let listener = SimListener::bind(&format!("0.0.0.0:{port}")).await?;
        let config = ServerConfig { bind_address: format!("0.0.0.0:{port}"), ..config.clone() };
        servers.push(Server::new(config)?);
        listeners.push(listener);
    }
    Server::link_channels(&servers);

    let tasks: Vec<_> = servers
        .iter()
        .zip(listeners)
        .map(|(server, listener)| tokio::spawn(Arc::clone(server).run(listener)))
        .collect();

    for task in tasks {
        match task.await {
            Ok(result) => result?,
            Err(e) => tracing::error!("channel task failed: {}", e),
        }
    }
    Ok(())
}

/// Run a single channel server on [`BASE_PORT`].
///
/// # Errors
///
/// - See [`serve_channels`]
pub async fn serve(config: ServerConfig) -> Result<(), ServerError> {
    serve_channels(config, 1).await
}
