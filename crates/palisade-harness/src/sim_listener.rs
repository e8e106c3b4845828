//! Turmoil listener for the server accept loop.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use palisade_server::transport::Listener;
use turmoil::net::{TcpListener, TcpStream};

/// Simulated TCP listener accepted by [`palisade_server::Server::run`].
pub struct SimListener {
    inner: TcpListener,
}

impl SimListener {
    /// Bind on the current simulated host.
    pub async fn bind(address: &str) -> io::Result<Self> {
        let inner = TcpListener::bind(address).await?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl Listener for SimListener {
    type Stream = TcpStream;

    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.inner.accept().await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}
