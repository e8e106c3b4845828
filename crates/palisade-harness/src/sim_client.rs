//! Protocol client for simulated connections.
//!
//! `SimClient` speaks the encrypted framing over a turmoil TCP stream, sends
//! typed requests and decodes whatever the server pushes into
//! [`Notification`]s. Unclaimed notifications stay buffered, so a test can
//! wait for one ack while broadcasts keep arriving.

use std::{collections::VecDeque, io, time::Duration};

use bytes::BytesMut;
use palisade_crypto::TransportKeys;
use palisade_proto::{
    ClientContext, FRAME_TERMINATOR, Packet, ProtocolVersion, encode_packet,
    packets::{Ack, Login, Notification},
};
use palisade_server::transport::{FrameReader, FrameWriter, client_framer};
use tokio::io::{ReadHalf, WriteHalf};
use turmoil::net::TcpStream;

const CONNECT_ATTEMPTS: u32 = 10;
const CONNECT_BACKOFF: Duration = Duration::from_millis(50);

/// Simulated game client.
pub struct SimClient {
    rx: FrameReader<ReadHalf<TcpStream>>,
    tx: FrameWriter<WriteHalf<TcpStream>>,
    ctx: ClientContext,
    inbox: VecDeque<Notification>,
    next_handle: u32,
}

impl SimClient {
    /// Connect to `address` (e.g. `"server:54001"`).
    ///
    /// Retries a refused connection a few times so a client started in the
    /// same step as its server does not race the bind.
    pub async fn connect(address: &str, keys: &TransportKeys) -> io::Result<Self> {
        let mut attempt = 0;
        let stream = loop {
            match TcpStream::connect(address).await {
                Ok(stream) => break stream,
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused && attempt < CONNECT_ATTEMPTS => {
                    attempt += 1;
                    tokio::time::sleep(CONNECT_BACKOFF).await;
                },
                Err(e) => return Err(e),
            }
        };
        let (rx, tx) = client_framer(stream, keys);
        Ok(Self { rx, tx, ctx: ClientContext::default(), inbox: VecDeque::new(), next_handle: 1 })
    }

    /// Fresh ack handle.
    pub fn handle(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1);
        handle
    }

    /// Send one request as its own frame.
    pub async fn send<P: Packet>(&mut self, packet: &P) -> io::Result<()> {
        let mut frame = BytesMut::new();
        encode_packet(packet, &self.ctx, &mut frame).map_err(io::Error::other)?;
        frame.extend_from_slice(&FRAME_TERMINATOR);
        self.send_raw(&frame).await
    }

    /// Send `frame` exactly as given.
    pub async fn send_raw(&mut self, frame: &[u8]) -> io::Result<()> {
        self.tx.send_frame(frame).await.map_err(io::Error::other)
    }

    /// Next notification, reading from the wire if none is buffered.
    ///
    /// Fails with `UnexpectedEof` once the server closes the connection.
    pub async fn recv(&mut self) -> io::Result<Notification> {
        loop {
            if let Some(notification) = self.inbox.pop_front() {
                return Ok(notification);
            }
            self.read_into_inbox().await?;
        }
    }

    /// Next notification within `timeout`, or `None`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> io::Result<Option<Notification>> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Wait for the ack carrying `handle`, buffering everything else.
    pub async fn expect_ack(&mut self, handle: u32) -> io::Result<Ack> {
        loop {
            let position = self.inbox.iter().position(|n| matches!(n, Notification::Ack(ack) if ack.handle == handle));
            if let Some(Notification::Ack(ack)) = position.and_then(|index| self.inbox.remove(index)) {
                return Ok(ack);
            }
            self.read_into_inbox().await?;
        }
    }

    /// Wait for the first notification matching `predicate`, buffering the
    /// rest.
    pub async fn expect(&mut self, predicate: impl Fn(&Notification) -> bool) -> io::Result<Notification> {
        loop {
            if let Some(found) = self.inbox.iter().position(&predicate).and_then(|index| self.inbox.remove(index)) {
                return Ok(found);
            }
            self.read_into_inbox().await?;
        }
    }

    /// Log in and wait for the ack.
    pub async fn login(&mut self, player_id: u32, name: &str) -> io::Result<Ack> {
        let ack_handle = self.handle();
        let login = Login { ack_handle, player_id, version: self.ctx.version, name: name.to_string() };
        self.send(&login).await?;
        self.expect_ack(ack_handle).await
    }

    /// Speak the legacy protocol revision from now on. Takes effect for the
    /// next login.
    pub fn use_legacy_protocol(&mut self) {
        self.ctx = ClientContext::new(ProtocolVersion::Legacy);
    }

    /// Drop everything buffered.
    pub fn clear(&mut self) {
        self.inbox.clear();
    }

    /// Buffered notifications.
    pub fn pending(&self) -> impl Iterator<Item = &Notification> {
        self.inbox.iter()
    }

    async fn read_into_inbox(&mut self) -> io::Result<()> {
        let frame = self
            .rx
            .read_frame()
            .await
            .map_err(io::Error::other)?
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "server closed connection"))?;

        let notifications = Notification::decode_all(frame, &self.ctx)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        tracing::trace!(count = notifications.len(), "client received");
        self.inbox.extend(notifications);
        Ok(())
    }
}
