//! Encrypted TCP framing.
//!
//! Each frame on the stream is a 12-byte [`TransportHeader`] followed by an
//! `XChaCha20-Poly1305` body. The body decrypts to a batch of game packets.
//! Readers and writers are generic over `AsyncRead`/`AsyncWrite` so the same
//! code runs on tokio sockets, turmoil sockets and in-memory duplex pipes.
//!
//! # Security
//!
//! The header length is checked against [`TransportHeader::MAX_PAYLOAD_SIZE`]
//! before the body buffer is allocated. Packet numbers must strictly increase
//! per direction; the cipher rejects replays. Any failure is fatal for the
//! connection.

use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use palisade_crypto::{Direction, FrameCipher, TAG_SIZE, TransportKeys};
use palisade_proto::TransportHeader;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    net::{TcpListener, TcpStream},
};

use crate::error::{ServerError, TransportError};

/// Largest plaintext batch a single frame can carry
pub const MAX_PLAINTEXT_SIZE: usize = TransportHeader::MAX_PAYLOAD_SIZE as usize - TAG_SIZE;

/// Reads and decrypts frames from one direction of a stream.
pub struct FrameReader<R> {
    inner: R,
    cipher: FrameCipher,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap `inner`, opening frames with `cipher`.
    pub fn new(inner: R, cipher: FrameCipher) -> Self {
        Self { inner, cipher }
    }

    /// Read the next frame's plaintext.
    ///
    /// Returns `Ok(None)` when the peer closes the stream between frames.
    ///
    /// # Errors
    ///
    /// - `TransportError::Io` on socket failure or EOF inside a body
    /// - `TransportError::Header` for an oversized length
    /// - `TransportError::Crypto` for a forged, corrupted or replayed body
    pub async fn read_frame(&mut self) -> Result<Option<Bytes>, TransportError> {
        let mut header_buf = [0u8; TransportHeader::SIZE];
        match self.inner.read_exact(&mut header_buf).await {
            Ok(_) => {},
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let header = TransportHeader::from_bytes(&header_buf)?;
        let packet_num = header.packet_num();
        let mut body = vec![0u8; header.payload_size() as usize];
        self.inner.read_exact(&mut body).await?;

        let plaintext = self.cipher.open(packet_num, &body)?;
        Ok(Some(Bytes::from(plaintext)))
    }
}

/// Encrypts and writes frames for one direction of a stream.
pub struct FrameWriter<W> {
    inner: W,
    cipher: FrameCipher,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wrap `inner`, sealing frames with `cipher`.
    pub fn new(inner: W, cipher: FrameCipher) -> Self {
        Self { inner, cipher }
    }

    /// Seal `plaintext` and write it as one frame.
    ///
    /// # Errors
    ///
    /// - `TransportError::FrameTooLarge` above [`MAX_PLAINTEXT_SIZE`]
    /// - `TransportError::Io` on socket failure
    pub async fn send_frame(&mut self, plaintext: &[u8]) -> Result<(), TransportError> {
        if plaintext.len() > MAX_PLAINTEXT_SIZE {
            return Err(TransportError::FrameTooLarge { size: plaintext.len(), max: MAX_PLAINTEXT_SIZE });
        }

        let (packet_num, ciphertext) = self.cipher.seal(plaintext)?;
        let header = TransportHeader::new(ciphertext.len() as u32, packet_num);

        let mut wire = BytesMut::with_capacity(TransportHeader::SIZE + ciphertext.len());
        wire.put_slice(&header.to_bytes());
        wire.put_slice(&ciphertext);

        self.inner.write_all(&wire).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Shut down the write side of the stream.
    ///
    /// # Errors
    ///
    /// - `TransportError::Io` if the shutdown fails
    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// Server end of an accepted stream.
pub fn server_framer<S>(stream: S, keys: &TransportKeys) -> (FrameReader<ReadHalf<S>>, FrameWriter<WriteHalf<S>>)
where
    S: AsyncRead + AsyncWrite,
{
    let (read, write) = tokio::io::split(stream);
    (
        FrameReader::new(read, FrameCipher::new(keys.client_to_server(), Direction::ClientToServer)),
        FrameWriter::new(write, FrameCipher::new(keys.server_to_client(), Direction::ServerToClient)),
    )
}

/// Client end of a connected stream.
pub fn client_framer<S>(stream: S, keys: &TransportKeys) -> (FrameReader<ReadHalf<S>>, FrameWriter<WriteHalf<S>>)
where
    S: AsyncRead + AsyncWrite,
{
    let (read, write) = tokio::io::split(stream);
    (
        FrameReader::new(read, FrameCipher::new(keys.server_to_client(), Direction::ServerToClient)),
        FrameWriter::new(write, FrameCipher::new(keys.client_to_server(), Direction::ClientToServer)),
    )
}

/// Source of inbound connections for the accept loop.
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    /// Accepted stream type
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Wait for the next connection.
    async fn accept(&self) -> std::io::Result<(Self::Stream, SocketAddr)>;

    /// Address the listener is bound to.
    fn local_addr(&self) -> std::io::Result<SocketAddr>;
}

#[async_trait]
impl Listener for TcpListener {
    type Stream = TcpStream;

    async fn accept(&self) -> std::io::Result<(TcpStream, SocketAddr)> {
        let (stream, addr) = TcpListener::accept(self).await?;
        stream.set_nodelay(true)?;
        Ok((stream, addr))
    }

    fn local_addr(&self) -> std::io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

/// Bind a TCP listener.
///
/// # Errors
///
/// - `ServerError::Config` if `address` does not parse
/// - `ServerError::Transport` if the bind fails
pub async fn bind(address: &str) -> Result<TcpListener, ServerError> {
    let addr: SocketAddr = address
        .parse()
        .map_err(|e| ServerError::Config(format!("invalid bind address '{address}': {e}")))?;

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("TCP transport bound to {}", listener.local_addr()?);
    Ok(listener)
}
