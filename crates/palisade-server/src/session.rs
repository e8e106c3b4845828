//! Per-connection session actor.
//!
//! Each session runs two tasks: a receive loop that reads frames and hands
//! them to the dispatcher, and a send loop that drains the outbound queue.
//! Handlers and broadcasts never touch the socket; they enqueue through
//! [`Session::queue_send`] and friends.
//!
//! # Invariants
//!
//! - `SessionState::current_stage` is `Some(stage)` exactly while this
//!   session is an active member of `stage`, except inside a transfer.
//! - The state mutex is never held across an `.await`.
//! - Once closed, a session never reopens. Both loops exit; the send loop
//!   first flushes whatever is still queued.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use bytes::{BufMut, Bytes, BytesMut};
use palisade_proto::{
    ClientContext, FRAME_TERMINATOR, Packet,
    packets::{Ack, AckPayload},
};
use parking_lot::{Mutex, MutexGuard};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::watch,
    time::Instant,
};

use crate::{
    semaphore::Semaphore,
    send_queue::{PushOutcome, SendQueue},
    server::Server,
    stage::Stage,
    transport::{FrameReader, FrameWriter},
};

/// Mutable per-connection state.
///
/// Handlers lock it through [`Session::state`] for any multi-field
/// read-modify-write.
#[derive(Debug)]
pub struct SessionState {
    /// Player id; 0 until login
    pub player_id: u32,
    /// Display name
    pub name: String,
    /// Encoding context for outbound packets
    pub context: ClientContext,
    /// Stage the session is active in
    pub current_stage: Option<Arc<Stage>>,
    /// Stage the session holds a reserved slot in
    pub reservation: Option<Arc<Stage>>,
    /// Semaphore the session participates in
    pub semaphore: Option<Arc<Semaphore>>,
    /// Password presented on the next reservation
    pub stage_pass: Option<String>,
    /// Last issued log key
    pub log_key: Option<[u8; 16]>,
    /// Read position in the player's mail list, kept for mail handlers
    pub mail_cursor: u32,
    /// Stage ids to return to with a back request, most recent last
    pub nav_stack: Vec<String>,
    /// Set after the first stage entry on this connection
    pub first_entry_done: bool,
    /// When the last frame arrived
    pub last_received: Instant,
}

impl SessionState {
    fn new() -> Self {
        Self {
            player_id: 0,
            name: String::new(),
            context: ClientContext::default(),
            current_stage: None,
            reservation: None,
            semaphore: None,
            stage_pass: None,
            log_key: None,
            mail_cursor: 0,
            nav_stack: Vec::new(),
            first_entry_done: false,
            last_received: Instant::now(),
        }
    }

    /// Id of the current stage.
    #[must_use]
    pub fn current_stage_id(&self) -> Option<&str> {
        self.current_stage.as_deref().map(Stage::id)
    }
}

/// One client connection.
pub struct Session {
    id: u64,
    addr: SocketAddr,
    queue: SendQueue,
    state: Mutex<SessionState>,
    closed: watch::Sender<bool>,
}

impl Session {
    /// New open session with an outbound queue of `queue_capacity` items.
    pub fn new(id: u64, addr: SocketAddr, queue_capacity: usize) -> Self {
        Self {
            id,
            addr,
            queue: SendQueue::new(queue_capacity),
            state: Mutex::new(SessionState::new()),
            closed: watch::Sender::new(false),
        }
    }

    /// Server-assigned connection id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Peer address.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Lock the mutable state. Never hold the guard across an `.await`.
    pub fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock()
    }

    /// Player id, 0 before login.
    #[must_use]
    pub fn player_id(&self) -> u32 {
        self.state.lock().player_id
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> String {
        self.state.lock().name.clone()
    }

    /// Encoding context for this peer.
    #[must_use]
    pub fn context(&self) -> ClientContext {
        self.state.lock().context
    }

    /// Stage the session is active in.
    #[must_use]
    pub fn current_stage(&self) -> Option<Arc<Stage>> {
        self.state.lock().current_stage.clone()
    }

    /// Outbound queue.
    #[must_use]
    pub fn queue(&self) -> &SendQueue {
        &self.queue
    }

    /// Record that a frame just arrived.
    pub fn touch(&self) {
        self.state.lock().last_received = Instant::now();
    }

    /// Time since the last received frame.
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.state.lock().last_received)
    }

    /// Enqueue a queue item, evicting non-blocking items if full.
    ///
    /// The item is always queued when this returns.
    pub fn queue_send(&self, data: Bytes) {
        match self.queue.push_blocking(data) {
            PushOutcome::Queued => {},
            PushOutcome::Evicted(count) => {
                tracing::debug!(session = self.id, evicted = count, "send queue full; evicted non-blocking items");
            },
            PushOutcome::Overflowed => {
                tracing::warn!(
                    session = self.id,
                    len = self.queue.len(),
                    capacity = self.queue.capacity(),
                    "send queue full of blocking items; exceeding capacity"
                );
            },
        }
    }

    /// Enqueue a queue item if there is room. Returns `false` if dropped.
    pub fn queue_send_non_blocking(&self, data: Bytes) -> bool {
        let queued = self.queue.push_non_blocking(data);
        if !queued {
            tracing::warn!(session = self.id, capacity = self.queue.capacity(), "send queue full; dropped packet");
        }
        queued
    }

    /// Build `packet` for this peer and enqueue it with [`Session::queue_send`].
    pub fn queue_send_mhf<P: Packet>(&self, packet: &P) {
        if let Some(data) = self.build(packet) {
            self.queue_send(data);
        }
    }

    /// Build `packet` for this peer and enqueue it non-blocking.
    pub fn queue_send_mhf_non_blocking<P: Packet>(&self, packet: &P) -> bool {
        self.build(packet).is_some_and(|data| self.queue_send_non_blocking(data))
    }

    /// Acknowledge the request carrying `handle`.
    pub fn queue_ack(&self, handle: u32, payload: AckPayload) {
        self.queue_send_mhf(&Ack { handle, payload });
    }

    fn build<P: Packet>(&self, packet: &P) -> Option<Bytes> {
        match packet.to_bytes(&self.context()) {
            Ok(data) => Some(data),
            Err(e) => {
                tracing::warn!(session = self.id, opcode = %P::OPCODE, error = %e, "failed to build packet");
                None
            },
        }
    }

    /// Mark the session closed. Both loops exit; idempotent.
    pub fn close(&self) {
        self.closed.send_replace(true);
        self.queue.wake();
    }

    /// Resolves once the session is closed.
    pub fn closed(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.closed.subscribe();
        async move {
            let _ = rx.wait_for(|closed| *closed).await;
        }
    }

    /// Whether [`Session::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Drain the queue to `writer` until closed or the write fails.
    ///
    /// Every queue item is sent as one frame with the terminator appended.
    /// An empty queue is polled every `idle_wait`, or sooner when something
    /// is enqueued.
    pub async fn run_send_loop<W: AsyncWrite + Unpin>(self: Arc<Self>, mut writer: FrameWriter<W>, idle_wait: Duration) {
        loop {
            let items = self.queue.drain();
            if items.is_empty() {
                if self.is_closed() {
                    break;
                }
                self.queue.wait(idle_wait).await;
                continue;
            }

            for item in items {
                let mut frame = BytesMut::with_capacity(item.len() + FRAME_TERMINATOR.len());
                frame.put_slice(&item);
                frame.put_slice(&FRAME_TERMINATOR);

                if let Err(e) = writer.send_frame(&frame).await {
                    tracing::debug!(session = self.id, error = %e, "send failed; closing session");
                    self.close();
                    return;
                }
            }
        }

        if let Err(e) = writer.shutdown().await {
            tracing::debug!(session = self.id, error = %e, "shutdown failed");
        }
    }

    /// Read frames from `reader` and dispatch them until EOF, a transport
    /// error, or close. Logs the session out on exit.
    pub async fn run_recv_loop<R: AsyncRead + Unpin>(self: Arc<Self>, server: Arc<Server>, mut reader: FrameReader<R>) {
        let closed = self.closed();
        tokio::pin!(closed);

        loop {
            let result = tokio::select! {
                result = reader.read_frame() => result,
                () = &mut closed => break,
            };

            match result {
                Ok(Some(frame)) => {
                    self.touch();
                    server.handlers().dispatch(&server, &self, frame).await;
                },
                Ok(None) => {
                    tracing::debug!(session = self.id, "peer closed connection");
                    break;
                },
                Err(e) => {
                    tracing::warn!(session = self.id, error = %e, "transport error");
                    break;
                },
            }
        }

        server.logout(&self);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("queued", &self.queue.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use palisade_proto::{
        ProtocolVersion,
        packets::{InsertUser, Notification},
    };

    use super::*;

    fn session() -> Session {
        Session::new(1, "127.0.0.1:5000".parse().unwrap(), 20)
    }

    #[test]
    fn ack_is_queued_with_handle() {
        let session = session();
        session.queue_ack(42, AckPayload::ok_simple([1, 2, 3, 4]));

        let items = session.queue().drain();
        assert_eq!(items.len(), 1);
        let decoded = Notification::decode_all(items[0].clone(), &ClientContext::default()).unwrap();
        assert_eq!(
            decoded,
            vec![Notification::Ack(Ack { handle: 42, payload: AckPayload::ok_simple([1, 2, 3, 4]) })]
        );
    }

    #[test]
    fn packets_are_built_with_session_context() {
        let session = session();
        session.state().context = ClientContext::new(ProtocolVersion::Legacy);
        session.queue_send_mhf(&InsertUser { player_id: 1, name: "Ann".into() });

        let item = session.queue().drain().remove(0);
        assert_eq!(item.len(), 2 + 4 + 16);
    }

    #[test]
    fn non_blocking_full_queue_drops_new_item() {
        let session = session();
        for n in 0u8..21 {
            session.queue_send_non_blocking(Bytes::from(vec![n]));
        }
        let items = session.queue().drain();
        assert_eq!(items.len(), 20);
        assert_eq!(items.last(), Some(&Bytes::from(vec![19u8])));
    }

    #[test]
    fn blocking_send_survives_full_queue() {
        let session = session();
        for n in 0u8..20 {
            session.queue_send_non_blocking(Bytes::from(vec![n]));
        }
        session.queue_send(Bytes::from_static(b"must arrive"));

        let items = session.queue().drain();
        assert_eq!(items, vec![Bytes::from_static(b"must arrive")]);
    }

    #[test]
    fn close_is_idempotent() {
        let session = session();
        assert!(!session.is_closed());
        session.close();
        session.close();
        assert!(session.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_time_tracks_touch() {
        let session = session();
        tokio::time::advance(Duration::from_secs(12)).await;
        assert!(session.idle_for(Instant::now()) >= Duration::from_secs(12));

        session.touch();
        assert_eq!(session.idle_for(Instant::now()), Duration::ZERO);
    }
}
