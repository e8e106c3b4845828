//! Channel server registry.
//!
//! The [`Server`] owns every session, stage and semaphore of one channel and
//! runs the accept and idle-sweep tasks. Handlers reach shared state only
//! through it.
//!
//! # Lock order
//!
//! server map → stage → session state. Session state is never locked while a
//! server map lock is requested. No lock is held across an `.await`, and
//! broadcasts always enqueue from a snapshot taken under the lock.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use palisade_crypto::TransportKeys;
use palisade_proto::{ClientContext, Packet, packets::DeleteUser};
use parking_lot::{Mutex, RwLock};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::watch,
    task::JoinHandle,
    time::Instant,
};

use crate::{
    config::ServerConfig,
    dispatch::HandlerTable,
    error::ServerError,
    handlers,
    semaphore::{SEMAPHORE_ID_SEED, Semaphore, SemaphoreError, next_semaphore_id},
    session::Session,
    stage::{Stage, StageError, StageObject},
    transport::{FrameReader, FrameWriter, Listener, server_framer},
};

/// One channel server.
pub struct Server {
    config: ServerConfig,
    keys: TransportKeys,
    handlers: HandlerTable,
    sessions: RwLock<HashMap<u64, Arc<Session>>>,
    stages: RwLock<HashMap<String, Arc<Stage>>>,
    semaphores: RwLock<HashMap<String, Arc<Semaphore>>>,
    next_semaphore_id: Mutex<u32>,
    next_session_id: AtomicU64,
    /// Sibling channels reached by worldcast
    channels: RwLock<Vec<Weak<Server>>>,
    shutdown: watch::Sender<bool>,
}

impl Server {
    /// Server with the built-in handler table.
    ///
    /// # Errors
    ///
    /// - `ServerError::Config` if the configuration is invalid
    pub fn new(config: ServerConfig) -> Result<Arc<Self>, ServerError> {
        Self::with_handlers(config, handlers::default_table())
    }

    /// Server dispatching through `handlers`.
    ///
    /// # Errors
    ///
    /// - `ServerError::Config` if the configuration is invalid
    pub fn with_handlers(config: ServerConfig, handlers: HandlerTable) -> Result<Arc<Self>, ServerError> {
        config.validate()?;
        let keys = config.transport_keys()?;

        Ok(Arc::new(Self {
            config,
            keys,
            handlers,
            sessions: RwLock::new(HashMap::new()),
            stages: RwLock::new(HashMap::new()),
            semaphores: RwLock::new(HashMap::new()),
            next_semaphore_id: Mutex::new(SEMAPHORE_ID_SEED),
            next_session_id: AtomicU64::new(1),
            channels: RwLock::new(Vec::new()),
            shutdown: watch::Sender::new(false),
        }))
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Opcode table requests are dispatched through.
    #[must_use]
    pub fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }

    /// Make every server in `servers` a worldcast sibling of the others.
    pub fn link_channels(servers: &[Arc<Server>]) {
        for server in servers {
            let siblings = servers
                .iter()
                .filter(|other| !Arc::ptr_eq(other, server))
                .map(Arc::downgrade)
                .collect();
            *server.channels.write() = siblings;
        }
    }

    // Connections

    /// Register a new session for `addr` without starting its tasks.
    ///
    /// Returns `None` when the channel is at `max_connections`.
    pub fn register(&self, addr: SocketAddr) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.write();
        if sessions.len() >= self.config.max_connections {
            tracing::warn!(%addr, max = self.config.max_connections, "connection limit reached; refusing");
            return None;
        }

        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(Session::new(id, addr, self.config.send_queue_capacity));
        sessions.insert(id, Arc::clone(&session));
        tracing::debug!(session = id, %addr, "session registered");
        Some(session)
    }

    /// Register a session and spawn its send and receive loops.
    pub fn attach<R, W>(
        self: &Arc<Self>,
        reader: FrameReader<R>,
        writer: FrameWriter<W>,
        addr: SocketAddr,
    ) -> Option<Arc<Session>>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let session = self.register(addr)?;
        tokio::spawn(Arc::clone(&session).run_send_loop(writer, self.config.send_idle_wait()));
        tokio::spawn(Arc::clone(&session).run_recv_loop(Arc::clone(self), reader));
        Some(session)
    }

    /// Wrap an accepted stream in the transport and attach it.
    pub fn accept_stream<S>(self: &Arc<Self>, stream: S, addr: SocketAddr) -> Option<Arc<Session>>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = server_framer(stream, &self.keys);
        self.attach(reader, writer, addr)
    }

    /// Accept connections from `listener` until [`Server::shutdown`].
    ///
    /// Also runs the idle sweeper for the lifetime of the loop.
    ///
    /// # Errors
    ///
    /// - `ServerError::Transport` if the listener address is unavailable
    pub async fn run<L: Listener>(self: Arc<Self>, listener: L) -> Result<(), ServerError> {
        tracing::info!("Channel listening on {}", listener.local_addr()?);

        let sweeper = self.spawn_sweeper();
        let mut shutdown = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, addr)) => {
                        tracing::debug!(%addr, "accepted connection");
                        let _ = self.accept_stream(stream, addr);
                    },
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                    },
                },
                _ = shutdown.wait_for(|stopped| *stopped) => break,
            }
        }

        sweeper.abort();
        tracing::info!("Channel stopped accepting");
        Ok(())
    }

    /// Spawn the task that logs out idle sessions every `sweep_interval`.
    ///
    /// The task holds a weak reference and exits once the server is dropped
    /// or shut down.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let period = self.config.sweep_interval();
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {},
                    _ = shutdown.wait_for(|stopped| *stopped) => break,
                }
                let Some(server) = weak.upgrade() else { break };
                server.sweep(Instant::now());
            }
        })
    }

    /// Log out every session idle longer than `idle_timeout` at `now`.
    ///
    /// Returns the ids logged out.
    pub fn sweep(&self, now: Instant) -> Vec<u64> {
        let timeout = self.config.idle_timeout();
        let idle: Vec<Arc<Session>> =
            self.sessions.read().values().filter(|s| s.idle_for(now) > timeout).cloned().collect();

        idle.iter()
            .map(|session| {
                tracing::info!(session = session.id(), "idle timeout; logging out");
                self.logout(session);
                session.id()
            })
            .collect()
    }

    /// Stop accepting and log out every session.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let sessions: Vec<Arc<Session>> = self.sessions.read().values().cloned().collect();
        for session in &sessions {
            self.logout(session);
        }
        tracing::info!(sessions = sessions.len(), "channel shut down");
    }

    /// Tear a session down. Idempotent.
    ///
    /// Leaves its stage (removing its objects), drops its reservation and
    /// semaphore slot, tells everyone else the player is gone, and closes
    /// the session so both loops exit.
    pub fn logout(&self, session: &Arc<Session>) {
        let registered = self.sessions.write().remove(&session.id()).is_some();

        self.leave_current_stage(session);
        self.unreserve_stage(session);
        self.release_semaphore(session);

        let player_id = session.player_id();
        if registered && player_id != 0 {
            self.broadcast_mhf(&DeleteUser { player_id }, Some(session.id()));
        }

        if registered {
            tracing::info!(session = session.id(), player_id, "session logged out");
        }
        session.close();
    }

    /// Attach a player identity to `session`.
    ///
    /// Returns `false` if another session already carries `player_id`.
    pub fn bind_player(&self, session: &Session, player_id: u32, name: String, context: ClientContext) -> bool {
        let sessions = self.sessions.read();
        let taken = sessions.values().any(|other| other.id() != session.id() && other.player_id() == player_id);
        if taken {
            return false;
        }

        let mut state = session.state();
        state.player_id = player_id;
        state.name = name;
        state.context = context;
        true
    }

    // Lookup and broadcast

    /// Session by connection id.
    #[must_use]
    pub fn session(&self, id: u64) -> Option<Arc<Session>> {
        self.sessions.read().get(&id).cloned()
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Snapshot of every registered session.
    #[must_use]
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.read().values().cloned().collect()
    }

    /// Session logged in as `player_id`. Linear scan.
    #[must_use]
    pub fn find_session_by_player_id(&self, player_id: u32) -> Option<Arc<Session>> {
        if player_id == 0 {
            return None;
        }
        self.sessions.read().values().find(|s| s.player_id() == player_id).cloned()
    }

    /// Stage id and object owned by `player_id`, searching every stage.
    #[must_use]
    pub fn find_object_by_owner(&self, player_id: u32) -> Option<(String, StageObject)> {
        self.stages
            .read()
            .values()
            .find_map(|stage| stage.object_by_owner(player_id).map(|object| (stage.id().to_string(), object)))
    }

    /// Send `packet` to every session on this channel except `ignored`.
    ///
    /// Returns the number of sessions that accepted it.
    pub fn broadcast_mhf<P: Packet>(&self, packet: &P, ignored: Option<u64>) -> usize {
        let recipients: Vec<Arc<Session>> = self
            .sessions
            .read()
            .iter()
            .filter(|(id, _)| Some(**id) != ignored)
            .map(|(_, session)| Arc::clone(session))
            .collect();

        recipients.into_iter().filter(|session| session.queue_send_mhf_non_blocking(packet)).count()
    }

    /// [`Server::broadcast_mhf`] on this channel and every linked sibling.
    pub fn worldcast_mhf<P: Packet>(&self, packet: &P, ignored: Option<u64>) -> usize {
        let siblings: Vec<Arc<Server>> = self.channels.read().iter().filter_map(Weak::upgrade).collect();

        self.broadcast_mhf(packet, ignored)
            + siblings.iter().map(|channel| channel.broadcast_mhf(packet, ignored)).sum::<usize>()
    }

    // Stages

    /// Stage by id.
    #[must_use]
    pub fn stage(&self, id: &str) -> Option<Arc<Stage>> {
        self.stages.read().get(id).cloned()
    }

    /// Number of live stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.read().len()
    }

    /// Create a stage hosted by `host`.
    ///
    /// # Errors
    ///
    /// - `StageError::AlreadyExists` if the id is taken
    pub fn create_stage(
        &self,
        id: &str,
        capacity: u16,
        host: Option<u64>,
        password: Option<String>,
    ) -> Result<Arc<Stage>, StageError> {
        let mut stages = self.stages.write();
        if stages.contains_key(id) {
            return Err(StageError::AlreadyExists(id.to_string()));
        }

        let stage = Arc::new(Stage::new(id, capacity, host, password));
        stages.insert(id.to_string(), Arc::clone(&stage));
        tracing::debug!(stage = id, capacity, "stage created");
        Ok(stage)
    }

    /// Add `session` to the active members of `id`, creating the stage with
    /// the default capacity if it does not exist.
    ///
    /// Lookup and entry happen under the map lock so an emptiness sweep
    /// cannot remove the stage in between.
    pub fn enter_stage(&self, session: &Arc<Session>, player_id: u32, id: &str) -> Arc<Stage> {
        let mut stages = self.stages.write();
        let stage = Arc::clone(stages.entry(id.to_string()).or_insert_with(|| {
            tracing::debug!(stage = id, "stage created on entry");
            Arc::new(Stage::new(id, self.config.default_stage_capacity, None, None))
        }));
        stage.enter(session, player_id);
        stage
    }

    /// Remove `stage` from the registry if it is transient and empty.
    pub fn remove_stage_if_empty(&self, stage: &Arc<Stage>) -> bool {
        if !stage.is_transient() {
            return false;
        }

        let mut stages = self.stages.write();
        let registered = stages.get(stage.id()).is_some_and(|current| Arc::ptr_eq(current, stage));
        if registered && stage.is_empty() {
            stages.remove(stage.id());
            tracing::debug!(stage = stage.id(), "empty stage removed");
            return true;
        }
        false
    }

    /// Leave the session's current stage, removing its objects and the stage
    /// itself if it became empty. Returns the stage left.
    pub fn leave_current_stage(&self, session: &Arc<Session>) -> Option<Arc<Stage>> {
        let (stage, player_id) = {
            let mut state = session.state();
            (state.current_stage.take()?, state.player_id)
        };

        stage.depart(session.id(), player_id);
        self.remove_stage_if_empty(&stage);
        Some(stage)
    }

    /// Reserve a slot in stage `id` for `session`.
    ///
    /// A reservation held elsewhere is released first. The password last set
    /// on the session is presented.
    ///
    /// # Errors
    ///
    /// - `StageError::NotFound` if the stage does not exist
    /// - any error from [`Stage::reserve`]
    pub fn reserve_stage(&self, session: &Arc<Session>, id: &str, ready: u8) -> Result<Arc<Stage>, StageError> {
        let (player_id, password, previous) = {
            let state = session.state();
            (state.player_id, state.stage_pass.clone(), state.reservation.clone())
        };

        // Held across the reservation so the stage cannot be removed first.
        let stage = {
            let stages = self.stages.read();
            let stage = stages.get(id).ok_or_else(|| StageError::NotFound(id.to_string()))?;
            stage.reserve(player_id, ready, password.as_deref())?;
            Arc::clone(stage)
        };

        if let Some(previous) = previous.filter(|previous| !Arc::ptr_eq(previous, &stage)) {
            previous.unreserve(player_id);
            self.remove_stage_if_empty(&previous);
        }
        session.state().reservation = Some(Arc::clone(&stage));
        Ok(stage)
    }

    /// Drop the session's reservation, if any.
    pub fn unreserve_stage(&self, session: &Arc<Session>) -> bool {
        let (stage, player_id) = {
            let mut state = session.state();
            match state.reservation.take() {
                Some(stage) => (stage, state.player_id),
                None => return false,
            }
        };

        let held = stage.unreserve(player_id);
        self.remove_stage_if_empty(&stage);
        held
    }

    // Semaphores

    /// Semaphore by name.
    #[must_use]
    pub fn semaphore(&self, name: &str) -> Option<Arc<Semaphore>> {
        self.semaphores.read().get(name).cloned()
    }

    /// Number of live semaphores.
    #[must_use]
    pub fn semaphore_count(&self) -> usize {
        self.semaphores.read().len()
    }

    /// Create `name` if missing, then reserve a slot in it for `session`.
    ///
    /// Any semaphore the session already participates in is released first.
    ///
    /// # Errors
    ///
    /// - `SemaphoreError::Full` if no slot is free
    pub fn create_acquire_semaphore(
        &self,
        session: &Arc<Session>,
        name: &str,
        capacity: u16,
    ) -> Result<Arc<Semaphore>, SemaphoreError> {
        self.leave_other_semaphore(session, name);
        let player_id = session.player_id();

        let semaphore = {
            let mut semaphores = self.semaphores.write();
            let (semaphore, created) = match semaphores.get(name) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let id = {
                        let mut counter = self.next_semaphore_id.lock();
                        next_semaphore_id(&mut counter, |id| semaphores.values().any(|s| s.id() == id))
                    };
                    let created = Arc::new(Semaphore::new(name, id, capacity));
                    semaphores.insert(name.to_string(), Arc::clone(&created));
                    tracing::debug!(semaphore = name, id, capacity, "semaphore created");
                    (created, true)
                },
            };

            if let Err(e) = semaphore.reserve(player_id) {
                if created && semaphore.is_empty() {
                    semaphores.remove(name);
                }
                return Err(e);
            }
            semaphore
        };

        session.state().semaphore = Some(Arc::clone(&semaphore));
        Ok(semaphore)
    }

    /// Promote the session to an active participant of `name`.
    ///
    /// # Errors
    ///
    /// - `SemaphoreError::NotFound` if no such semaphore exists
    /// - `SemaphoreError::Full` if the caller holds no slot and none is free
    pub fn acquire_semaphore(&self, session: &Arc<Session>, name: &str) -> Result<Arc<Semaphore>, SemaphoreError> {
        if self.semaphore(name).is_none() {
            return Err(SemaphoreError::NotFound(name.to_string()));
        }
        self.leave_other_semaphore(session, name);

        let semaphore = {
            let semaphores = self.semaphores.read();
            let semaphore = semaphores.get(name).ok_or_else(|| SemaphoreError::NotFound(name.to_string()))?;
            semaphore.acquire(session, session.player_id())?;
            Arc::clone(semaphore)
        };

        session.state().semaphore = Some(Arc::clone(&semaphore));
        Ok(semaphore)
    }

    /// Leave the session's semaphore, removing it once empty.
    pub fn release_semaphore(&self, session: &Arc<Session>) -> bool {
        let (semaphore, player_id) = {
            let mut state = session.state();
            match state.semaphore.take() {
                Some(semaphore) => (semaphore, state.player_id),
                None => return false,
            }
        };

        let released = semaphore.release(session.id(), player_id);
        self.remove_semaphore_if_empty(&semaphore);
        released
    }

    /// Release the session's semaphore unless it is the one registered as
    /// `name`.
    fn leave_other_semaphore(&self, session: &Arc<Session>, name: &str) {
        let current = session.state().semaphore.clone();
        let Some(current) = current else { return };
        let registered = self.semaphore(name).is_some_and(|named| Arc::ptr_eq(&named, &current));
        if !registered {
            self.release_semaphore(session);
        }
    }

    fn remove_semaphore_if_empty(&self, semaphore: &Arc<Semaphore>) -> bool {
        let mut semaphores = self.semaphores.write();
        let registered = semaphores.get(semaphore.name()).is_some_and(|current| Arc::ptr_eq(current, semaphore));
        if registered && semaphore.is_empty() {
            semaphores.remove(semaphore.name());
            tracing::debug!(semaphore = semaphore.name(), "empty semaphore removed");
            return true;
        }
        false
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("bind_address", &self.config.bind_address)
            .field("sessions", &self.session_count())
            .field("stages", &self.stage_count())
            .field("semaphores", &self.semaphore_count())
            .finish_non_exhaustive()
    }
}
