//! Named capacity gates for cross-stage activities.
//!
//! Participation is two-step like a stage: a player reserves a slot by
//! player id, then acquires it as an active participant by connection.
//! Only active participants receive semaphore broadcasts.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use bytes::Bytes;
use palisade_proto::Packet;
use parking_lot::RwLock;
use thiserror::Error;

use crate::session::Session;

/// Semaphore operation failures, each answered with a negative ack.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SemaphoreError {
    /// No semaphore with this name
    #[error("semaphore {0} not found")]
    NotFound(String),

    /// Reserved + active has reached capacity
    #[error("semaphore {name} is full (capacity {capacity})")]
    Full {
        /// Semaphore name
        name: String,
        /// Capacity
        capacity: u16,
    },
}

/// First numeric semaphore id. Ids below it are reserved by the client.
pub const SEMAPHORE_ID_SEED: u32 = 7;

/// Take the next numeric id from `counter`, skipping ids `in_use` reports.
///
/// The counter wraps back to [`SEMAPHORE_ID_SEED`] after `u32::MAX`. The
/// caller must ensure fewer than `u32::MAX - SEMAPHORE_ID_SEED` ids are in
/// use, or this never returns.
pub fn next_semaphore_id(counter: &mut u32, in_use: impl Fn(u32) -> bool) -> u32 {
    loop {
        let candidate = (*counter).max(SEMAPHORE_ID_SEED);
        *counter = if candidate == u32::MAX { SEMAPHORE_ID_SEED } else { candidate + 1 };
        if !in_use(candidate) {
            return candidate;
        }
    }
}

#[derive(Debug)]
struct SemaphoreState {
    /// Connection id → (player id, session)
    active: HashMap<u64, (u32, Arc<Session>)>,
    /// Player ids holding a reserved slot
    reserved: HashSet<u32>,
    capacity: u16,
}

/// Capacity gate shared by players across stages.
#[derive(Debug)]
pub struct Semaphore {
    name: String,
    id: u32,
    state: RwLock<SemaphoreState>,
}

impl Semaphore {
    /// New empty semaphore.
    pub fn new(name: impl Into<String>, id: u32, capacity: u16) -> Self {
        Self {
            name: name.into(),
            id,
            state: RwLock::new(SemaphoreState {
                active: HashMap::new(),
                reserved: HashSet::new(),
                capacity,
            }),
        }
    }

    /// Client-supplied name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Server-assigned numeric id.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Maximum reserved + active participants.
    #[must_use]
    pub fn capacity(&self) -> u16 {
        self.state.read().capacity
    }

    /// Number of active participants.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.state.read().active.len()
    }

    /// Number of reserved slots.
    #[must_use]
    pub fn reserved_count(&self) -> usize {
        self.state.read().reserved.len()
    }

    /// Whether nobody is reserved or active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let state = self.state.read();
        state.active.is_empty() && state.reserved.is_empty()
    }

    /// Reserve a slot for `player_id`. Succeeds without change if the player
    /// already holds one.
    ///
    /// # Errors
    ///
    /// - `Full` if reserved + active has reached capacity
    pub fn reserve(&self, player_id: u32) -> Result<(), SemaphoreError> {
        let mut state = self.state.write();
        if state.reserved.contains(&player_id) || state.active.values().any(|(p, _)| *p == player_id) {
            return Ok(());
        }
        if state.reserved.len() + state.active.len() >= usize::from(state.capacity) {
            return Err(SemaphoreError::Full { name: self.name.clone(), capacity: state.capacity });
        }
        state.reserved.insert(player_id);
        Ok(())
    }

    /// Make `session` an active participant.
    ///
    /// A reserved slot held by `player_id` is promoted; otherwise a free slot
    /// is taken.
    ///
    /// # Errors
    ///
    /// - `Full` if there is no reserved slot and no free capacity
    pub fn acquire(&self, session: &Arc<Session>, player_id: u32) -> Result<(), SemaphoreError> {
        let mut state = self.state.write();
        if state.active.contains_key(&session.id()) {
            return Ok(());
        }
        if !state.reserved.remove(&player_id)
            && state.reserved.len() + state.active.len() >= usize::from(state.capacity)
        {
            return Err(SemaphoreError::Full { name: self.name.clone(), capacity: state.capacity });
        }
        state.active.insert(session.id(), (player_id, Arc::clone(session)));
        Ok(())
    }

    /// Remove the caller from whichever set holds it. Returns whether it was
    /// a participant.
    pub fn release(&self, connection_id: u64, player_id: u32) -> bool {
        let mut state = self.state.write();
        let was_active = state.active.remove(&connection_id).is_some();
        let was_reserved = state.reserved.remove(&player_id);
        was_active || was_reserved
    }

    fn active_sessions(&self, ignored: Option<u64>) -> Vec<Arc<Session>> {
        self.state
            .read()
            .active
            .iter()
            .filter(|(id, _)| Some(**id) != ignored)
            .map(|(_, (_, session))| Arc::clone(session))
            .collect()
    }

    /// Send `packet` to every active participant except `ignored`.
    ///
    /// Reserved-only players are excluded. Returns the number of recipients
    /// that accepted it.
    pub fn broadcast_mhf<P: Packet>(&self, packet: &P, ignored: Option<u64>) -> usize {
        self.active_sessions(ignored)
            .into_iter()
            .filter(|session| session.queue_send_mhf_non_blocking(packet))
            .count()
    }

    /// Send prebuilt `data` to every active participant except `ignored`.
    pub fn broadcast_ravi(&self, data: &Bytes, ignored: Option<u64>) -> usize {
        self.active_sessions(ignored)
            .into_iter()
            .filter(|session| session.queue_send_non_blocking(data.clone()))
            .count()
    }
}
