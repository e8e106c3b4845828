//! Stage membership, objects and binary state.
//!
//! A stage is a named game area. Players first hold a *reserved* slot (by
//! player id), then become *active* members (by connection) when they enter.
//! Objects placed in a stage belong to one player and disappear when that
//! player leaves.
//!
//! # Invariants
//!
//! - `active + reserved <= capacity` whenever a reservation is granted.
//!   Entering does not check capacity, so the sum may briefly exceed it
//!   while an entering player still holds a slot elsewhere.
//! - A departing player's objects are removed in the same critical section
//!   as its membership, and their deletion is broadcast after the lock is
//!   released.
//! - No broadcast happens under the stage lock: [`Stage::broadcast_mhf`]
//!   snapshots the members and releases the lock before enqueueing.

use std::{collections::HashMap, sync::Arc};

use bytes::Bytes;
use palisade_proto::{
    Packet,
    packets::{DeleteObject, Position},
};
use parking_lot::RwLock;
use thiserror::Error;

use crate::session::Session;

/// Stage operation failures, each answered with a negative ack.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StageError {
    /// A stage with this id is already registered
    #[error("stage {0} already exists")]
    AlreadyExists(String),

    /// No stage with this id
    #[error("stage {0} not found")]
    NotFound(String),

    /// Reservation would exceed capacity
    #[error("stage {stage} is full (capacity {capacity})")]
    Full {
        /// Stage id
        stage: String,
        /// Stage capacity
        capacity: u16,
    },

    /// Stage is closed to new reservations
    #[error("stage {0} is locked")]
    Locked(String),

    /// Caller's stage password does not match
    #[error("wrong password for stage {0}")]
    WrongPassword(String),

    /// Operation reserved for the stage host
    #[error("caller does not host stage {0}")]
    NotHost(String),

    /// Caller is not in any stage
    #[error("caller is not in a stage")]
    NoCurrentStage,

    /// Navigation stack is empty
    #[error("no previous stage to return to")]
    NoPreviousStage,

    /// No object with this id in the stage
    #[error("object {0} not found")]
    ObjectNotFound(u32),

    /// Object belongs to another player
    #[error("object {object_id} is not owned by player {player_id}")]
    NotObjectOwner {
        /// Object id
        object_id: u32,
        /// Caller's player id
        player_id: u32,
    },

    /// No blob stored under the key
    #[error("no binary ({type0}, {type1}) in stage {stage}")]
    BinaryNotFound {
        /// Stage id
        stage: String,
        /// First key byte
        type0: u8,
        /// Second key byte
        type1: u8,
    },
}

/// Category of a stage, derived from its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Persistent town area
    Town,
    /// Quest instance
    Quest,
    /// Player-created room
    Room,
    /// Guild hall instance
    Guild,
    /// Matchmaking lobby
    Lobby,
}

impl StageKind {
    /// Classify a stage id.
    ///
    /// Ids may carry an `sl<digit>` prefix; the first character after it
    /// selects the kind (`Q`uest, `R`oom, `G`uild, `L`obby). Anything else
    /// is a town.
    pub fn from_id(id: &str) -> Self {
        let bytes = id.as_bytes();
        let rest = match bytes {
            [b's', b'l', digit, rest @ ..] if digit.is_ascii_digit() => rest,
            _ => bytes,
        };

        match rest.first() {
            Some(b'Q') => Self::Quest,
            Some(b'R') => Self::Room,
            Some(b'G') => Self::Guild,
            Some(b'L') => Self::Lobby,
            _ => Self::Town,
        }
    }

    /// Whether stages of this kind are destroyed once empty.
    #[must_use]
    pub fn is_transient(self) -> bool {
        !matches!(self, Self::Town)
    }
}

/// Object placed in a stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageObject {
    /// Stage-local id
    pub id: u32,
    /// Owning player
    pub owner_player_id: u32,
    /// Current position
    pub position: Position,
}

#[derive(Debug, Clone)]
struct ActiveMember {
    player_id: u32,
    session: Arc<Session>,
}

#[derive(Debug)]
struct StageState {
    /// Connection id → member
    active: HashMap<u64, ActiveMember>,
    /// Player id → ready flag
    reserved: HashMap<u32, u8>,
    objects: HashMap<u32, StageObject>,
    binaries: HashMap<(u8, u8), Bytes>,
    host: Option<u64>,
    capacity: u16,
    password: Option<String>,
    locked: bool,
    next_object_id: u32,
}

/// A named game area.
#[derive(Debug)]
pub struct Stage {
    id: String,
    kind: StageKind,
    state: RwLock<StageState>,
}

impl Stage {
    /// New empty stage.
    ///
    /// `host` is the creating connection, if any; an empty `password` means
    /// none.
    pub fn new(id: impl Into<String>, capacity: u16, host: Option<u64>, password: Option<String>) -> Self {
        let id = id.into();
        let kind = StageKind::from_id(&id);
        Self {
            id,
            kind,
            state: RwLock::new(StageState {
                active: HashMap::new(),
                reserved: HashMap::new(),
                objects: HashMap::new(),
                binaries: HashMap::new(),
                host,
                capacity,
                password: password.filter(|p| !p.is_empty()),
                locked: false,
                next_object_id: 1,
            }),
        }
    }

    /// Stage id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Kind derived from the id.
    #[must_use]
    pub fn kind(&self) -> StageKind {
        self.kind
    }

    /// Whether the stage is destroyed once empty.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// Maximum active + reserved members.
    #[must_use]
    pub fn capacity(&self) -> u16 {
        self.state.read().capacity
    }

    /// Hosting connection.
    #[must_use]
    pub fn host(&self) -> Option<u64> {
        self.state.read().host
    }

    /// Whether reservations are closed.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.state.read().locked
    }

    /// Number of active members.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.state.read().active.len()
    }

    /// Number of reserved slots.
    #[must_use]
    pub fn reserved_count(&self) -> usize {
        self.state.read().reserved.len()
    }

    /// Whether there are neither active members nor reservations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let state = self.state.read();
        state.active.is_empty() && state.reserved.is_empty()
    }

    /// Whether `connection_id` is an active member.
    #[must_use]
    pub fn is_active(&self, connection_id: u64) -> bool {
        self.state.read().active.contains_key(&connection_id)
    }

    /// Whether `player_id` holds a reserved slot.
    #[must_use]
    pub fn is_reserved(&self, player_id: u32) -> bool {
        self.state.read().reserved.contains_key(&player_id)
    }

    /// Ready flag of `player_id`'s reservation.
    #[must_use]
    pub fn ready_flag(&self, player_id: u32) -> Option<u8> {
        self.state.read().reserved.get(&player_id).copied()
    }

    /// Reserve a slot for `player_id`, or update the ready flag of the slot
    /// it already holds.
    ///
    /// # Errors
    ///
    /// - `Locked` if the stage is locked
    /// - `WrongPassword` if the stage has a password and `password` differs
    /// - `Full` if `active + reserved` has reached capacity
    pub fn reserve(&self, player_id: u32, ready: u8, password: Option<&str>) -> Result<(), StageError> {
        let mut state = self.state.write();

        if let Some(flag) = state.reserved.get_mut(&player_id) {
            *flag = ready;
            return Ok(());
        }

        if state.locked {
            return Err(StageError::Locked(self.id.clone()));
        }
        if let Some(expected) = &state.password {
            if password != Some(expected.as_str()) {
                return Err(StageError::WrongPassword(self.id.clone()));
            }
        }
        if state.active.len() + state.reserved.len() >= usize::from(state.capacity) {
            return Err(StageError::Full { stage: self.id.clone(), capacity: state.capacity });
        }

        state.reserved.insert(player_id, ready);
        Ok(())
    }

    /// Drop `player_id`'s reservation. Returns whether one existed.
    pub fn unreserve(&self, player_id: u32) -> bool {
        self.state.write().reserved.remove(&player_id).is_some()
    }

    /// Add `session` as an active member, consuming its reservation here.
    pub fn enter(&self, session: &Arc<Session>, player_id: u32) {
        let mut state = self.state.write();
        state.reserved.remove(&player_id);
        state.active.insert(session.id(), ActiveMember { player_id, session: Arc::clone(session) });
        if state.host.is_none() {
            state.host = Some(session.id());
        }
    }

    /// Remove `connection_id` and every object owned by `player_id`.
    ///
    /// Object deletions are broadcast to the remaining members after the
    /// lock is released. Returns the removed object ids.
    pub fn depart(&self, connection_id: u64, player_id: u32) -> Vec<u32> {
        let removed = {
            let mut state = self.state.write();
            state.active.remove(&connection_id);
            if state.host == Some(connection_id) {
                state.host = None;
            }

            let mut removed: Vec<u32> = state
                .objects
                .values()
                .filter(|object| object.owner_player_id == player_id)
                .map(|object| object.id)
                .collect();
            removed.sort_unstable();
            for id in &removed {
                state.objects.remove(id);
            }
            removed
        };

        for object_id in &removed {
            self.broadcast_mhf(&DeleteObject { object_id: *object_id }, Some(connection_id));
        }

        removed
    }

    /// Place an object owned by `owner_player_id`. Returns its id.
    pub fn create_object(&self, owner_player_id: u32, position: Position) -> StageObject {
        let mut state = self.state.write();
        let id = state.next_object_id;
        state.next_object_id = state.next_object_id.wrapping_add(1).max(1);

        let object = StageObject { id, owner_player_id, position };
        state.objects.insert(id, object.clone());
        object
    }

    /// Move an object owned by `player_id`.
    ///
    /// # Errors
    ///
    /// - `ObjectNotFound` if no such object exists
    /// - `NotObjectOwner` if another player owns it
    pub fn move_object(&self, player_id: u32, object_id: u32, position: Position) -> Result<(), StageError> {
        let mut state = self.state.write();
        let object = state.objects.get_mut(&object_id).ok_or(StageError::ObjectNotFound(object_id))?;
        if object.owner_player_id != player_id {
            return Err(StageError::NotObjectOwner { object_id, player_id });
        }
        object.position = position;
        Ok(())
    }

    /// Objects owned by anyone other than `player_id`, ordered by id.
    #[must_use]
    pub fn objects_not_owned_by(&self, player_id: u32) -> Vec<StageObject> {
        let mut objects: Vec<StageObject> = self
            .state
            .read()
            .objects
            .values()
            .filter(|object| object.owner_player_id != player_id)
            .cloned()
            .collect();
        objects.sort_unstable_by_key(|object| object.id);
        objects
    }

    /// First object (lowest id) owned by `player_id`.
    #[must_use]
    pub fn object_by_owner(&self, player_id: u32) -> Option<StageObject> {
        self.state
            .read()
            .objects
            .values()
            .filter(|object| object.owner_player_id == player_id)
            .min_by_key(|object| object.id)
            .cloned()
    }

    /// Number of objects in the stage.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.state.read().objects.len()
    }

    /// Store a blob under `(type0, type1)`, replacing any previous one.
    pub fn set_binary(&self, type0: u8, type1: u8, data: Bytes) {
        self.state.write().binaries.insert((type0, type1), data);
    }

    /// Blob stored under `(type0, type1)`.
    #[must_use]
    pub fn binary(&self, type0: u8, type1: u8) -> Option<Bytes> {
        self.state.read().binaries.get(&(type0, type1)).cloned()
    }

    /// Close or reopen the stage to new reservations. Host only.
    ///
    /// # Errors
    ///
    /// - `NotHost` if `connection_id` does not host the stage
    pub fn set_locked(&self, connection_id: u64, locked: bool) -> Result<(), StageError> {
        let mut state = self.state.write();
        if state.host != Some(connection_id) {
            return Err(StageError::NotHost(self.id.clone()));
        }
        state.locked = locked;
        Ok(())
    }

    /// Active members other than `ignored`, snapshotted under the read lock.
    #[must_use]
    pub fn members(&self, ignored: Option<u64>) -> Vec<Arc<Session>> {
        self.state
            .read()
            .active
            .iter()
            .filter(|(id, _)| Some(**id) != ignored)
            .map(|(_, member)| Arc::clone(&member.session))
            .collect()
    }

    /// Player ids of active members.
    #[must_use]
    pub fn member_player_ids(&self) -> Vec<u32> {
        self.state.read().active.values().map(|member| member.player_id).collect()
    }

    /// Send `packet` to every active member except `ignored`.
    ///
    /// Builds per recipient (protocol versions differ) and enqueues
    /// non-blocking. Returns the number of recipients that accepted it.
    pub fn broadcast_mhf<P: Packet>(&self, packet: &P, ignored: Option<u64>) -> usize {
        self.members(ignored)
            .into_iter()
            .filter(|session| session.queue_send_mhf_non_blocking(packet))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_id() {
        assert_eq!(StageKind::from_id("Q1"), StageKind::Quest);
        assert_eq!(StageKind::from_id("sl1Qs202p0a0u0"), StageKind::Quest);
        assert_eq!(StageKind::from_id("sl2Rs00001"), StageKind::Room);
        assert_eq!(StageKind::from_id("Gh7"), StageKind::Guild);
        assert_eq!(StageKind::from_id("Ls3"), StageKind::Lobby);
        assert_eq!(StageKind::from_id("sl1Ns200p0a0u0"), StageKind::Town);
        assert_eq!(StageKind::from_id(""), StageKind::Town);
        // "sl" without a digit is not a prefix
        assert_eq!(StageKind::from_id("slQ"), StageKind::Town);
    }

    #[test]
    fn transient_kinds() {
        assert!(StageKind::Quest.is_transient());
        assert!(StageKind::Lobby.is_transient());
        assert!(!StageKind::Town.is_transient());
    }

    #[test]
    fn fifth_reservation_on_capacity_four_fails() {
        let stage = Stage::new("Q1", 4, None, None);
        for player in 1..=4 {
            stage.reserve(player, 0, None).unwrap();
        }

        let result = stage.reserve(5, 0, None);
        assert_eq!(result, Err(StageError::Full { stage: "Q1".into(), capacity: 4 }));
        assert_eq!(stage.reserved_count(), 4);
    }

    #[test]
    fn re_reserving_updates_ready_flag() {
        let stage = Stage::new("Q1", 1, None, None);
        stage.reserve(7, 0, None).unwrap();
        stage.reserve(7, 1, None).unwrap();

        assert_eq!(stage.reserved_count(), 1);
        assert_eq!(stage.ready_flag(7), Some(1));
    }

    #[test]
    fn password_is_checked() {
        let stage = Stage::new("R1", 4, None, Some("hunter2".into()));
        assert_eq!(stage.reserve(1, 0, None), Err(StageError::WrongPassword("R1".into())));
        assert_eq!(stage.reserve(1, 0, Some("nope")), Err(StageError::WrongPassword("R1".into())));
        assert!(stage.reserve(1, 0, Some("hunter2")).is_ok());
    }

    #[test]
    fn empty_password_means_none() {
        let stage = Stage::new("R1", 4, None, Some(String::new()));
        assert!(stage.reserve(1, 0, None).is_ok());
    }

    #[test]
    fn locked_stage_rejects_new_reservations_only() {
        let stage = Stage::new("Q1", 4, Some(10), None);
        stage.reserve(1, 0, None).unwrap();
        stage.set_locked(10, true).unwrap();

        assert_eq!(stage.reserve(2, 0, None), Err(StageError::Locked("Q1".into())));
        assert!(stage.reserve(1, 1, None).is_ok());
    }

    #[test]
    fn only_host_can_lock() {
        let stage = Stage::new("Q1", 4, Some(10), None);
        assert_eq!(stage.set_locked(11, true), Err(StageError::NotHost("Q1".into())));
        assert!(!stage.is_locked());
    }

    #[test]
    fn objects_have_owners() {
        let stage = Stage::new("sl1Ns200p0a0u0", 10, None, None);
        let a = stage.create_object(1, Position::new(1.0, 2.0, 3.0));
        let b = stage.create_object(2, Position::default());

        assert_ne!(a.id, b.id);
        assert_eq!(stage.objects_not_owned_by(1), vec![b.clone()]);
        assert_eq!(stage.object_by_owner(2), Some(b.clone()));

        assert_eq!(
            stage.move_object(1, b.id, Position::default()),
            Err(StageError::NotObjectOwner { object_id: b.id, player_id: 1 })
        );
        assert!(stage.move_object(2, b.id, Position::new(5.0, 5.0, 5.0)).is_ok());
        assert_eq!(stage.move_object(2, 999, Position::default()), Err(StageError::ObjectNotFound(999)));
    }

    #[test]
    fn depart_removes_owned_objects() {
        let stage = Stage::new("Q1", 4, None, None);
        stage.create_object(1, Position::default());
        stage.create_object(1, Position::default());
        let kept = stage.create_object(2, Position::default());

        let removed = stage.depart(100, 1);
        assert_eq!(removed.len(), 2);
        assert_eq!(stage.object_count(), 1);
        assert_eq!(stage.object_by_owner(2), Some(kept));
    }

    #[test]
    fn binaries_are_keyed_by_type_pair() {
        let stage = Stage::new("Q1", 4, None, None);
        stage.set_binary(1, 2, Bytes::from_static(b"a"));
        stage.set_binary(2, 1, Bytes::from_static(b"b"));

        assert_eq!(stage.binary(1, 2), Some(Bytes::from_static(b"a")));
        assert_eq!(stage.binary(2, 1), Some(Bytes::from_static(b"b")));
        assert_eq!(stage.binary(3, 3), None);
    }
}
