//! Stage handlers: membership, navigation, locking and binary relay.

use std::sync::Arc;

use bytes::BytesMut;
use palisade_proto::{
    encode_packet,
    packets::{
        AckPayload, BackStage, CleanupObject, CreateStage, DuplicateObject, EnterStage, GetStageBinary, InsertUser,
        LockStage, MoveStage, ReserveStage, SetStageBinary, SetStagePass, StageBinaryKey, UnlockStage, UnreserveStage,
        WaitStageBinary,
    },
};

use super::{HandlerError, login_or_refuse, reply};
use crate::{
    server::Server,
    session::Session,
    stage::{Stage, StageError},
};

/// Binary key answered with [`BINARY_SENTINEL`] without a lookup.
pub const BINARY_SENTINEL_KEY: (u8, u8) = (1, 12);

/// Fixed reply to a read of [`BINARY_SENTINEL_KEY`].
pub const BINARY_SENTINEL: [u8; 8] = [0x04, 0, 0, 0, 0, 0, 0, 0];

pub(super) async fn set_stage_pass(
    _server: Arc<Server>,
    session: Arc<Session>,
    request: SetStagePass,
) -> Result<(), HandlerError> {
    session.state().stage_pass = Some(request.password);
    Ok(())
}

pub(super) async fn create_stage(
    server: Arc<Server>,
    session: Arc<Session>,
    request: CreateStage,
) -> Result<(), HandlerError> {
    if login_or_refuse(&session, request.ack_handle).is_none() {
        return Ok(());
    }
    let password = Some(request.password).filter(|p| !p.is_empty());
    let result = server
        .create_stage(&request.stage_id, request.capacity, Some(session.id()), password)
        .map(|_| AckPayload::ok_simple([0; 4]))
        .map_err(HandlerError::from);

    reply(&session, request.ack_handle, result);
    Ok(())
}

pub(super) async fn reserve_stage(
    server: Arc<Server>,
    session: Arc<Session>,
    request: ReserveStage,
) -> Result<(), HandlerError> {
    if login_or_refuse(&session, request.ack_handle).is_none() {
        return Ok(());
    }
    let result = server
        .reserve_stage(&session, &request.stage_id, request.ready)
        .map(|_| AckPayload::ok_simple([0; 4]))
        .map_err(HandlerError::from);

    reply(&session, request.ack_handle, result);
    Ok(())
}

pub(super) async fn unreserve_stage(
    server: Arc<Server>,
    session: Arc<Session>,
    _request: UnreserveStage,
) -> Result<(), HandlerError> {
    server.unreserve_stage(&session);
    Ok(())
}

pub(super) async fn enter_stage(server: Arc<Server>, session: Arc<Session>, request: EnterStage) -> Result<(), HandlerError> {
    let Some(player_id) = login_or_refuse(&session, request.ack_handle) else { return Ok(()) };
    do_stage_transfer(&server, &session, player_id, request.ack_handle, &request.stage_id, true)
}

pub(super) async fn move_stage(server: Arc<Server>, session: Arc<Session>, request: MoveStage) -> Result<(), HandlerError> {
    let Some(player_id) = login_or_refuse(&session, request.ack_handle) else { return Ok(()) };
    do_stage_transfer(&server, &session, player_id, request.ack_handle, &request.stage_id, true)
}

/// Return to the most recently departed stage.
pub(super) async fn back_stage(server: Arc<Server>, session: Arc<Session>, request: BackStage) -> Result<(), HandlerError> {
    let Some(player_id) = login_or_refuse(&session, request.ack_handle) else { return Ok(()) };
    let previous = session.state().nav_stack.pop();
    match previous {
        Some(stage_id) => do_stage_transfer(&server, &session, player_id, request.ack_handle, &stage_id, false),
        None => {
            reply(&session, request.ack_handle, Err(StageError::NoPreviousStage.into()));
            Ok(())
        },
    }
}

/// Move `session` into `stage_id`.
///
/// Leaves the current stage first (its objects are removed and the removal
/// broadcast), enters the target, creating it if needed, then queues a
/// cleanup, the success ack and, on the first entry of this connection, one
/// replication item for every other player and every foreign object. The
/// replication item is queued even when empty.
fn do_stage_transfer(
    server: &Server,
    session: &Arc<Session>,
    player_id: u32,
    ack_handle: u32,
    stage_id: &str,
    push_nav: bool,
) -> Result<(), HandlerError> {

    let already_here = session.state().current_stage_id() == Some(stage_id);
    let departed = if already_here { None } else { server.leave_current_stage(session) };

    let stage = server.enter_stage(session, player_id, stage_id);
    let first_entry = {
        let mut state = session.state();
        state.current_stage = Some(Arc::clone(&stage));
        if state.reservation.as_ref().is_some_and(|reserved| Arc::ptr_eq(reserved, &stage)) {
            state.reservation = None;
        }
        if let Some(departed) = departed.filter(|_| push_nav) {
            state.nav_stack.push(departed.id().to_string());
        }
        !std::mem::replace(&mut state.first_entry_done, true)
    };

    tracing::debug!(session = session.id(), player_id, stage = stage_id, first_entry, "entered stage");

    session.queue_send_mhf(&CleanupObject);
    session.queue_ack(ack_handle, AckPayload::ok_simple([0; 4]));

    if first_entry {
        let replication = replicate_world(server, session, &stage, player_id)?;
        session.queue_send(replication.freeze());
    }
    Ok(())
}

/// Every other logged-in player on the channel, then every object in
/// `stage` owned by someone else, as one queue item.
fn replicate_world(
    server: &Server,
    session: &Session,
    stage: &Stage,
    player_id: u32,
) -> Result<BytesMut, HandlerError> {
    let ctx = session.context();
    let mut buf = BytesMut::new();

    let mut others: Vec<(u32, String)> = server
        .sessions()
        .into_iter()
        .filter(|other| other.id() != session.id())
        .map(|other| (other.player_id(), other.name()))
        .filter(|(other_id, _)| *other_id != 0)
        .collect();
    others.sort_unstable_by_key(|(other_id, _)| *other_id);

    for (other_id, name) in others {
        encode_packet(&InsertUser { player_id: other_id, name }, &ctx, &mut buf)?;
    }
    for object in stage.objects_not_owned_by(player_id) {
        let packet = DuplicateObject {
            object_id: object.id,
            owner_player_id: object.owner_player_id,
            position: object.position,
        };
        encode_packet(&packet, &ctx, &mut buf)?;
    }
    Ok(buf)
}

/// Close the named stage to new reservations. Host only.
pub(super) async fn lock_stage(server: Arc<Server>, session: Arc<Session>, request: LockStage) -> Result<(), HandlerError> {
    let result = server
        .stage(&request.stage_id)
        .ok_or_else(|| StageError::NotFound(request.stage_id.clone()))
        .and_then(|stage| stage.set_locked(session.id(), true))
        .map(|()| AckPayload::ok_simple([0; 4]))
        .map_err(HandlerError::from);

    reply(&session, request.ack_handle, result);
    Ok(())
}

/// Reopen the caller's reserved stage. No reply.
pub(super) async fn unlock_stage(
    _server: Arc<Server>,
    session: Arc<Session>,
    _request: UnlockStage,
) -> Result<(), HandlerError> {
    let reservation = session.state().reservation.clone();
    let Some(stage) = reservation else {
        tracing::debug!(session = session.id(), "unlock without a reserved stage");
        return Ok(());
    };

    if let Err(e) = stage.set_locked(session.id(), false) {
        tracing::debug!(session = session.id(), error = %e, "unlock refused");
    }
    Ok(())
}

pub(super) async fn set_stage_binary(
    server: Arc<Server>,
    session: Arc<Session>,
    request: SetStageBinary,
) -> Result<(), HandlerError> {
    match server.stage(&request.stage_id) {
        Some(stage) => stage.set_binary(request.type0, request.type1, request.data),
        None => {
            tracing::debug!(session = session.id(), stage = %request.stage_id, "binary set on unknown stage");
        },
    }
    Ok(())
}

pub(super) async fn get_stage_binary(
    server: Arc<Server>,
    session: Arc<Session>,
    request: GetStageBinary,
) -> Result<(), HandlerError> {
    let GetStageBinary(key) = request;
    let payload = match lookup_binary(&server, &key) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::debug!(session = session.id(), error = %e, "binary get refused");
            AckPayload::fail_buffer()
        },
    };

    session.queue_ack(key.ack_handle, payload);
    Ok(())
}

/// Poll for a binary up to `binary_wait_attempts` times, sleeping
/// `binary_wait_interval` between polls. Acks an empty buffer when the
/// attempts run out.
pub(super) async fn wait_stage_binary(
    server: Arc<Server>,
    session: Arc<Session>,
    request: WaitStageBinary,
) -> Result<(), HandlerError> {
    let WaitStageBinary(key) = request;
    let attempts = server.config().binary_wait_attempts;
    let interval = server.config().binary_wait_interval();

    for attempt in 1..=attempts {
        if let Ok(payload) = lookup_binary(&server, &key) {
            session.queue_ack(key.ack_handle, payload);
            return Ok(());
        }
        if attempt < attempts {
            tokio::time::sleep(interval).await;
        }
    }

    tracing::debug!(
        session = session.id(),
        stage = %key.stage_id,
        type0 = key.type0,
        type1 = key.type1,
        attempts,
        "binary wait exhausted"
    );
    session.queue_ack(key.ack_handle, AckPayload::ok_buffer(Vec::new()));
    Ok(())
}

fn lookup_binary(server: &Server, key: &StageBinaryKey) -> Result<AckPayload, StageError> {
    if (key.type0, key.type1) == BINARY_SENTINEL_KEY {
        return Ok(AckPayload::ok_buffer(BINARY_SENTINEL.to_vec()));
    }

    let stage = server.stage(&key.stage_id).ok_or_else(|| StageError::NotFound(key.stage_id.clone()))?;
    stage.binary(key.type0, key.type1).map(AckPayload::ok_buffer).ok_or_else(|| StageError::BinaryNotFound {
        stage: key.stage_id.clone(),
        type0: key.type0,
        type1: key.type1,
    })
}
