//! Object placement and movement within the caller's stage.

use std::sync::Arc;

use palisade_proto::packets::{AckPayload, CreateObject, DuplicateObject, PositionObject};

use super::{HandlerError, login_or_refuse, reply, require_login};
use crate::{server::Server, session::Session, stage::StageError};

/// Place an object owned by the caller. Acks the new id and replicates the
/// object to the rest of the stage.
pub(super) async fn create_object(
    _server: Arc<Server>,
    session: Arc<Session>,
    request: CreateObject,
) -> Result<(), HandlerError> {
    let Some(player_id) = login_or_refuse(&session, request.ack_handle) else { return Ok(()) };
    let Some(stage) = session.current_stage() else {
        reply(&session, request.ack_handle, Err(StageError::NoCurrentStage.into()));
        return Ok(());
    };

    let object = stage.create_object(player_id, request.position);
    session.queue_ack(request.ack_handle, AckPayload::ok_simple(object.id.to_be_bytes()));

    let notice = DuplicateObject {
        object_id: object.id,
        owner_player_id: object.owner_player_id,
        position: object.position,
    };
    stage.broadcast_mhf(&notice, Some(session.id()));
    Ok(())
}

/// Move one of the caller's objects and relay the new position. No reply.
pub(super) async fn position_object(
    _server: Arc<Server>,
    session: Arc<Session>,
    request: PositionObject,
) -> Result<(), HandlerError> {
    let Ok(player_id) = require_login(&session) else {
        tracing::debug!(session = session.id(), "position update before login dropped");
        return Ok(());
    };
    let Some(stage) = session.current_stage() else {
        tracing::debug!(session = session.id(), "position update outside a stage");
        return Ok(());
    };

    match stage.move_object(player_id, request.object_id, request.position) {
        Ok(()) => {
            stage.broadcast_mhf(&request, Some(session.id()));
        },
        Err(e) => {
            tracing::debug!(session = session.id(), error = %e, "position update refused");
        },
    }
    Ok(())
}
