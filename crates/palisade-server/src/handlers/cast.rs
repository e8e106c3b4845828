//! Binary message relay.

use std::sync::Arc;

use palisade_proto::packets::{BroadcastType, CastBinary, CastedBinary};

use super::{HandlerError, require_login};
use crate::{server::Server, session::Session};

/// Relay the caller's payload as a [`CastedBinary`] to the audience its
/// broadcast type names. Delivery is best-effort; the sender never receives
/// its own cast.
pub(super) async fn cast_binary(server: Arc<Server>, session: Arc<Session>, request: CastBinary) -> Result<(), HandlerError> {
    let Ok(sender_player_id) = require_login(&session) else {
        tracing::debug!(session = session.id(), "cast before login dropped");
        return Ok(());
    };
    let casted = CastedBinary {
        sender_player_id,
        broadcast_type: request.broadcast_type,
        message_type: request.message_type,
        data: request.data,
    };
    let ignored = Some(session.id());

    let delivered = match request.broadcast_type {
        BroadcastType::Targeted => request
            .targets
            .iter()
            .filter_map(|target| server.find_session_by_player_id(*target))
            .filter(|target| target.queue_send_mhf_non_blocking(&casted))
            .count(),
        BroadcastType::Stage => session.current_stage().map_or(0, |stage| stage.broadcast_mhf(&casted, ignored)),
        BroadcastType::Server => server.broadcast_mhf(&casted, ignored),
        BroadcastType::World => server.worldcast_mhf(&casted, ignored),
        BroadcastType::Semaphore => {
            let semaphore = session.state().semaphore.clone();
            semaphore.map_or(0, |semaphore| semaphore.broadcast_mhf(&casted, ignored))
        },
    };

    tracing::trace!(
        session = session.id(),
        broadcast = ?request.broadcast_type,
        message_type = request.message_type,
        delivered,
        "cast relayed"
    );
    Ok(())
}
