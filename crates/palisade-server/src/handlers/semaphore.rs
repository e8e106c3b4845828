//! Semaphore handlers. Successful acks carry the numeric semaphore id.

use std::sync::Arc;

use palisade_proto::packets::{AcquireSemaphore, AckPayload, CheckSemaphore, CreateAcquireSemaphore, ReleaseSemaphore};

use super::{HandlerError, login_or_refuse, reply};
use crate::{server::Server, session::Session};

pub(super) async fn create_acquire_semaphore(
    server: Arc<Server>,
    session: Arc<Session>,
    request: CreateAcquireSemaphore,
) -> Result<(), HandlerError> {
    if login_or_refuse(&session, request.ack_handle).is_none() {
        return Ok(());
    }
    let result = server
        .create_acquire_semaphore(&session, &request.semaphore_id, request.capacity)
        .map(|semaphore| AckPayload::ok_simple(semaphore.id().to_be_bytes()))
        .map_err(HandlerError::from);

    reply(&session, request.ack_handle, result);
    Ok(())
}

pub(super) async fn acquire_semaphore(
    server: Arc<Server>,
    session: Arc<Session>,
    request: AcquireSemaphore,
) -> Result<(), HandlerError> {
    if login_or_refuse(&session, request.ack_handle).is_none() {
        return Ok(());
    }
    let result = server
        .acquire_semaphore(&session, &request.semaphore_id)
        .map(|semaphore| AckPayload::ok_simple(semaphore.id().to_be_bytes()))
        .map_err(HandlerError::from);

    reply(&session, request.ack_handle, result);
    Ok(())
}

pub(super) async fn release_semaphore(
    server: Arc<Server>,
    session: Arc<Session>,
    request: ReleaseSemaphore,
) -> Result<(), HandlerError> {
    server.release_semaphore(&session);
    session.queue_ack(request.ack_handle, AckPayload::ok_simple([0; 4]));
    Ok(())
}

/// Ack `00 00 00 01` if the semaphore exists, zeros otherwise.
pub(super) async fn check_semaphore(
    server: Arc<Server>,
    session: Arc<Session>,
    request: CheckSemaphore,
) -> Result<(), HandlerError> {
    let exists = server.semaphore(&request.semaphore_id).is_some();
    session.queue_ack(request.ack_handle, AckPayload::ok_simple([0, 0, 0, u8::from(exists)]));
    Ok(())
}
