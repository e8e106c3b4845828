//! Built-in request handlers.
//!
//! Handlers answer user-level failures (full stage, unknown semaphore, ...)
//! themselves with a negative ack and return `Ok`. An `Err` return is a
//! fault: the dispatcher logs it and the session continues.

mod cast;
mod object;
mod semaphore;
mod session;
mod stage;

use palisade_proto::{ProtocolError, packets::AckPayload};
use thiserror::Error;

pub use self::stage::{BINARY_SENTINEL, BINARY_SENTINEL_KEY};
use crate::{dispatch::HandlerTable, semaphore::SemaphoreError, session::Session, stage::StageError};

/// Failure of a request handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Stage operation refused
    #[error(transparent)]
    Stage(#[from] StageError),

    /// Semaphore operation refused
    #[error(transparent)]
    Semaphore(#[from] SemaphoreError),

    /// Outbound packet could not be built
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Request requires a logged-in session
    #[error("session is not logged in")]
    NotLoggedIn,

    /// Login refused
    #[error("login refused: {0}")]
    LoginRefused(String),

    /// Unexpected server-side failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl HandlerError {
    /// Ack sent in place of a success payload.
    #[must_use]
    pub fn negative_ack(&self) -> AckPayload {
        AckPayload::fail_simple()
    }
}

/// Ack `result` on `session`, replacing an error with its negative ack.
pub(crate) fn reply(session: &Session, ack_handle: u32, result: Result<AckPayload, HandlerError>) {
    let payload = result.unwrap_or_else(|e| {
        tracing::debug!(session = session.id(), ack_handle, error = %e, "request refused");
        e.negative_ack()
    });
    session.queue_ack(ack_handle, payload);
}

/// Player id of a logged-in session.
pub(crate) fn require_login(session: &Session) -> Result<u32, HandlerError> {
    match session.player_id() {
        0 => Err(HandlerError::NotLoggedIn),
        player_id => Ok(player_id),
    }
}

/// Player id of a logged-in session, or `None` after answering
/// `ack_handle` with a negative ack.
pub(crate) fn login_or_refuse(session: &Session, ack_handle: u32) -> Option<u32> {
    match require_login(session) {
        Ok(player_id) => Some(player_id),
        Err(e) => {
            reply(session, ack_handle, Err(e));
            None
        },
    }
}

/// Table routing every built-in request opcode.
#[must_use]
pub fn default_table() -> HandlerTable {
    HandlerTable::new()
        .register("nop", session::nop)
        .register("ping", session::ping)
        .register("login", session::login)
        .register("logout", session::logout)
        .register("issue_logkey", session::issue_logkey)
        .register("set_stage_pass", stage::set_stage_pass)
        .register("create_stage", stage::create_stage)
        .register("reserve_stage", stage::reserve_stage)
        .register("unreserve_stage", stage::unreserve_stage)
        .register("enter_stage", stage::enter_stage)
        .register("move_stage", stage::move_stage)
        .register("back_stage", stage::back_stage)
        .register("lock_stage", stage::lock_stage)
        .register("unlock_stage", stage::unlock_stage)
        .register("set_stage_binary", stage::set_stage_binary)
        .register("get_stage_binary", stage::get_stage_binary)
        .register("wait_stage_binary", stage::wait_stage_binary)
        .register("create_object", object::create_object)
        .register("position_object", object::position_object)
        .register("cast_binary", cast::cast_binary)
        .register("create_acquire_semaphore", semaphore::create_acquire_semaphore)
        .register("acquire_semaphore", semaphore::acquire_semaphore)
        .register("release_semaphore", semaphore::release_semaphore)
        .register("check_semaphore", semaphore::check_semaphore)
}
