//! Connection-level handlers.

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use palisade_proto::{
    ClientContext,
    packets::{AckPayload, IssueLogkey, Login, Logout, Nop, Ping},
};

use super::{HandlerError, reply};
use crate::{server::Server, session::Session};

pub(super) async fn nop(_server: Arc<Server>, _session: Arc<Session>, _request: Nop) -> Result<(), HandlerError> {
    Ok(())
}

pub(super) async fn ping(_server: Arc<Server>, session: Arc<Session>, request: Ping) -> Result<(), HandlerError> {
    session.queue_ack(request.ack_handle, AckPayload::ok_simple([0; 4]));
    Ok(())
}

/// Bind the player identity. The ack carries the server clock in unix
/// seconds.
pub(super) async fn login(server: Arc<Server>, session: Arc<Session>, request: Login) -> Result<(), HandlerError> {
    let result = if request.player_id == 0 {
        Err(HandlerError::LoginRefused("player id 0".into()))
    } else if session.player_id() != 0 {
        Err(HandlerError::LoginRefused(format!("already logged in as {}", session.player_id())))
    } else if !server.bind_player(&session, request.player_id, request.name, ClientContext::new(request.version)) {
        Err(HandlerError::LoginRefused(format!("player {} has another session", request.player_id)))
    } else {
        tracing::info!(session = session.id(), player_id = request.player_id, version = ?request.version, "logged in");
        Ok(AckPayload::ok_simple(unix_seconds().to_be_bytes()))
    };

    reply(&session, request.ack_handle, result);
    Ok(())
}

pub(super) async fn logout(server: Arc<Server>, session: Arc<Session>, request: Logout) -> Result<(), HandlerError> {
    tracing::debug!(session = session.id(), reason = request.reason, "logout requested");
    server.logout(&session);
    Ok(())
}

/// Issue a fresh random log key and remember it on the session.
pub(super) async fn issue_logkey(
    _server: Arc<Server>,
    session: Arc<Session>,
    request: IssueLogkey,
) -> Result<(), HandlerError> {
    let mut key = [0u8; 16];
    getrandom::fill(&mut key).map_err(|e| HandlerError::Internal(format!("log key randomness: {e}")))?;

    session.state().log_key = Some(key);
    session.queue_ack(request.ack_handle, AckPayload::ok_buffer(key.to_vec()));
    Ok(())
}

fn unix_seconds() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| u32::try_from(elapsed.as_secs()).unwrap_or(u32::MAX))
}

#[cfg(test)]
mod tests {
    use palisade_proto::{
        ProtocolVersion,
        packets::{Ack, Notification},
    };

    use super::*;
    use crate::config::ServerConfig;

    fn setup() -> (Arc<Server>, Arc<Session>) {
        let server = Server::new(ServerConfig::default()).unwrap();
        let session = server.register("127.0.0.1:1".parse().unwrap()).unwrap();
        (server, session)
    }

    fn single_ack(session: &Session) -> Ack {
        let items = session.queue().drain();
        assert_eq!(items.len(), 1);
        match Notification::decode_all(items[0].clone(), &session.context()).unwrap().as_slice() {
            [Notification::Ack(ack)] => ack.clone(),
            other => panic!("expected a single ack, got {other:?}"),
        }
    }

    fn login_request(player_id: u32) -> Login {
        Login { ack_handle: 9, player_id, version: ProtocolVersion::Legacy, name: "Ann".into() }
    }

    #[tokio::test]
    async fn login_binds_identity_and_version() {
        let (server, session) = setup();
        login(Arc::clone(&server), Arc::clone(&session), login_request(42)).await.unwrap();

        let ack = single_ack(&session);
        assert_eq!(ack.handle, 9);
        assert!(ack.payload.is_ok());
        assert_eq!(session.player_id(), 42);
        assert_eq!(session.context().version, ProtocolVersion::Legacy);
    }

    #[tokio::test]
    async fn second_login_is_refused() {
        let (server, session) = setup();
        login(Arc::clone(&server), Arc::clone(&session), login_request(42)).await.unwrap();
        session.queue().drain();

        login(Arc::clone(&server), Arc::clone(&session), login_request(43)).await.unwrap();
        assert!(!single_ack(&session).payload.is_ok());
        assert_eq!(session.player_id(), 42);
    }

    #[tokio::test]
    async fn player_zero_is_refused() {
        let (server, session) = setup();
        login(server, Arc::clone(&session), login_request(0)).await.unwrap();
        assert!(!single_ack(&session).payload.is_ok());
    }

    #[tokio::test]
    async fn logkey_is_sixteen_random_bytes() {
        let (server, session) = setup();
        issue_logkey(server, Arc::clone(&session), IssueLogkey { ack_handle: 3 }).await.unwrap();

        let ack = single_ack(&session);
        assert_eq!(ack.payload.data().len(), 16);
        assert_eq!(session.state().log_key.map(|key| key.to_vec()), Some(ack.payload.data().to_vec()));
    }

    #[tokio::test]
    async fn logout_closes_session() {
        let (server, session) = setup();
        logout(Arc::clone(&server), Arc::clone(&session), Logout { reason: 0 }).await.unwrap();
        assert!(session.is_closed());
        assert_eq!(server.session_count(), 0);
    }
}
