//! Request scenarios driven through the built-in handler table.
//!
//! Sessions are registered without network tasks so each test can inspect
//! exactly what was queued for every player.

use std::{sync::Arc, time::Duration};

use bytes::{Bytes, BytesMut};
use palisade_proto::{
    ClientContext, Packet, ProtocolVersion,
    packets::{
        Ack, AckPayload, AcquireSemaphore, BackStage, BroadcastType, CastBinary, CastedBinary, CheckSemaphore, CleanupObject,
        CreateAcquireSemaphore, CreateObject, CreateStage, DeleteObject, EnterStage, GetStageBinary, InsertUser,
        LockStage, Login, Logout, MoveStage, Notification, Position, PositionObject, ReserveStage, SetStageBinary,
        SetStagePass, StageBinaryKey, WaitStageBinary,
    },
};
use palisade_server::{Server, ServerConfig, Session, handlers::BINARY_SENTINEL};

struct Harness {
    server: Arc<Server>,
}

impl Harness {
    fn new() -> Self {
        Self { server: Server::new(ServerConfig::default()).unwrap() }
    }

    fn with_config(config: ServerConfig) -> Self {
        Self { server: Server::new(config).unwrap() }
    }

    async fn player(&self, player_id: u32) -> Arc<Session> {
        let session = self.server.register("127.0.0.1:9000".parse().unwrap()).unwrap();
        let login = Login { ack_handle: 0, player_id, version: ProtocolVersion::Current, name: format!("p{player_id}") };
        self.send(&session, &login).await;
        let acks = acks(&session);
        assert!(acks[0].payload.is_ok(), "login of {player_id} failed");
        session
    }

    fn guest(&self) -> Arc<Session> {
        self.server.register("127.0.0.1:9001".parse().unwrap()).unwrap()
    }

    async fn send<P: Packet>(&self, session: &Arc<Session>, packet: &P) {
        let frame = packet.to_bytes(&ClientContext::default()).unwrap();
        self.server.handlers().dispatch(&self.server, session, frame).await;
    }

    async fn send_batch(&self, session: &Arc<Session>, frame: Bytes) {
        self.server.handlers().dispatch(&self.server, session, frame).await;
    }
}

/// Every queue item decoded, one inner vec per item.
fn items(session: &Session) -> Vec<Vec<Notification>> {
    session
        .queue()
        .drain()
        .into_iter()
        .map(|item| Notification::decode_all(item, &session.context()).unwrap())
        .collect()
}

fn acks(session: &Session) -> Vec<Ack> {
    items(session)
        .into_iter()
        .flatten()
        .filter_map(|n| match n {
            Notification::Ack(ack) => Some(ack),
            _ => None,
        })
        .collect()
}

fn ok() -> AckPayload {
    AckPayload::ok_simple([0; 4])
}

#[tokio::test]
async fn first_entry_queues_cleanup_ack_and_replication() {
    let h = Harness::new();
    let a = h.player(1).await;
    let b = h.player(2).await;

    h.send(&a, &EnterStage { ack_handle: 10, stage_id: "sl1Ns200p0a0u0".into() }).await;
    h.send(&a, &CreateObject { ack_handle: 11, position: Position::new(1.0, 2.0, 3.0) }).await;
    items(&a);

    h.send(&b, &EnterStage { ack_handle: 20, stage_id: "sl1Ns200p0a0u0".into() }).await;
    let queued = items(&b);

    assert_eq!(queued.len(), 3);
    assert_eq!(queued[0], vec![Notification::CleanupObject(CleanupObject)]);
    assert_eq!(queued[1], vec![Notification::Ack(Ack { handle: 20, payload: ok() })]);
    assert_eq!(queued[2].len(), 2);
    assert_eq!(queued[2][0], Notification::InsertUser(InsertUser { player_id: 1, name: "p1".into() }));
    assert!(matches!(&queued[2][1], Notification::DuplicateObject(d) if d.owner_player_id == 1));
}

#[tokio::test]
async fn replication_is_sent_once_and_even_when_empty() {
    let h = Harness::new();
    let a = h.player(1).await;

    h.send(&a, &EnterStage { ack_handle: 1, stage_id: "sl1Ns200p0a0u0".into() }).await;
    let first = items(&a);
    assert_eq!(first.len(), 3);
    assert!(first[2].is_empty());

    h.send(&a, &MoveStage { ack_handle: 2, stage_id: "sl1Ns211p0a0u0".into() }).await;
    assert_eq!(items(&a).len(), 2);
}

#[tokio::test]
async fn quest_stage_removed_after_last_departure() {
    let h = Harness::new();
    let a = h.player(1).await;
    let b = h.player(2).await;
    let town = "sl1Ns200p0a0u0";

    for session in [&a, &b] {
        h.send(session, &EnterStage { ack_handle: 1, stage_id: "Q1".into() }).await;
    }
    h.send(&a, &MoveStage { ack_handle: 2, stage_id: town.into() }).await;
    assert!(h.server.stage("Q1").is_some());

    h.send(&b, &MoveStage { ack_handle: 3, stage_id: town.into() }).await;
    assert!(h.server.stage("Q1").is_none());
    assert!(h.server.stage(town).is_some_and(|stage| stage.active_count() == 2));
}

#[tokio::test]
async fn departure_removes_objects_and_notifies_remaining() {
    let h = Harness::new();
    let a = h.player(1).await;
    let b = h.player(2).await;

    for session in [&a, &b] {
        h.send(session, &EnterStage { ack_handle: 1, stage_id: "Q9".into() }).await;
    }
    h.send(&a, &CreateObject { ack_handle: 2, position: Position::default() }).await;
    let object_id = u32::from_be_bytes(acks(&a).last().unwrap().payload.data().try_into().unwrap());
    items(&b);

    h.send(&a, &MoveStage { ack_handle: 3, stage_id: "sl1Ns200p0a0u0".into() }).await;

    let stage = h.server.stage("Q9").unwrap();
    assert_eq!(stage.object_count(), 0);
    assert!(!stage.is_active(a.id()));
    assert_eq!(items(&b), vec![vec![Notification::DeleteObject(DeleteObject { object_id })]]);
}

#[tokio::test]
async fn session_is_active_in_one_stage_at_a_time() {
    let h = Harness::new();
    let a = h.player(1).await;

    for stage_id in ["Q1", "Q2", "sl1Ns200p0a0u0"] {
        h.send(&a, &MoveStage { ack_handle: 1, stage_id: stage_id.into() }).await;
        let active_in = ["Q1", "Q2", "sl1Ns200p0a0u0"]
            .iter()
            .filter(|id| h.server.stage(id).is_some_and(|stage| stage.is_active(a.id())))
            .count();
        assert_eq!(active_in, 1);
        assert_eq!(a.current_stage().map(|stage| stage.id().to_string()), Some(stage_id.to_string()));
    }
}

#[tokio::test]
async fn back_stage_returns_along_navigation_stack() {
    let h = Harness::new();
    let a = h.player(1).await;

    h.send(&a, &EnterStage { ack_handle: 1, stage_id: "sl1Ns200p0a0u0".into() }).await;
    h.send(&a, &MoveStage { ack_handle: 2, stage_id: "sl1Ns211p0a0u0".into() }).await;
    items(&a);

    h.send(&a, &BackStage { ack_handle: 3 }).await;
    assert_eq!(a.current_stage().map(|stage| stage.id().to_string()), Some("sl1Ns200p0a0u0".into()));
    assert!(acks(&a)[0].payload.is_ok());

    h.send(&a, &BackStage { ack_handle: 4 }).await;
    assert_eq!(acks(&a), vec![Ack { handle: 4, payload: AckPayload::fail_simple() }]);
}

#[tokio::test]
async fn fifth_reservation_on_capacity_four_is_refused() {
    let h = Harness::new();
    let host = h.player(100).await;
    h.send(&host, &CreateStage { ack_handle: 1, capacity: 4, stage_id: "sl1Qs1".into(), password: String::new() })
        .await;
    assert!(acks(&host)[0].payload.is_ok());

    for player_id in 1..=5 {
        let session = h.player(player_id).await;
        h.send(&session, &ReserveStage { ack_handle: player_id, ready: 0, stage_id: "sl1Qs1".into() }).await;
        let ack = acks(&session).remove(0);
        assert_eq!(ack.payload.is_ok(), player_id <= 4, "reservation {player_id}");
    }
    assert_eq!(h.server.stage("sl1Qs1").unwrap().reserved_count(), 4);
}

#[tokio::test]
async fn password_and_lock_guard_reservations() {
    let h = Harness::new();
    let host = h.player(1).await;
    let guest = h.player(2).await;
    h.send(&host, &CreateStage { ack_handle: 1, capacity: 4, stage_id: "R1".into(), password: "pw".into() }).await;

    h.send(&guest, &ReserveStage { ack_handle: 2, ready: 0, stage_id: "R1".into() }).await;
    assert!(!acks(&guest)[0].payload.is_ok());

    h.send(&guest, &SetStagePass { password: "pw".into() }).await;
    h.send(&guest, &ReserveStage { ack_handle: 3, ready: 0, stage_id: "R1".into() }).await;
    assert!(acks(&guest)[0].payload.is_ok());

    h.send(&guest, &LockStage { ack_handle: 4, stage_id: "R1".into() }).await;
    assert!(!acks(&guest)[0].payload.is_ok());
    h.send(&host, &LockStage { ack_handle: 5, stage_id: "R1".into() }).await;
    assert!(acks(&host).last().unwrap().payload.is_ok());
    assert!(h.server.stage("R1").unwrap().is_locked());
}

fn binary_key(ack_handle: u32, type0: u8, type1: u8) -> StageBinaryKey {
    StageBinaryKey { ack_handle, type0, type1, stage_id: "Q1".into() }
}

#[tokio::test]
async fn sentinel_binary_is_answered_immediately() {
    let h = Harness::new();
    let a = h.player(1).await;

    h.send(&a, &GetStageBinary(binary_key(1, 1, 12))).await;
    h.send(&a, &WaitStageBinary(binary_key(2, 1, 12))).await;

    let acks = acks(&a);
    assert_eq!(acks.len(), 2);
    for ack in acks {
        assert!(ack.payload.is_ok());
        assert_eq!(ack.payload.data(), &BINARY_SENTINEL);
    }
}

#[tokio::test]
async fn binary_set_then_get() {
    let h = Harness::new();
    let a = h.player(1).await;
    h.send(&a, &EnterStage { ack_handle: 1, stage_id: "Q1".into() }).await;
    items(&a);

    h.send(&a, &GetStageBinary(binary_key(2, 3, 4))).await;
    assert_eq!(acks(&a), vec![Ack { handle: 2, payload: AckPayload::fail_buffer() }]);

    let set = SetStageBinary { type0: 3, type1: 4, stage_id: "Q1".into(), data: Bytes::from_static(b"blob") };
    h.send(&a, &set).await;
    h.send(&a, &GetStageBinary(binary_key(3, 3, 4))).await;
    assert_eq!(acks(&a), vec![Ack { handle: 3, payload: AckPayload::ok_buffer(Bytes::from_static(b"blob")) }]);
}

#[tokio::test(start_paused = true)]
async fn binary_wait_gives_up_after_configured_attempts() {
    let h = Harness::new();
    let a = h.player(1).await;
    h.send(&a, &EnterStage { ack_handle: 1, stage_id: "Q1".into() }).await;
    items(&a);

    let start = tokio::time::Instant::now();
    h.send(&a, &WaitStageBinary(binary_key(5, 9, 9))).await;

    let waited = start.elapsed();
    assert!(waited >= Duration::from_secs(9) && waited < Duration::from_secs(10), "waited {waited:?}");
    assert_eq!(acks(&a), vec![Ack { handle: 5, payload: AckPayload::ok_buffer(Bytes::new()) }]);
}

#[tokio::test(start_paused = true)]
async fn binary_wait_sees_late_writer() {
    let config = ServerConfig { binary_wait_interval_ms: 100, ..ServerConfig::default() };
    let h = Harness::with_config(config);
    let a = h.player(1).await;
    h.send(&a, &EnterStage { ack_handle: 1, stage_id: "Q1".into() }).await;
    items(&a);

    let stage = h.server.stage("Q1").unwrap();
    let writer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        stage.set_binary(9, 9, Bytes::from_static(b"late"));
    });

    h.send(&a, &WaitStageBinary(binary_key(6, 9, 9))).await;
    writer.await.unwrap();
    assert_eq!(acks(&a), vec![Ack { handle: 6, payload: AckPayload::ok_buffer(Bytes::from_static(b"late")) }]);
}

#[tokio::test]
async fn position_updates_are_owner_only() {
    let h = Harness::new();
    let a = h.player(1).await;
    let b = h.player(2).await;
    for session in [&a, &b] {
        h.send(session, &EnterStage { ack_handle: 1, stage_id: "Q3".into() }).await;
    }
    h.send(&a, &CreateObject { ack_handle: 2, position: Position::default() }).await;
    let object_id = u32::from_be_bytes(acks(&a).last().unwrap().payload.data().try_into().unwrap());
    items(&b);

    let moved = PositionObject { object_id, position: Position::new(4.0, 5.0, 6.0) };
    h.send(&b, &moved).await;
    assert!(items(&a).is_empty());

    h.send(&a, &moved).await;
    assert_eq!(items(&b), vec![vec![Notification::PositionObject(moved)]]);
}

#[tokio::test]
async fn casts_reach_their_audience() {
    let h = Harness::new();
    let a = h.player(1).await;
    let b = h.player(2).await;
    let c = h.player(3).await;
    for session in [&a, &b] {
        h.send(session, &EnterStage { ack_handle: 1, stage_id: "Q5".into() }).await;
    }
    h.send(&c, &EnterStage { ack_handle: 1, stage_id: "sl1Ns200p0a0u0".into() }).await;
    for session in [&a, &b, &c] {
        items(session);
    }

    let cast = |broadcast_type, targets: Vec<u32>| CastBinary {
        broadcast_type,
        message_type: 7,
        targets,
        data: Bytes::from_static(b"hi"),
    };
    let casted = Notification::CastedBinary(CastedBinary {
        sender_player_id: 1,
        broadcast_type: BroadcastType::Stage,
        message_type: 7,
        data: Bytes::from_static(b"hi"),
    });

    h.send(&a, &cast(BroadcastType::Stage, Vec::new())).await;
    assert_eq!(items(&b), vec![vec![casted]]);
    assert!(items(&a).is_empty());
    assert!(items(&c).is_empty());

    h.send(&a, &cast(BroadcastType::Targeted, vec![3])).await;
    assert_eq!(items(&c).len(), 1);
    assert!(items(&b).is_empty());

    h.send(&a, &cast(BroadcastType::Server, Vec::new())).await;
    assert_eq!(items(&b).len(), 1);
    assert_eq!(items(&c).len(), 1);
    assert!(items(&a).is_empty());
}

#[tokio::test]
async fn semaphore_requests() {
    let h = Harness::new();
    let a = h.player(1).await;
    let b = h.player(2).await;

    h.send(&a, &CreateAcquireSemaphore { ack_handle: 1, capacity: 1, semaphore_id: "hunt".into() }).await;
    assert_eq!(acks(&a), vec![Ack { handle: 1, payload: AckPayload::ok_simple(7u32.to_be_bytes()) }]);

    h.send(&b, &CreateAcquireSemaphore { ack_handle: 2, capacity: 1, semaphore_id: "hunt".into() }).await;
    assert_eq!(acks(&b), vec![Ack { handle: 2, payload: AckPayload::fail_simple() }]);

    h.send(&b, &CheckSemaphore { ack_handle: 3, semaphore_id: "hunt".into() }).await;
    assert_eq!(acks(&b), vec![Ack { handle: 3, payload: AckPayload::ok_simple([0, 0, 0, 1]) }]);

    h.server.logout(&a);
    h.send(&b, &CheckSemaphore { ack_handle: 4, semaphore_id: "hunt".into() }).await;
    assert_eq!(acks(&b), vec![Ack { handle: 4, payload: AckPayload::ok_simple([0; 4]) }]);
}

#[tokio::test]
async fn batched_requests_are_answered_in_order() {
    let h = Harness::new();
    let a = h.player(1).await;

    let mut frame = BytesMut::new();
    for (handle, stage) in [(1, "Q1"), (2, "Q2")] {
        frame.extend_from_slice(&EnterStage { ack_handle: handle, stage_id: stage.into() }.to_bytes(&a.context()).unwrap());
    }
    frame.extend_from_slice(&palisade_proto::FRAME_TERMINATOR);
    h.send_batch(&a, frame.freeze()).await;

    let handles: Vec<u32> = acks(&a).into_iter().map(|ack| ack.handle).collect();
    assert_eq!(handles, vec![1, 2]);
}

#[tokio::test]
async fn unknown_opcode_is_survivable() {
    let h = Harness::new();
    let a = h.player(1).await;

    h.send_batch(&a, Bytes::from_static(&[0x7F, 0x7F, 1, 2, 3])).await;
    h.send(&a, &EnterStage { ack_handle: 8, stage_id: "Q1".into() }).await;

    assert!(!a.is_closed());
    assert_eq!(acks(&a).len(), 1);
}

#[tokio::test]
async fn guests_cannot_hold_stage_slots() {
    let h = Harness::new();
    let host = h.player(1).await;
    h.send(&host, &CreateStage { ack_handle: 1, capacity: 1, stage_id: "Q1".into(), password: String::new() }).await;
    items(&host);

    let guests: Vec<Arc<Session>> = (0..5).map(|_| h.guest()).collect();
    for (handle, guest) in (10..).zip(&guests) {
        h.send(guest, &ReserveStage { ack_handle: handle, ready: 0, stage_id: "Q1".into() }).await;
        assert_eq!(acks(guest), vec![Ack { handle, payload: AckPayload::fail_simple() }]);
    }
    assert_eq!(h.server.stage("Q1").unwrap().reserved_count(), 0);

    for guest in &guests {
        h.send(guest, &EnterStage { ack_handle: 20, stage_id: "Q1".into() }).await;
        h.send(guest, &MoveStage { ack_handle: 21, stage_id: "Q1".into() }).await;
        h.send(guest, &BackStage { ack_handle: 22 }).await;
        assert!(acks(guest).iter().all(|ack| !ack.payload.is_ok()));
        assert!(guest.current_stage().is_none());
    }
    assert_eq!(h.server.stage("Q1").unwrap().active_count(), 0);
}

#[tokio::test]
async fn guests_cannot_create_stages_objects_or_semaphores() {
    let h = Harness::new();
    let owner = h.player(1).await;
    h.send(&owner, &EnterStage { ack_handle: 1, stage_id: "sl1Ns200p0a0u0".into() }).await;
    h.send(&owner, &CreateObject { ack_handle: 2, position: Position::new(1.0, 1.0, 1.0) }).await;
    items(&owner);

    let guest = h.guest();
    h.send(&guest, &CreateStage { ack_handle: 3, capacity: 4, stage_id: "R9".into(), password: String::new() }).await;
    h.send(&guest, &CreateObject { ack_handle: 4, position: Position::default() }).await;
    h.send(&guest, &CreateAcquireSemaphore { ack_handle: 5, capacity: 4, semaphore_id: "hunt".into() }).await;
    h.send(&guest, &AcquireSemaphore { ack_handle: 6, semaphore_id: "hunt".into() }).await;

    let refused: Vec<u32> =
        acks(&guest).into_iter().filter(|ack| !ack.payload.is_ok()).map(|ack| ack.handle).collect();
    assert_eq!(refused, vec![3, 4, 5, 6]);
    assert!(h.server.stage("R9").is_none());
    assert_eq!(h.server.semaphore_count(), 0);

    // The owner's object survives any guest traffic in the stage.
    h.send(&guest, &EnterStage { ack_handle: 7, stage_id: "sl1Ns200p0a0u0".into() }).await;
    h.server.leave_current_stage(&guest);
    assert_eq!(h.server.stage("sl1Ns200p0a0u0").unwrap().object_count(), 1);
}

#[tokio::test]
async fn requests_after_logout_in_the_same_batch_are_dropped() {
    let h = Harness::new();
    let a = h.player(1).await;

    let mut frame = BytesMut::new();
    frame.extend_from_slice(&Logout { reason: 0 }.to_bytes(&a.context()).unwrap());
    frame.extend_from_slice(&EnterStage { ack_handle: 2, stage_id: "Q1".into() }.to_bytes(&a.context()).unwrap());
    frame.extend_from_slice(&palisade_proto::FRAME_TERMINATOR);
    h.send_batch(&a, frame.freeze()).await;

    assert!(a.is_closed());
    assert!(a.current_stage().is_none());
    assert!(h.server.stage("Q1").is_none());
    assert!(acks(&a).is_empty());
}
