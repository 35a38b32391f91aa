//! 断线重连

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{config, game_rejoined, EventLog, GatedConnector, Harness};
use connect4_client::{
    ClientError, ConnectionError, EngineState, MatchResult, MemorySessionStore,
    PersistedSessionRecord, SessionEngine, SessionError, SessionEvent, SessionStore,
};
use protocol::memory_transport;
use serde_json::json;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_connection_loss() {
    let mut h = Harness::new();
    let server = h.start_match("alice").await;
    let lost_at = Instant::now();

    drop(server);
    let events = h.events.until_state(EngineState::Reconnecting).await;
    assert!(events.contains(&SessionEvent::StateChanged(EngineState::Reconnecting)));
    let view = h.engine.view();
    assert!(view.reconnecting);
    assert_eq!(view.status, "Connection lost. Attempting to reconnect...");
    // 会话保留在内存中，记录仍然存在
    assert!(view.player.is_some());
    assert!(h.store.load().is_some());

    let mut server = h.accept().await;
    let waited = lost_at.elapsed();
    assert!(waited >= Duration::from_secs(2) && waited < Duration::from_secs(3));
    assert_eq!(
        server.recv_json().await.unwrap(),
        json!({"type": "reconnect", "username": "alice", "data": {"room_id": "R1"}})
    );

    server.send(&game_rejoined("alice")).unwrap();
    h.events.until_status("Successfully reconnected to the game!").await;
    let view = h.engine.view();
    assert_eq!(view.state, EngineState::InMatch);
    assert!(view.is_my_turn);
    assert!(!view.reconnecting);
    assert!(view.countdown.is_none());

    // 提示文字 5 秒后清除
    h.events.until_status("").await;
    assert!(h.engine.view().status.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_attempts_retry_every_five_seconds() {
    let mut h = Harness::new();
    let server = h.start_match("alice").await;
    h.connector.refuse_next(2);
    let lost_at = Instant::now();

    drop(server);
    h.events
        .until_status("Failed to reconnect. Trying again in 5 seconds...")
        .await;
    let waited = lost_at.elapsed();
    assert!(waited >= Duration::from_secs(2) && waited < Duration::from_secs(3));

    let mut server = h.accept().await;
    // 2s + 5s + 5s
    let waited = lost_at.elapsed();
    assert!(waited >= Duration::from_secs(12) && waited < Duration::from_secs(13));
    assert_eq!(h.connector.attempts().len(), 4);
    assert_eq!(server.recv_json().await.unwrap()["type"], "reconnect");

    server.send(&game_rejoined("bob")).unwrap();
    h.events.until_state(EngineState::InMatch).await;
    assert!(!h.engine.view().is_my_turn);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_budget_is_finite() {
    let mut cfg = config();
    cfg.reconnect.max_attempts = Some(2);
    let mut h = Harness::with(cfg, MemorySessionStore::new());
    let server = h.start_match("alice").await;
    h.connector.refuse_next(usize::MAX);

    drop(server);
    h.events.until_state(EngineState::Reconnecting).await;
    h.events.until_state(EngineState::Idle).await;

    let view = h.engine.view();
    assert_eq!(view.status, "Unable to reconnect to the game.");
    assert!(!view.reconnecting);
    assert!(view.player.is_none());
    assert!(h.store.load().is_none());
    // 开局 1 次 + 重连 2 次
    assert_eq!(h.connector.attempts().len(), 3);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.connector.attempts().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_server_error_abandons_rejoin() {
    let mut h = Harness::new();
    let server = h.start_match("alice").await;

    drop(server);
    let mut server = h.accept().await;
    assert_eq!(server.recv_json().await.unwrap()["type"], "reconnect");

    server.send_text(r#"{"type":"error","data":{"error":"Room not found"}}"#);
    let events = h.events.until_state(EngineState::Idle).await;
    assert!(events.contains(&SessionEvent::ServerError("Room not found".to_string())));
    assert_eq!(h.engine.view().status, "Room not found");
    assert!(h.store.load().is_none());

    // 连接已释放，不再重试
    assert!(server.recv().await.is_none());
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(h.listener.try_accept().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_rejoin_from_saved_record() {
    let record = PersistedSessionRecord::new("R1", "alice");
    let mut h = Harness::with(config(), MemorySessionStore::with_record(&record));
    assert_eq!(h.engine.persisted_session(), Some(record));
    assert!(h.engine.view().can_rejoin());

    h.engine.request_reconnect().await.unwrap();
    let mut server = h.accept().await;
    assert!(server.url().ends_with("?username=alice"));
    assert_eq!(
        server.recv_json().await.unwrap(),
        json!({"type": "reconnect", "username": "alice", "data": {"room_id": "R1"}})
    );

    // 服务端快照整体替换本地状态
    server.send(&game_rejoined("bob")).unwrap();
    h.events.until_state(EngineState::InMatch).await;
    let view = h.engine.view();
    assert!(!view.is_my_turn);
    assert!(view.match_started);
    assert_eq!(view.player.unwrap().opponent_username(), "bob");
}

#[tokio::test(start_paused = true)]
async fn test_rejoin_finished_match_reports_outcome() {
    let record = PersistedSessionRecord::new("R1", "alice");
    let mut h = Harness::with(config(), MemorySessionStore::with_record(&record));

    h.engine.request_reconnect().await.unwrap();
    let mut server = h.accept().await;
    assert_eq!(server.recv_json().await.unwrap()["type"], "reconnect");

    // 对局已经结束，服务端只回结果，没有棋盘和回合
    let finished = r#"{"type":"game_update","data":{"room_id":"R1","status":"finished","winner":"bob","message":"You lost the game."}}"#;
    server.send_text(finished);
    let events = h
        .events
        .until(|e| matches!(e, SessionEvent::Outcome(_)))
        .await;
    assert!(events.contains(&SessionEvent::StateChanged(EngineState::Terminal)));
    match events.last() {
        Some(SessionEvent::Outcome(outcome)) => {
            assert_eq!(outcome.result, MatchResult::Loss);
            assert_eq!(outcome.message, "You lost the game.");
        }
        other => panic!("expected outcome, got {:?}", other),
    }

    let view = h.engine.view();
    assert_eq!(view.state, EngineState::Terminal);
    assert!(!view.reconnecting);
    assert!(view.player.is_none());
    assert!(view.persisted.is_none());
    assert!(h.store.load().is_none());

    // 重复的结束消息不再通知，也不再重连
    server.send_text(finished);
    server.send_text(r#"{"type":"game_over","data":{"winner":"bob"}}"#);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(!h
        .events
        .drain()
        .iter()
        .any(|e| matches!(e, SessionEvent::Outcome(_))));
    assert!(h.listener.try_accept().is_none());

    // 可以在同一连接上开始新对局
    h.engine.request_new_match("alice").await.unwrap();
    assert_eq!(server.recv_json().await.unwrap()["type"], "new_game");
}

#[tokio::test(start_paused = true)]
async fn test_rejoin_finished_match_via_game_over() {
    let record = PersistedSessionRecord::new("R1", "alice");
    let mut h = Harness::with(config(), MemorySessionStore::with_record(&record));

    h.engine.request_reconnect().await.unwrap();
    let mut server = h.accept().await;
    assert_eq!(server.recv_json().await.unwrap()["type"], "reconnect");

    server.send_text(r#"{"type":"game_over","data":{"winner":"alice"}}"#);
    h.events.until_state(EngineState::Terminal).await;
    let view = h.engine.view();
    assert_eq!(view.outcome.map(|o| o.result), Some(MatchResult::Win));
    assert!(!view.reconnecting);
    assert!(h.store.load().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_reconnects_share_one_attempt() {
    let record = PersistedSessionRecord::new("R1", "alice");
    let store = MemorySessionStore::with_record(&record);
    let (inner, mut listener) = memory_transport();
    let connector = GatedConnector::new(inner.clone());
    let engine = SessionEngine::start(config(), connector.clone(), Arc::new(store));
    let mut events = EventLog::attach(&engine);

    let first = tokio::spawn({
        let engine = engine.clone();
        async move { engine.request_reconnect().await }
    });
    let second = tokio::spawn({
        let engine = engine.clone();
        async move { engine.request_reconnect().await }
    });
    while connector.calls() == 0 {
        tokio::task::yield_now().await;
    }
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(connector.calls(), 1);

    connector.open(1);
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    assert_eq!(connector.calls(), 1);
    let mut server = listener.accept().await.unwrap();
    assert!(listener.try_accept().is_none());
    assert_eq!(server.recv_json().await.unwrap()["type"], "reconnect");
    assert!(server.try_recv().is_none());

    server.send(&game_rejoined("alice")).unwrap();
    events.until_state(EngineState::InMatch).await;
    assert_eq!(inner.attempts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_explicit_reconnect_supersedes_scheduled_retry() {
    let mut h = Harness::new();
    let server = h.start_match("alice").await;

    drop(server);
    h.events.until_state(EngineState::Reconnecting).await;
    assert!(h.engine.view().reconnecting);

    // 计划中的重试被立即执行的尝试取代
    h.engine.request_reconnect().await.unwrap();
    let mut server = h.accept().await;
    assert_eq!(server.recv_json().await.unwrap()["type"], "reconnect");

    // 已发出请求，等待快照时再次请求不会建立新连接
    h.engine.request_reconnect().await.unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(h.listener.try_accept().is_none());
    assert!(server.try_recv().is_none());
    assert_eq!(h.connector.attempts().len(), 2);

    server.send(&game_rejoined("alice")).unwrap();
    h.events.until_state(EngineState::InMatch).await;
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_mid_reconnect() {
    let mut h = Harness::new();
    let server = h.start_match("alice").await;
    h.connector.refuse_next(1);

    drop(server);
    h.events
        .until(|e| matches!(e, SessionEvent::StatusChanged(s) if s.starts_with("Failed to reconnect")))
        .await;

    h.engine.disconnect().await;
    h.engine.disconnect().await;
    let view = h.engine.view();
    assert_eq!(view.state, EngineState::Idle);
    assert!(!view.reconnecting);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.connector.attempts().len(), 2);
    // 主动断开保留记录，之后可以重新加入
    assert_eq!(h.store.load(), Some(PersistedSessionRecord::new("R1", "alice")));
    assert!(h.engine.view().can_rejoin());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_connect() {
    let record = PersistedSessionRecord::new("R1", "alice");
    let (inner, _listener) = memory_transport();
    let connector = GatedConnector::new(inner);
    let engine = SessionEngine::start(
        config(),
        connector.clone(),
        Arc::new(MemorySessionStore::with_record(&record)),
    );

    let pending = tokio::spawn({
        let engine = engine.clone();
        async move { engine.request_reconnect().await }
    });
    while connector.calls() == 0 {
        tokio::task::yield_now().await;
    }

    engine.disconnect().await;
    let result = pending.await.unwrap();
    assert!(matches!(
        result,
        Err(ClientError::Connection(ConnectionError::Cancelled))
    ));
    assert_eq!(engine.state(), EngineState::Idle);

    // 迟到的连接结果被丢弃
    connector.open(1);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(engine.state(), EngineState::Idle);
    assert!(matches!(
        engine.place_disc(0, 5).await,
        Err(ClientError::Session(SessionError::NoActiveMatch))
    ));
}
