//! 连接生命周期：旧连接的消息、异常帧、引擎退出

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{config, game_rejoined, Harness};
use connect4_client::{EngineState, MemorySessionStore, SessionEngine, SessionEvent};
use protocol::{memory_transport, Board, DiscColor};
use serde_json::json;

fn grid_update(board: &Board) -> String {
    json!({"type": "game_update", "data": {"grid_data": board}}).to_string()
}

#[tokio::test(start_paused = true)]
async fn test_old_channel_is_silenced() {
    let mut h = Harness::new();
    let mut old = h.start_match("alice").await;

    h.engine.disconnect().await;
    assert_eq!(h.engine.state(), EngineState::Idle);
    assert!(old.recv().await.is_none());

    h.engine.request_new_match("alice").await.unwrap();
    let mut server = h.accept().await;
    assert_eq!(server.recv_json().await.unwrap()["type"], "new_game");
    h.events.drain();

    // 旧连接上的任何消息都不再生效
    old.send_text(r#"{"type":"game_over","data":{"winner":"alice"}}"#);
    old.send_text(r#"{"type":"error","data":{"error":"stale"}}"#);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(h.events.drain().is_empty());
    assert_eq!(h.engine.state(), EngineState::AwaitingMatch);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_frames_are_tolerated() {
    let mut h = Harness::new();
    let server = h.start_match("alice").await;

    server.send_text("not json at all");
    server.send_text(r#"{"type":"mystery","data":{}}"#);
    server.send_text(r#"{"type":"game_update","data":{"current_turn":"bob"}}"#);

    h.events.until(|e| *e == SessionEvent::TurnChanged(false)).await;
    assert_eq!(h.engine.state(), EngineState::InMatch);
    assert!(h.listener.try_accept().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_each_message_handled_once_after_reconnect() {
    let mut h = Harness::new();
    let server = h.start_match("alice").await;

    drop(server);
    let mut server = h.accept().await;
    assert_eq!(server.recv_json().await.unwrap()["type"], "reconnect");
    server.send(&game_rejoined("bob")).unwrap();
    h.events.until_state(EngineState::InMatch).await;
    h.events.drain();

    let mut board = Board::empty();
    board.set(0, 5, DiscColor::Red);
    server.send_text(grid_update(&board));
    tokio::time::sleep(Duration::from_secs(1)).await;

    let grids = h
        .events
        .drain()
        .into_iter()
        .filter(|e| matches!(e, SessionEvent::GridChanged(_)))
        .count();
    assert_eq!(grids, 1);
    assert_eq!(h.engine.view().board, board);
}

#[tokio::test(start_paused = true)]
async fn test_peer_close_during_terminal_returns_to_idle() {
    let mut h = Harness::new();
    let mut server = h.start_match("alice").await;

    server.send_text(r#"{"type":"game_over","data":{"winner":"bob"}}"#);
    h.events.until_state(EngineState::Terminal).await;
    let status = h.engine.view().status;

    server.close(1000, "room closed");
    h.events.until_state(EngineState::Idle).await;
    assert_eq!(h.engine.view().status, status);
    assert!(!h.engine.view().reconnecting);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.connector.attempts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_all_handles_closes_channel() {
    let (connector, mut listener) = memory_transport();
    let engine = SessionEngine::start(config(), connector, Arc::new(MemorySessionStore::new()));
    let second = engine.clone();

    engine.request_new_match("alice").await.unwrap();
    let mut server = listener.accept().await.unwrap();
    assert_eq!(server.recv_json().await.unwrap()["type"], "new_game");

    drop(engine);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(server.try_recv().is_none());
    assert_eq!(second.state(), EngineState::AwaitingMatch);

    drop(second);
    let closed = tokio::time::timeout(Duration::from_secs(10), server.recv()).await;
    assert!(matches!(closed, Ok(None)));
}
