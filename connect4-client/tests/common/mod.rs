//! 集成测试公用工具：内存传输上的引擎 + 事件记录
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use connect4_client::{
    ClientConfig, EngineState, MemorySessionStore, SessionEngine, SessionEvent,
};
use protocol::{
    memory_transport, Board, Connector, GameSnapshot, MemoryConnector, MemoryListener,
    MemoryPeer, MemoryReader, MemoryWriter, OpponentType, PlayerColor, ProtocolError,
    ServerMessage,
};
use tokio::sync::{mpsc, Semaphore};

pub const SERVER_URL: &str = "ws://test/ws";

/// 等待事件的上限（暂停时间下会被自动推进）
const EVENT_TIMEOUT: Duration = Duration::from_secs(600);

pub fn config() -> ClientConfig {
    ClientConfig {
        server_url: SERVER_URL.to_string(),
        ..ClientConfig::default()
    }
}

pub fn snapshot(current_turn: &str) -> GameSnapshot {
    GameSnapshot {
        room_id: "R1".to_string(),
        player_username: "alice".to_string(),
        player_color: PlayerColor::Red,
        opponent_username: "bob".to_string(),
        opponent_type: OpponentType::Human,
        current_turn: current_turn.to_string(),
        grid_data: Board::empty(),
    }
}

pub fn game_started(current_turn: &str) -> ServerMessage {
    ServerMessage::GameStarted(snapshot(current_turn))
}

pub fn game_rejoined(current_turn: &str) -> ServerMessage {
    ServerMessage::GameRejoined(snapshot(current_turn))
}

/// 订阅引擎事件
pub struct EventLog {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl EventLog {
    pub fn attach(engine: &SessionEngine) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        engine.on_state_change(move |event: &SessionEvent| {
            let _ = tx.send(event.clone());
        });
        Self { rx }
    }

    /// 收集事件直到 `done` 匹配（包含匹配的那个）
    pub async fn until(&mut self, done: impl Fn(&SessionEvent) -> bool) -> Vec<SessionEvent> {
        let mut seen = Vec::new();
        loop {
            let event = tokio::time::timeout(EVENT_TIMEOUT, self.rx.recv())
                .await
                .expect("timed out waiting for session event")
                .expect("engine listener dropped");
            let matched = done(&event);
            seen.push(event);
            if matched {
                return seen;
            }
        }
    }

    pub async fn until_state(&mut self, state: EngineState) -> Vec<SessionEvent> {
        self.until(|event| *event == SessionEvent::StateChanged(state))
            .await
    }

    pub async fn until_status(&mut self, status: &str) -> Vec<SessionEvent> {
        self.until(|event| matches!(event, SessionEvent::StatusChanged(s) if s == status))
            .await
    }

    /// 取出已经到达的事件
    pub fn drain(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// 内存传输上的引擎
pub struct Harness {
    pub engine: SessionEngine,
    pub connector: MemoryConnector,
    pub listener: MemoryListener,
    pub store: MemorySessionStore,
    pub events: EventLog,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(config(), MemorySessionStore::new())
    }

    pub fn with(config: ClientConfig, store: MemorySessionStore) -> Self {
        let (connector, listener) = memory_transport();
        let engine = SessionEngine::start(config, connector.clone(), Arc::new(store.clone()));
        let events = EventLog::attach(&engine);
        Self {
            engine,
            connector,
            listener,
            store,
            events,
        }
    }

    pub async fn accept(&mut self) -> MemoryPeer {
        tokio::time::timeout(EVENT_TIMEOUT, self.listener.accept())
            .await
            .expect("timed out waiting for a connection")
            .expect("connector dropped")
    }

    /// 以 alice 开始一局（红方），返回服务端一侧
    pub async fn start_match(&mut self, current_turn: &str) -> MemoryPeer {
        self.engine.request_new_match("alice").await.unwrap();
        let mut server = self.accept().await;
        let request = server.recv_json().await.unwrap();
        assert_eq!(request["type"], "new_game");

        server.send(&game_started(current_turn)).unwrap();
        self.events.until_state(EngineState::InMatch).await;
        server
    }
}

/// 连接在放行前一直挂起的连接器
#[derive(Clone)]
pub struct GatedConnector {
    inner: MemoryConnector,
    gate: Arc<Semaphore>,
    calls: Arc<AtomicUsize>,
}

impl GatedConnector {
    pub fn new(inner: MemoryConnector) -> Self {
        Self {
            inner,
            gate: Arc::new(Semaphore::new(0)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 放行 `count` 个连接
    pub fn open(&self, count: usize) {
        self.gate.add_permits(count);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for GatedConnector {
    type Reader = MemoryReader;
    type Writer = MemoryWriter;

    async fn connect(&self, url: &str) -> protocol::Result<(Self::Reader, Self::Writer)> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)?;
        permit.forget();
        self.inner.connect(url).await
    }
}
