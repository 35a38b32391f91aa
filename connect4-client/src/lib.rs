//! 四子棋客户端
//!
//! 客户端会话引擎：通过 WebSocket 与对战服务器保持同步，
//! 断线、重启或服务端断开后自动恢复进行中的对局。
//!
//! 渲染层只通过 `SessionEngine` 的公开接口交互：发起操作，订阅状态变化。

pub mod config;
pub mod error;
pub mod network;
pub mod player;
pub mod session;
pub mod storage;

pub use config::{ClientConfig, ReconnectPolicy};
pub use error::{ClientError, ConnectionError, Result, SessionError};
pub use player::{CellPainter, PlayerState};
pub use session::{
    EngineState, ListenerId, MatchOutcome, MatchResult, PendingReconnect, Session, SessionEngine,
    SessionEvent, SessionView,
};
pub use storage::{FileSessionStore, MemorySessionStore, PersistedSessionRecord, SessionStore};
