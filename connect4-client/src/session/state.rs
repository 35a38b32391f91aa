//! 会话状态

use std::fmt;

use protocol::{Board, RoomId, DRAW_WINNER};
use tokio::time::Instant;

use crate::player::PlayerState;
use crate::storage::PersistedSessionRecord;

/// 会话引擎状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum EngineState {
    /// 没有连接，也没有对局
    #[default]
    Idle,
    /// 正在建立连接（新对局或重新加入）
    Connecting,
    /// 已请求新对局，等待开局
    AwaitingMatch,
    /// 对局进行中
    InMatch,
    /// 对局中连接断开，正在自动重连
    Reconnecting,
    /// 对局已结束
    Terminal,
}

impl EngineState {
    /// 是否可以请求新对局
    pub fn can_start_match(self) -> bool {
        matches!(self, EngineState::Idle | EngineState::Terminal)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Idle => "idle",
            EngineState::Connecting => "connecting",
            EngineState::AwaitingMatch => "awaiting match",
            EngineState::InMatch => "in match",
            EngineState::Reconnecting => "reconnecting",
            EngineState::Terminal => "terminal",
        };
        f.write_str(name)
    }
}

/// 当前对局：玩家身份 + 服务端给出的棋盘
#[derive(Debug, Clone)]
pub struct Session {
    pub player: PlayerState,
    pub board: Board,
}

/// 断线后等待重连的信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReconnect {
    pub room_id: RoomId,
    pub username: String,
    /// 已发起的连接尝试次数
    pub attempt_count: u32,
    /// 下一次重试的时间，正在连接时为 None
    pub next_retry_at: Option<Instant>,
}

impl PendingReconnect {
    pub fn new(record: PersistedSessionRecord) -> Self {
        Self {
            room_id: record.room_id,
            username: record.username,
            attempt_count: 0,
            next_retry_at: None,
        }
    }

    pub fn record(&self) -> PersistedSessionRecord {
        PersistedSessionRecord::new(self.room_id.clone(), self.username.clone())
    }
}

/// 对局结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    Win,
    Loss,
    Draw,
}

impl MatchResult {
    /// 比较服务端给出的胜者与本地用户名
    pub fn from_winner(winner: Option<&str>, username: &str) -> Self {
        match winner {
            None | Some(DRAW_WINNER) => MatchResult::Draw,
            Some(winner) if winner == username => MatchResult::Win,
            Some(_) => MatchResult::Loss,
        }
    }

    /// 默认提示文字
    pub fn message(self) -> &'static str {
        match self {
            MatchResult::Win => "You won!",
            MatchResult::Loss => "You lost!",
            MatchResult::Draw => "It's a draw!",
        }
    }
}

/// 对局结束通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOutcome {
    pub result: MatchResult,
    pub winner: Option<String>,
    /// 展示给用户的文字（服务端给出时原样使用）
    pub message: String,
}

/// 引擎状态快照，供渲染层读取
#[derive(Debug, Clone, Default)]
pub struct SessionView {
    pub state: EngineState,
    pub board: Board,
    pub is_my_turn: bool,
    pub status: String,
    pub countdown: Option<u32>,
    pub reconnecting: bool,
    pub match_started: bool,
    pub player: Option<PlayerState>,
    /// 本地保存的可恢复对局
    pub persisted: Option<PersistedSessionRecord>,
    pub outcome: Option<MatchOutcome>,
}

impl SessionView {
    /// 是否可以提供“重新加入”入口
    pub fn can_rejoin(&self) -> bool {
        self.state == EngineState::Idle && self.persisted.is_some()
    }
}
