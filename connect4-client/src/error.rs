//! 客户端错误类型
//!
//! - `ConnectionError`：通道无法打开或已关闭
//! - `SessionError`：在错误的状态下调用操作
//! - `ClientError::Server`：服务端返回的 `error` 消息，原样展示

use std::sync::Arc;

use protocol::ProtocolError;
use thiserror::Error;

use crate::session::EngineState;

/// 连接错误
///
/// 合并的多个重连请求会收到同一个错误，所以底层错误放在 `Arc` 中。
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    /// 建立连接失败
    #[error("Failed to connect to {url}: {source}")]
    Open {
        url: String,
        #[source]
        source: Arc<ProtocolError>,
    },

    /// 通道未打开（发送不排队，直接失败）
    #[error("Channel is not open")]
    NotOpen,

    /// 连接尝试被 disconnect() 取消
    #[error("Connection attempt was cancelled")]
    Cancelled,
}

/// 会话错误（状态不允许该操作）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// 当前状态不允许该操作
    #[error("Operation `{operation}` is not allowed in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: EngineState,
    },

    /// 不是你的回合
    #[error("Not your turn")]
    NotYourTurn,

    /// 没有进行中的对局
    #[error("No active match")]
    NoActiveMatch,

    /// 没有可恢复的对局记录
    #[error("No persisted session to rejoin")]
    NoPersistedSession,

    /// 坐标越界
    #[error("Cell ({column}, {row}) is outside the board")]
    OutOfBounds { column: usize, row: usize },

    /// 用户名无效
    #[error("Invalid username: {0}")]
    InvalidUsername(String),

    /// 引擎任务已停止
    #[error("Session engine has stopped")]
    EngineStopped,
}

/// 客户端错误
#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Session(#[from] SessionError),

    /// 服务端错误，原样展示
    #[error("{0}")]
    Server(String),
}

/// 客户端操作结果类型
pub type Result<T> = std::result::Result<T, ClientError>;
