//! 错误类型定义

use thiserror::Error;

/// 协议错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化错误
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket 错误
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// 服务器地址无效
    #[error("Invalid server url: {0}")]
    Url(#[from] url::ParseError),

    /// 帧大小超限
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// 连接超时
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// 连接已关闭
    #[error("Connection closed")]
    ConnectionClosed,

    /// 帧缺少 type 字段
    #[error("Frame has no `type` discriminator")]
    MissingType,

    /// 未知的消息类型
    #[error("Unknown message type: {0}")]
    UnknownType(String),

    /// 棋盘数据形状错误
    #[error("Invalid board: {reason}")]
    InvalidBoard { reason: String },

    /// 用户名为空
    #[error("Username is empty")]
    UsernameEmpty,

    /// 用户名过长
    #[error("Username too long: {len} chars (max: {max})")]
    UsernameTooLong { len: usize, max: usize },
}

/// 协议操作结果类型
pub type Result<T> = std::result::Result<T, ProtocolError>;
