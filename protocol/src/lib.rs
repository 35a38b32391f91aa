//! 四子棋共享协议库
//!
//! 包含:
//! - 棋盘、棋子颜色等核心数据结构
//! - 落子可达性判断（重力规则）
//! - 消息类型定义 (ClientMessage, ServerMessage)
//! - 传输层抽象 (Connector, FrameReader, FrameWriter traits)
//! - WebSocket 传输实现与内存回环传输

mod board;
mod constants;
mod disc;
mod error;
mod memory;
mod message;
mod transport;

pub use board::Board;
pub use constants::*;
pub use disc::{DiscColor, OpponentType, PlayerColor};
pub use error::{ProtocolError, Result};
pub use memory::{
    memory_transport, MemoryConnector, MemoryListener, MemoryPeer, MemoryReader, MemoryWriter,
};
pub use message::{
    ClientData, ClientMessage, ClientMessageType, ConnectionAck, EmptyData, GameOver,
    GameSnapshot, GameUpdate, Info, MessageKind, MoveAction, NewGameResponse, PlaceDisc,
    PlayerDisconnected, PlayerRejoined, ReconnectData, RoomId, ServerError, ServerMessage,
    STATUS_FINISHED,
};
pub use transport::{
    session_url, Connector, Frame, FrameReader, FrameWriter, WsConnector, WsReader, WsWriter,
    CLOSE_ABNORMAL, CLOSE_NO_STATUS, CLOSE_NORMAL,
};

/// 校验用户名
pub fn validate_username(username: &str) -> Result<()> {
    let trimmed = username.trim();
    if trimmed.is_empty() {
        return Err(ProtocolError::UsernameEmpty);
    }
    let len = trimmed.chars().count();
    if len > MAX_USERNAME_LEN {
        return Err(ProtocolError::UsernameTooLong {
            len,
            max: MAX_USERNAME_LEN,
        });
    }
    Ok(())
}
