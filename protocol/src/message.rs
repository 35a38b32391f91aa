//! 消息类型定义
//!
//! 所有帧都是一个 JSON 对象，带有 `type` 判别字段和随类型变化的 `data` 载荷。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::board::Board;
use crate::disc::{OpponentType, PlayerColor};
use crate::error::{ProtocolError, Result};

/// 房间 ID
pub type RoomId = String;

/// 对局结束时 `status` 字段的取值
pub const STATUS_FINISHED: &str = "finished";

// ============================================================================
// 客户端 -> 服务端
// ============================================================================

/// 客户端消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMessageType {
    /// 请求匹配新对局
    NewGame,
    /// 重新加入对局
    Reconnect,
    /// 走棋
    GameUpdate,
}

/// 走棋动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveAction {
    PlaceDisc,
}

/// 走棋载荷
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceDisc {
    pub action: MoveAction,
    pub column: usize,
    pub row: usize,
    pub room_id: RoomId,
    pub player_color: PlayerColor,
}

/// 重连载荷
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectData {
    pub room_id: RoomId,
}

/// 空载荷（序列化为 `{}`）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyData {}

/// 客户端消息载荷
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientData {
    PlaceDisc(PlaceDisc),
    Reconnect(ReconnectData),
    Empty(EmptyData),
}

/// 客户端发送给服务端的消息
///
/// 只能通过构造函数创建，保证 `type` 与 `data` 一致。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    kind: ClientMessageType,
    username: String,
    data: ClientData,
}

impl ClientMessage {
    /// 请求新对局
    pub fn new_game(username: impl Into<String>) -> Self {
        Self {
            kind: ClientMessageType::NewGame,
            username: username.into(),
            data: ClientData::Empty(EmptyData {}),
        }
    }

    /// 请求重新加入房间
    pub fn reconnect(username: impl Into<String>, room_id: impl Into<RoomId>) -> Self {
        Self {
            kind: ClientMessageType::Reconnect,
            username: username.into(),
            data: ClientData::Reconnect(ReconnectData {
                room_id: room_id.into(),
            }),
        }
    }

    /// 落子
    pub fn place_disc(
        username: impl Into<String>,
        room_id: impl Into<RoomId>,
        column: usize,
        row: usize,
        player_color: PlayerColor,
    ) -> Self {
        Self {
            kind: ClientMessageType::GameUpdate,
            username: username.into(),
            data: ClientData::PlaceDisc(PlaceDisc {
                action: MoveAction::PlaceDisc,
                column,
                row,
                room_id: room_id.into(),
                player_color,
            }),
        }
    }

    pub fn kind(&self) -> ClientMessageType {
        self.kind
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn data(&self) -> &ClientData {
        &self.data
    }

    /// 编码为文本帧
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// 服务端 -> 客户端
// ============================================================================

/// 服务端消息类型（`type` 判别字段）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    NewGameResponse,
    GameStarted,
    GameUpdate,
    GameOver,
    PlayerDisconnected,
    PlayerRejoined,
    GameRejoined,
    Error,
    Info,
    ConnectionAck,
}

impl MessageKind {
    /// 全部消息类型
    pub const ALL: [MessageKind; 10] = [
        MessageKind::NewGameResponse,
        MessageKind::GameStarted,
        MessageKind::GameUpdate,
        MessageKind::GameOver,
        MessageKind::PlayerDisconnected,
        MessageKind::PlayerRejoined,
        MessageKind::GameRejoined,
        MessageKind::Error,
        MessageKind::Info,
        MessageKind::ConnectionAck,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::NewGameResponse => "new_game_response",
            MessageKind::GameStarted => "game_started",
            MessageKind::GameUpdate => "game_update",
            MessageKind::GameOver => "game_over",
            MessageKind::PlayerDisconnected => "player_disconnected",
            MessageKind::PlayerRejoined => "player_rejoined",
            MessageKind::GameRejoined => "game_rejoined",
            MessageKind::Error => "error",
            MessageKind::Info => "info",
            MessageKind::ConnectionAck => "connection_ack",
        }
    }
}

impl FromStr for MessageKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        MessageKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownType(s.to_string()))
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 新对局请求的响应（进入等待）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGameResponse {
    pub room_id: RoomId,
    #[serde(default)]
    pub status: Option<String>,
}

/// 完整对局快照（`game_started` / `game_rejoined`）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub room_id: RoomId,
    pub player_username: String,
    pub player_color: PlayerColor,
    #[serde(default)]
    pub opponent_username: String,
    #[serde(default)]
    pub opponent_type: OpponentType,
    pub current_turn: String,
    pub grid_data: Board,
}

/// 对局更新
///
/// 服务端判负（对手超时未重连）时只携带 `status`/`winner`/`message`。
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GameUpdate {
    #[serde(default)]
    pub room_id: Option<RoomId>,
    #[serde(default)]
    pub grid_data: Option<Board>,
    #[serde(default)]
    pub current_turn: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub winner: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl GameUpdate {
    /// 对局是否已结束
    pub fn is_finished(&self) -> bool {
        self.status.as_deref() == Some(STATUS_FINISHED)
    }
}

/// 对局结束
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GameOver {
    #[serde(default)]
    pub winner: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// 对手断线
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerDisconnected {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// 对手重新加入
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRejoined {
    pub username: String,
}

/// 服务端错误
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    pub error: String,
}

/// 服务端提示信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    pub info: String,
}

/// 连接确认
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectionAck {
    #[serde(default)]
    pub message: Option<String>,
}

/// 服务端发送给客户端的消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    NewGameResponse(NewGameResponse),
    GameStarted(GameSnapshot),
    GameUpdate(GameUpdate),
    GameOver(GameOver),
    PlayerDisconnected(PlayerDisconnected),
    PlayerRejoined(PlayerRejoined),
    GameRejoined(GameSnapshot),
    Error(ServerError),
    Info(Info),
    ConnectionAck(ConnectionAck),
}

/// 未解码的帧：只解析出判别字段
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    data: Value,
}

impl ServerMessage {
    /// 消息类型
    pub fn kind(&self) -> MessageKind {
        match self {
            ServerMessage::NewGameResponse(_) => MessageKind::NewGameResponse,
            ServerMessage::GameStarted(_) => MessageKind::GameStarted,
            ServerMessage::GameUpdate(_) => MessageKind::GameUpdate,
            ServerMessage::GameOver(_) => MessageKind::GameOver,
            ServerMessage::PlayerDisconnected(_) => MessageKind::PlayerDisconnected,
            ServerMessage::PlayerRejoined(_) => MessageKind::PlayerRejoined,
            ServerMessage::GameRejoined(_) => MessageKind::GameRejoined,
            ServerMessage::Error(_) => MessageKind::Error,
            ServerMessage::Info(_) => MessageKind::Info,
            ServerMessage::ConnectionAck(_) => MessageKind::ConnectionAck,
        }
    }

    /// 从文本帧解码
    ///
    /// 先读取 `type`，未知类型返回 `UnknownType`，其余按类型解码 `data`。
    pub fn from_frame(text: &str) -> Result<Self> {
        let raw: RawFrame = serde_json::from_str(text)?;
        let kind: MessageKind = raw.kind.ok_or(ProtocolError::MissingType)?.parse()?;
        Self::decode(kind, raw.data)
    }

    /// 按类型解码载荷
    pub fn decode(kind: MessageKind, data: Value) -> Result<Self> {
        let data = match data {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        let msg = match kind {
            MessageKind::NewGameResponse => {
                ServerMessage::NewGameResponse(serde_json::from_value(data)?)
            }
            MessageKind::GameStarted => ServerMessage::GameStarted(serde_json::from_value(data)?),
            MessageKind::GameUpdate => ServerMessage::GameUpdate(serde_json::from_value(data)?),
            MessageKind::GameOver => ServerMessage::GameOver(serde_json::from_value(data)?),
            MessageKind::PlayerDisconnected => {
                ServerMessage::PlayerDisconnected(serde_json::from_value(data)?)
            }
            MessageKind::PlayerRejoined => {
                ServerMessage::PlayerRejoined(serde_json::from_value(data)?)
            }
            MessageKind::GameRejoined => ServerMessage::GameRejoined(serde_json::from_value(data)?),
            MessageKind::Error => ServerMessage::Error(serde_json::from_value(data)?),
            MessageKind::Info => ServerMessage::Info(serde_json::from_value(data)?),
            MessageKind::ConnectionAck => {
                ServerMessage::ConnectionAck(serde_json::from_value(data)?)
            }
        };
        Ok(msg)
    }

    /// 编码为文本帧
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
