//! 玩家状态
//!
//! 每个对局一份的值对象，只由会话引擎修改。

use std::fmt;
use std::sync::Arc;

use protocol::{DiscColor, GameSnapshot, OpponentType, PlayerColor, RoomId};

use crate::storage::PersistedSessionRecord;

/// 渲染层回调：给一个格子上色
pub trait CellPainter: Send + Sync {
    fn paint_cell(&self, column: usize, row: usize, color: DiscColor);
}

/// 当前玩家在对局中的身份与回合
#[derive(Clone)]
pub struct PlayerState {
    pub(crate) username: String,
    pub(crate) color: PlayerColor,
    pub(crate) opponent_username: String,
    pub(crate) opponent_type: OpponentType,
    pub(crate) room_id: RoomId,
    pub(crate) is_my_turn: bool,
    painter: Arc<dyn CellPainter>,
}

impl PlayerState {
    /// 根据服务端快照创建
    pub fn from_snapshot(snapshot: &GameSnapshot, painter: Arc<dyn CellPainter>) -> Self {
        Self {
            username: snapshot.player_username.clone(),
            color: snapshot.player_color,
            opponent_username: snapshot.opponent_username.clone(),
            opponent_type: snapshot.opponent_type,
            room_id: snapshot.room_id.clone(),
            is_my_turn: snapshot.current_turn == snapshot.player_username,
            painter,
        }
    }

    /// 在本地给落子格上色（渲染层的唯一同步回调）
    pub fn apply_move(&self, column: usize, row: usize) {
        self.painter.paint_cell(column, row, self.color.into());
    }

    /// 根据服务端给出的当前回合玩家更新回合标记
    pub(crate) fn set_turn_from(&mut self, current_turn: &str) -> bool {
        self.is_my_turn = current_turn == self.username;
        self.is_my_turn
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn color(&self) -> PlayerColor {
        self.color
    }

    pub fn opponent_username(&self) -> &str {
        &self.opponent_username
    }

    pub fn opponent_type(&self) -> OpponentType {
        self.opponent_type
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn is_my_turn(&self) -> bool {
        self.is_my_turn
    }

    /// 可持久化的部分
    pub fn record(&self) -> PersistedSessionRecord {
        PersistedSessionRecord::new(self.room_id.clone(), self.username.clone())
    }
}

impl fmt::Debug for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayerState")
            .field("username", &self.username)
            .field("color", &self.color)
            .field("opponent_username", &self.opponent_username)
            .field("opponent_type", &self.opponent_type)
            .field("room_id", &self.room_id)
            .field("is_my_turn", &self.is_my_turn)
            .finish()
    }
}
