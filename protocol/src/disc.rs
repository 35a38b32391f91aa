//! 棋子颜色与对手类型

use std::fmt;

use serde::{Deserialize, Serialize};

/// 格子状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscColor {
    /// 红方棋子
    Red,
    /// 蓝方棋子
    Blue,
    /// 空格
    #[default]
    Neutral,
}

impl DiscColor {
    /// 是否为空格
    pub fn is_empty(self) -> bool {
        self == DiscColor::Neutral
    }

    /// 终端显示字符
    pub fn symbol(self) -> char {
        match self {
            DiscColor::Red => 'R',
            DiscColor::Blue => 'B',
            DiscColor::Neutral => '.',
        }
    }
}

/// 玩家执子颜色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerColor {
    Red,
    Blue,
}

impl PlayerColor {
    /// 获取对方颜色
    pub fn opponent(self) -> Self {
        match self {
            PlayerColor::Red => PlayerColor::Blue,
            PlayerColor::Blue => PlayerColor::Red,
        }
    }

    /// 线上使用的字符串
    pub fn as_str(self) -> &'static str {
        match self {
            PlayerColor::Red => "red",
            PlayerColor::Blue => "blue",
        }
    }
}

impl From<PlayerColor> for DiscColor {
    fn from(color: PlayerColor) -> Self {
        match color {
            PlayerColor::Red => DiscColor::Red,
            PlayerColor::Blue => DiscColor::Blue,
        }
    }
}

impl fmt::Display for PlayerColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 对手类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpponentType {
    /// 真人玩家
    #[default]
    Human,
    /// 服务端机器人
    Bot,
}
