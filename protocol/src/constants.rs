//! 协议常量定义

use std::time::Duration;

/// 棋盘列数
pub const BOARD_COLUMNS: usize = 7;

/// 棋盘行数（第 0 行在最上方，第 5 行在最下方）
pub const BOARD_ROWS: usize = 6;

/// 用户名最大长度
pub const MAX_USERNAME_LEN: usize = 20;

/// 消息帧最大大小
pub const MAX_FRAME_SIZE: usize = 65536;

/// 默认服务器地址
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8080/ws";

/// 连接 URL 中携带用户名的查询参数
pub const USERNAME_QUERY_PARAM: &str = "username";

/// 服务端表示平局的胜者字段取值
pub const DRAW_WINNER: &str = "draw";

/// 连接超时（秒）
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// 连接断开后首次重连的延迟（毫秒）
pub const INITIAL_RECONNECT_DELAY_MS: u64 = 2000;

/// 重连失败后再次尝试的间隔（毫秒）
pub const RETRY_RECONNECT_DELAY_MS: u64 = 5000;

/// 默认最大重连次数
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// 对手断线宽限倒计时（秒）- 与服务端的等待时间一致
pub const GRACE_COUNTDOWN_TICKS: u32 = 30;

/// 倒计时每跳间隔（毫秒）
pub const COUNTDOWN_TICK_MS: u64 = 1000;

/// 临时状态消息的显示时间（毫秒）
pub const STATUS_CLEAR_MS: u64 = 5000;

/// 连接超时 Duration
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(CONNECT_TIMEOUT_SECS);
