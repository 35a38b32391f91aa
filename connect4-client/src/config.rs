//! 客户端配置
//!
//! 默认值 -> JSON 配置文件 -> 环境变量，命令行参数在 main 中最后覆盖。

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use protocol::{
    COUNTDOWN_TICK_MS, DEFAULT_SERVER_URL, GRACE_COUNTDOWN_TICKS, INITIAL_RECONNECT_DELAY_MS,
    MAX_RECONNECT_ATTEMPTS, RETRY_RECONNECT_DELAY_MS, STATUS_CLEAR_MS,
};

/// 服务器地址环境变量
pub const ENV_SERVER_URL: &str = "CONNECT4_SERVER_URL";

/// 最大重连次数环境变量（`0` 表示不限制）
pub const ENV_MAX_RECONNECT_ATTEMPTS: &str = "CONNECT4_MAX_RECONNECT_ATTEMPTS";

/// 自动重连策略
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// 连接意外断开后首次重连的延迟
    pub initial_delay_ms: u64,
    /// 重连失败后的重试间隔
    pub retry_delay_ms: u64,
    /// 最多尝试次数，None 表示不限制
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// 第 `attempt` 次尝试（从 1 开始）是否仍在预算内
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt <= max)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: INITIAL_RECONNECT_DELAY_MS,
            retry_delay_ms: RETRY_RECONNECT_DELAY_MS,
            max_attempts: Some(MAX_RECONNECT_ATTEMPTS),
        }
    }
}

/// 客户端配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// 对战服务器地址
    pub server_url: String,
    /// 本地会话存储目录，None 时使用系统数据目录
    pub store_path: Option<PathBuf>,
    /// 重连策略
    pub reconnect: ReconnectPolicy,
    /// 对手断线倒计时的跳数
    pub grace_countdown_ticks: u32,
    /// 倒计时每跳间隔
    pub countdown_tick_ms: u64,
    /// 临时状态消息的显示时间
    pub status_clear_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            store_path: None,
            reconnect: ReconnectPolicy::default(),
            grace_countdown_ticks: GRACE_COUNTDOWN_TICKS,
            countdown_tick_ms: COUNTDOWN_TICK_MS,
            status_clear_ms: STATUS_CLEAR_MS,
        }
    }
}

impl ClientConfig {
    /// 默认配置文件路径
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut path| {
            path.push("connect-four");
            path.push("client.json");
            path
        })
    }

    /// 从 JSON 文件加载
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file: {:?}", path))?;
        tracing::info!("Loaded config: {:?}", path);
        Ok(config)
    }

    /// 加载配置：指定路径必须存在；未指定时尝试默认路径，不存在则使用默认值
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::load(path)?,
            None => match Self::config_path() {
                Some(path) if path.exists() => Self::load(&path)?,
                _ => Self::default(),
            },
        };
        Ok(config.with_env_overrides())
    }

    /// 应用环境变量覆盖
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(ENV_SERVER_URL) {
            self.server_url = url;
        }
        if let Some(raw) = lookup(ENV_MAX_RECONNECT_ATTEMPTS) {
            match raw.parse::<u32>() {
                Ok(0) => self.reconnect.max_attempts = None,
                Ok(max) => self.reconnect.max_attempts = Some(max),
                Err(e) => tracing::warn!("Ignoring {}={:?}: {}", ENV_MAX_RECONNECT_ATTEMPTS, raw, e),
            }
        }
        self
    }

    pub fn countdown_tick(&self) -> Duration {
        Duration::from_millis(self.countdown_tick_ms)
    }

    pub fn status_clear_delay(&self) -> Duration {
        Duration::from_millis(self.status_clear_ms)
    }
}
