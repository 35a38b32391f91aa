//! 本地会话存储
//!
//! 在一个固定的键下保存 {roomId, username}，进程重启后用于恢复对局。
//! 每次写入完整覆盖；内容无法解析时视为不存在。

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use protocol::RoomId;
use serde::{Deserialize, Serialize};

/// 存储键
pub const SESSION_KEY: &str = "connect4GameState";

/// 持久化的会话记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSessionRecord {
    pub room_id: RoomId,
    pub username: String,
}

impl PersistedSessionRecord {
    pub fn new(room_id: impl Into<RoomId>, username: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            username: username.into(),
        }
    }
}

/// 本地键值存储
pub trait SessionStore: Send + Sync {
    /// 读取记录，不存在或无法解析时返回 None
    fn load(&self) -> Option<PersistedSessionRecord>;

    /// 写入记录（覆盖旧记录）
    fn save(&self, record: &PersistedSessionRecord) -> Result<()>;

    /// 删除记录
    fn clear(&self) -> Result<()>;
}

/// 解析存储内容
fn parse_record(content: &str) -> Option<PersistedSessionRecord> {
    match serde_json::from_str(content) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::warn!("Failed to parse saved session state: {}", e);
            None
        }
    }
}

/// 文件存储：`<dir>/connect4GameState.json`
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    /// 在指定目录创建存储
    pub fn new(dir: &Path) -> Result<Self> {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create store directory: {:?}", dir))?;
        }

        Ok(Self {
            path: dir.join(format!("{}.json", SESSION_KEY)),
        })
    }

    /// 使用系统数据目录
    pub fn open_default() -> Result<Self> {
        Self::new(&default_store_directory()?)
    }

    /// 记录文件路径
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Option<PersistedSessionRecord> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("Failed to read {:?}: {}", self.path, e);
                return None;
            }
        };
        parse_record(&content)
    }

    fn save(&self, record: &PersistedSessionRecord) -> Result<()> {
        let content = serde_json::to_string(record).context("Failed to serialize session")?;
        fs::write(&self.path, content)
            .with_context(|| format!("Failed to write {:?}", self.path))?;
        tracing::debug!("Session saved: {:?}", record);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("Failed to remove {:?}", self.path))?;
            tracing::debug!("Session record cleared");
        }
        Ok(())
    }
}

/// 内存存储，克隆后共享同一份内容
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    content: Arc<Mutex<Option<String>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以原始内容初始化
    pub fn with_raw(content: impl Into<String>) -> Self {
        Self {
            content: Arc::new(Mutex::new(Some(content.into()))),
        }
    }

    /// 以记录初始化
    pub fn with_record(record: &PersistedSessionRecord) -> Self {
        let store = Self::new();
        if let Err(e) = store.save(record) {
            tracing::warn!("Failed to seed memory store: {}", e);
        }
        store
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        // 锁中毒时仍可安全使用其中的数据
        self.content.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Option<PersistedSessionRecord> {
        self.slot().as_deref().and_then(parse_record)
    }

    fn save(&self, record: &PersistedSessionRecord) -> Result<()> {
        *self.slot() = Some(serde_json::to_string(record)?);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot() = None;
        Ok(())
    }
}

/// 获取跨平台存储目录
fn default_store_directory() -> Result<PathBuf> {
    let app_data_dir = dirs::data_dir().context("Failed to locate the application data directory")?;

    Ok(app_data_dir.join("connect-four"))
}
