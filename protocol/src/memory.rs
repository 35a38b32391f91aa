//! 内存传输
//!
//! 不经过网络的 Connector 实现，客户端一端与 `MemoryPeer` 一端通过 mpsc 通道相连。
//! 用于嵌入式回环和测试（可配合 tokio 暂停时间使用）。

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{ProtocolError, Result};
use crate::message::ServerMessage;
use crate::transport::{Connector, Frame, FrameReader, FrameWriter, CLOSE_ABNORMAL};

#[derive(Default)]
struct ConnectorState {
    /// 接下来需要拒绝的连接数
    refuse: usize,
    /// 所有连接尝试的地址（包括被拒绝的）
    attempts: Vec<String>,
}

/// 内存连接器
#[derive(Clone)]
pub struct MemoryConnector {
    state: Arc<Mutex<ConnectorState>>,
    incoming: mpsc::UnboundedSender<MemoryPeer>,
}

/// 内存监听端，接收每个新连接的服务端一侧
pub struct MemoryListener {
    incoming: mpsc::UnboundedReceiver<MemoryPeer>,
}

/// 创建一对连接器与监听端
pub fn memory_transport() -> (MemoryConnector, MemoryListener) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MemoryConnector {
            state: Arc::new(Mutex::new(ConnectorState::default())),
            incoming: tx,
        },
        MemoryListener { incoming: rx },
    )
}

impl MemoryConnector {
    fn state(&self) -> std::sync::MutexGuard<'_, ConnectorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 让接下来的 `count` 次连接失败
    pub fn refuse_next(&self, count: usize) {
        self.state().refuse = count;
    }

    /// 所有连接尝试的地址
    pub fn attempts(&self) -> Vec<String> {
        self.state().attempts.clone()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Reader = MemoryReader;
    type Writer = MemoryWriter;

    async fn connect(&self, url: &str) -> Result<(Self::Reader, Self::Writer)> {
        {
            let mut state = self.state();
            state.attempts.push(url.to_string());
            if state.refuse > 0 {
                state.refuse -= 1;
                return Err(refused());
            }
        }

        let (client_tx, client_rx) = mpsc::unbounded_channel();
        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let peer = MemoryPeer {
            url: url.to_string(),
            inbox: client_rx,
            outbox: Some(server_tx),
        };
        self.incoming.send(peer).map_err(|_| refused())?;

        Ok((
            MemoryReader { frames: server_rx },
            MemoryWriter {
                frames: Some(client_tx),
            },
        ))
    }
}

fn refused() -> ProtocolError {
    ProtocolError::Io(std::io::Error::new(
        std::io::ErrorKind::ConnectionRefused,
        "connection refused",
    ))
}

impl MemoryListener {
    /// 等待下一个连接，连接器全部释放后返回 None
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.incoming.recv().await
    }

    /// 非阻塞地取出一个已建立的连接
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.incoming.try_recv().ok()
    }
}

/// 客户端读取端
pub struct MemoryReader {
    frames: mpsc::UnboundedReceiver<Frame>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn read_frame(&mut self) -> Result<Frame> {
        Ok(self.frames.recv().await.unwrap_or(Frame::Close {
            code: CLOSE_ABNORMAL,
            reason: String::new(),
        }))
    }
}

/// 客户端写入端
pub struct MemoryWriter {
    frames: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn write_frame(&mut self, text: String) -> Result<()> {
        let frames = self.frames.as_ref().ok_or(ProtocolError::ConnectionClosed)?;
        frames
            .send(text)
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<()> {
        self.frames = None;
        Ok(())
    }
}

/// 服务端一侧
pub struct MemoryPeer {
    url: String,
    inbox: mpsc::UnboundedReceiver<String>,
    outbox: Option<mpsc::UnboundedSender<Frame>>,
}

impl MemoryPeer {
    /// 客户端连接时使用的地址
    pub fn url(&self) -> &str {
        &self.url
    }

    /// 接收客户端的下一帧，客户端关闭后返回 None
    pub async fn recv(&mut self) -> Option<String> {
        self.inbox.recv().await
    }

    /// 接收并解析为 JSON
    pub async fn recv_json(&mut self) -> Option<Value> {
        let text = self.recv().await?;
        serde_json::from_str(&text).ok()
    }

    /// 非阻塞地取出一帧
    pub fn try_recv(&mut self) -> Option<String> {
        self.inbox.try_recv().ok()
    }

    /// 发送原始文本帧，客户端已断开时返回 false
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.outbox
            .as_ref()
            .is_some_and(|tx| tx.send(Frame::Text(text.into())).is_ok())
    }

    /// 发送服务端消息
    pub fn send(&self, msg: &ServerMessage) -> Result<bool> {
        Ok(self.send_text(msg.to_json()?))
    }

    /// 以关闭帧结束连接
    pub fn close(&mut self, code: u16, reason: &str) {
        if let Some(tx) = self.outbox.take() {
            let _ = tx.send(Frame::Close {
                code,
                reason: reason.to_string(),
            });
        }
    }
}
