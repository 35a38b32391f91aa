//! 传输层抽象
//!
//! 提供 Connector/FrameReader/FrameWriter traits 使上层会话逻辑与具体传输实现解耦，
//! 默认实现基于 WebSocket 文本帧。

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::{ProtocolError, Result};
use crate::{CONNECT_TIMEOUT, MAX_FRAME_SIZE, USERNAME_QUERY_PARAM};

/// 未收到关闭帧时使用的关闭码（异常断开）
pub const CLOSE_ABNORMAL: u16 = 1006;

/// 关闭帧不带关闭码时使用的关闭码
pub const CLOSE_NO_STATUS: u16 = 1005;

/// 正常关闭
pub const CLOSE_NORMAL: u16 = 1000;

/// 传输层收到的帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// 文本帧
    Text(String),
    /// 连接关闭
    Close { code: u16, reason: String },
}

/// 帧读取端
#[async_trait]
pub trait FrameReader: Send {
    /// 读取下一帧，连接关闭时返回 `Frame::Close`
    async fn read_frame(&mut self) -> Result<Frame>;
}

/// 帧写入端
#[async_trait]
pub trait FrameWriter: Send {
    /// 发送一个文本帧
    async fn write_frame(&mut self, text: String) -> Result<()>;

    /// 关闭连接
    async fn close(&mut self) -> Result<()>;
}

/// 连接器 trait（客户端使用）
#[async_trait]
pub trait Connector: Send + Sync {
    type Reader: FrameReader + 'static;
    type Writer: FrameWriter + 'static;

    /// 建立连接并分离读写端
    async fn connect(&self, url: &str) -> Result<(Self::Reader, Self::Writer)>;
}

/// 构造带用户名查询参数的连接地址
pub fn session_url(base: &str, username: &str) -> Result<String> {
    let mut url = Url::parse(base)?;
    url.query_pairs_mut()
        .append_pair(USERNAME_QUERY_PARAM, username);
    Ok(url.into())
}

// ============================================================================
// WebSocket 实现
// ============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket 连接器
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    type Reader = WsReader;
    type Writer = WsWriter;

    async fn connect(&self, url: &str) -> Result<(Self::Reader, Self::Writer)> {
        let (stream, _response) = timeout(CONNECT_TIMEOUT, connect_async(url))
            .await
            .map_err(|_| ProtocolError::ConnectionTimeout)??;

        tracing::debug!("WebSocket handshake completed: {}", url);

        let (sink, stream) = stream.split();
        Ok((WsReader { stream }, WsWriter { sink }))
    }
}

/// WebSocket 读取端
pub struct WsReader {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl FrameReader for WsReader {
    async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            let msg = match self.stream.next().await {
                Some(msg) => msg?,
                None => {
                    return Ok(Frame::Close {
                        code: CLOSE_ABNORMAL,
                        reason: String::new(),
                    })
                }
            };

            match msg {
                Message::Text(text) => {
                    if text.len() > MAX_FRAME_SIZE {
                        return Err(ProtocolError::FrameTooLarge {
                            size: text.len(),
                            max: MAX_FRAME_SIZE,
                        });
                    }
                    return Ok(Frame::Text(text));
                }
                Message::Close(frame) => {
                    return Ok(match frame {
                        Some(frame) => Frame::Close {
                            code: u16::from(frame.code),
                            reason: frame.reason.into_owned(),
                        },
                        None => Frame::Close {
                            code: CLOSE_NO_STATUS,
                            reason: String::new(),
                        },
                    });
                }
                Message::Binary(bytes) => {
                    tracing::debug!("Ignoring binary frame ({} bytes)", bytes.len());
                }
                // ping/pong 由 tungstenite 自动处理
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }
}

/// WebSocket 写入端
pub struct WsWriter {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameWriter for WsWriter {
    async fn write_frame(&mut self, text: String) -> Result<()> {
        if text.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: text.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        self.sink.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.sink.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ClientMessage, ServerMessage};
    use crate::message::{ConnectionAck, MessageKind};

    #[test]
    fn test_session_url_encodes_username() {
        let url = session_url("ws://localhost:8080/ws", "alice smith&co").unwrap();
        assert_eq!(url, "ws://localhost:8080/ws?username=alice+smith%26co");

        assert!(session_url("not a url", "alice").is_err());
    }

    #[tokio::test]
    async fn test_ws_connection() {
        // 启动监听
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // 服务端：接收一帧，回复确认后关闭
        let server_handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            let msg = ws.next().await.unwrap().unwrap();
            let text = msg.into_text().unwrap();
            let value: serde_json::Value = serde_json::from_str(&text).unwrap();
            assert_eq!(value["type"], "new_game");
            assert_eq!(value["username"], "test");

            let ack = ServerMessage::ConnectionAck(ConnectionAck::default());
            ws.send(Message::Text(ack.to_json().unwrap())).await.unwrap();
            ws.close(None).await.unwrap();
        });

        // 客户端连接
        let url = session_url(&format!("ws://{}/ws", addr), "test").unwrap();
        let (mut reader, mut writer) = WsConnector.connect(&url).await.unwrap();

        writer
            .write_frame(ClientMessage::new_game("test").to_json().unwrap())
            .await
            .unwrap();

        // 接收响应
        match reader.read_frame().await.unwrap() {
            Frame::Text(text) => {
                let msg = ServerMessage::from_frame(&text).unwrap();
                assert_eq!(msg.kind(), MessageKind::ConnectionAck);
            }
            other => panic!("Unexpected frame: {:?}", other),
        }

        // 随后收到关闭
        assert!(matches!(
            reader.read_frame().await.unwrap(),
            Frame::Close { .. }
        ));

        server_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // 绑定后立即释放端口，连接应失败
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = WsConnector.connect(&format!("ws://{}/ws", addr)).await;
        assert!(result.is_err());
    }
}
