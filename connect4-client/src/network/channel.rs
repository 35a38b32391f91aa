//! 传输通道
//!
//! 一个通道持有一条双向连接：读任务把入站帧交给通道自己的分发器，
//! 写任务串行发送出站帧。通道释放时读任务被终止，处理函数随分发器一起销毁，
//! 旧通道的处理函数不可能再触发。
//!
//! 每个通道恰好发出一次 `Closed` 事件，出错时也是 `Errored` 之后再 `Closed`。
//! 通道本身不做重连，重连由会话引擎负责。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use protocol::{
    ClientMessage, Connector, Frame, FrameReader, FrameWriter, ProtocolError, ServerMessage,
    CLOSE_ABNORMAL, CLOSE_NORMAL,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{ClientError, ConnectionError};
use crate::network::Dispatcher;

/// 通道编号，每次新建连接递增
pub type ChannelId = u64;

/// 写端优雅关闭的最长等待时间
const WRITER_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// 装箱后的读端
pub type BoxReader = Box<dyn FrameReader>;

/// 装箱后的写端
pub type BoxWriter = Box<dyn FrameWriter>;

/// 通道事件
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// 连接已打开
    Opened,
    /// 分发器转交的消息
    Message(ServerMessage),
    /// 传输出错（随后必有一次 Closed）
    Errored(String),
    /// 连接已关闭
    Closed { code: u16, reason: String },
}

/// 通道事件接收函数
pub type EventSink = Arc<dyn Fn(ChannelId, ChannelEvent) + Send + Sync>;

/// 建立连接并装箱读写端
pub async fn open_transport<C: Connector + ?Sized>(
    connector: &C,
    url: &str,
) -> Result<(BoxReader, BoxWriter), ConnectionError> {
    match connector.connect(url).await {
        Ok((reader, writer)) => Ok((Box::new(reader), Box::new(writer))),
        Err(source) => Err(ConnectionError::Open {
            url: url.to_string(),
            source: Arc::new(source),
        }),
    }
}

/// 负责发出生命周期事件，保证 Closed 只发一次
#[derive(Clone)]
struct Emitter {
    id: ChannelId,
    open: Arc<AtomicBool>,
    sink: EventSink,
}

impl Emitter {
    fn emit(&self, event: ChannelEvent) {
        (self.sink)(self.id, event);
    }

    fn errored(&self, error: &ProtocolError) {
        if self.open.load(Ordering::SeqCst) {
            self.emit(ChannelEvent::Errored(error.to_string()));
        }
    }

    fn closed(&self, code: u16, reason: impl Into<String>) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.emit(ChannelEvent::Closed {
                code,
                reason: reason.into(),
            });
        }
    }
}

/// 传输通道
pub struct Channel {
    id: ChannelId,
    outbound: Option<mpsc::UnboundedSender<String>>,
    emitter: Emitter,
    reader: JoinHandle<()>,
}

impl Channel {
    /// 连接并启动通道
    pub async fn connect<C: Connector + ?Sized>(
        connector: &C,
        id: ChannelId,
        url: &str,
        dispatcher: Dispatcher,
        sink: EventSink,
    ) -> Result<Self, ConnectionError> {
        let (reader, writer) = open_transport(connector, url).await?;
        tracing::info!("Connected to server: {}", url);
        Ok(Self::spawn(id, reader, writer, dispatcher, sink))
    }

    /// 在已建立的连接上启动读写任务
    ///
    /// 必须在 tokio 运行时中调用。
    pub fn spawn(
        id: ChannelId,
        reader: BoxReader,
        writer: BoxWriter,
        dispatcher: Dispatcher,
        sink: EventSink,
    ) -> Self {
        let emitter = Emitter {
            id,
            open: Arc::new(AtomicBool::new(true)),
            sink,
        };
        let (tx, rx) = mpsc::unbounded_channel();

        emitter.emit(ChannelEvent::Opened);
        let reader = tokio::spawn(read_loop(reader, dispatcher, emitter.clone()));
        tokio::spawn(write_loop(writer, rx, emitter.clone()));

        tracing::debug!("Channel {} opened", id);
        Self {
            id,
            outbound: Some(tx),
            emitter,
            reader,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// 连接是否仍然打开
    pub fn is_open(&self) -> bool {
        self.outbound.is_some() && self.emitter.open.load(Ordering::SeqCst)
    }

    /// 发送消息，通道未打开时立即失败（不排队）
    pub fn send(&self, msg: &ClientMessage) -> Result<(), ClientError> {
        let outbound = match &self.outbound {
            Some(tx) if self.is_open() => tx,
            _ => return Err(ConnectionError::NotOpen.into()),
        };

        let text = msg.to_json()?;
        outbound
            .send(text)
            .map_err(|_| ConnectionError::NotOpen)?;
        tracing::debug!("Channel {} sent {:?}", self.id, msg.kind());
        Ok(())
    }

    /// 释放通道：终止读任务（连同全部处理函数），关闭写端
    ///
    /// 重复调用不报错，只记录日志。
    pub fn disconnect(&mut self) {
        if !self.release() {
            tracing::debug!("Channel {} already disconnected", self.id);
        }
    }

    fn release(&mut self) -> bool {
        // 丢弃发送端后写任务会发完剩余帧并关闭连接
        let Some(_outbound) = self.outbound.take() else {
            return false;
        };
        self.reader.abort();
        self.emitter.closed(CLOSE_NORMAL, "client disconnect");
        tracing::debug!("Channel {} released", self.id);
        true
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.release();
    }
}

async fn read_loop(mut reader: BoxReader, mut dispatcher: Dispatcher, emitter: Emitter) {
    loop {
        match reader.read_frame().await {
            Ok(Frame::Text(text)) => {
                dispatcher.dispatch(&text);
            }
            Ok(Frame::Close { code, reason }) => {
                tracing::info!("Channel {} closed by peer: {} {}", emitter.id, code, reason);
                emitter.closed(code, reason);
                break;
            }
            Err(ProtocolError::FrameTooLarge { size, max }) => {
                tracing::warn!("Dropping oversized frame: {} bytes (max: {})", size, max);
            }
            Err(e) => {
                tracing::warn!("Channel {} receive error: {}", emitter.id, e);
                emitter.errored(&e);
                emitter.closed(CLOSE_ABNORMAL, e.to_string());
                break;
            }
        }
    }
}

async fn write_loop(
    mut writer: BoxWriter,
    mut outbound: mpsc::UnboundedReceiver<String>,
    emitter: Emitter,
) {
    while let Some(text) = outbound.recv().await {
        if let Err(e) = writer.write_frame(text).await {
            tracing::error!("Failed to send message: {}", e);
            emitter.errored(&e);
            emitter.closed(CLOSE_ABNORMAL, e.to_string());
            return;
        }
    }

    match tokio::time::timeout(WRITER_CLOSE_TIMEOUT, writer.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!("Error while closing channel {}: {}", emitter.id, e),
        Err(_) => tracing::debug!("Timed out closing channel {}", emitter.id),
    }
}
