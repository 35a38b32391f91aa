//! 消息分发
//!
//! 把入站文本帧解析为 `ServerMessage`，按 `type` 路由到唯一的处理函数。
//! 未知类型和格式错误的帧只记录日志并丢弃。

use std::collections::HashMap;

use protocol::{MessageKind, ProtocolError, ServerMessage};

/// 消息处理函数
pub type Handler = Box<dyn FnMut(ServerMessage) + Send>;

/// 分发结果
#[derive(Debug)]
pub enum Dispatch {
    /// 已交给处理函数
    Handled(MessageKind),
    /// 类型合法但没有注册处理函数
    Unhandled(MessageKind),
    /// 帧被丢弃
    Dropped(ProtocolError),
}

/// 消息分发器
///
/// 每个通道持有一个分发器，通道销毁时处理函数随之释放。
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<MessageKind, Handler>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理函数，同一类型只保留最后一次注册
    pub fn on<F>(&mut self, kind: MessageKind, handler: F) -> &mut Self
    where
        F: FnMut(ServerMessage) + Send + 'static,
    {
        if self.handlers.insert(kind, Box::new(handler)).is_some() {
            tracing::warn!("Replacing existing handler for {}", kind);
        }
        self
    }

    /// 是否已注册该类型
    pub fn handles(&self, kind: MessageKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// 已注册的处理函数数量
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// 移除全部处理函数
    pub fn clear(&mut self) {
        self.handlers.clear();
    }

    /// 分发一个文本帧
    pub fn dispatch(&mut self, frame: &str) -> Dispatch {
        let msg = match ServerMessage::from_frame(frame) {
            Ok(msg) => msg,
            Err(ProtocolError::UnknownType(kind)) => {
                tracing::warn!("Unknown message type: {}", kind);
                return Dispatch::Dropped(ProtocolError::UnknownType(kind));
            }
            Err(e) => {
                tracing::warn!("Dropping malformed frame: {}", e);
                return Dispatch::Dropped(e);
            }
        };

        let kind = msg.kind();
        match self.handlers.get_mut(&kind) {
            Some(handler) => {
                tracing::debug!("Dispatching {}", kind);
                handler(msg);
                Dispatch::Handled(kind)
            }
            None => {
                tracing::debug!("No handler registered for {}", kind);
                Dispatch::Unhandled(kind)
            }
        }
    }
}
