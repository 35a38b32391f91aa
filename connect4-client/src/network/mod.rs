//! 网络通信模块
//!
//! - `Channel`：一条连接的生命周期与收发
//! - `Dispatcher`：按消息类型路由入站帧

mod channel;
mod dispatcher;

pub use channel::*;
pub use dispatcher::*;
