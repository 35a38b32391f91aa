//! 会话模块
//!
//! 管理对局的完整生命周期：连接、匹配、走棋、断线重连、结束。

mod engine;
mod events;
mod state;

pub use engine::SessionEngine;
pub use events::{ListenerId, SessionEvent};
pub use state::*;
