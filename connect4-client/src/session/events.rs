//! 状态变化通知
//!
//! 渲染层通过 `on_state_change` 订阅，每个订阅者独立，互不覆盖。

use std::sync::{Arc, Mutex, MutexGuard};

use protocol::{Board, DiscColor};

use crate::player::CellPainter;
use crate::session::{EngineState, MatchOutcome};

/// 订阅编号
pub type ListenerId = u64;

/// 引擎发出的事件
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// 棋盘被服务端快照整体替换
    GridChanged(Board),
    /// 回合标记变化
    TurnChanged(bool),
    /// 状态文字（空字符串表示清除）
    StatusChanged(String),
    /// 对手断线倒计时，None 表示隐藏
    CountdownChanged(Option<u32>),
    ReconnectingChanged(bool),
    MatchStartedChanged(bool),
    /// 本地落子上色（在服务端确认之前）
    CellPainted {
        column: usize,
        row: usize,
        color: DiscColor,
    },
    /// 对局结束，每局只通知一次
    Outcome(MatchOutcome),
    /// 服务端 `error` 消息，原样转发
    ServerError(String),
    StateChanged(EngineState),
}

type Listener = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

#[derive(Default)]
struct ListenerTable {
    next_id: ListenerId,
    entries: Vec<(ListenerId, Listener)>,
}

/// 订阅者列表
#[derive(Clone, Default)]
pub(crate) struct Listeners {
    table: Arc<Mutex<ListenerTable>>,
}

impl Listeners {
    fn table(&self) -> MutexGuard<'_, ListenerTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn add(&self, listener: Listener) -> ListenerId {
        let mut table = self.table();
        table.next_id += 1;
        let id = table.next_id;
        table.entries.push((id, listener));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut table = self.table();
        let before = table.entries.len();
        table.entries.retain(|(entry, _)| *entry != id);
        table.entries.len() != before
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.table().entries.len()
    }

    /// 通知所有订阅者
    ///
    /// 回调在锁外执行，订阅者可以在回调中取消订阅。
    pub(crate) fn emit(&self, event: &SessionEvent) {
        let listeners: Vec<Listener> = self
            .table()
            .entries
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}

impl CellPainter for Listeners {
    fn paint_cell(&self, column: usize, row: usize, color: DiscColor) {
        self.emit(&SessionEvent::CellPainted { column, row, color });
    }
}
