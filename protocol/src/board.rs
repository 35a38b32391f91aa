//! 棋盘状态
//!
//! 棋盘按列存储：`grid[column][row]`，与服务端 `grid_data` 的布局一致。
//! 第 0 行在最上方，第 `BOARD_ROWS - 1` 行在最下方，棋子受重力落到最低的空格。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{BOARD_COLUMNS, BOARD_ROWS};
use crate::disc::DiscColor;
use crate::error::ProtocolError;

/// 7x6 棋盘
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<DiscColor>>", into = "Vec<Vec<DiscColor>>")]
pub struct Board {
    columns: Vec<Vec<DiscColor>>,
}

impl Board {
    /// 创建空棋盘
    pub fn empty() -> Self {
        Self {
            columns: vec![vec![DiscColor::Neutral; BOARD_ROWS]; BOARD_COLUMNS],
        }
    }

    /// 获取指定格子
    pub fn get(&self, column: usize, row: usize) -> Option<DiscColor> {
        self.columns.get(column).and_then(|c| c.get(row)).copied()
    }

    /// 设置指定格子，越界时返回 false
    pub fn set(&mut self, column: usize, row: usize, color: DiscColor) -> bool {
        match self.columns.get_mut(column).and_then(|c| c.get_mut(row)) {
            Some(cell) => {
                *cell = color;
                true
            }
            None => false,
        }
    }

    /// 该格子当前是否可以落子
    ///
    /// 格子必须为空，且位于最底行或其下方格子已被占据。
    pub fn is_droppable(&self, column: usize, row: usize) -> bool {
        match self.get(column, row) {
            Some(DiscColor::Neutral) => {
                row == BOARD_ROWS - 1
                    || self
                        .get(column, row + 1)
                        .is_some_and(|below| !below.is_empty())
            }
            _ => false,
        }
    }

    /// 某一列的落点行号，列已满时返回 None
    pub fn drop_row(&self, column: usize) -> Option<usize> {
        let cells = self.columns.get(column)?;
        cells.iter().rposition(|cell| cell.is_empty())
    }

    /// 所有可落子的格子 (column, row)
    pub fn droppable_cells(&self) -> Vec<(usize, usize)> {
        (0..BOARD_COLUMNS)
            .filter_map(|column| self.drop_row(column).map(|row| (column, row)))
            .collect()
    }

    /// 棋盘上的棋子数量
    pub fn disc_count(&self) -> usize {
        self.columns
            .iter()
            .flatten()
            .filter(|cell| !cell.is_empty())
            .count()
    }

    /// 棋盘是否已满
    pub fn is_full(&self) -> bool {
        self.droppable_cells().is_empty()
    }

    /// 按列访问
    pub fn columns(&self) -> &[Vec<DiscColor>] {
        &self.columns
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::empty()
    }
}

impl TryFrom<Vec<Vec<DiscColor>>> for Board {
    type Error = ProtocolError;

    fn try_from(columns: Vec<Vec<DiscColor>>) -> Result<Self, Self::Error> {
        if columns.len() != BOARD_COLUMNS {
            return Err(ProtocolError::InvalidBoard {
                reason: format!("expected {} columns, got {}", BOARD_COLUMNS, columns.len()),
            });
        }
        if let Some((index, column)) = columns
            .iter()
            .enumerate()
            .find(|(_, column)| column.len() != BOARD_ROWS)
        {
            return Err(ProtocolError::InvalidBoard {
                reason: format!(
                    "column {} has {} rows, expected {}",
                    index,
                    column.len(),
                    BOARD_ROWS
                ),
            });
        }
        Ok(Self { columns })
    }
}

impl From<Board> for Vec<Vec<DiscColor>> {
    fn from(board: Board) -> Self {
        board.columns
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in 0..BOARD_ROWS {
            let line: String = (0..BOARD_COLUMNS)
                .map(|column| self.columns[column][row].symbol())
                .flat_map(|c| [c, ' '])
                .collect();
            writeln!(f, "{}", line.trim_end())?;
        }
        let footer: Vec<String> = (0..BOARD_COLUMNS).map(|c| c.to_string()).collect();
        write!(f, "{}", footer.join(" "))
    }
}
