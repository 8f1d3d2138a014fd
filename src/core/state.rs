//! 状态定义：编排阶段与对外投影
//!
//! 展示层只读 RelaySnapshot（轮次列表 + 当前活动消息下标 + running）；真实状态由 RelayBoard 持有。

use serde::Serialize;

use crate::relay::RelayTurn;

/// 编排阶段：Idle -> Running(Invoking / RevisionInvoking) -> Idle
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum RelayPhase {
    Idle,
    Invoking { agent: String },
    RevisionInvoking { agent: String, requested_by: String },
}

/// 展示层看到的投影
#[derive(Clone, Debug, Default, Serialize)]
pub struct RelaySnapshot {
    pub turns: Vec<RelayTurn>,
    /// 当前轮中正在写入的消息下标
    pub active_message: Option<usize>,
    pub running: bool,
}

impl RelaySnapshot {
    pub fn latest_turn(&self) -> Option<&RelayTurn> {
        self.turns.last()
    }
}
