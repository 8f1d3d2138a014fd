//! 接力过程事件：供 CLI / 前端展示进度（流式片段、修订、结束）

use serde::Serialize;
use uuid::Uuid;

/// 单个事件（可序列化为 JSON）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayEvent {
    /// 新一轮开始
    TurnStarted { turn_id: Uuid, user_message: String },
    /// 某个智能体开始发言（revised_by 非空即修订步骤）
    StepStarted {
        agent: String,
        index: usize,
        revised_by: Option<String>,
    },
    /// 流式累计文本
    MessageChunk {
        agent: String,
        index: usize,
        text: String,
    },
    /// 发言结束；fallback 表示本步没有可用输出
    StepCompleted {
        agent: String,
        index: usize,
        text: String,
        fallback: bool,
    },
    RevisionAccepted {
        requester: String,
        target: String,
        instruction: String,
        count: usize,
    },
    /// 修订请求被编排器丢弃（上限、目标无效等）
    RevisionDropped {
        requester: String,
        target: String,
        reason: String,
    },
    RelayFinished { turn_id: Uuid },
    RelayCancelled { turn_id: Uuid },
}
