//! 轮次状态：RelayTurn / AgentMessage 与共享看板
//!
//! 编排流是唯一追加消息的一方；单次调用只能通过自己拿到的 MessageSlot 写对应那一条消息。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::agents::AgentIdentity;
use crate::core::RelaySnapshot;
use crate::relay::RelayEvent;

/// 一个智能体在本轮的一次输出
#[derive(Debug, Clone, Serialize)]
pub struct AgentMessage {
    pub id: Uuid,
    pub agent: AgentIdentity,
    pub text: String,
    pub is_complete: bool,
    /// 触发本条修订的智能体名；普通顺序消息为 None
    pub revised_by: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl AgentMessage {
    pub fn new(agent: AgentIdentity, revised_by: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent,
            text: String::new(),
            is_complete: false,
            revised_by,
            started_at: Utc::now(),
        }
    }

    pub fn is_revision(&self) -> bool {
        self.revised_by.is_some()
    }
}

/// 一条用户消息及其产生的全部智能体消息（只追加）
#[derive(Debug, Clone, Serialize)]
pub struct RelayTurn {
    pub id: Uuid,
    pub user_message: String,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<AgentMessage>,
}

impl RelayTurn {
    pub fn new(user_message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_message: user_message.into(),
            created_at: Utc::now(),
            messages: Vec::new(),
        }
    }

    pub fn ordinary_messages(&self) -> impl Iterator<Item = &AgentMessage> {
        self.messages.iter().filter(|m| !m.is_revision())
    }

    pub fn revision_messages(&self) -> impl Iterator<Item = &AgentMessage> {
        self.messages.iter().filter(|m| m.is_revision())
    }
}

#[derive(Debug, Default)]
struct BoardState {
    turns: Vec<RelayTurn>,
    active_message: Option<usize>,
    running: bool,
    /// 当前运行代次；旧运行收尾时不得清掉新运行的 running
    run_id: u64,
}

/// 共享看板：轮次历史、当前活动消息、running 标记与事件广播
#[derive(Debug, Clone)]
pub struct RelayBoard {
    state: Arc<RwLock<BoardState>>,
    events: broadcast::Sender<RelayEvent>,
}

impl RelayBoard {
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            state: Arc::new(RwLock::new(BoardState::default())),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.events.subscribe()
    }

    /// 没有订阅者时发送失败，忽略即可
    pub fn emit(&self, event: RelayEvent) {
        let _ = self.events.send(event);
    }

    /// 开始新一轮运行：追加空 turn、置 running，返回 (运行代次, turn id)
    pub async fn begin_run(&self, user_message: &str) -> (u64, Uuid) {
        let mut state = self.state.write().await;
        state.run_id += 1;
        state.running = true;
        state.active_message = None;
        let turn = RelayTurn::new(user_message);
        let turn_id = turn.id;
        state.turns.push(turn);
        (state.run_id, turn_id)
    }

    /// 运行结束：仅当仍是当前代次时清除 running，返回是否清除
    pub async fn finish_run(&self, run_id: u64) -> bool {
        let mut state = self.state.write().await;
        if state.run_id != run_id {
            return false;
        }
        state.running = false;
        state.active_message = None;
        true
    }

    /// 立即清除 running（stopRelay）
    pub async fn mark_stopped(&self) {
        let mut state = self.state.write().await;
        state.running = false;
        state.active_message = None;
    }

    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.turns.clear();
        state.active_message = None;
        state.running = false;
    }

    pub async fn is_running(&self) -> bool {
        self.state.read().await.running
    }

    /// 为某个智能体追加一条新消息，并返回它的唯一写入句柄
    pub async fn append_message(
        &self,
        turn_id: Uuid,
        agent: &AgentIdentity,
        revised_by: Option<String>,
    ) -> MessageSlot {
        let message = AgentMessage::new(agent.clone(), revised_by.clone());
        let message_id = message.id;
        let index = {
            let mut state = self.state.write().await;
            // turn 已被 reset 清掉时不追加，返回的句柄写入无效
            match state.turns.iter_mut().rev().find(|t| t.id == turn_id) {
                Some(t) => {
                    t.messages.push(message);
                    let index = t.messages.len() - 1;
                    state.active_message = Some(index);
                    index
                }
                None => 0,
            }
        };
        self.emit(RelayEvent::StepStarted {
            agent: agent.name.clone(),
            index,
            revised_by,
        });
        MessageSlot {
            board: self.clone(),
            turn_id,
            index,
            message_id,
            agent_name: agent.name.clone(),
        }
    }

    pub async fn snapshot(&self) -> RelaySnapshot {
        let state = self.state.read().await;
        RelaySnapshot {
            turns: state.turns.clone(),
            active_message: state.active_message,
            running: state.running,
        }
    }

    pub async fn turn(&self, turn_id: Uuid) -> Option<RelayTurn> {
        self.state
            .read()
            .await
            .turns
            .iter()
            .rev()
            .find(|t| t.id == turn_id)
            .cloned()
    }

    /// 对指定消息执行修改；消息已不存在（如 reset 之后）时返回 None
    async fn with_message<R>(
        &self,
        turn_id: Uuid,
        index: usize,
        message_id: Uuid,
        f: impl FnOnce(&mut AgentMessage) -> R,
    ) -> Option<R> {
        let mut state = self.state.write().await;
        let message = state
            .turns
            .iter_mut()
            .rev()
            .find(|t| t.id == turn_id)
            .and_then(|t| t.messages.get_mut(index))
            .filter(|m| m.id == message_id)?;
        Some(f(message))
    }
}

/// 单条 AgentMessage 的写入句柄，只在对应调用进行期间使用
#[derive(Debug, Clone)]
pub struct MessageSlot {
    board: RelayBoard,
    turn_id: Uuid,
    index: usize,
    message_id: Uuid,
    agent_name: String,
}

impl MessageSlot {
    pub fn index(&self) -> usize {
        self.index
    }

    /// 覆盖写入当前（部分）文本并广播
    pub async fn write(&self, text: &str) {
        let written = self
            .board
            .with_message(self.turn_id, self.index, self.message_id, |m| {
                m.text = text.to_string();
            })
            .await;
        if written.is_some() {
            self.board.emit(RelayEvent::MessageChunk {
                agent: self.agent_name.clone(),
                index: self.index,
                text: text.to_string(),
            });
        }
    }

    /// 以给定文本结束本条消息
    pub async fn finish(&self, text: &str) {
        self.board
            .with_message(self.turn_id, self.index, self.message_id, |m| {
                m.text = text.to_string();
                m.is_complete = true;
            })
            .await;
    }

    /// 以已累计的文本结束本条消息，并返回该文本
    pub async fn finish_current(&self) -> String {
        self.board
            .with_message(self.turn_id, self.index, self.message_id, |m| {
                m.is_complete = true;
                m.text.clone()
            })
            .await
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_slot_writes_only_its_message() {
        let board = RelayBoard::new(8);
        let (_, turn) = board.begin_run("hi").await;
        let a = board.append_message(turn, &AgentIdentity::new("a", "A", 0), None).await;
        let b = board.append_message(turn, &AgentIdentity::new("b", "B", 1), None).await;
        a.write("alpha").await;
        b.finish("beta").await;

        let snap = board.snapshot().await;
        let msgs = &snap.turns[0].messages;
        assert_eq!(msgs[0].text, "alpha");
        assert!(!msgs[0].is_complete);
        assert_eq!(msgs[1].text, "beta");
        assert!(msgs[1].is_complete);
        assert_eq!(snap.active_message, Some(1));
        assert!(snap.running);
    }

    #[tokio::test]
    async fn test_stale_slot_after_clear_is_ignored() {
        let board = RelayBoard::new(8);
        let (_, turn) = board.begin_run("first").await;
        let old = board.append_message(turn, &AgentIdentity::new("a", "A", 0), None).await;
        board.clear().await;

        let (_, turn) = board.begin_run("second").await;
        let fresh = board.append_message(turn, &AgentIdentity::new("a", "A", 0), None).await;
        old.write("stale").await;
        fresh.write("fresh").await;

        assert_eq!(board.turn(turn).await.unwrap().messages[0].text, "fresh");
        assert_eq!(old.finish_current().await, "");
    }

    #[tokio::test]
    async fn test_append_to_cleared_turn_leaves_board_untouched() {
        let board = RelayBoard::new(8);
        let (_, turn) = board.begin_run("gone").await;
        board.clear().await;

        let slot = board.append_message(turn, &AgentIdentity::new("a", "A", 0), None).await;
        slot.write("late").await;
        let snap = board.snapshot().await;
        assert!(snap.turns.is_empty());
        assert_eq!(snap.active_message, None);
    }

    #[tokio::test]
    async fn test_finish_run_respects_generation() {
        let board = RelayBoard::new(8);
        let (first, _) = board.begin_run("one").await;
        let (_second, _) = board.begin_run("two").await;
        assert!(!board.finish_run(first).await);
        assert!(board.is_running().await);
    }
}
