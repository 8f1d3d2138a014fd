//! 单个智能体的调用：拼 prompt -> 新会话 -> 流式/非流式等待 -> 分类结果 -> 退避重试
//!
//! 每次尝试都重建能力集并开新会话；能力参数解析失败后，剩余尝试不再提供能力（纯文本降级）。
//! 取消在尝试开始、退避等待、每次等待生成结果/流片段时检查。

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::agents::{AgentDirectory, AgentIdentity};
use crate::llm::{LlmClient, LlmError, LlmSession};
use crate::relay::{prompt, MessageSlot, RevisionMailbox};
use crate::tools::{RequestRevisionTool, ToolRegistry};

/// 兜底消息前缀：下游据此判断「本步没有可用输出」
pub const FALLBACK_PREFIX: &str = "⚠️ [relay fallback] ";

pub fn is_fallback(text: &str) -> bool {
    text.starts_with(FALLBACK_PREFIX)
}

/// 空白或字面量 null / nil 视为瞬时失败
fn is_unusable(text: &str) -> bool {
    let t = text.trim();
    t.is_empty() || t.eq_ignore_ascii_case("null") || t.eq_ignore_ascii_case("nil")
}

/// 调用参数：重试次数、重试间隔、是否流式
#[derive(Debug, Clone)]
pub struct InvokerOptions {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub streaming: bool,
}

impl Default for InvokerOptions {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay: Duration::from_secs(1),
            streaming: true,
        }
    }
}

/// 一次调用的交接状态
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub agent: &'a AgentIdentity,
    pub user_message: &'a str,
    pub previous_agent: &'a str,
    pub previous_output: &'a str,
    /// 本轮已发言、可被请求修订的智能体
    pub eligible: &'a [String],
}

enum AttemptOutcome {
    Text(String),
    Failed(LlmError),
    Cancelled,
}

/// 智能体调用器：每个运行（run）持有一个，与该运行共享信箱与取消令牌
pub struct AgentInvoker {
    llm: Arc<dyn LlmClient>,
    directory: AgentDirectory,
    mailbox: RevisionMailbox,
    options: InvokerOptions,
    cancel: CancellationToken,
}

impl AgentInvoker {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        directory: AgentDirectory,
        mailbox: RevisionMailbox,
        options: InvokerOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            llm,
            directory,
            mailbox,
            options,
            cancel,
        }
    }

    fn capabilities(&self, agent: &AgentIdentity, eligible: &[String]) -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        if agent.can_request_revisions && !eligible.is_empty() {
            tools.register(RequestRevisionTool::new(
                agent.name.clone(),
                self.directory.clone(),
                eligible.to_vec(),
                self.mailbox.clone(),
            ));
        }
        tools
    }

    /// 运行到结束（成功 / 兜底 / 取消），消息槽总会被标记完成；返回最终文本
    pub async fn run(&self, call: Invocation<'_>, slot: &MessageSlot) -> String {
        let agent = call.agent;
        let prompt = prompt::build(
            &agent.name,
            call.previous_agent,
            call.previous_output,
            call.user_message,
        );
        let attempts = self.options.max_retries + 1;
        let mut last_error: Option<LlmError> = None;
        let mut tools_disabled = false;

        for attempt in 1..=attempts {
            if self.cancel.is_cancelled() {
                return slot.finish_current().await;
            }
            if attempt > 1 {
                slot.write("").await;
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return slot.finish_current().await,
                    _ = tokio::time::sleep(self.options.retry_delay) => {}
                }
            }

            self.mailbox.reset_for_attempt();
            if let Some(stale) = self.mailbox.consume() {
                tracing::debug!(agent = %agent.name, target = %stale.target, "Dropped stale revision request");
            }

            let tools = if tools_disabled {
                ToolRegistry::new()
            } else {
                self.capabilities(agent, call.eligible)
            };
            let session = self.llm.open_session(&agent.system_prompt, tools);
            let outcome = if self.options.streaming {
                self.stream_attempt(session.as_ref(), &prompt, slot).await
            } else {
                self.single_attempt(session.as_ref(), &prompt, slot).await
            };

            match outcome {
                AttemptOutcome::Cancelled | AttemptOutcome::Failed(LlmError::Cancelled) => {
                    tracing::info!(agent = %agent.name, attempt, "Invocation cancelled");
                    return slot.finish_current().await;
                }
                AttemptOutcome::Failed(LlmError::ToolArguments(msg)) => {
                    tracing::warn!(agent = %agent.name, attempt, "Tool call malformed, retrying without tools: {}", msg);
                    tools_disabled = true;
                    last_error = Some(LlmError::ToolArguments(msg));
                }
                AttemptOutcome::Failed(e) => {
                    tracing::warn!(agent = %agent.name, attempt, "Generation failed: {}", e);
                    last_error = Some(e);
                }
                AttemptOutcome::Text(text) if is_unusable(&text) => {
                    tracing::debug!(agent = %agent.name, attempt, "Empty or null output, retrying");
                }
                AttemptOutcome::Text(text) => {
                    slot.finish(&text).await;
                    tracing::info!(agent = %agent.name, attempt, chars = text.chars().count(), "Agent responded");
                    return text;
                }
            }
        }

        let fallback = match last_error {
            Some(e) => format!("{FALLBACK_PREFIX}{} could not respond: {e}", agent.name),
            None => format!(
                "{FALLBACK_PREFIX}{} returned no valid response after {attempts} attempts",
                agent.name
            ),
        };
        tracing::warn!(agent = %agent.name, "Retries exhausted, using fallback message");
        slot.finish(&fallback).await;
        fallback
    }

    async fn single_attempt(
        &self,
        session: &dyn LlmSession,
        prompt: &str,
        slot: &MessageSlot,
    ) -> AttemptOutcome {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => AttemptOutcome::Cancelled,
            result = session.respond(prompt) => match result {
                Ok(text) => {
                    slot.write(&text).await;
                    AttemptOutcome::Text(text)
                }
                Err(e) => AttemptOutcome::Failed(e),
            },
        }
    }

    async fn stream_attempt(
        &self,
        session: &dyn LlmSession,
        prompt: &str,
        slot: &MessageSlot,
    ) -> AttemptOutcome {
        let mut stream = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return AttemptOutcome::Cancelled,
            result = session.respond_stream(prompt) => match result {
                Ok(stream) => stream,
                Err(e) => return AttemptOutcome::Failed(e),
            },
        };

        let mut latest = String::new();
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return AttemptOutcome::Cancelled,
                item = stream.next() => match item {
                    Some(Ok(text)) => {
                        slot.write(&text).await;
                        latest = text;
                    }
                    Some(Err(e)) => return AttemptOutcome::Failed(e),
                    None => return AttemptOutcome::Text(latest),
                },
            }
        }
    }
}
