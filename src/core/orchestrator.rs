//! 接力编排器：主控循环
//!
//! 负责：按名册顺序依次调用智能体、在步骤之间传递上一步输出、处理修订请求（插入修订子步骤），
//! 并通过 RelaySupervisor 保证同一时刻只有一个运行；状态写入 RelayBoard，阶段通过 watch 通道发布。

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agents::{AgentDirectory, AgentIdentity};
use crate::config::{load_config, AppConfig, RelaySection};
use crate::core::{BatonError, RelayPhase, RelaySnapshot, RelaySupervisor};
use crate::llm::{create_deepseek_client, LlmClient, MockLlmClient, OpenAiClient};
use crate::relay::{
    is_fallback, prompt, AgentInvoker, Invocation, InvokerOptions, RelayBoard, RelayEvent,
    RevisionMailbox, RevisionRequest, USER_AGENT_NAME,
};

/// 编排参数
#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub invoker: InvokerOptions,
    /// 每轮修订总数上限
    pub max_revisions: usize,
    pub event_capacity: usize,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            invoker: InvokerOptions::default(),
            max_revisions: 3,
            event_capacity: 256,
        }
    }
}

impl From<&RelaySection> for RelayOptions {
    fn from(section: &RelaySection) -> Self {
        Self {
            invoker: section.invoker_options(),
            max_revisions: section.max_revisions,
            event_capacity: section.event_capacity,
        }
    }
}

/// 根据配置与环境变量选择 LLM 后端（DeepSeek / OpenAI 兼容 / Mock）
pub(crate) fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let timeouts = &cfg.llm.timeouts;
    if provider == "mock" {
        tracing::info!("Using Mock LLM (configured)");
        return Arc::new(MockLlmClient);
    }

    // 有 DeepSeek Key，或配置为 deepseek 且仅有 OpenAI Key 时也走 DeepSeek 兼容端点
    let use_deepseek = std::env::var("DEEPSEEK_API_KEY").is_ok()
        || (provider == "deepseek" && std::env::var("OPENAI_API_KEY").is_ok());
    let use_openai = std::env::var("OPENAI_API_KEY").is_ok() && provider != "deepseek";

    if use_deepseek {
        let model = cfg
            .llm
            .deepseek
            .model
            .clone()
            .unwrap_or_else(|| cfg.llm.model.clone());
        tracing::info!("Using DeepSeek LLM ({})", model);
        Arc::new(
            create_deepseek_client(Some(&model))
                .with_request_timeout(timeouts.request)
                .with_stream_timeout(timeouts.stream),
        )
    } else if use_openai {
        let model = cfg
            .llm
            .openai
            .model
            .clone()
            .unwrap_or_else(|| "gpt-4o-mini".to_string());
        tracing::info!("Using OpenAI LLM ({})", model);
        Arc::new(
            OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &model,
                std::env::var("OPENAI_API_KEY").ok().as_deref(),
            )
            .with_request_timeout(timeouts.request)
            .with_stream_timeout(timeouts.stream),
        )
    } else {
        tracing::warn!("No API key set or provider unknown, using Mock LLM");
        Arc::new(MockLlmClient)
    }
}

/// 加载配置并创建编排器；配置加载失败时使用默认值
pub fn create_relay(config_path: Option<PathBuf>) -> RelayOrchestrator {
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    RelayOrchestrator::from_config(&cfg)
}

/// 接力编排器
pub struct RelayOrchestrator {
    directory: AgentDirectory,
    llm: Arc<dyn LlmClient>,
    options: RelayOptions,
    board: RelayBoard,
    supervisor: RelaySupervisor,
    phase: Arc<watch::Sender<RelayPhase>>,
}

impl RelayOrchestrator {
    pub fn new(directory: AgentDirectory, llm: Arc<dyn LlmClient>, options: RelayOptions) -> Self {
        let (phase, _) = watch::channel(RelayPhase::Idle);
        Self {
            board: RelayBoard::new(options.event_capacity),
            directory,
            llm,
            options,
            supervisor: RelaySupervisor::new(),
            phase: Arc::new(phase),
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        let directory = match &cfg.relay.agents_file {
            Some(path) => AgentDirectory::load(path),
            None => AgentDirectory::from_default(),
        };
        tracing::info!("Loaded {} agents: {:?}", directory.len(), directory.names());
        Self::new(
            directory,
            create_llm_from_config(cfg),
            RelayOptions::from(&cfg.relay),
        )
    }

    pub fn directory(&self) -> &AgentDirectory {
        &self.directory
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.board.subscribe()
    }

    pub fn phase(&self) -> RelayPhase {
        self.phase.borrow().clone()
    }

    pub async fn snapshot(&self) -> RelaySnapshot {
        self.board.snapshot().await
    }

    pub async fn is_running(&self) -> bool {
        self.board.is_running().await
    }

    /// 开始一轮接力；名册为空或消息为空时不做任何事并返回 false
    pub async fn start_relay(&self, user_message: &str) -> bool {
        match self.try_start(user_message).await {
            Ok(turn_id) => {
                tracing::info!("Relay turn {} started", turn_id);
                true
            }
            Err(e) => {
                tracing::warn!("Relay not started: {}", e);
                false
            }
        }
    }

    /// 同 start_relay，但返回新 turn 的 id 或拒绝原因
    pub async fn try_start(&self, user_message: &str) -> Result<Uuid, BatonError> {
        if self.directory.is_empty() {
            return Err(BatonError::EmptyDirectory);
        }
        let user_message = user_message.trim();
        if user_message.is_empty() {
            return Err(BatonError::EmptyMessage);
        }

        let (run_id, turn_id) = self.board.begin_run(user_message).await;
        self.board.emit(RelayEvent::TurnStarted {
            turn_id,
            user_message: user_message.to_string(),
        });

        let run = RelayRun {
            directory: self.directory.clone(),
            llm: self.llm.clone(),
            options: self.options.clone(),
            board: self.board.clone(),
            phase: self.phase.clone(),
            run_id,
            turn_id,
            user_message: user_message.to_string(),
        };
        self.supervisor.launch(move |cancel| run.execute(cancel));
        Ok(turn_id)
    }

    /// 发出取消信号并立即清除 running；在途调用在下一个检查点收尾
    pub async fn stop_relay(&self) {
        self.supervisor.cancel();
        self.board.mark_stopped().await;
        self.phase.send_replace(RelayPhase::Idle);
        tracing::info!("Relay stopped");
    }

    /// 停止并清空全部轮次
    pub async fn reset(&self) {
        self.stop_relay().await;
        self.board.clear().await;
    }

    /// 等待当前运行的控制流退出
    pub async fn wait_idle(&self) {
        self.supervisor.wait().await;
    }
}

/// 单次运行的上下文，随控制流一起移入后台任务
struct RelayRun {
    directory: AgentDirectory,
    llm: Arc<dyn LlmClient>,
    options: RelayOptions,
    board: RelayBoard,
    phase: Arc<watch::Sender<RelayPhase>>,
    run_id: u64,
    turn_id: Uuid,
    user_message: String,
}

impl RelayRun {
    async fn execute(self, cancel: CancellationToken) {
        let mailbox = RevisionMailbox::new();
        let invoker = AgentInvoker::new(
            self.llm.clone(),
            self.directory.clone(),
            mailbox.clone(),
            self.options.invoker.clone(),
            cancel.clone(),
        );

        let mut previous_output = self.user_message.clone();
        let mut previous_agent = USER_AGENT_NAME.to_string();
        let mut agent_outputs: HashMap<String, String> = HashMap::new();
        let mut revision_count = 0usize;

        for agent in self.directory.agents() {
            if cancel.is_cancelled() {
                break;
            }
            let eligible = self.spoken_names(&agent_outputs);
            self.phase.send_replace(RelayPhase::Invoking {
                agent: agent.name.clone(),
            });
            let slot = self.board.append_message(self.turn_id, agent, None).await;
            let output = invoker
                .run(
                    Invocation {
                        agent,
                        user_message: &self.user_message,
                        previous_agent: &previous_agent,
                        previous_output: &previous_output,
                        eligible: &eligible,
                    },
                    &slot,
                )
                .await;
            let failed = is_fallback(&output);
            self.board.emit(RelayEvent::StepCompleted {
                agent: agent.name.clone(),
                index: slot.index(),
                text: output.clone(),
                fallback: failed,
            });
            if cancel.is_cancelled() {
                break;
            }
            agent_outputs.insert(agent.name.clone(), output.clone());

            // 兜底消息不触发修订
            let request = mailbox.consume().filter(|_| !failed);
            let mut handed_off = false;
            if let Some(request) = request {
                match self.check_revision(&request, agent, &agent_outputs, revision_count) {
                    Ok(target) => {
                        revision_count += 1;
                        self.board.emit(RelayEvent::RevisionAccepted {
                            requester: agent.name.clone(),
                            target: target.name.clone(),
                            instruction: request.instruction.clone(),
                            count: revision_count,
                        });
                        tracing::info!(
                            "{} requested revision from {} ({}/{})",
                            agent.name,
                            target.name,
                            revision_count,
                            self.options.max_revisions
                        );

                        let prior = agent_outputs
                            .get(&target.name)
                            .cloned()
                            .unwrap_or_default();
                        let context = prompt::revision_context(
                            &agent.name,
                            &request.instruction,
                            &prior,
                            &output,
                        );
                        if cancel.is_cancelled() {
                            break;
                        }
                        self.phase.send_replace(RelayPhase::RevisionInvoking {
                            agent: target.name.clone(),
                            requested_by: agent.name.clone(),
                        });
                        let slot = self
                            .board
                            .append_message(self.turn_id, target, Some(agent.name.clone()))
                            .await;
                        // 修订子步骤不再提供修订能力
                        let revised = invoker
                            .run(
                                Invocation {
                                    agent: target,
                                    user_message: &self.user_message,
                                    previous_agent: &agent.name,
                                    previous_output: &context,
                                    eligible: &[],
                                },
                                &slot,
                            )
                            .await;
                        let revision_failed = is_fallback(&revised);
                        self.board.emit(RelayEvent::StepCompleted {
                            agent: target.name.clone(),
                            index: slot.index(),
                            text: revised.clone(),
                            fallback: revision_failed,
                        });
                        if cancel.is_cancelled() {
                            break;
                        }
                        if revision_failed {
                            tracing::warn!(
                                "Revision by {} failed, keeping its previous output",
                                target.name
                            );
                        } else {
                            agent_outputs.insert(target.name.clone(), revised.clone());
                            previous_output = revised;
                            previous_agent = target.name.clone();
                            handed_off = true;
                        }
                    }
                    Err(reason) => {
                        tracing::info!(
                            "Dropped revision request from {} to {}: {}",
                            agent.name,
                            request.target,
                            reason
                        );
                        self.board.emit(RelayEvent::RevisionDropped {
                            requester: agent.name.clone(),
                            target: request.target.clone(),
                            reason,
                        });
                    }
                }
            }

            // 失败的智能体不接棒，下一位仍看到上一个有效输出
            if !handed_off && !failed {
                previous_output = output;
                previous_agent = agent.name.clone();
            }
        }

        if cancel.is_cancelled() {
            self.board.emit(RelayEvent::RelayCancelled {
                turn_id: self.turn_id,
            });
            tracing::info!("Relay turn {} cancelled", self.turn_id);
        } else {
            self.board.emit(RelayEvent::RelayFinished {
                turn_id: self.turn_id,
            });
            tracing::info!("Relay turn {} finished", self.turn_id);
        }
        // 已被新运行取代时不动阶段
        if self.board.finish_run(self.run_id).await {
            self.phase.send_replace(RelayPhase::Idle);
        }
    }

    /// 已发言智能体名，按名册顺序
    fn spoken_names(&self, outputs: &HashMap<String, String>) -> Vec<String> {
        self.directory
            .agents()
            .iter()
            .filter(|a| outputs.contains_key(&a.name))
            .map(|a| a.name.clone())
            .collect()
    }

    /// 编排侧复核：上限 -> 目标存在 -> 目标已发言 -> 非刚完成的智能体本身
    fn check_revision<'d>(
        &'d self,
        request: &RevisionRequest,
        agent: &AgentIdentity,
        outputs: &HashMap<String, String>,
        count: usize,
    ) -> Result<&'d AgentIdentity, String> {
        if count >= self.options.max_revisions {
            return Err(format!(
                "revision limit of {} reached for this turn",
                self.options.max_revisions
            ));
        }
        let target = self
            .directory
            .find(&request.target)
            .ok_or_else(|| format!("unknown agent '{}'", request.target))?;
        if !outputs.contains_key(&target.name) {
            return Err(format!("{} has not produced output yet", target.name));
        }
        if target.is_named(&agent.name) {
            return Err("an agent cannot revise itself".to_string());
        }
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ScriptedLlmClient, ScriptedReply};
    use std::time::Duration;

    fn options() -> RelayOptions {
        RelayOptions {
            invoker: InvokerOptions {
                max_retries: 2,
                retry_delay: Duration::ZERO,
                streaming: false,
            },
            ..RelayOptions::default()
        }
    }

    #[tokio::test]
    async fn test_empty_directory_is_noop() {
        let relay = RelayOrchestrator::new(
            AgentDirectory::default(),
            Arc::new(ScriptedLlmClient::new()),
            options(),
        );
        assert!(!relay.start_relay("hello").await);
        assert!(relay.snapshot().await.turns.is_empty());
        assert!(!relay.is_running().await);
    }

    #[tokio::test]
    async fn test_blank_message_rejected() {
        let directory = AgentDirectory::from_agents(vec![AgentIdentity::new("a", "A", 0)]);
        let relay = RelayOrchestrator::new(directory, Arc::new(ScriptedLlmClient::new()), options());
        assert!(matches!(
            relay.try_start("   ").await,
            Err(BatonError::EmptyMessage)
        ));
    }

    #[tokio::test]
    async fn test_phase_returns_to_idle() {
        let directory = AgentDirectory::from_agents(vec![
            AgentIdentity::new("a", "A", 0).with_system_prompt("A"),
        ]);
        let llm = ScriptedLlmClient::new().script("A", vec![ScriptedReply::text("done")]);
        let relay = RelayOrchestrator::new(directory, Arc::new(llm), options());
        assert!(relay.start_relay("go").await);
        relay.wait_idle().await;
        assert_eq!(relay.phase(), RelayPhase::Idle);
        assert!(!relay.is_running().await);
    }
}
