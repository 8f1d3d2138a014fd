//! Mock 生成端（无需 API）
//!
//! - MockLlmClient：回显用户请求，便于本地跑通整条接力
//! - ScriptedLlmClient：按人设排好的回复脚本，供测试精确控制成功/失败/工具调用/流式/挂起，并记录每次调用

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{stream, StreamExt};

use crate::llm::{LlmClient, LlmError, LlmSession, TextStream};
use crate::tools::{ToolError, ToolRegistry};

/// Mock 客户端：回显 prompt 中的用户请求
#[derive(Debug, Default)]
pub struct MockLlmClient;

impl LlmClient for MockLlmClient {
    fn open_session(&self, instructions: &str, _tools: ToolRegistry) -> Box<dyn LlmSession> {
        Box::new(MockSession {
            persona: instructions.lines().next().unwrap_or_default().to_string(),
        })
    }
}

struct MockSession {
    persona: String,
}

#[async_trait]
impl LlmSession for MockSession {
    async fn respond(&self, prompt: &str) -> Result<String, LlmError> {
        let request = prompt
            .split("Original user request:")
            .nth(1)
            .and_then(|rest| rest.trim().lines().next())
            .unwrap_or("(no input)");
        Ok(format!("Echo from Mock [{}]: {}", self.persona, request))
    }

    async fn respond_stream(&self, prompt: &str) -> Result<TextStream, LlmError> {
        let content = self.respond(prompt).await?;
        let mut partial = String::new();
        let items: Vec<Result<String, LlmError>> = content
            .split_inclusive(' ')
            .map(|word| {
                partial.push_str(word);
                Ok(partial.clone())
            })
            .collect();
        Ok(Box::pin(stream::iter(items)))
    }
}

/// 脚本中的一次回复
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// 直接返回文本
    Text(String),
    /// 生成失败
    Fail(LlmError),
    /// 先调用一个能力（参数为原始 JSON 文本），再返回文本；未提供该能力时跳过调用
    CallTool {
        tool: String,
        args: String,
        then: String,
    },
    /// 分段输出，流式时逐段累加
    Chunks(Vec<String>),
    /// 输出若干段后永不结束（用于取消测试）
    Hang(Vec<String>),
}

impl ScriptedReply {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn provider_error(msg: impl Into<String>) -> Self {
        Self::Fail(LlmError::Provider(msg.into()))
    }

    pub fn call_tool(tool: impl Into<String>, args: impl Into<String>, then: impl Into<String>) -> Self {
        Self::CallTool {
            tool: tool.into(),
            args: args.into(),
            then: then.into(),
        }
    }

    /// 便捷构造：request_revision 调用
    pub fn request_revision(request: &str, then: impl Into<String>) -> Self {
        Self::call_tool(
            crate::tools::REQUEST_REVISION_TOOL,
            serde_json::json!({ "request": request }).to_string(),
            then,
        )
    }
}

/// 一次被记录的生成调用
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub instructions: String,
    pub prompt: String,
    /// 本次会话提供的能力名
    pub tools: Vec<String>,
    /// 能力调用的返回文本
    pub tool_outputs: Vec<String>,
}

type Scripts = HashMap<String, VecDeque<ScriptedReply>>;

/// 脚本客户端：以人设（instructions）为键取回复；队列只剩一项时重复使用它
#[derive(Debug, Clone, Default)]
pub struct ScriptedLlmClient {
    scripts: Arc<Mutex<Scripts>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, persona: &str, replies: Vec<ScriptedReply>) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(persona.to_string(), replies.into());
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn calls_for(&self, persona: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.instructions == persona)
            .collect()
    }

    fn next_reply(&self, persona: &str) -> Option<ScriptedReply> {
        let mut scripts = self.scripts.lock().unwrap_or_else(|p| p.into_inner());
        let queue = scripts.get_mut(persona)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }

    fn record(&self, call: RecordedCall) {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).push(call);
    }
}

impl LlmClient for ScriptedLlmClient {
    fn open_session(&self, instructions: &str, tools: ToolRegistry) -> Box<dyn LlmSession> {
        Box::new(ScriptedSession {
            client: self.clone(),
            instructions: instructions.to_string(),
            tools,
        })
    }
}

struct ScriptedSession {
    client: ScriptedLlmClient,
    instructions: String,
    tools: ToolRegistry,
}

impl ScriptedSession {
    /// 取下一条回复并执行其中的能力调用，记录本次调用
    async fn play(&self, prompt: &str) -> Result<ScriptedReply, LlmError> {
        let mut call = RecordedCall {
            instructions: self.instructions.clone(),
            prompt: prompt.to_string(),
            tools: self.tools.tool_names(),
            tool_outputs: Vec::new(),
        };
        let reply = self.client.next_reply(&self.instructions).ok_or_else(|| {
            LlmError::Provider(format!("no scripted reply for '{}'", self.instructions))
        });

        let outcome = match reply {
            Ok(ScriptedReply::CallTool { tool, args, then }) if self.tools.get(&tool).is_some() => {
                match self.tools.invoke(&tool, &args).await {
                    Ok(output) => {
                        call.tool_outputs.push(output);
                        Ok(ScriptedReply::Text(then))
                    }
                    Err(ToolError::InvalidArguments(msg)) => Err(LlmError::ToolArguments(msg)),
                    Err(e) => {
                        call.tool_outputs.push(e.to_string());
                        Ok(ScriptedReply::Text(then))
                    }
                }
            }
            Ok(ScriptedReply::CallTool { then, .. }) => Ok(ScriptedReply::Text(then)),
            other => other,
        };
        self.client.record(call);
        outcome
    }
}

fn accumulate(chunks: &[String]) -> Vec<Result<String, LlmError>> {
    let mut partial = String::new();
    chunks
        .iter()
        .map(|c| {
            partial.push_str(c);
            Ok(partial.clone())
        })
        .collect()
}

#[async_trait]
impl LlmSession for ScriptedSession {
    async fn respond(&self, prompt: &str) -> Result<String, LlmError> {
        match self.play(prompt).await? {
            ScriptedReply::Text(t) => Ok(t),
            ScriptedReply::Fail(e) => Err(e),
            ScriptedReply::Chunks(chunks) => Ok(chunks.concat()),
            ScriptedReply::Hang(_) => std::future::pending().await,
            ScriptedReply::CallTool { then, .. } => Ok(then),
        }
    }

    async fn respond_stream(&self, prompt: &str) -> Result<TextStream, LlmError> {
        match self.play(prompt).await? {
            ScriptedReply::Text(t) | ScriptedReply::CallTool { then: t, .. } => {
                Ok(Box::pin(stream::iter(vec![Ok(t)])))
            }
            ScriptedReply::Fail(e) => Err(e),
            ScriptedReply::Chunks(chunks) => Ok(Box::pin(stream::iter(accumulate(&chunks)))),
            ScriptedReply::Hang(chunks) => Ok(Box::pin(
                stream::iter(accumulate(&chunks)).chain(stream::pending()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_echoes_user_request() {
        let session = MockLlmClient.open_session("Planner persona", ToolRegistry::new());
        let out = session
            .respond("You are Planner.\n\nOriginal user request:\nbook a flight")
            .await
            .unwrap();
        assert_eq!(out, "Echo from Mock [Planner persona]: book a flight");
    }

    #[tokio::test]
    async fn test_scripted_queue_repeats_last() {
        let client = ScriptedLlmClient::new().script(
            "p",
            vec![ScriptedReply::provider_error("boom"), ScriptedReply::text("ok")],
        );
        let s = client.open_session("p", ToolRegistry::new());
        assert!(s.respond("x").await.is_err());
        assert_eq!(s.respond("x").await.unwrap(), "ok");
        assert_eq!(s.respond("x").await.unwrap(), "ok");
        assert_eq!(client.calls_for("p").len(), 3);
    }

    #[tokio::test]
    async fn test_scripted_stream_grows() {
        let client = ScriptedLlmClient::new().script(
            "p",
            vec![ScriptedReply::Chunks(vec!["he".into(), "llo".into()])],
        );
        let s = client.open_session("p", ToolRegistry::new());
        let items: Vec<String> = s
            .respond_stream("x")
            .await
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(items, vec!["he", "hello"]);
    }

    #[tokio::test]
    async fn test_unknown_persona_fails() {
        let client = ScriptedLlmClient::new();
        let s = client.open_session("ghost", ToolRegistry::new());
        assert!(matches!(s.respond("x").await, Err(LlmError::Provider(_))));
    }
}
