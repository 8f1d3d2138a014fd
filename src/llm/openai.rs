//! OpenAI 兼容 API 生成端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持 DeepSeek、OpenAI、自建代理等。
//! 会话内能力以 function 定义下发，模型发起的调用经 ToolRegistry 执行后回填，最多 MAX_TOOL_ROUNDS 轮。

use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionMessageToolCalls, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs, ChatCompletionTool,
    ChatCompletionTools, CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    FunctionObjectArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use futures_util::{stream, Stream, StreamExt};

use crate::llm::{LlmClient, LlmError, LlmSession, TextStream};
use crate::tools::{ToolError, ToolRegistry};

/// 单次生成内工具往返的最大轮数
const MAX_TOOL_ROUNDS: usize = 4;

fn provider_err(e: impl std::fmt::Display) -> LlmError {
    LlmError::Provider(e.to_string())
}

/// OpenAI 兼容客户端：持有 Client 与 model 名，每次调用派生一个新会话
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    request_timeout: Duration,
    stream_timeout: Duration,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new()
                .with_api_base(url)
                .with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            request_timeout: Duration::from_secs(60),
            stream_timeout: Duration::from_secs(120),
        }
    }

    /// 单次请求超时（对应 [llm.timeouts].request）
    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout = Duration::from_secs(secs);
        self
    }

    /// 流式超时：建立流与相邻片段之间的最长等待（对应 [llm.timeouts].stream）
    pub fn with_stream_timeout(mut self, secs: u64) -> Self {
        self.stream_timeout = Duration::from_secs(secs);
        self
    }
}

impl LlmClient for OpenAiClient {
    fn open_session(&self, instructions: &str, tools: ToolRegistry) -> Box<dyn LlmSession> {
        Box::new(OpenAiSession {
            client: self.client.clone(),
            model: self.model.clone(),
            instructions: instructions.to_string(),
            tools,
            request_timeout: self.request_timeout,
            stream_timeout: self.stream_timeout,
        })
    }
}

/// 单次使用会话：人设是唯一的 system 指令
struct OpenAiSession {
    client: Client<OpenAIConfig>,
    model: String,
    instructions: String,
    tools: ToolRegistry,
    request_timeout: Duration,
    stream_timeout: Duration,
}

/// 把增量片段累积成逐步变长的全文；相邻两项间隔超过 idle 时产出一次错误并结束
fn accumulate_deltas<S>(deltas: S, idle: Duration) -> TextStream
where
    S: Stream<Item = Result<String, LlmError>> + Send + Unpin + 'static,
{
    Box::pin(stream::unfold(
        (deltas, String::new(), false),
        move |(mut deltas, mut acc, done)| async move {
            if done {
                return None;
            }
            match tokio::time::timeout(idle, deltas.next()).await {
                Err(_) => Some((
                    Err(LlmError::Provider(format!(
                        "stream stalled for {}s",
                        idle.as_secs_f32()
                    ))),
                    (deltas, acc, true),
                )),
                Ok(None) => None,
                Ok(Some(Err(e))) => Some((Err(e), (deltas, acc, true))),
                Ok(Some(Ok(delta))) => {
                    acc.push_str(&delta);
                    let item = Ok(acc.clone());
                    Some((item, (deltas, acc, false)))
                }
            }
        },
    ))
}

impl OpenAiSession {
    fn opening_messages(&self, prompt: &str) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        let mut messages = Vec::with_capacity(2);
        if !self.instructions.trim().is_empty() {
            messages.push(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(self.instructions.clone())
                    .build()
                    .map_err(provider_err)?
                    .into(),
            );
        }
        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt.to_string())
                .build()
                .map_err(provider_err)?
                .into(),
        );
        Ok(messages)
    }

    fn tool_specs(&self) -> Result<Vec<ChatCompletionTools>, LlmError> {
        self.tools
            .definitions()
            .into_iter()
            .map(|def| {
                let function = FunctionObjectArgs::default()
                    .name(def.name)
                    .description(def.description)
                    .parameters(def.parameters)
                    .build()
                    .map_err(provider_err)?;
                Ok(ChatCompletionTools::Function(ChatCompletionTool { function }))
            })
            .collect()
    }

    fn request(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
    ) -> Result<CreateChatCompletionRequest, LlmError> {
        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(self.model.clone()).messages(messages);
        if !self.tools.is_empty() {
            builder.tools(self.tool_specs()?);
        }
        builder.build().map_err(provider_err)
    }

    /// 执行一次工具调用，返回要回填给模型的文本；参数无法解析时整个生成失败
    async fn run_tool_call(&self, name: &str, arguments: &str) -> Result<String, LlmError> {
        match self.tools.invoke(name, arguments).await {
            Ok(text) => Ok(text),
            Err(ToolError::InvalidArguments(msg)) => {
                tracing::warn!(tool = name, "Tool arguments rejected: {}", msg);
                Err(LlmError::ToolArguments(msg))
            }
            Err(e) => Ok(format!("Error: {e}")),
        }
    }
}

#[async_trait]
impl LlmSession for OpenAiSession {
    async fn respond(&self, prompt: &str) -> Result<String, LlmError> {
        let mut messages = self.opening_messages(prompt)?;

        for _ in 0..MAX_TOOL_ROUNDS {
            let request = self.request(messages.clone())?;
            let response = tokio::time::timeout(self.request_timeout, self.client.chat().create(request))
                .await
                .map_err(|_| LlmError::Provider("request timed out".to_string()))?
                .map_err(provider_err)?;

            if let Some(usage) = &response.usage {
                tracing::debug!(
                    prompt_tokens = usage.prompt_tokens,
                    completion_tokens = usage.completion_tokens,
                    "llm usage"
                );
            }

            let Some(choice) = response.choices.into_iter().next() else {
                return Ok(String::new());
            };
            let calls = choice.message.tool_calls.unwrap_or_default();
            if calls.is_empty() {
                return Ok(choice.message.content.unwrap_or_default());
            }

            messages.push(
                ChatCompletionRequestAssistantMessageArgs::default()
                    .tool_calls(calls.clone())
                    .build()
                    .map_err(provider_err)?
                    .into(),
            );
            for call in calls {
                let (id, result) = match call {
                    ChatCompletionMessageToolCalls::Function(call) => {
                        let result = self
                            .run_tool_call(&call.function.name, &call.function.arguments)
                            .await?;
                        (call.id, result)
                    }
                    ChatCompletionMessageToolCalls::Custom(call) => {
                        (call.id, "Error: custom tools are not supported".to_string())
                    }
                };
                messages.push(
                    ChatCompletionRequestToolMessageArgs::default()
                        .content(result)
                        .tool_call_id(id)
                        .build()
                        .map_err(provider_err)?
                        .into(),
                );
            }
        }

        Err(LlmError::Provider(format!(
            "no final answer after {MAX_TOOL_ROUNDS} tool rounds"
        )))
    }

    async fn respond_stream(&self, prompt: &str) -> Result<TextStream, LlmError> {
        // 带能力时需要完整的工具往返，退化为一次性结果
        if !self.tools.is_empty() {
            let content = self.respond(prompt).await?;
            return Ok(Box::pin(stream::iter(vec![Ok(content)])));
        }

        let request = self.request(self.opening_messages(prompt)?)?;
        let chunks = tokio::time::timeout(self.stream_timeout, self.client.chat().create_stream(request))
            .await
            .map_err(|_| LlmError::Provider("stream open timed out".to_string()))?
            .map_err(provider_err)?;

        let deltas = chunks.map(|chunk| {
            chunk.map_err(provider_err).map(|chunk| {
                chunk
                    .choices
                    .into_iter()
                    .filter_map(|choice| choice.delta.content)
                    .collect::<String>()
            })
        });
        Ok(accumulate_deltas(deltas, self.stream_timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deltas(items: &[&str]) -> Vec<Result<String, LlmError>> {
        items.iter().map(|s| Ok(s.to_string())).collect()
    }

    #[tokio::test]
    async fn test_deltas_accumulate_into_growing_text() {
        let out: Vec<_> = accumulate_deltas(stream::iter(deltas(&["Hel", "lo", " there"])), Duration::from_secs(5))
            .collect()
            .await;
        let texts: Vec<String> = out.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(texts, vec!["Hel", "Hello", "Hello there"]);
    }

    #[tokio::test]
    async fn test_stalled_stream_fails_instead_of_hanging() {
        let stalled = stream::iter(deltas(&["partial"])).chain(stream::pending());
        let out: Vec<_> = tokio::time::timeout(
            Duration::from_secs(5),
            accumulate_deltas(stalled, Duration::from_millis(50)).collect::<Vec<_>>(),
        )
        .await
        .expect("stream must end after the idle timeout");
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], Ok("partial".to_string()));
        assert!(matches!(&out[1], Err(LlmError::Provider(msg)) if msg.contains("stalled")));
    }

    #[tokio::test]
    async fn test_provider_error_ends_stream() {
        let items = vec![Ok("a".to_string()), Err(LlmError::Provider("boom".into())), Ok("b".to_string())];
        let out: Vec<_> = accumulate_deltas(stream::iter(items), Duration::from_secs(5))
            .collect()
            .await;
        assert_eq!(out, vec![Ok("a".to_string()), Err(LlmError::Provider("boom".into()))]);
    }
}
