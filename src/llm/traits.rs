//! 生成端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock / Scripted）实现 LlmClient：
//! open_session 为单次调用创建全新会话（人设 + 能力集），会话上 respond（非流式）或 respond_stream（流式）。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use thiserror::Error;

use crate::tools::ToolRegistry;

/// 生成失败分类；ToolArguments 触发调用端的「下次去掉能力」降级
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("Generation cancelled")]
    Cancelled,

    #[error("Tool arguments could not be parsed: {0}")]
    ToolArguments(String),

    #[error("Provider error: {0}")]
    Provider(String),
}

/// 流式结果：每一项都是到目前为止的完整文本（逐步变长）
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// 生成端：只负责创建会话
pub trait LlmClient: Send + Sync {
    /// 为一次调用尝试创建全新会话；会话不跨智能体、尝试或轮次复用
    fn open_session(&self, instructions: &str, tools: ToolRegistry) -> Box<dyn LlmSession>;
}

/// 单次使用的生成会话
#[async_trait]
pub trait LlmSession: Send + Sync {
    /// 非流式：等待最终文本
    async fn respond(&self, prompt: &str) -> Result<String, LlmError>;

    /// 流式：返回逐步变长的文本流
    async fn respond_stream(&self, prompt: &str) -> Result<TextStream, LlmError>;
}
