//! 生成端：会话抽象与实现（OpenAI 兼容 / DeepSeek / Mock / Scripted）

pub mod deepseek;
pub mod mock;
pub mod openai;
pub mod traits;

pub use deepseek::create_deepseek_client;
pub use mock::{MockLlmClient, RecordedCall, ScriptedLlmClient, ScriptedReply};
pub use openai::OpenAiClient;
pub use traits::{LlmClient, LlmError, LlmSession, TextStream};
