//! Baton - 多智能体接力编排
//!
//! 模块划分：
//! - **agents**: 智能体名册（身份、顺序、是否可请求修订）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排器、运行监管、状态投影、错误
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock / 脚本）
//! - **observability**: 日志初始化
//! - **relay**: 轮次状态、修订信箱、Prompt 拼装、智能体调用器、过程事件
//! - **tools**: 生成端可调用的能力（request_revision）与注册表

pub mod agents;
pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod relay;
pub mod tools;

pub use agents::{AgentDirectory, AgentIdentity};
pub use core::{create_relay, RelayOrchestrator};
