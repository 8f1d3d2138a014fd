//! 启动与配置阶段的错误
//!
//! 接力运行中的故障不走这里：生成失败在调用器内重试并以兜底消息收尾，能力校验失败以文本返回给生成端。

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BatonError {
    #[error("Agent directory is empty or missing")]
    EmptyDirectory,

    #[error("Empty user message")]
    EmptyMessage,
}
