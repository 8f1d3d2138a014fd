//! 能力注册表
//!
//! 所有暴露给生成端的能力实现 Tool trait（name / description / parameters_schema / execute），
//! 由 ToolRegistry 按名注册与查找；invoke(name, args_text) 是统一的「参数文本 -> 结果文本」入口。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// 能力调用错误：参数不合 schema 是可识别的一类，生成端据此降级
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Unknown tool: {0}")]
    Unknown(String),

    #[error("Tool execution failed: {0}")]
    Failed(String),
}

/// 能力 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 函数名（供 LLM 调用）
    fn name(&self) -> &str;

    /// 功能描述
    fn description(&self) -> &str;

    /// 参数 JSON Schema，默认无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError>;
}

/// 能力定义，用于向生成端声明可调用函数
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 能力注册表：每次生成尝试重新构建，不跨尝试复用
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub async fn execute(&self, name: &str, args: Value) -> Result<String, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::Unknown(name.to_string()))?;
        tool.execute(args).await
    }

    /// 统一入口：先把参数文本解析为 JSON（失败即 InvalidArguments），再分发
    pub async fn invoke(&self, name: &str, args_text: &str) -> Result<String, ToolError> {
        let args: Value = if args_text.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(args_text)
                .map_err(|e| ToolError::InvalidArguments(format!("{e}: {args_text}")))?
        };
        self.execute(name, args).await
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UpperTool;

    #[async_trait]
    impl Tool for UpperTool {
        fn name(&self) -> &str {
            "upper"
        }

        fn description(&self) -> &str {
            "Uppercase text. Args: {\"text\": \"...\"}"
        }

        async fn execute(&self, args: Value) -> Result<String, ToolError> {
            args.get("text")
                .and_then(|v| v.as_str())
                .map(|s| s.to_uppercase())
                .ok_or_else(|| ToolError::InvalidArguments("missing text".into()))
        }
    }

    #[tokio::test]
    async fn test_invoke_parses_args_text() {
        let mut registry = ToolRegistry::new();
        registry.register(UpperTool);
        let out = registry.invoke("upper", r#"{"text": "hi"}"#).await.unwrap();
        assert_eq!(out, "HI");
    }

    #[tokio::test]
    async fn test_invoke_malformed_json_is_invalid_arguments() {
        let mut registry = ToolRegistry::new();
        registry.register(UpperTool);
        let err = registry.invoke("upper", "{text: hi").await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn test_invoke_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.invoke("nope", "{}").await.unwrap_err();
        assert_eq!(err, ToolError::Unknown("nope".into()));
    }

    #[test]
    fn test_definitions() {
        let mut registry = ToolRegistry::new();
        assert!(registry.is_empty());
        registry.register(UpperTool);
        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "upper");
        assert_eq!(defs[0].parameters["type"], "object");
    }
}
