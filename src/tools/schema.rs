//! 能力参数 JSON Schema 生成（schemars）
//!
//! 参数结构同时用于 serde 反序列化与 schema 声明，保证两者一致。

use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::Value;

/// request_revision 的参数
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RevisionArgs {
    /// 格式为 "AgentName | instruction"，例如 "Planner | add a timeline section"
    pub request: String,
}

/// 返回参数类型 T 的 JSON Schema（去掉顶层 $schema/title，便于直接放入函数定义）
pub fn parameters_schema<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| serde_json::json!({}));
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revision_args_schema() {
        let schema = parameters_schema::<RevisionArgs>();
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"]["request"].is_object());
        assert_eq!(schema["required"][0], "request");
        assert!(schema.get("$schema").is_none());
    }
}
