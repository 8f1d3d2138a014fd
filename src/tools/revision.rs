//! request_revision 能力：让后面的智能体请求前面的智能体修改输出
//!
//! 校验全部以文本形式返回给调用方（生成端可以读到并自我纠正），从不作为错误抛出；
//! 只有参数本身不合 schema 时返回 ToolError::InvalidArguments。

use async_trait::async_trait;
use serde_json::Value;

use crate::agents::{names_match, AgentDirectory};
use crate::relay::{RevisionMailbox, RevisionRequest};
use crate::tools::schema::{parameters_schema, RevisionArgs};
use crate::tools::{Tool, ToolError};

pub const REQUEST_REVISION_TOOL: &str = "request_revision";

/// 绑定了调用者身份与当前可修订目标集合的修订能力（每次尝试新建）
pub struct RequestRevisionTool {
    caller: String,
    directory: AgentDirectory,
    eligible: Vec<String>,
    mailbox: RevisionMailbox,
}

impl RequestRevisionTool {
    pub fn new(
        caller: impl Into<String>,
        directory: AgentDirectory,
        eligible: Vec<String>,
        mailbox: RevisionMailbox,
    ) -> Self {
        Self {
            caller: caller.into(),
            directory,
            eligible,
            mailbox,
        }
    }

    /// 按顺序校验：格式 -> 非自身 -> 已知 -> 已发言 -> 未重复
    pub fn submit(&self, raw: &str) -> String {
        let Some((target, instruction)) = raw.split_once('|') else {
            return "Error: request must be formatted as 'AgentName | instruction'.".to_string();
        };
        let (target, instruction) = (target.trim(), instruction.trim());
        if target.is_empty() || instruction.is_empty() {
            return "Error: request must be formatted as 'AgentName | instruction' with both parts non-empty.".to_string();
        }

        if names_match(target, &self.caller) {
            return "Error: you cannot request a revision from yourself.".to_string();
        }

        let Some(agent) = self.directory.find(target) else {
            return format!(
                "Error: unknown agent '{}'. Known agents: {}.",
                target,
                self.directory.names().join(", ")
            );
        };

        if !self.eligible.iter().any(|name| agent.is_named(name)) {
            return format!(
                "Error: {} has not produced output yet in this turn. You can only ask: {}.",
                agent.name,
                if self.eligible.is_empty() {
                    "(nobody)".to_string()
                } else {
                    self.eligible.join(", ")
                }
            );
        }

        let accepted = self.mailbox.try_set(RevisionRequest {
            requester: self.caller.clone(),
            target: agent.name.clone(),
            instruction: instruction.to_string(),
        });
        if !accepted {
            return "Error: duplicate request, a revision has already been requested in this response.".to_string();
        }

        tracing::info!(requester = %self.caller, target = %agent.name, "Revision requested");
        format!(
            "Revision request sent to {}. Continue with your own response.",
            agent.name
        )
    }
}

#[async_trait]
impl Tool for RequestRevisionTool {
    fn name(&self) -> &str {
        REQUEST_REVISION_TOOL
    }

    fn description(&self) -> &str {
        "Ask an agent that already spoke in this turn to revise its output. \
         Args: {\"request\": \"AgentName | what to change\"}. At most one request per response."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<RevisionArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: RevisionArgs =
            serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        Ok(self.submit(&args.request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentIdentity;

    fn directory() -> AgentDirectory {
        AgentDirectory::from_agents(vec![
            AgentIdentity::new("p", "Planner", 0),
            AgentIdentity::new("w", "Writer", 1),
            AgentIdentity::new("c", "Critic", 2),
        ])
    }

    fn tool(caller: &str, eligible: &[&str], mailbox: &RevisionMailbox) -> RequestRevisionTool {
        mailbox.reset_for_attempt();
        RequestRevisionTool::new(
            caller,
            directory(),
            eligible.iter().map(|s| s.to_string()).collect(),
            mailbox.clone(),
        )
    }

    #[test]
    fn test_accepts_eligible_target() {
        let mailbox = RevisionMailbox::new();
        let t = tool("Critic", &["Planner", "Writer"], &mailbox);
        let out = t.submit("planner | add a timeline");
        assert!(out.starts_with("Revision request sent to Planner"), "{out}");
        let req = mailbox.consume().unwrap();
        assert_eq!(req.target, "Planner");
        assert_eq!(req.requester, "Critic");
        assert_eq!(req.instruction, "add a timeline");
    }

    #[test]
    fn test_rejects_malformed() {
        let mailbox = RevisionMailbox::new();
        let t = tool("Critic", &["Planner"], &mailbox);
        assert!(t.submit("Planner add a timeline").starts_with("Error: request must be"));
        assert!(t.submit(" | add a timeline").starts_with("Error: request must be"));
        assert!(t.submit("Planner |   ").starts_with("Error: request must be"));
        assert!(!mailbox.has_pending());
    }

    #[test]
    fn test_rejects_self_case_insensitive() {
        let mailbox = RevisionMailbox::new();
        let t = tool("Writer", &["Planner", "Writer"], &mailbox);
        assert!(t.submit("WRITER | redo").contains("yourself"));
        assert!(!mailbox.has_pending());
    }

    #[test]
    fn test_non_ascii_names_case_insensitive() {
        let directory = AgentDirectory::from_agents(vec![
            AgentIdentity::new("e", "Écrivain", 0),
            AgentIdentity::new("c", "Critique", 1),
        ]);
        let mailbox = RevisionMailbox::new();
        let t = RequestRevisionTool::new(
            "Critique",
            directory.clone(),
            vec!["Écrivain".to_string()],
            mailbox.clone(),
        );
        let out = t.submit("écrivain | fix the intro");
        assert!(out.starts_with("Revision request sent to Écrivain"), "{out}");
        assert_eq!(mailbox.consume().unwrap().target, "Écrivain");

        mailbox.reset_for_attempt();
        let t = RequestRevisionTool::new("Écrivain", directory, vec!["Écrivain".to_string()], mailbox.clone());
        assert!(t.submit("ÉCRIVAIN | redo").contains("yourself"));
        assert!(!mailbox.has_pending());
    }

    #[test]
    fn test_rejects_unknown() {
        let mailbox = RevisionMailbox::new();
        let t = tool("Critic", &["Planner"], &mailbox);
        assert!(t.submit("Oracle | predict").contains("unknown agent 'Oracle'"));
    }

    #[test]
    fn test_rejects_not_yet_spoken() {
        let mailbox = RevisionMailbox::new();
        let t = tool("Writer", &["Planner"], &mailbox);
        let out = t.submit("Critic | be nicer");
        assert!(out.contains("has not produced output yet"), "{out}");
        assert!(!mailbox.has_pending());
    }

    #[test]
    fn test_rejects_duplicate_in_same_attempt() {
        let mailbox = RevisionMailbox::new();
        let t = tool("Critic", &["Planner", "Writer"], &mailbox);
        assert!(t.submit("Planner | one").starts_with("Revision request sent"));
        assert!(t.submit("Writer | two").contains("duplicate request"));
        assert_eq!(mailbox.consume().unwrap().target, "Planner");
    }

    #[tokio::test]
    async fn test_execute_schema_failure() {
        let mailbox = RevisionMailbox::new();
        let t = tool("Critic", &["Planner"], &mailbox);
        let err = t.execute(serde_json::json!({"target": "Planner"})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
        let ok = t
            .execute(serde_json::json!({"request": "Planner | shorter"}))
            .await
            .unwrap();
        assert!(ok.starts_with("Revision request sent"));
    }
}
