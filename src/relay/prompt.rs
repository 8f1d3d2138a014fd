//! 最小上下文 Prompt 拼装
//!
//! 每次调用只看到：身份标签 + 原始用户请求 + 紧邻前一位的输出（一个块）。
//! 不带更早智能体的输出，也不带之前轮次的任何内容。

/// 接力起点的虚拟前驱名
pub const USER_AGENT_NAME: &str = "User";

/// 为单次调用拼装 prompt；previous_agent 为 "User" 时只含身份与用户请求
pub fn build(agent_name: &str, previous_agent: &str, previous_output: &str, user_message: &str) -> String {
    let mut prompt = format!(
        "You are {agent_name}.\n\nOriginal user request:\n{}",
        user_message.trim()
    );
    if !previous_agent.eq_ignore_ascii_case(USER_AGENT_NAME) {
        prompt.push_str(&format!(
            "\n\nOutput from {previous_agent}:\n{}",
            previous_output.trim()
        ));
    }
    prompt
}

/// 修订子步骤的复合上下文，替换 build 中的 previous_output
pub fn revision_context(
    requester: &str,
    instruction: &str,
    target_prior_output: &str,
    requester_latest_output: &str,
) -> String {
    format!(
        "REVISION REQUEST from {requester}:\n{}\n\n\
         Your previous output:\n{}\n\n\
         {requester}'s latest output:\n{}\n\n\
         Rewrite your output so it addresses the request.",
        instruction.trim(),
        target_prior_output.trim(),
        requester_latest_output.trim()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_agent_has_no_handoff_block() {
        let p = build("Planner", USER_AGENT_NAME, "plan a trip", "plan a trip");
        assert!(p.starts_with("You are Planner."));
        assert!(p.contains("Original user request:\nplan a trip"));
        assert!(!p.contains("Output from"));
    }

    #[test]
    fn test_handoff_block_from_predecessor() {
        let p = build("Writer", "Planner", "1. fly 2. hike", "plan a trip");
        assert!(p.contains("Original user request:\nplan a trip"));
        assert!(p.contains("Output from Planner:\n1. fly 2. hike"));
        assert_eq!(p.matches("Output from").count(), 1);
    }

    #[test]
    fn test_revision_context_carries_all_parts() {
        let ctx = revision_context("Critic", "add costs", "1. fly", "too vague");
        let p = build("Planner", "Critic", &ctx, "plan a trip");
        assert!(p.contains("Output from Critic:\nREVISION REQUEST from Critic:\nadd costs"));
        assert!(p.contains("Your previous output:\n1. fly"));
        assert!(p.contains("Critic's latest output:\ntoo vague"));
        assert!(p.contains("Original user request:\nplan a trip"));
    }
}
