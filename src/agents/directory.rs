//! 智能体名册加载器
//!
//! 从 config/agents.toml 读取 `[[agents]]` 列表，按 order 升序排序后只读共享。
//! 文件缺失或格式错误时返回空名册（startRelay 随之成为 no-op），不向上抛错。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// 单个智能体身份（加载后不可变）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub id: String,
    /// 显示名，也是修订请求的寻址键（大小写不敏感）
    pub name: String,
    /// 人设：会话唯一的常驻指令
    #[serde(default)]
    pub system_prompt: String,
    /// 接力顺序，升序
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub can_request_revisions: bool,
}

impl AgentIdentity {
    pub fn new(id: impl Into<String>, name: impl Into<String>, order: i32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            system_prompt: String::new(),
            order,
            can_request_revisions: false,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_revisions(mut self, allowed: bool) -> Self {
        self.can_request_revisions = allowed;
        self
    }

    /// 名称是否指向本智能体（大小写不敏感）
    pub fn is_named(&self, name: &str) -> bool {
        names_match(&self.name, name)
    }
}

/// 名称比较：去首尾空白后按 Unicode 小写比较
pub fn names_match(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

#[derive(Debug, Deserialize)]
struct AgentsToml {
    #[serde(default)]
    agents: Vec<AgentIdentity>,
}

/// 有序名册，克隆廉价（内部 Arc）
#[derive(Debug, Clone, Default)]
pub struct AgentDirectory {
    agents: Arc<Vec<AgentIdentity>>,
}

impl AgentDirectory {
    /// 按 order 稳定排序；名称重复（大小写不敏感）时保留先出现者
    pub fn from_agents(mut agents: Vec<AgentIdentity>) -> Self {
        agents.sort_by_key(|a| a.order);
        let mut unique: Vec<AgentIdentity> = Vec::with_capacity(agents.len());
        for agent in agents {
            if unique.iter().any(|a| a.is_named(&agent.name)) {
                tracing::warn!(name = %agent.name, "Duplicate agent name in directory, ignoring");
                continue;
            }
            unique.push(agent);
        }
        Self {
            agents: Arc::new(unique),
        }
    }

    /// 从 TOML 文件加载；任何失败都得到空名册
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let data = match std::fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!("Agent directory {} unreadable ({}), relay disabled", path.display(), e);
                return Self::default();
            }
        };
        match toml::from_str::<AgentsToml>(&data) {
            Ok(parsed) => {
                let directory = Self::from_agents(parsed.agents);
                tracing::info!("Loaded {} agents from {}", directory.len(), path.display());
                directory
            }
            Err(e) => {
                tracing::warn!("Agent directory {} malformed ({}), relay disabled", path.display(), e);
                Self::default()
            }
        }
    }

    /// 在默认位置查找 agents.toml
    pub fn from_default() -> Self {
        let candidates = [
            PathBuf::from("config/agents.toml"),
            PathBuf::from("../config/agents.toml"),
        ];
        let path = candidates
            .iter()
            .find(|p| p.exists())
            .cloned()
            .unwrap_or_else(|| PathBuf::from("config/agents.toml"));
        Self::load(path)
    }

    pub fn agents(&self) -> &[AgentIdentity] {
        &self.agents
    }

    pub fn find(&self, name: &str) -> Option<&AgentIdentity> {
        self.agents.iter().find(|a| a.is_named(name))
    }

    pub fn names(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
