//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BATON__*` 覆盖（双下划线表示嵌套，如 `BATON__RELAY__MAX_RETRIES=4`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::relay::InvokerOptions;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub relay: RelaySection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock；最终还取决于是否存在 API Key
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub deepseek: LlmDeepSeekSection,
    #[serde(default)]
    pub openai: LlmOpenAiSection,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            deepseek: LlmDeepSeekSection::default(),
            openai: LlmOpenAiSection::default(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_model() -> String {
    // 接力依赖 function calling，reasoner 不支持
    "deepseek-chat".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmDeepSeekSection {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmOpenAiSection {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
    /// 流式：建立连接以及相邻两个片段之间的最长等待（秒）
    #[serde(default = "default_stream_timeout")]
    pub stream: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
            stream: default_stream_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

fn default_stream_timeout() -> u64 {
    120
}

/// [relay] 段：名册位置、重试、修订上限、流式
#[derive(Debug, Clone, Deserialize)]
pub struct RelaySection {
    /// 智能体名册；未设置时依次查找 config/agents.toml、../config/agents.toml
    pub agents_file: Option<PathBuf>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 两次尝试之间的固定等待（毫秒）
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// 每轮修订总数上限（全局，不区分请求方）
    #[serde(default = "default_max_revisions")]
    pub max_revisions: usize,
    #[serde(default = "default_streaming")]
    pub streaming: bool,
    /// 事件广播缓冲
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            agents_file: None,
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            max_revisions: default_max_revisions(),
            streaming: default_streaming(),
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_max_revisions() -> usize {
    3
}

fn default_streaming() -> bool {
    true
}

fn default_event_capacity() -> usize {
    256
}

impl RelaySection {
    pub fn invoker_options(&self) -> InvokerOptions {
        InvokerOptions {
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            streaming: self.streaming,
        }
    }
}

/// 从 config 目录加载配置，环境变量 BATON__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BATON__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BATON")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.relay.max_retries, 2);
        assert_eq!(cfg.relay.max_revisions, 3);
        assert!(cfg.relay.streaming);
        let opts = cfg.relay.invoker_options();
        assert_eq!(opts.retry_delay, Duration::from_secs(1));
        assert_eq!(cfg.llm.provider, "deepseek");
        assert_eq!(cfg.llm.timeouts.request, 60);
        assert_eq!(cfg.llm.timeouts.stream, 120);
    }

    #[test]
    fn test_explicit_file_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[relay]\nmax_retries = 4\nretry_delay_ms = 10\nstreaming = false\nagents_file = \"crew.toml\"\n\n[llm]\nprovider = \"mock\""
        )
        .unwrap();
        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.relay.max_retries, 4);
        assert_eq!(cfg.relay.retry_delay_ms, 10);
        assert!(!cfg.relay.streaming);
        assert_eq!(cfg.relay.max_revisions, 3);
        assert_eq!(cfg.relay.agents_file, Some(PathBuf::from("crew.toml")));
        assert_eq!(cfg.llm.provider, "mock");
    }
}
