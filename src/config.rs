//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__LLM__PROVIDER=openai`）。
//! agent 与人工绑定使用表数组（`[[agents]]`、`[[human_bindings]]`），名字作为值保存，不受键名大小写影响。

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::AgentError;
use crate::llm::RetryConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub orchestrator: OrchestratorSection,
    pub selection: SelectionSection,
    pub tools: ToolsSection,
    /// 初始 flow 变量
    pub inputs: BTreeMap<String, Value>,
    pub agents: Vec<AgentDefinition>,
    pub flows: BTreeMap<String, FlowDefinition>,
    pub human_bindings: Vec<HumanBinding>,
}

/// [app] 段：记忆目录与输出目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    /// 每个 agent 一个 `<name>_memory.json`
    pub memory_dir: PathBuf,
    /// Final Answer 写入 `<output_dir>/<flow>-final.md`；未设置则不落盘
    pub output_dir: Option<PathBuf>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            memory_dir: PathBuf::from("memory"),
            output_dir: None,
        }
    }
}

/// [llm] 段：后端选择、默认模型、上下文预算与重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// openai / deepseek / mock
    pub provider: String,
    pub model: String,
    pub temperature: f32,
    pub base_url: Option<String>,
    pub max_context_tokens: usize,
    pub request_timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.2,
            base_url: None,
            max_context_tokens: 128_000,
            request_timeout_secs: 120,
            retry: RetryConfig::default(),
        }
    }
}

/// [orchestrator] 段：轮转控制
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    /// 等待人工回复的超时（秒）
    pub human_timeout_secs: u64,
    /// coordinator 指定未知 agent 时的重试次数
    pub coordinator_retries: usize,
    /// actor step 失败时的重试次数
    pub actor_retries: usize,
    /// 协调者 agent 名
    pub coordinator: String,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            human_timeout_secs: 60,
            coordinator_retries: 4,
            actor_retries: 3,
            coordinator: "ChatManager".to_string(),
        }
    }
}

/// [selection] 段：工具选择协议
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SelectionSection {
    pub max_attempts: usize,
    pub retry_delay_ms: u64,
    /// react_prompt 中 pre/post-processing 的决策轮数
    pub tool_attempts: usize,
}

impl Default for SelectionSection {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay_ms: 2000,
            tool_attempts: 4,
        }
    }
}

/// [tools] 段：沙箱根目录、工具超时、阻塞工具并发上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub workspace_root: PathBuf,
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    pub max_blocking: usize,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("workspace"),
            tool_timeout_secs: 60,
            max_blocking: 4,
        }
    }
}

/// agent 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    #[default]
    Llm,
    Human,
}

/// [[agents]]：单个 agent 定义
#[derive(Debug, Clone, Deserialize)]
pub struct AgentDefinition {
    pub name: String,
    #[serde(default)]
    pub kind: AgentKind,
    /// 未设置时与 name 相同
    pub role: Option<String>,
    #[serde(default)]
    pub role_description: String,
    #[serde(default)]
    pub system_prompt: String,
    /// 覆盖 [llm].model
    pub model: Option<String>,
    /// 覆盖 [llm].temperature
    pub temperature: Option<f32>,
    #[serde(default)]
    pub pre_processing: Vec<String>,
    #[serde(default)]
    pub post_processing: Vec<String>,
}

/// [flows.<name>]：一次多 agent 任务
#[derive(Debug, Clone, Deserialize)]
pub struct FlowDefinition {
    #[serde(default)]
    pub goal: String,
    pub participants: Vec<String>,
    #[serde(default = "default_turn_limit")]
    pub turn_limit: usize,
}

fn default_turn_limit() -> usize {
    30
}

/// [[human_bindings]]：人工 agent 名 → 接收其任务的 channel
#[derive(Debug, Clone, Deserialize)]
pub struct HumanBinding {
    pub agent: String,
    pub channel: String,
}

impl AppConfig {
    pub fn agent(&self, name: &str) -> Option<&AgentDefinition> {
        self.agents.iter().find(|a| a.name == name)
    }

    /// 查找 flow，返回配置中的键与定义。
    /// 只有一个 flow 时忽略名字；否则按 ASCII 大小写无关匹配（环境变量覆盖的键为小写）
    pub fn flow(&self, name: &str) -> Option<(&str, &FlowDefinition)> {
        let found = if self.flows.len() == 1 {
            self.flows.iter().next()
        } else {
            self.flows.iter().find(|(k, _)| k.eq_ignore_ascii_case(name))
        };
        found.map(|(k, v)| (k.as_str(), v))
    }

    /// 结构校验：协调者存在、flow 参与者均已定义、agent 名不重复
    pub fn validate(&self) -> Result<(), AgentError> {
        let mut seen = std::collections::HashSet::new();
        for agent in &self.agents {
            if agent.name.trim().is_empty() {
                return Err(AgentError::ConfigError("agent with empty name".to_string()));
            }
            if !seen.insert(agent.name.as_str()) {
                return Err(AgentError::ConfigError(format!(
                    "duplicate agent '{}'",
                    agent.name
                )));
            }
        }
        if self.agent(&self.orchestrator.coordinator).is_none() {
            return Err(AgentError::ConfigError(format!(
                "coordinator '{}' is not defined in [[agents]]",
                self.orchestrator.coordinator
            )));
        }
        for (flow_name, flow) in &self.flows {
            if flow.participants.is_empty() {
                return Err(AgentError::ConfigError(format!(
                    "flow '{}' has no participants",
                    flow_name
                )));
            }
            for participant in &flow.participants {
                if self.agent(participant).is_none() {
                    return Err(AgentError::ConfigError(format!(
                        "flow '{}' names undefined participant '{}'",
                        flow_name, participant
                    )));
                }
            }
        }
        for binding in &self.human_bindings {
            if self.agent(&binding.agent).is_none() {
                return Err(AgentError::ConfigError(format!(
                    "human binding for undefined agent '{}'",
                    binding.agent
                )));
            }
        }
        Ok(())
    }
}

/// 从 TOML 文本解析（测试与嵌入场景使用，不读环境变量）
pub fn parse_config(toml: &str) -> Result<AppConfig, config::ConfigError> {
    config::Config::builder()
        .add_source(config::File::from_str(toml, config::FileFormat::Toml))
        .build()?
        .try_deserialize()
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
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
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
