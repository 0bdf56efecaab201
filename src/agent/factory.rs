//! 从配置构建 agent 模板
//!
//! 工具名经 ToolRegistry 解析，未知工具名在构建时直接报错；
//! 每个 agent 的模型与温度可覆盖 [llm] 段的默认值。

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::agent::{AgentHandle, AgentIdentity, AgentRuntime, HumanAgent, LlmAgent};
use crate::config::{AgentDefinition, AgentKind, AppConfig};
use crate::core::{AgentError, TaskScheduler};
use crate::llm::{create_llm_from_config, default_model_config, LlmClient, ModelConfig};
use crate::memory::MemoryStore;
use crate::react::ContextWindow;
use crate::tools::{ToolContext, ToolExecutor, ToolRegistry};

pub struct AgentFactory {
    runtime: AgentRuntime,
    registry: ToolRegistry,
    default_model: ModelConfig,
}

impl AgentFactory {
    pub fn new(runtime: AgentRuntime, registry: ToolRegistry, default_model: ModelConfig) -> Self {
        Self {
            runtime,
            registry,
            default_model,
        }
    }

    /// 按配置组装：模型客户端、记忆目录、工具注册表（内置工具）
    pub fn from_config(cfg: &AppConfig) -> Result<Self, AgentError> {
        let llm = create_llm_from_config(&cfg.llm)?;
        Ok(Self::from_config_with_llm(cfg, llm))
    }

    /// 同上，但使用给定的模型客户端（测试与嵌入场景）
    pub fn from_config_with_llm(cfg: &AppConfig, llm: Arc<dyn LlmClient>) -> Self {
        let scheduler = TaskScheduler::new(cfg.tools.max_blocking);
        let registry =
            ToolRegistry::with_builtins(ToolContext::new(cfg.tools.workspace_root.clone(), scheduler));
        let runtime = AgentRuntime {
            llm,
            store: Arc::new(MemoryStore::new(&cfg.app.memory_dir)),
            executor: ToolExecutor::new(cfg.tools.tool_timeout_secs),
            window: ContextWindow::new(cfg.llm.max_context_tokens),
            selection: cfg.selection.clone(),
        };
        Self::new(runtime, registry, default_model_config(&cfg.llm))
    }

    pub fn registry_mut(&mut self) -> &mut ToolRegistry {
        &mut self.registry
    }

    pub fn runtime(&self) -> &AgentRuntime {
        &self.runtime
    }

    pub fn build(&self, def: &AgentDefinition) -> Result<AgentHandle, AgentError> {
        let role = def.role.clone().unwrap_or_else(|| def.name.clone());
        let identity = AgentIdentity::new(def.name.clone(), role, def.role_description.clone());
        match def.kind {
            AgentKind::Human => Ok(AgentHandle::Human(HumanAgent::new(
                identity,
                self.runtime.store.clone(),
            ))),
            AgentKind::Llm => {
                let pre = self.registry.resolve(&def.pre_processing)?;
                let post = self.registry.resolve(&def.post_processing)?;
                let model = ModelConfig::new(
                    def.model.clone().unwrap_or_else(|| self.default_model.model.clone()),
                    def.temperature.unwrap_or(self.default_model.temperature),
                );
                let system_prompt = if def.system_prompt.trim().is_empty() {
                    format!("You are {}. {}", identity.role, identity.role_description)
                        .trim_end()
                        .to_string()
                } else {
                    def.system_prompt.clone()
                };
                Ok(AgentHandle::Llm(LlmAgent::new(
                    identity,
                    system_prompt,
                    model,
                    self.runtime.clone(),
                    pre,
                    post,
                )))
            }
        }
    }

    /// 构建全部 agent 模板；任一失败即返回错误
    pub fn build_all(&self, cfg: &AppConfig) -> Result<BTreeMap<String, AgentHandle>, AgentError> {
        cfg.agents
            .iter()
            .map(|def| {
                self.build(def)
                    .map_err(|e| match e {
                        AgentError::ConfigError(m) => {
                            AgentError::ConfigError(format!("agent '{}': {}", def.name, m))
                        }
                        other => other,
                    })
                    .map(|agent| (def.name.clone(), agent))
            })
            .collect()
    }
}
