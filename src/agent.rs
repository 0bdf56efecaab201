//! Agent 抽象
//!
//! 编排器只通过统一契约与 agent 交互：step / get_state / reset / clone_agent / end。
//! 两种实现：LlmAgent（react_prompt 状态机）与 HumanAgent（回显，真正的人工往返由编排器完成）；
//! AgentHandle 是二者的标签联合，编排器据此区分是否需要等待人工回复。

pub mod factory;
pub mod human_agent;
pub mod llm_agent;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::{AgentKind, SelectionSection};
use crate::core::{AgentError, AgentState};
use crate::llm::LlmClient;
use crate::memory::{MemoryStore, Message};
use crate::react::ContextWindow;
use crate::tools::ToolExecutor;

pub use factory::AgentFactory;
pub use human_agent::HumanAgent;
pub use llm_agent::LlmAgent;

/// 单次 step 的结果：文本，或 `{"error": ...}` 形式的错误描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StepResponse {
    Text(String),
    Error { error: String },
}

impl StepResponse {
    pub fn error(reason: impl Into<String>) -> Self {
        Self::Error {
            error: reason.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// 写入会话历史与发送到 channel 的文本；错误描述序列化为 JSON
    pub fn to_content(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Error { .. } => serde_json::to_string(self).unwrap_or_default(),
        }
    }
}

impl fmt::Display for StepResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_content())
    }
}

/// agent 的身份信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    pub name: String,
    pub role: String,
    pub role_description: String,
}

impl AgentIdentity {
    pub fn new(
        name: impl Into<String>,
        role: impl Into<String>,
        role_description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            role_description: role_description.into(),
        }
    }
}

/// LLM agent 共享的运行时依赖；克隆只复制句柄
#[derive(Clone)]
pub struct AgentRuntime {
    pub llm: Arc<dyn LlmClient>,
    pub store: Arc<MemoryStore>,
    pub executor: ToolExecutor,
    pub window: ContextWindow,
    pub selection: SelectionSection,
}

impl fmt::Debug for AgentRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRuntime")
            .field("store", &self.store.root())
            .field("window", &self.window)
            .field("selection", &self.selection)
            .finish()
    }
}

/// 统一的 agent 契约
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> AgentKind;

    /// 处理一条输入；Err 表示本次调用失败（由编排器决定是否重试）
    async fn step(&mut self, input: Message) -> Result<StepResponse, AgentError>;

    fn get_state(&self) -> AgentState;

    /// 短期记忆回到初始状态
    fn reset(&mut self);

    /// 为一次 flow 生成独立副本：短期记忆只含初始消息，长期记忆从磁盘读取，工具各自复制
    async fn clone_agent(&self) -> AgentHandle;

    /// flow 结束：筛选短期记忆写入长期记忆并落盘；可重复调用
    async fn end(&mut self) -> Result<(), AgentError>;
}

/// 两种 agent 的标签联合
#[derive(Debug)]
pub enum AgentHandle {
    Llm(LlmAgent),
    Human(HumanAgent),
}

impl AgentHandle {
    pub fn is_human(&self) -> bool {
        matches!(self, Self::Human(_))
    }
}

#[async_trait]
impl Agent for AgentHandle {
    fn name(&self) -> &str {
        match self {
            Self::Llm(a) => a.name(),
            Self::Human(a) => a.name(),
        }
    }

    fn kind(&self) -> AgentKind {
        match self {
            Self::Llm(_) => AgentKind::Llm,
            Self::Human(_) => AgentKind::Human,
        }
    }

    async fn step(&mut self, input: Message) -> Result<StepResponse, AgentError> {
        match self {
            Self::Llm(a) => a.step(input).await,
            Self::Human(a) => a.step(input).await,
        }
    }

    fn get_state(&self) -> AgentState {
        match self {
            Self::Llm(a) => a.get_state(),
            Self::Human(a) => a.get_state(),
        }
    }

    fn reset(&mut self) {
        match self {
            Self::Llm(a) => a.reset(),
            Self::Human(a) => a.reset(),
        }
    }

    async fn clone_agent(&self) -> AgentHandle {
        match self {
            Self::Llm(a) => a.clone_agent().await,
            Self::Human(a) => a.clone_agent().await,
        }
    }

    async fn end(&mut self) -> Result<(), AgentError> {
        match self {
            Self::Llm(a) => a.end().await,
            Self::Human(a) => a.end().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_response_content() {
        assert_eq!(StepResponse::Text("hi".into()).to_content(), "hi");
        let err = StepResponse::error("Error applying pre-processing tool.");
        assert!(err.is_error());
        assert_eq!(
            err.to_content(),
            r#"{"error":"Error applying pre-processing tool."}"#
        );
    }
}
