//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定 RetryWithPrompt / Fallback / Abort。

use thiserror::Error;

use crate::gateway::ChannelError;
use crate::llm::LlmError;

/// 编排与 agent 运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    LlmError(#[from] LlmError),

    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Hallucinated tool: {0}")]
    HallucinatedTool(String),

    /// coordinator 指定的 agent 不在当前 flow 中
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    /// coordinator 输出无法解析为指令
    #[error("Invalid instruction: {0}")]
    InvalidInstruction(String),

    #[error("No response from human agent '{agent}' within {timeout_secs}s")]
    HumanTimeout { agent: String, timeout_secs: u64 },

    #[error("Cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Path escape attempt: {0}")]
    PathEscape(String),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 将提示注入下一轮重试（未知 agent、指令格式错误）
    RetryWithPrompt(String),
    /// 放弃本次调用，用兜底回复继续 flow（模型多次失败）
    Fallback(String),
    /// 终止当前 flow
    Abort,
}
