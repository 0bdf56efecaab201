//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供编排循环决定是带提示重试、兜底继续还是终止 flow。

use crate::core::{AgentError, RecoveryAction};

/// actor 多次失败后的兜底回复
pub const NO_SOLUTION_FALLBACK: &str =
    "Solution: No solution as there was an error in assistant step";

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// 根据错误类型返回建议的恢复动作；context 为上一轮的上下文，拼进重试提示
    pub fn handle(&self, err: &AgentError, context: &str) -> RecoveryAction {
        match err {
            AgentError::UnknownAgent(name) => RecoveryAction::RetryWithPrompt(format!(
                "Assistant name unknown: '{name}'. Context: {context}"
            )),
            AgentError::InvalidInstruction(raw) => RecoveryAction::RetryWithPrompt(format!(
                "Your previous reply could not be parsed as an instruction ({raw}). \
                Reply with a JSON object containing \"Action\", \"Question\", \"Thought\" \
                and \"Action Input\". Context: {context}"
            )),
            AgentError::JsonParseError(raw) => RecoveryAction::RetryWithPrompt(format!(
                "The previous JSON was invalid: {raw}. Context: {context}"
            )),
            AgentError::LlmError(_)
            | AgentError::ToolExecutionFailed(_)
            | AgentError::ToolTimeout(_)
            | AgentError::HallucinatedTool(_)
            | AgentError::Persistence(_) => {
                RecoveryAction::Fallback(NO_SOLUTION_FALLBACK.to_string())
            }
            AgentError::HumanTimeout { .. }
            | AgentError::Cancelled
            | AgentError::ConfigError(_)
            | AgentError::PathEscape(_)
            | AgentError::Channel(_) => RecoveryAction::Abort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;

    #[test]
    fn test_recovery_unknown_agent_carries_breadcrumb() {
        let engine = RecoveryEngine::new();
        let err = AgentError::UnknownAgent("Ghost".to_string());
        match engine.handle(&err, "{\"input\":\"x\"}") {
            RecoveryAction::RetryWithPrompt(msg) => {
                assert!(msg.starts_with("Assistant name unknown"));
                assert!(msg.contains("Ghost"));
                assert!(msg.contains("{\"input\":\"x\"}"));
            }
            other => panic!("Expected RetryWithPrompt, got {:?}", other),
        }
    }

    #[test]
    fn test_recovery_invalid_instruction() {
        let engine = RecoveryEngine::new();
        let err = AgentError::InvalidInstruction("no Action".to_string());
        assert!(matches!(
            engine.handle(&err, ""),
            RecoveryAction::RetryWithPrompt(_)
        ));
    }

    #[test]
    fn test_recovery_llm_error_falls_back() {
        let engine = RecoveryEngine::new();
        let err = AgentError::LlmError(LlmError::RateLimited { retry_after_ms: 1000 });
        assert_eq!(
            engine.handle(&err, ""),
            RecoveryAction::Fallback(NO_SOLUTION_FALLBACK.to_string())
        );
    }

    #[test]
    fn test_recovery_cancelled() {
        let engine = RecoveryEngine::new();
        assert_eq!(engine.handle(&AgentError::Cancelled, ""), RecoveryAction::Abort);
    }

    #[test]
    fn test_recovery_human_timeout_aborts() {
        let engine = RecoveryEngine::new();
        let err = AgentError::HumanTimeout {
            agent: "Reviewer".to_string(),
            timeout_secs: 60,
        };
        assert_eq!(engine.handle(&err, ""), RecoveryAction::Abort);
    }

    #[test]
    fn test_recovery_config_error_aborts() {
        let engine = RecoveryEngine::new();
        let err = AgentError::ConfigError("missing".to_string());
        assert_eq!(engine.handle(&err, ""), RecoveryAction::Abort);
    }
}
