//! 工具执行器
//!
//! execute(tool, args) 在超时内调用 tool.run，超时或失败时转为 AgentError（ToolTimeout / ToolExecutionFailed）；
//! 每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::core::AgentError;
use crate::tools::{Tool, ToolOutput};

/// 工具执行器：对每次调用施加超时，并将结果映射为 AgentError
#[derive(Debug, Clone, Copy)]
pub struct ToolExecutor {
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(timeout_secs: u64) -> Self {
        Self::with_timeout(Duration::from_secs(timeout_secs))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// 执行工具；超时返回 ToolTimeout，工具返回 Err 则转为 ToolExecutionFailed；输出 JSON 审计日志
    pub async fn execute(&self, tool: &dyn Tool, args: Value) -> Result<ToolOutput, AgentError> {
        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = timeout(self.timeout, tool.run(args)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(out)) if out.completed => (true, "completed"),
            Ok(Ok(_)) => (true, "incomplete"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool.name(),
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(Ok(out)) => Ok(out),
            Ok(Err(e)) => Err(AgentError::ToolExecutionFailed(format!("{}: {}", tool.name(), e))),
            Err(_) => Err(AgentError::ToolTimeout(tool.name().to_string())),
        }
    }
}

impl Default for ToolExecutor {
    fn default() -> Self {
        Self::new(60)
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::EchoTool;
    use async_trait::async_trait;

    #[derive(Clone)]
    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "SlowTool"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        async fn run(&self, _args: Value) -> Result<ToolOutput, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ToolOutput::completed("late"))
        }
        fn clone_tool(&self) -> Box<dyn Tool> {
            Box::new(self.clone())
        }
    }

    #[tokio::test]
    async fn test_execute_ok() {
        let exec = ToolExecutor::new(5);
        let out = exec
            .execute(&EchoTool, serde_json::json!({"text": "x"}))
            .await
            .unwrap();
        assert_eq!(out.result, "x");
    }

    #[tokio::test]
    async fn test_execute_error_is_wrapped() {
        let exec = ToolExecutor::new(5);
        let err = exec.execute(&EchoTool, serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolExecutionFailed(ref m) if m.starts_with("EchoTool")));
    }

    #[tokio::test]
    async fn test_execute_timeout() {
        let exec = ToolExecutor::with_timeout(Duration::from_millis(20));
        let err = exec.execute(&SlowTool, Value::Null).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolTimeout(ref n) if n == "SlowTool"));
    }

    #[test]
    fn test_args_preview_truncates() {
        let long = Value::String("x".repeat(500));
        assert_eq!(args_preview(&long).chars().count(), 203);
    }
}
