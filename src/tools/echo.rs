//! Echo 工具（测试用）

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{Tool, ToolOutput};

/// Echo 工具：回显文本
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "EchoTool"
    }

    fn description(&self) -> &str {
        "Echo text back (for testing)."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }

    async fn run(&self, args: Value) -> Result<ToolOutput, String> {
        let text = args
            .get("text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "missing parameter 'text'".to_string())?;
        Ok(ToolOutput::completed(text))
    }

    fn clone_tool(&self) -> Box<dyn Tool> {
        Box::new(*self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo() {
        let out = EchoTool.run(serde_json::json!({"text": "a"})).await.unwrap();
        assert_eq!(out.result, "a");
        assert!(out.completed);
        assert!(EchoTool.run(serde_json::json!({})).await.is_err());
    }
}
