//! 工具决策 JSON Schema 生成（schemars 自动生成）
//!
//! 工具选择调用时作为结构化提示发给模型，减少输出格式错误。

use std::collections::HashMap;

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// 工具决策格式：`{"tool": "...", "parameters": {...}}`（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolDecisionFormat {
    /// 要使用的工具名
    pub tool: String,
    /// 工具参数，依工具不同而不同
    pub parameters: HashMap<String, Value>,
}

/// 返回工具决策的 JSON Schema
pub fn tool_decision_schema() -> Value {
    let schema = schema_for!(ToolDecisionFormat);
    serde_json::to_value(&schema).unwrap_or_else(|_| serde_json::json!({}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_has_tool_and_parameters() {
        let schema = tool_decision_schema();
        let props = &schema["properties"];
        assert_eq!(props["tool"]["type"], "string");
        assert!(props.get("parameters").is_some());
    }
}
