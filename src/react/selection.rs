//! 工具选择协议
//!
//! 把「下一步该做什么」变成可校验的动作：把候选工具（名称 / 描述 / 参数 schema）与对话上下文
//! 拼成一条 system 提示，请模型回复 "No tool needed" 或 `{"tool": ..., "parameters": {...}}`。
//!
//! 回复处理顺序：空回复视为不需要工具 → 大小写无关的 "no tool needed" 哨兵（先于任何 JSON 解析）
//! → 提取第一个 JSON → 直接解析 → fix_json 修复后解析 → 请模型纠正一次。
//! 整个过程最多 max_attempts 次，每次失败后等待 retry_delay；全部失败返回 Empty。

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::config::SelectionSection;
use crate::llm::{LlmClient, ModelConfig};
use crate::memory::Message;
use crate::react::json_repair::{auto_fix_json, extract_json};
use crate::tools::{tool_decision_schema, Tool};

/// 不需要工具的哨兵回复
pub const NO_TOOL_NEEDED: &str = "No tool needed";

/// 工具选择结果
#[derive(Debug, Clone, PartialEq)]
pub enum ToolDecision {
    /// 模型明确表示不需要工具
    NoToolNeeded,
    /// 调用指定工具
    Invoke { tool: String, parameters: Value },
    /// 无可执行的决定（全部尝试失败，或 JSON 合法但没有 tool 字段）
    Empty,
}

/// 解析一次模型回复；Err 携带无法修复的 JSON 文本，用于纠正提示
pub fn interpret_response(response: &str) -> Result<ToolDecision, String> {
    let trimmed = response.trim();
    if trimmed.is_empty() || trimmed.to_lowercase().contains("no tool needed") {
        return Ok(ToolDecision::NoToolNeeded);
    }
    let Some(candidate) = extract_json(trimmed) else {
        return Err(trimmed.to_string());
    };
    if let Ok(value) = serde_json::from_str::<Value>(candidate) {
        return Ok(decision_from_value(value));
    }
    match auto_fix_json(candidate) {
        Some(fixed) => serde_json::from_str::<Value>(&fixed)
            .map(decision_from_value)
            .map_err(|_| candidate.to_string()),
        None => Err(candidate.to_string()),
    }
}

fn decision_from_value(value: Value) -> ToolDecision {
    let object = match value {
        Value::Object(map) => map,
        Value::Array(items) => match items.into_iter().find_map(|v| match v {
            Value::Object(map) => Some(map),
            _ => None,
        }) {
            Some(map) => map,
            None => return ToolDecision::Empty,
        },
        _ => return ToolDecision::Empty,
    };
    let Some(tool) = object.get("tool").and_then(|t| t.as_str()) else {
        return ToolDecision::Empty;
    };
    let parameters = match object.get("parameters") {
        Some(Value::Object(p)) => Value::Object(p.clone()),
        _ => Value::Object(Default::default()),
    };
    ToolDecision::Invoke {
        tool: tool.trim().to_string(),
        parameters,
    }
}

/// 生成工具选择提示
pub fn build_selection_prompt(context: &[Message], tools: &[Box<dyn Tool>]) -> String {
    let tool_descriptions: Vec<String> = tools
        .iter()
        .map(|t| {
            format!(
                "{}: {{ \"description\": {}, \"parameters\": {} }}",
                t.name(),
                Value::String(t.description().to_string()),
                t.parameters_schema()
            )
        })
        .collect();
    let conversation = serde_json::to_string(context).unwrap_or_default();
    format!(
        "Here are the available tools:\n{}\n\n\
Based on the following conversation, decide which tool to use and with what parameters:\n\n\
Conversation:\n{}\n\n\
Reply with the tool name and parameters to use in JSON format. If no tool is needed, reply with \"{}\".\n\n\
Example:\n\
{{ \"tool\": \"Toolname\", \"parameters\": {{\"parameter1\": \"value1\", \"parameter2\": \"value2\"}} }}\n",
        tool_descriptions.join("\n"),
        conversation,
        NO_TOOL_NEEDED
    )
}

fn correction_prompt(invalid: &str) -> String {
    format!(
        "The JSON you provided is invalid. Please correct the following JSON:\n\n\
Invalid JSON:\n{}\n\n\
Correct the JSON and reply with a valid JSON format.",
        invalid
    )
}

/// 工具选择器：持有模型客户端与重试策略
pub struct ToolSelector {
    llm: Arc<dyn LlmClient>,
    model: ModelConfig,
    max_attempts: usize,
    retry_delay: Duration,
    schema: Value,
}

impl ToolSelector {
    pub fn new(llm: Arc<dyn LlmClient>, model: ModelConfig, settings: &SelectionSection) -> Self {
        Self {
            llm,
            model,
            max_attempts: settings.max_attempts.max(1),
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
            schema: tool_decision_schema(),
        }
    }

    async fn ask(&self, prompt: String) -> Option<String> {
        let messages = [Message::system(prompt)];
        match self
            .llm
            .complete_with_tool_schema(&messages, &self.model, &self.schema)
            .await
        {
            Ok(text) => {
                tracing::info!(decision = %text, "tool decision");
                Some(text)
            }
            Err(e) => {
                tracing::warn!("tool decision call failed: {}", e);
                None
            }
        }
    }

    /// 对给定上下文与候选工具做一次完整的选择（含修复与纠正重试）
    pub async fn select(&self, context: &[Message], tools: &[Box<dyn Tool>]) -> ToolDecision {
        let names: Vec<&str> = tools.iter().map(|t| t.name()).collect();
        tracing::debug!(tools = ?names, "selecting tool");
        let prompt = build_selection_prompt(context, tools);

        for attempt in 1..=self.max_attempts {
            if let Some(response) = self.ask(prompt.clone()).await {
                match interpret_response(&response) {
                    Ok(decision) => return decision,
                    Err(invalid) => {
                        tracing::warn!(
                            attempt,
                            "received invalid JSON, cannot fix it: {}. Asking for a correction",
                            invalid
                        );
                        if let Some(corrected) = self.ask(correction_prompt(&invalid)).await {
                            if let Ok(decision) = interpret_response(&corrected) {
                                return decision;
                            }
                        }
                    }
                }
            }
            if attempt < self.max_attempts {
                tracing::warn!(
                    attempt,
                    delay_ms = self.retry_delay.as_millis() as u64,
                    "tool decision attempt failed, retrying"
                );
                tokio::time::sleep(self.retry_delay).await;
            }
        }
        tracing::error!(
            "failed to get a valid tool decision after {} attempts",
            self.max_attempts
        );
        ToolDecision::Empty
    }
}
