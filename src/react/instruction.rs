//! 协调者指令解析
//!
//! 协调者每轮输出一条指令：`{"Action": <agent>, "Question": ..., "Thought": ..., "Action Input": ...}`。
//! 优先按 JSON 读取（提取第一个 JSON，必要时修复）；没有 JSON 时接受 ReAct 文本形式：
//!
//! ```text
//! Thought: ...
//! Action: Writer
//! Action Input: ...
//! ```

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::AgentError;
use crate::react::json_repair::{auto_fix_json, extract_json};

/// 协调者的单轮指令
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    /// 下一个行动的 agent 名
    #[serde(rename = "Action")]
    pub action: String,
    #[serde(rename = "Question", default)]
    pub question: String,
    #[serde(rename = "Thought", default)]
    pub thought: String,
    #[serde(rename = "Action Input", default)]
    pub action_input: String,
}

fn field_text(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| map.get(*k)).map(|v| match v {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn from_object(map: &Map<String, Value>) -> Option<Instruction> {
    let action = field_text(map, &["Action", "action"]).filter(|a| !a.is_empty())?;
    Some(Instruction {
        action,
        question: field_text(map, &["Question", "question"]).unwrap_or_default(),
        thought: field_text(map, &["Thought", "thought"]).unwrap_or_default(),
        action_input: field_text(
            map,
            &["Action Input", "Action_Input", "action_input", "ActionInput", "action input"],
        )
        .unwrap_or_default(),
    })
}

fn parse_json_form(text: &str) -> Option<Result<Instruction, AgentError>> {
    let candidate = extract_json(text)?;
    let value = serde_json::from_str::<Value>(candidate)
        .ok()
        .or_else(|| auto_fix_json(candidate).and_then(|f| serde_json::from_str(&f).ok()))?;
    let map = match value {
        Value::Object(map) => map,
        Value::Array(items) => items.into_iter().find_map(|v| match v {
            Value::Object(m) => Some(m),
            _ => None,
        })?,
        _ => return None,
    };
    Some(from_object(&map).ok_or_else(|| {
        AgentError::InvalidInstruction(format!("instruction has no \"Action\" field: {}", candidate))
    }))
}

static LABEL_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn label_regex() -> Option<&'static Regex> {
    LABEL_RE
        .get_or_init(|| {
            Regex::new(r"(?mi)^[ \t]*(Question|Thought|Action Input|Action)[ \t]*:[ \t]*").ok()
        })
        .as_ref()
}

/// ReAct 文本形式：每个标签的值延续到下一个标签
fn parse_text_form(text: &str) -> Option<Instruction> {
    let re = label_regex()?;
    let labels: Vec<(String, usize, usize)> = re
        .captures_iter(text)
        .filter_map(|c| {
            let whole = c.get(0)?;
            Some((c[1].to_lowercase(), whole.start(), whole.end()))
        })
        .collect();
    let mut instruction = Instruction::default();
    for (i, (label, _, value_start)) in labels.iter().enumerate() {
        let value_end = labels.get(i + 1).map(|l| l.1).unwrap_or(text.len());
        let value = text[*value_start..value_end].trim().to_string();
        match label.as_str() {
            "action" => instruction.action = value,
            "action input" => instruction.action_input = value,
            "question" => instruction.question = value,
            "thought" => instruction.thought = value,
            _ => {}
        }
    }
    if instruction.action.is_empty() {
        None
    } else {
        Some(instruction)
    }
}

/// 解析协调者输出；缺少 Action 时返回 InvalidInstruction
pub fn parse_instruction(text: &str) -> Result<Instruction, AgentError> {
    if let Some(parsed) = parse_json_form(text) {
        return parsed;
    }
    parse_text_form(text).ok_or_else(|| {
        AgentError::InvalidInstruction(format!(
            "could not find an \"Action\" in coordinator output: {}",
            text.trim()
        ))
    })
}
