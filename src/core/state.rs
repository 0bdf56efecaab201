//! 状态定义：agent 快照、flow 阶段、会话历史与每轮系统快照
//!
//! 编排器只通过 get_state 读 agent 内部；快照可序列化，便于记录与调试。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::AgentKind;
use crate::memory::{MemoryEntry, Message};

/// LLM agent 单次 step 的阶段（react_prompt 状态机）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ReactPhase {
    Receiving,
    PreProcessing,
    Generating,
    PostProcessing,
    Done,
}

/// 会话当前所处的 flow 阶段；新会话为 Idle，flow 结束后停在 Terminated 直到下一个 flow 的 Init
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum FlowPhase {
    #[default]
    Idle,
    Init,
    CoordinatorTurn,
    Dispatch,
    AgentTurn,
    HumanWait,
    Terminated,
}

/// agent 的 get_state 快照
#[derive(Clone, Debug, Serialize)]
pub struct AgentState {
    pub name: String,
    pub role: String,
    pub kind: AgentKind,
    pub short_term_memory: Vec<MemoryEntry>,
    pub tool_history: Vec<Message>,
    pub model: Option<String>,
    pub pre_processing_tools: Vec<String>,
    pub post_processing_tools: Vec<String>,
}

/// 会话历史中的一条：谁说了什么
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub sender: String,
    pub message: String,
}

impl HistoryEntry {
    pub fn new(sender: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            message: message.into(),
        }
    }
}

/// 每个 coordinator 轮次记录一次的系统快照
#[derive(Clone, Debug, Serialize)]
pub struct SystemSnapshot {
    pub timestamp: DateTime<Utc>,
    pub turn: usize,
    pub phase: FlowPhase,
    pub agents: BTreeMap<String, AgentState>,
    pub expected_human: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_serializes() {
        let mut agents = BTreeMap::new();
        agents.insert(
            "Writer".to_string(),
            AgentState {
                name: "Writer".to_string(),
                role: "writer".to_string(),
                kind: AgentKind::Llm,
                short_term_memory: Vec::new(),
                tool_history: vec![Message::user("tool said hi")],
                model: Some("gpt-4o-mini".to_string()),
                pre_processing_tools: vec!["EchoTool".to_string()],
                post_processing_tools: Vec::new(),
            },
        );
        let snapshot = SystemSnapshot {
            timestamp: Utc::now(),
            turn: 2,
            phase: FlowPhase::CoordinatorTurn,
            agents,
            expected_human: None,
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["turn"], 2);
        assert_eq!(json["agents"]["Writer"]["kind"], "llm");
        assert_eq!(json["agents"]["Writer"]["pre_processing_tools"][0], "EchoTool");
    }
}
