//! 人工 agent
//!
//! step 只是回显：真正的人工往返（发任务、等回复、超时）由编排器完成，
//! 这里只负责被统一寻址，并记录对人工说过的话。

use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::{Agent, AgentHandle, AgentIdentity, StepResponse};
use crate::config::AgentKind;
use crate::core::{AgentError, AgentState};
use crate::memory::{Memory, MemoryStore, Message, Priority};

const LONG_TERM_KEYWORDS: [&str; 3] = ["Question", "Solution", "Instruction"];

#[derive(Debug)]
pub struct HumanAgent {
    identity: AgentIdentity,
    store: Arc<MemoryStore>,
    memory: Memory,
}

impl HumanAgent {
    pub fn new(identity: AgentIdentity, store: Arc<MemoryStore>) -> Self {
        let memory = Memory::new(identity.name.clone());
        tracing::info!(agent = %identity.name, role = %identity.role, "human agent initialized");
        Self {
            identity,
            store,
            memory,
        }
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }
}

#[async_trait]
impl Agent for HumanAgent {
    fn name(&self) -> &str {
        &self.identity.name
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Human
    }

    async fn step(&mut self, input: Message) -> Result<StepResponse, AgentError> {
        self.memory.add_to_short_term(input.clone(), Priority::LOW);
        Ok(StepResponse::Text(input.content))
    }

    fn get_state(&self) -> AgentState {
        AgentState {
            name: self.identity.name.clone(),
            role: self.identity.role.clone(),
            kind: AgentKind::Human,
            short_term_memory: self.memory.get_short_term_memory().to_vec(),
            tool_history: self.memory.get_tool_history(),
            model: None,
            pre_processing_tools: Vec::new(),
            post_processing_tools: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.memory.reset_short_term();
    }

    async fn clone_agent(&self) -> AgentHandle {
        let memory = Memory::load(self.identity.name.clone(), &self.store).await;
        AgentHandle::Human(Self {
            identity: self.identity.clone(),
            store: self.store.clone(),
            memory,
        })
    }

    /// 人工对话不做摘要：命中关键词的消息原样进入长期记忆
    async fn end(&mut self) -> Result<(), AgentError> {
        let filtered = Memory::filter_combined(
            self.memory.get_short_term_memory(),
            &LONG_TERM_KEYWORDS,
            Priority(10),
        );
        for message in filtered {
            self.memory.add_to_long_term(message);
        }
        self.memory.save_long_term_memory(&self.store).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_step_echoes_and_remembers() {
        let dir = TempDir::new().unwrap();
        let mut human = HumanAgent::new(
            AgentIdentity::new("Reviewer", "Reviewer", "reviews"),
            Arc::new(MemoryStore::new(dir.path())),
        );
        let out = human
            .step(Message::user("Instruction: check\nHuman response: 42"))
            .await
            .unwrap();
        assert_eq!(out.to_content(), "Instruction: check\nHuman response: 42");
        let state = human.get_state();
        assert_eq!(state.kind, AgentKind::Human);
        assert_eq!(state.short_term_memory.len(), 1);
        assert!(state.model.is_none());
    }

    #[tokio::test]
    async fn test_end_persists_and_clone_reloads() {
        let dir = TempDir::new().unwrap();
        let template = HumanAgent::new(
            AgentIdentity::new("Reviewer", "Reviewer", ""),
            Arc::new(MemoryStore::new(dir.path())),
        );
        let AgentHandle::Human(mut first) = template.clone_agent().await else {
            panic!("expected human agent");
        };
        first.step(Message::user("Question: ok?")).await.unwrap();
        first.step(Message::user("chit chat")).await.unwrap();
        first.end().await.unwrap();
        first.end().await.unwrap();

        let AgentHandle::Human(second) = template.clone_agent().await else {
            panic!("expected human agent");
        };
        assert!(second.memory().get_short_term_messages().is_empty());
        assert_eq!(
            second.memory().get_long_term_memory(),
            &[Message::user("Question: ok?")]
        );
    }
}
