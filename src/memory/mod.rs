//! 记忆层：消息模型、短期（优先级 FIFO）、单 agent 记忆、持久化、token 估算

pub mod agent_memory;
pub mod conversation;
pub mod persistence;
pub mod short_term;
pub mod token_budget;

pub use agent_memory::Memory;
pub use conversation::{Message, Role, MAX_CONTENT_CHARS};
pub use persistence::{MemoryStore, SessionRecord};
pub use short_term::{MemoryEntry, Priority, ShortTermMemory, SHORT_TERM_CAPACITY};
pub use token_budget::TokenEstimator;
