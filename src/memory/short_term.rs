//! 短期记忆：带优先级的消息缓冲
//!
//! 按插入顺序追加，超过 SHORT_TERM_CAPACITY 时丢弃最旧的一条（与优先级无关），
//! 供 LLM 上下文使用；get_messages 只返回消息本身。

use serde::{Deserialize, Serialize};

use crate::memory::Message;

/// 短期记忆条数上限
pub const SHORT_TERM_CAPACITY: usize = 100;

/// 消息优先级：LOW=1 / MEDIUM=2 / HIGH=3，更大的值仅用作长期记忆筛选阈值
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub u8);

impl Priority {
    pub const LOW: Priority = Priority(1);
    pub const MEDIUM: Priority = Priority(2);
    pub const HIGH: Priority = Priority(3);
}

impl Default for Priority {
    fn default() -> Self {
        Self::LOW
    }
}

/// 短期记忆中的一条记录
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub message: Message,
    pub priority: Priority,
}

/// 短期记忆：FIFO，容量固定
#[derive(Clone, Debug)]
pub struct ShortTermMemory {
    entries: Vec<MemoryEntry>,
    capacity: usize,
}

impl ShortTermMemory {
    pub fn new() -> Self {
        Self::with_capacity(SHORT_TERM_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, message: Message, priority: Priority) {
        self.entries.push(MemoryEntry { message, priority });
        if self.entries.len() > self.capacity {
            self.entries.remove(0);
        }
    }

    /// 弹出最后追加的一条
    pub fn pop_last(&mut self) -> Option<MemoryEntry> {
        self.entries.pop()
    }

    /// 移除最旧的一条（token 超限时的兜底裁剪）
    pub fn pop_front(&mut self) -> Option<MemoryEntry> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    pub fn last(&self) -> Option<&MemoryEntry> {
        self.entries.last()
    }

    pub fn entries(&self) -> &[MemoryEntry] {
        &self.entries
    }

    pub fn messages(&self) -> Vec<Message> {
        self.entries.iter().map(|e| e.message.clone()).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ShortTermMemory {
    fn default() -> Self {
        Self::new()
    }
}
