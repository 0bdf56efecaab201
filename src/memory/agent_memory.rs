//! 单个 agent 的记忆
//!
//! - 短期：带优先级的 FIFO（上限 100 条），直接作为模型上下文
//! - 长期：跨 flow 保留的摘要，保存在 `<memory_dir>/<agent>_memory.json`
//! - 工具历史：只追加；加载的旧记录与本次会话的新记录分开存放，保存时拼接

use crate::core::AgentError;
use crate::memory::{
    MemoryEntry, MemoryStore, Message, Priority, SessionRecord, ShortTermMemory, MAX_CONTENT_CHARS,
};

/// 单个 agent 的记忆（短期 + 长期 + 工具历史）
#[derive(Clone, Debug)]
pub struct Memory {
    agent_name: String,
    short_term: ShortTermMemory,
    long_term: Vec<Message>,
    /// 从磁盘加载的工具历史，只读
    previous_tool_history: Vec<Message>,
    /// 本次会话产生的工具历史
    tool_history: Vec<Message>,
}

impl Memory {
    /// 空记忆（不读磁盘）
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            short_term: ShortTermMemory::new(),
            long_term: Vec::new(),
            previous_tool_history: Vec::new(),
            tool_history: Vec::new(),
        }
    }

    /// 创建并从磁盘加载长期记忆与工具历史
    pub async fn load(agent_name: impl Into<String>, store: &MemoryStore) -> Self {
        let mut memory = Self::new(agent_name);
        memory.load_long_term_memory(store).await;
        memory
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// 追加到短期记忆；超长内容先截断
    pub fn add_to_short_term(&mut self, mut message: Message, priority: Priority) {
        if message.truncate_content(MAX_CONTENT_CHARS) {
            tracing::warn!(
                agent = %self.agent_name,
                "message truncated to {} chars",
                MAX_CONTENT_CHARS
            );
        }
        self.short_term.push(message, priority);
    }

    /// 撤回最后追加的一条（注入的工具结果被模型消化后使用）
    pub fn remove_top_of_short_term(&mut self) -> Option<MemoryEntry> {
        let popped = self.short_term.pop_last();
        if popped.is_none() {
            tracing::warn!(agent = %self.agent_name, "short-term memory is empty, nothing to remove");
        }
        popped
    }

    /// 移除最旧的一条（上下文裁剪）
    pub fn remove_oldest_of_short_term(&mut self) -> Option<MemoryEntry> {
        self.short_term.pop_front()
    }

    pub fn get_short_term_memory(&self) -> &[MemoryEntry] {
        self.short_term.entries()
    }

    /// 仅消息本体，按插入顺序
    pub fn get_short_term_messages(&self) -> Vec<Message> {
        self.short_term.messages()
    }

    pub fn last_short_term(&self) -> Option<&MemoryEntry> {
        self.short_term.last()
    }

    pub fn reset_short_term(&mut self) {
        self.short_term.clear();
    }

    pub fn add_to_long_term(&mut self, message: Message) {
        self.long_term.push(message);
    }

    pub fn get_long_term_memory(&self) -> &[Message] {
        &self.long_term
    }

    pub fn add_to_tool_history(&mut self, message: Message) {
        self.tool_history.push(message);
    }

    /// 完整工具历史：旧记录在前，本次会话的新记录在后
    pub fn get_tool_history(&self) -> Vec<Message> {
        self.previous_tool_history
            .iter()
            .chain(self.tool_history.iter())
            .cloned()
            .collect()
    }

    /// 本次会话新增的工具历史
    pub fn session_tool_history(&self) -> &[Message] {
        &self.tool_history
    }

    /// 选出要进入长期记忆的消息：命中任一关键词，或优先级 ≥ min_priority。
    /// 关键词命中优先，每条消息最多出现一次。
    pub fn filter_combined(
        entries: &[MemoryEntry],
        keywords: &[&str],
        min_priority: Priority,
    ) -> Vec<Message> {
        entries
            .iter()
            .filter(|entry| {
                let matched: Vec<&str> = keywords
                    .iter()
                    .copied()
                    .filter(|k| entry.message.content.contains(k))
                    .collect();
                if !matched.is_empty() {
                    tracing::debug!(?matched, "keyword match");
                    return true;
                }
                entry.priority >= min_priority
            })
            .map(|entry| entry.message.clone())
            .collect()
    }

    /// 写盘：长期记忆 + (旧工具历史 ++ 新工具历史)，成功后清空短期记忆。
    /// 新记录并入旧记录，重复保存不会产生重复条目。
    pub async fn save_long_term_memory(&mut self, store: &MemoryStore) -> Result<(), AgentError> {
        let record = SessionRecord {
            long_term_memory: self.long_term.clone(),
            tool_history: self.get_tool_history(),
        };
        store.save(&self.agent_name, &record).await?;
        self.previous_tool_history.append(&mut self.tool_history);
        self.reset_short_term();
        Ok(())
    }

    /// 读盘：文件缺失或损坏时为空（由 MemoryStore 记录日志）
    pub async fn load_long_term_memory(&mut self, store: &MemoryStore) {
        let record = store.load(&self.agent_name).await;
        self.long_term = record.long_term_memory;
        self.previous_tool_history = record.tool_history;
        tracing::debug!(
            agent = %self.agent_name,
            long_term = self.long_term.len(),
            tool_history = self.previous_tool_history.len(),
            "long-term memory loaded"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::SHORT_TERM_CAPACITY;
    use tempfile::TempDir;

    #[test]
    fn test_add_truncates_long_content() {
        let mut mem = Memory::new("a");
        mem.add_to_short_term(Message::user("y".repeat(MAX_CONTENT_CHARS + 1)), Priority::LOW);
        mem.add_to_short_term(Message::user("short"), Priority::LOW);
        let msgs = mem.get_short_term_messages();
        assert_eq!(msgs[0].content.chars().count(), MAX_CONTENT_CHARS);
        assert_eq!(msgs[1].content, "short");
    }

    #[test]
    fn test_short_term_cap() {
        let mut mem = Memory::new("a");
        for i in 0..(SHORT_TERM_CAPACITY + 7) {
            mem.add_to_short_term(Message::user(i.to_string()), Priority(((i % 3) + 1) as u8));
        }
        let msgs = mem.get_short_term_messages();
        assert_eq!(msgs.len(), SHORT_TERM_CAPACITY);
        assert_eq!(msgs[0].content, "7");
    }

    #[test]
    fn test_remove_top_on_empty_is_noop() {
        let mut mem = Memory::new("a");
        assert!(mem.remove_top_of_short_term().is_none());
        mem.add_to_short_term(Message::user("x"), Priority::LOW);
        mem.add_to_short_term(Message::user("tool"), Priority::MEDIUM);
        assert_eq!(mem.remove_top_of_short_term().unwrap().message.content, "tool");
        assert_eq!(mem.get_short_term_messages().len(), 1);
    }

    #[test]
    fn test_filter_combined_keyword_precedence() {
        let entries = vec![
            MemoryEntry { message: Message::user("Question: what?"), priority: Priority::LOW },
            MemoryEntry { message: Message::user("chit chat"), priority: Priority::HIGH },
            MemoryEntry {
                message: Message::user("Solution and Question together"),
                priority: Priority(10),
            },
        ];
        let filtered =
            Memory::filter_combined(&entries, &["Question", "Solution"], Priority(10));
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].content, "Question: what?");
        assert_eq!(filtered[1].content, "Solution and Question together");

        let by_priority = Memory::filter_combined(&entries, &[], Priority::HIGH);
        assert_eq!(by_priority.len(), 2);
    }

    #[tokio::test]
    async fn test_save_merges_tool_history_without_duplicates() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(dir.path());

        let mut first = Memory::load("Writer", &store).await;
        first.add_to_tool_history(Message::user("old result"));
        first.add_to_long_term(Message::system("summary 1"));
        first.add_to_short_term(Message::user("hi"), Priority::LOW);
        first.save_long_term_memory(&store).await.unwrap();
        assert!(first.get_short_term_messages().is_empty());

        let mut second = Memory::load("Writer", &store).await;
        assert_eq!(second.get_tool_history(), vec![Message::user("old result")]);
        assert!(second.session_tool_history().is_empty());
        second.add_to_tool_history(Message::user("new result"));
        second.save_long_term_memory(&store).await.unwrap();
        second.save_long_term_memory(&store).await.unwrap();

        let record = store.load("Writer").await;
        assert_eq!(
            record.tool_history,
            vec![Message::user("old result"), Message::user("new result")]
        );
        assert_eq!(record.long_term_memory, vec![Message::system("summary 1")]);
    }
}
