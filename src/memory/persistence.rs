//! 长期记忆持久化
//!
//! 每个 agent 名对应一个 JSON 文件 `<memory_dir>/<agent>_memory.json`，
//! 内容为 `{"long_term_memory": [...], "tool_history": [...]}`。
//! 读取时容错：文件缺失或损坏退化为空记录，单条无法解析的消息被跳过；
//! 同名 agent 的写入经 per-agent 锁串行化（单写者）。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::AgentError;
use crate::memory::Message;

/// 磁盘上的会话记录
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(default)]
    pub long_term_memory: Vec<Message>,
    #[serde(default)]
    pub tool_history: Vec<Message>,
}

/// 记忆文件仓库：负责路径、容错读取与按 agent 名串行化的写入
#[derive(Debug)]
pub struct MemoryStore {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl MemoryStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, agent_name: &str) -> PathBuf {
        let safe: String = agent_name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.root.join(format!("{}_memory.json", safe))
    }

    fn lock_for(&self, agent_name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(agent_name.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// 读取 agent 的会话记录；任何错误都只记录日志并返回空记录
    pub async fn load(&self, agent_name: &str) -> SessionRecord {
        let path = self.path_for(agent_name);
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(agent = %agent_name, "no memory file yet");
                return SessionRecord::default();
            }
            Err(e) => {
                tracing::warn!(agent = %agent_name, path = %path.display(), "memory file unreadable: {}", e);
                return SessionRecord::default();
            }
        };
        let value: Value = match serde_json::from_str(&data) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(agent = %agent_name, path = %path.display(), "corrupt memory file: {}", e);
                return SessionRecord::default();
            }
        };
        SessionRecord {
            long_term_memory: messages_from(&value, "long_term_memory", agent_name),
            tool_history: messages_from(&value, "tool_history", agent_name),
        }
    }

    /// 写入会话记录；同名 agent 的并发写入按顺序执行
    pub async fn save(&self, agent_name: &str, record: &SessionRecord) -> Result<(), AgentError> {
        let lock = self.lock_for(agent_name);
        let _guard = lock.lock().await;

        let payload = serde_json::json!({
            "long_term_memory": serializable(&record.long_term_memory, agent_name),
            "tool_history": serializable(&record.tool_history, agent_name),
        });
        let text = serde_json::to_string_pretty(&payload)
            .map_err(|e| AgentError::Persistence(e.to_string()))?;

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| AgentError::Persistence(format!("{}: {}", self.root.display(), e)))?;
        let path = self.path_for(agent_name);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, text)
            .await
            .map_err(|e| AgentError::Persistence(format!("{}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| AgentError::Persistence(format!("{}: {}", path.display(), e)))?;
        tracing::debug!(agent = %agent_name, path = %path.display(), "memory saved");
        Ok(())
    }
}

/// 从 JSON 中取出消息数组，跳过无法解析的条目
fn messages_from(value: &Value, key: &str, agent_name: &str) -> Vec<Message> {
    let Some(items) = value.get(key).and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match serde_json::from_value::<Message>(item.clone()) {
            Ok(m) => Some(m),
            Err(e) => {
                tracing::warn!(agent = %agent_name, key, "skipping unreadable entry: {}", e);
                None
            }
        })
        .collect()
}

/// 序列化消息列表，无法序列化的条目记录日志后丢弃
fn serializable(messages: &[Message], agent_name: &str) -> Vec<Value> {
    messages
        .iter()
        .filter_map(|m| match serde_json::to_value(m) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(agent = %agent_name, "dropping non-serializable entry: {}", e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(dir.path());
        assert_eq!(store.load("nobody").await, SessionRecord::default());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(dir.path().join("memory"));
        let record = SessionRecord {
            long_term_memory: vec![Message::system("summary")],
            tool_history: vec![Message::user("tool result")],
        };
        store.save("Writer", &record).await.unwrap();
        assert!(store.path_for("Writer").exists());
        assert_eq!(store.load("Writer").await, record);
    }

    #[tokio::test]
    async fn test_corrupt_file_degrades_to_empty() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(dir.path());
        std::fs::write(store.path_for("Broken"), "{ not json").unwrap();
        assert_eq!(store.load("Broken").await, SessionRecord::default());
    }

    #[tokio::test]
    async fn test_bad_entries_are_skipped() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(dir.path());
        std::fs::write(
            store.path_for("Mixed"),
            r#"{"long_term_memory": [{"role": "system", "content": "ok"}, 42, {"role": "robot"}],
                "tool_history": "not a list"}"#,
        )
        .unwrap();
        let record = store.load("Mixed").await;
        assert_eq!(record.long_term_memory, vec![Message::system("ok")]);
        assert!(record.tool_history.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_saves_same_agent() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new(dir.path()));
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let record = SessionRecord {
                    long_term_memory: vec![Message::system(format!("v{}", i))],
                    tool_history: Vec::new(),
                };
                store.save("Shared", &record).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        let record = store.load("Shared").await;
        assert_eq!(record.long_term_memory.len(), 1);
    }

    #[test]
    fn test_path_is_sanitized() {
        let store = MemoryStore::new("/tmp/mem");
        let path = store.path_for("../evil/agent");
        assert_eq!(path, PathBuf::from("/tmp/mem/___evil_agent_memory.json"));
    }
}
