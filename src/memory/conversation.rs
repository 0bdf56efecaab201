//! 消息模型
//!
//! 与 LLM API 一致的 role + content；写入记忆前统一截断到 MAX_CONTENT_CHARS。

use serde::{Deserialize, Serialize};

/// 单条消息内容上限（字符数），超出部分在写入时截断
pub const MAX_CONTENT_CHARS: usize = 64_000;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// 按字符截断 content；返回是否发生了截断
    pub fn truncate_content(&mut self, max_chars: usize) -> bool {
        match self.content.char_indices().nth(max_chars) {
            Some((byte_idx, _)) => {
                self.content.truncate(byte_idx);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_long_content() {
        let mut msg = Message::user("x".repeat(MAX_CONTENT_CHARS + 10));
        assert!(msg.truncate_content(MAX_CONTENT_CHARS));
        assert_eq!(msg.content.chars().count(), MAX_CONTENT_CHARS);
    }

    #[test]
    fn test_truncate_keeps_short_content() {
        let mut msg = Message::user("x".repeat(MAX_CONTENT_CHARS));
        assert!(!msg.truncate_content(MAX_CONTENT_CHARS));
        assert_eq!(msg.content.len(), MAX_CONTENT_CHARS);
    }

    #[test]
    fn test_truncate_multibyte_on_char_boundary() {
        let mut msg = Message::user("你好世界");
        assert!(msg.truncate_content(2));
        assert_eq!(msg.content, "你好");
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }
}
