//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按顺序返回预设的回复队列；队列耗尽后回显最后一条 User 消息。
//! 记录每次调用收到的消息，便于断言 agent 实际发给模型的上下文。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, ModelConfig};
use crate::memory::{Message, Role};

/// Mock 客户端：脚本化回复 + 调用记录
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: Mutex<Vec<Vec<Message>>>,
    delay: Option<Duration>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 依次返回给定结果
    pub fn scripted(script: Vec<Result<String, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    /// 依次返回给定文本
    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::scripted(replies.into_iter().map(|r| Ok(r.into())).collect())
    }

    /// 每次调用前等待（模拟网络往返）
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 追加一条回复
    pub fn push_reply(&self, reply: impl Into<String>) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Ok(reply.into()));
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// 每次调用收到的消息
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message], _config: &ModelConfig) -> Result<String, LlmError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages.to_vec());

        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        if let Some(reply) = next {
            return reply;
        }

        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(format!("Echo from Mock: {}", last_user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_echo() {
        let mock = MockLlmClient::with_replies(["first"]);
        let cfg = ModelConfig::new("mock", 0.0);
        let msgs = [Message::system("sys"), Message::user("hello")];
        assert_eq!(mock.complete(&msgs, &cfg).await.unwrap(), "first");
        assert_eq!(mock.complete(&msgs, &cfg).await.unwrap(), "Echo from Mock: hello");
        assert_eq!(mock.call_count(), 2);
        assert_eq!(mock.calls()[0], msgs.to_vec());
    }

    #[tokio::test]
    async fn test_scripted_error() {
        let mock = MockLlmClient::scripted(vec![Err(LlmError::Timeout)]);
        let err = mock
            .complete(&[Message::user("x")], &ModelConfig::new("mock", 0.0))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
