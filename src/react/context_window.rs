//! 上下文窗口管理
//!
//! 每次模型调用前估算短期记忆的 token 数：
//! 1. 超出预算先做摘要，短期记忆重置为 `[system_message, summary]`
//! 2. 之后从最旧的一条开始逐条移除，直到回到预算内；至少保留一条

use crate::llm::{LlmClient, LlmError, ModelConfig};
use crate::memory::{Memory, Message, Priority, TokenEstimator};

/// 摘要提示词前缀；原文拼接在其后
const SUMMARY_PROMPT: &str = "You are a tool for summarizing and abstracting text.\n\
Return the summarized text to less than 2000 words using markdown format.\n\
The generated summary should be in the same language as the original text.\n: ";

/// 让模型把一组消息压缩为一条 system 摘要
pub async fn summarize_messages(
    llm: &dyn LlmClient,
    model: &ModelConfig,
    messages: &[Message],
) -> Result<Message, LlmError> {
    let joined = messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let prompt = [Message::system(format!("{}{}", SUMMARY_PROMPT, joined))];
    let summary = llm.complete(&prompt, model).await?;
    Ok(Message::system(summary))
}

/// 固定 token 预算的上下文窗口
#[derive(Debug, Clone, Copy)]
pub struct ContextWindow {
    max_tokens: usize,
}

impl ContextWindow {
    pub fn new(max_tokens: usize) -> Self {
        Self { max_tokens }
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn token_count(memory: &Memory) -> usize {
        TokenEstimator::estimate_messages(&memory.get_short_term_messages())
    }

    pub fn is_over_budget(&self, memory: &Memory) -> bool {
        Self::token_count(memory) > self.max_tokens
    }

    /// 模型调用前执行：超预算时先摘要，再裁剪。返回是否做了摘要。
    /// 摘要失败不中断调用，只靠裁剪回到预算内。
    pub async fn ensure_budget(
        &self,
        memory: &mut Memory,
        system_message: &Message,
        llm: &dyn LlmClient,
        model: &ModelConfig,
    ) -> bool {
        let tokens = Self::token_count(memory);
        if tokens <= self.max_tokens {
            return false;
        }
        tracing::info!(
            agent = %memory.agent_name(),
            tokens,
            max_tokens = self.max_tokens,
            "context over budget, summarizing"
        );
        let summarized = match summarize_messages(llm, model, &memory.get_short_term_messages()).await {
            Ok(summary) => {
                memory.reset_short_term();
                memory.add_to_short_term(system_message.clone(), Priority::LOW);
                memory.add_to_short_term(summary, Priority::MEDIUM);
                true
            }
            Err(e) => {
                tracing::warn!(agent = %memory.agent_name(), "summarization failed: {}", e);
                false
            }
        };
        self.trim(memory);
        summarized
    }

    /// 从最旧的消息开始移除，直到不超预算或只剩一条；返回移除条数
    pub fn trim(&self, memory: &mut Memory) -> usize {
        let mut removed = 0;
        while memory.get_short_term_memory().len() > 1 && self.is_over_budget(memory) {
            memory.remove_oldest_of_short_term();
            removed += 1;
        }
        if removed > 0 {
            tracing::debug!(agent = %memory.agent_name(), removed, "trimmed short-term memory");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    fn filled(n: usize, chars: usize) -> Memory {
        let mut mem = Memory::new("Writer");
        for i in 0..n {
            mem.add_to_short_term(Message::user(format!("{i}{}", "a".repeat(chars))), Priority::LOW);
        }
        mem
    }

    #[tokio::test]
    async fn test_under_budget_is_untouched() {
        let mut mem = filled(3, 10);
        let mock = MockLlmClient::new();
        let window = ContextWindow::new(1000);
        let summarized = window
            .ensure_budget(&mut mem, &Message::system("sys"), &mock, &ModelConfig::new("m", 0.0))
            .await;
        assert!(!summarized);
        assert_eq!(mem.get_short_term_messages().len(), 3);
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_summarize_resets_to_system_and_summary() {
        let mut mem = filled(10, 400);
        let mock = MockLlmClient::with_replies(["short summary"]);
        let window = ContextWindow::new(200);
        let summarized = window
            .ensure_budget(&mut mem, &Message::system("sys"), &mock, &ModelConfig::new("m", 0.0))
            .await;
        assert!(summarized);
        let msgs = mem.get_short_term_messages();
        assert_eq!(msgs, vec![Message::system("sys"), Message::system("short summary")]);
        assert_eq!(mem.get_short_term_memory()[1].priority, Priority::MEDIUM);
        let prompt = &mock.calls()[0][0].content;
        assert!(prompt.starts_with("You are a tool for summarizing"));
        assert!(prompt.contains("9aaaa"));
    }

    #[tokio::test]
    async fn test_failed_summary_falls_back_to_trim() {
        let mut mem = filled(10, 400);
        let mock = MockLlmClient::scripted(vec![Err(LlmError::Api("down".into()))]);
        let window = ContextWindow::new(250);
        let summarized = window
            .ensure_budget(&mut mem, &Message::system("sys"), &mock, &ModelConfig::new("m", 0.0))
            .await;
        assert!(!summarized);
        let msgs = mem.get_short_term_messages();
        assert_eq!(msgs.len(), 2);
        assert!(msgs[1].content.starts_with('9'));
    }

    #[test]
    fn test_trim_keeps_last_entry() {
        let mut mem = filled(3, 4000);
        let removed = ContextWindow::new(10).trim(&mut mem);
        assert_eq!(removed, 2);
        assert!(mem.get_short_term_messages()[0].content.starts_with('2'));
    }
}
