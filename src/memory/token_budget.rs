//! Token 估算
//!
//! 上下文窗口管理使用的近似计数：不依赖具体模型的 tokenizer。

use crate::memory::Message;

/// 每条消息的固定开销（role 与分隔符）
const PER_MESSAGE_OVERHEAD: usize = 4;

/// Token 估算器（简单的字符计数近似）
pub struct TokenEstimator;

impl TokenEstimator {
    /// 估算文本的 token 数量
    /// 使用简单的启发式规则：英文约 4 字符/token，中文约 1.5 字符/token
    pub fn estimate(text: &str) -> usize {
        let mut ascii_chars = 0usize;
        let mut non_ascii_chars = 0usize;

        for c in text.chars() {
            if c.is_ascii() {
                ascii_chars += 1;
            } else {
                non_ascii_chars += 1;
            }
        }

        let tokens = ascii_chars.div_ceil(4) + (non_ascii_chars as f64 / 1.5).ceil() as usize;
        tokens.max(1)
    }

    /// 整段对话的 token 数：逐条估算后求和
    pub fn estimate_messages(messages: &[Message]) -> usize {
        messages
            .iter()
            .map(|m| Self::estimate(&m.content) + PER_MESSAGE_OVERHEAD)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_estimator_english() {
        let text = "Hello, world! This is a test.";
        let tokens = TokenEstimator::estimate(text);
        assert!(tokens > 0);
        assert!(tokens < text.len());
    }

    #[test]
    fn test_token_estimator_chinese() {
        let text = "你好世界，这是一个测试。";
        let tokens = TokenEstimator::estimate(text);
        assert_eq!(tokens, 8);
    }

    #[test]
    fn test_empty_text_counts_one() {
        assert_eq!(TokenEstimator::estimate(""), 1);
    }

    #[test]
    fn test_messages_sum_with_overhead() {
        let messages = vec![Message::system("abcd"), Message::user("abcdefgh")];
        assert_eq!(TokenEstimator::estimate_messages(&messages), 1 + 4 + 2 + 4);
    }
}
