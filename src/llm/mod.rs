//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）、重试包装、后端选择

pub mod deepseek;
pub mod mock;
pub mod openai;
pub mod provider;
pub mod traits;

pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use provider::{create_llm_from_config, default_model_config};
pub use traits::{LlmClient, LlmError, ModelConfig, RetryConfig, RetryingLlmClient};
