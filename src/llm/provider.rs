//! 按配置选择 LLM 后端（OpenAI 兼容 / DeepSeek / Mock），统一包一层指数退避重试

use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmSection;
use crate::core::AgentError;
use crate::llm::{
    create_deepseek_client, LlmClient, MockLlmClient, ModelConfig, OpenAiClient, RetryingLlmClient,
};

/// 根据 [llm] 段创建客户端；未知 provider 直接报配置错误
pub fn create_llm_from_config(cfg: &LlmSection) -> Result<Arc<dyn LlmClient>, AgentError> {
    let timeout = Duration::from_secs(cfg.request_timeout_secs.max(1));
    let inner: Arc<dyn LlmClient> = match cfg.provider.to_lowercase().as_str() {
        "openai" => {
            tracing::info!(model = %cfg.model, "Using OpenAI-compatible LLM");
            Arc::new(OpenAiClient::new(cfg.base_url.as_deref(), None, timeout))
        }
        "deepseek" => {
            tracing::info!(model = %cfg.model, "Using DeepSeek LLM");
            Arc::new(create_deepseek_client(timeout))
        }
        "mock" => {
            tracing::warn!("Using Mock LLM");
            Arc::new(MockLlmClient::new())
        }
        other => {
            return Err(AgentError::ConfigError(format!(
                "unknown llm provider '{}'",
                other
            )))
        }
    };
    Ok(Arc::new(RetryingLlmClient::new(inner, cfg.retry.clone())))
}

/// 全局默认模型参数，agent 定义可逐项覆盖
pub fn default_model_config(cfg: &LlmSection) -> ModelConfig {
    ModelConfig::new(cfg.model.clone(), cfg.temperature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provider_fails_fast() {
        let cfg = LlmSection {
            provider: "skynet".to_string(),
            ..LlmSection::default()
        };
        let err = create_llm_from_config(&cfg).err().unwrap();
        assert!(matches!(err, AgentError::ConfigError(ref m) if m.contains("skynet")));
    }

    #[tokio::test]
    async fn test_mock_provider() {
        let cfg = LlmSection {
            provider: "Mock".to_string(),
            ..LlmSection::default()
        };
        let client = create_llm_from_config(&cfg).unwrap();
        let out = client
            .complete(&[crate::memory::Message::user("ping")], &default_model_config(&cfg))
            .await
            .unwrap();
        assert_eq!(out, "Echo from Mock: ping");
    }
}
