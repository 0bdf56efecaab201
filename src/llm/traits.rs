//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient：
//! complete（普通对话）与 complete_with_tool_schema（工具选择，支持函数调用的后端把 schema 声明为 function tool）。
//! 错误区分「可重试」（限流 / 网络 / 超时）与其它；RetryingLlmClient 对前者做指数退避。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::memory::Message;

/// 单次调用使用的模型参数（agent 级，可覆盖全局默认）
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub model: String,
    pub temperature: f32,
}

impl ModelConfig {
    pub fn new(model: impl Into<String>, temperature: f32) -> Self {
        Self {
            model: model.into(),
            temperature,
        }
    }
}

/// 模型调用错误
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("API error: {0}")]
    Api(String),
}

impl LlmError {
    /// 限流、网络抖动、超时可重试；其余对本次调用是致命的
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. } | LlmError::Network(_) | LlmError::Timeout
        )
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message], config: &ModelConfig) -> Result<String, LlmError>;

    /// 工具选择调用：`schema` 为 `{tool, parameters}` 的 JSON schema。
    /// 默认实现忽略 schema，原样转发消息（提示词本身已描述回复格式）。
    async fn complete_with_tool_schema(
        &self,
        messages: &[Message],
        config: &ModelConfig,
        _schema: &Value,
    ) -> Result<String, LlmError> {
        self.complete(messages, config).await
    }

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 重试策略（对应配置 [llm.retry]）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 10_000,
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// 第 attempt 次失败后的等待时间（attempt 从 0 开始），不超过 max_delay
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        Duration::from_millis(base.min(self.max_delay_ms as f64) as u64)
    }
}

/// 带指数退避的客户端包装：只重试 is_transient 的错误
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    retry: RetryConfig,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, retry: RetryConfig) -> Self {
        Self { inner, retry }
    }

    fn backoff(&self, attempt: u32, err: &LlmError) -> Duration {
        let delay = self.retry.delay_for_attempt(attempt);
        match err {
            LlmError::RateLimited { retry_after_ms } => delay
                .max(Duration::from_millis(*retry_after_ms))
                .min(Duration::from_millis(self.retry.max_delay_ms)),
            _ => delay,
        }
    }

    async fn with_retry<F, Fut>(&self, mut call: F) -> Result<String, LlmError>
    where
        F: FnMut() -> Fut + Send,
        Fut: std::future::Future<Output = Result<String, LlmError>> + Send,
    {
        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    let delay = self.backoff(attempt, &e);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "transient LLM error, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(&self, messages: &[Message], config: &ModelConfig) -> Result<String, LlmError> {
        self.with_retry(|| self.inner.complete(messages, config)).await
    }

    async fn complete_with_tool_schema(
        &self,
        messages: &[Message],
        config: &ModelConfig,
        schema: &Value,
    ) -> Result<String, LlmError> {
        self.with_retry(|| self.inner.complete_with_tool_schema(messages, config, schema))
            .await
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}
