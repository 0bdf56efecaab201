//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持 DeepSeek、OpenAI、自建代理等。
//! 模型名与温度由每次调用的 ModelConfig 决定，同一客户端可服务多个 agent。
//! 工具选择调用把 `{tool, parameters}` schema 声明为函数 `select_tool`，回复取 content，
//! content 为空时取首个 function tool call 的 arguments。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionMessageToolCalls, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionResponseMessage, ChatCompletionTool,
    ChatCompletionToolChoiceOption, ChatCompletionTools, CreateChatCompletionRequest,
    CreateChatCompletionRequestArgs, FunctionObject, ToolChoiceOptions,
};
use async_openai::Client;
use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{LlmClient, LlmError, ModelConfig};
use crate::memory::{Message, Role};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端：complete 时转 Message 为 API 格式并取首条 content
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    request_timeout: Duration,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, api_key: Option<&str>, request_timeout: Duration) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            request_timeout,
            usage: TokenUsage::new(),
        }
    }

    fn to_openai_messages(messages: &[Message]) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        messages
            .iter()
            .map(|m| {
                let built = match m.role {
                    Role::System => ChatCompletionRequestSystemMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::System),
                    Role::User => ChatCompletionRequestUserMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::User),
                    Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map(ChatCompletionRequestMessage::Assistant),
                };
                built.map_err(|e| LlmError::InvalidRequest(e.to_string()))
            })
            .collect()
    }

    fn request_args(
        messages: &[Message],
        config: &ModelConfig,
    ) -> Result<CreateChatCompletionRequestArgs, LlmError> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&config.model)
            .temperature(config.temperature)
            .messages(Self::to_openai_messages(messages)?);
        Ok(args)
    }

    async fn send(&self, request: CreateChatCompletionRequest) -> Result<String, LlmError> {
        let response = tokio::time::timeout(self.request_timeout, self.client.chat().create(request))
            .await
            .map_err(|_| LlmError::Timeout)?
            .map_err(|e| classify_error(&e.to_string()))?;

        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        Ok(response
            .choices
            .first()
            .map(|c| reply_text(&c.message))
            .unwrap_or_default())
    }
}

/// 工具选择时声明的函数名
pub(crate) const SELECT_TOOL_FUNCTION: &str = "select_tool";

/// 把 `{tool, parameters}` schema 包装成唯一的 function tool
pub(crate) fn tool_selection_tools(schema: &Value) -> Vec<ChatCompletionTools> {
    vec![ChatCompletionTools::Function(ChatCompletionTool {
        function: FunctionObject {
            name: SELECT_TOOL_FUNCTION.to_string(),
            description: Some(
                "Choose a tool and its parameters, or reply \"No tool needed\" in plain text.".to_string(),
            ),
            parameters: Some(schema.clone()),
            strict: None,
        },
    })]
}

/// 回复文本：优先 content；为空时取首个 function tool call 的 arguments
pub(crate) fn reply_text(message: &ChatCompletionResponseMessage) -> String {
    if let Some(content) = message.content.as_deref().filter(|c| !c.trim().is_empty()) {
        return content.to_string();
    }
    message
        .tool_calls
        .iter()
        .flatten()
        .find_map(|call| match call {
            ChatCompletionMessageToolCalls::Function(call) => Some(call.function.arguments.clone()),
            ChatCompletionMessageToolCalls::Custom(_) => None,
        })
        .unwrap_or_default()
}

/// 将 API 错误文本归类为可重试 / 不可重试
pub(crate) fn classify_error(message: &str) -> LlmError {
    let lower = message.to_lowercase();
    if lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests") {
        LlmError::RateLimited { retry_after_ms: 1000 }
    } else if lower.contains("timed out") || lower.contains("timeout") {
        LlmError::Timeout
    } else if lower.contains("error sending request")
        || lower.contains("connection")
        || lower.contains("dns")
        || lower.contains("503")
        || lower.contains("502")
    {
        LlmError::Network(message.to_string())
    } else {
        LlmError::Api(message.to_string())
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, messages: &[Message], config: &ModelConfig) -> Result<String, LlmError> {
        let request = Self::request_args(messages, config)?
            .build()
            .map_err(|e| LlmError::InvalidRequest(e.to_string()))?;
        self.send(request).await
    }

    async fn complete_with_tool_schema(
        &self,
        messages: &[Message],
        config: &ModelConfig,
        schema: &Value,
    ) -> Result<String, LlmError> {
        let request = Self::request_args(messages, config)?
            .tools(tool_selection_tools(schema))
            .tool_choice(ChatCompletionToolChoiceOption::Mode(ToolChoiceOptions::Auto))
            .build()
            .map_err(|e| LlmError::InvalidRequest(e.to_string()))?;
        self.send(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_error() {
        assert!(matches!(
            classify_error("status 429: Too Many Requests"),
            LlmError::RateLimited { .. }
        ));
        assert!(matches!(classify_error("operation timed out"), LlmError::Timeout));
        assert!(matches!(
            classify_error("error sending request for url"),
            LlmError::Network(_)
        ));
        assert!(matches!(
            classify_error("invalid_api_key: Incorrect API key provided"),
            LlmError::Api(_)
        ));
    }

    #[test]
    fn test_token_usage_accumulates() {
        let usage = TokenUsage::new();
        usage.add(10, 5);
        usage.add(1, 1);
        assert_eq!(usage.get(), (11, 6, 17));
    }

    #[test]
    fn test_message_conversion() {
        let msgs = vec![
            Message::system("s"),
            Message::user("u"),
            Message::assistant("a"),
        ];
        let converted = OpenAiClient::to_openai_messages(&msgs).unwrap();
        assert_eq!(converted.len(), 3);
        assert!(matches!(converted[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(converted[2], ChatCompletionRequestMessage::Assistant(_)));
    }

    fn response_message(value: serde_json::Value) -> ChatCompletionResponseMessage {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_tool_selection_request_carries_schema() {
        let schema = crate::tools::tool_decision_schema();
        let request = OpenAiClient::request_args(
            &[Message::system("pick a tool")],
            &ModelConfig::new("gpt-4o-mini", 0.0),
        )
        .unwrap()
        .tools(tool_selection_tools(&schema))
        .tool_choice(ChatCompletionToolChoiceOption::Mode(ToolChoiceOptions::Auto))
        .build()
        .unwrap();

        assert_eq!(request.messages.len(), 1);
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], SELECT_TOOL_FUNCTION);
        assert_eq!(body["tools"][0]["function"]["parameters"], schema);
    }

    #[test]
    fn test_reply_text_prefers_content() {
        let message = response_message(serde_json::json!({
            "role": "assistant",
            "content": "No tool needed"
        }));
        assert_eq!(reply_text(&message), "No tool needed");
    }

    #[test]
    fn test_reply_text_falls_back_to_tool_call_arguments() {
        let arguments = r#"{"tool":"echo","parameters":{"text":"hi"}}"#;
        let message = response_message(serde_json::json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": "call_1",
                "type": "function",
                "function": {"name": "select_tool", "arguments": arguments}
            }]
        }));
        assert_eq!(reply_text(&message), arguments);

        let empty = response_message(serde_json::json!({"role": "assistant", "content": "  "}));
        assert_eq!(reply_text(&empty), "");
    }
}
