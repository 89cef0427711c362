//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；
//! 整个请求包在 tokio timeout 内，错误按 429 / 超时 / 其他 映射到 ProviderError。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::core::ProviderError;
use crate::llm::TextGenerator;

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
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

/// OpenAI 兼容客户端：持有 Client 与 model 名，complete 时将 prompt 作为单条 user 消息发送
pub struct OpenAiGenerator {
    client: Client<OpenAIConfig>,
    model: String,
    request_timeout: Duration,
    usage: TokenUsage,
}

impl OpenAiGenerator {
    pub fn new(
        base_url: Option<&str>,
        model: &str,
        api_key: Option<&str>,
        request_timeout_secs: u64,
    ) -> Self {
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
            model: model.to_string(),
            request_timeout: Duration::from_secs(request_timeout_secs),
            usage: TokenUsage::default(),
        }
    }

    /// 将后端错误串映射为三类 ProviderError
    fn classify_error(msg: &str) -> ProviderError {
        let lower = msg.to_lowercase();
        if lower.contains("429") || lower.contains("rate limit") {
            ProviderError::RateLimited
        } else if lower.contains("timeout") || lower.contains("timed out") {
            ProviderError::Timeout
        } else {
            ProviderError::Unavailable(msg.to_string())
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, ProviderError> {
        let message = ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt.to_string())
                .build()
                .map_err(|e| ProviderError::Unavailable(e.to_string()))?,
        );

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .max_tokens(max_tokens)
            .messages(vec![message])
            .build()
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let response = tokio::time::timeout(self.request_timeout, self.client.chat().create(request))
            .await
            .map_err(|_| ProviderError::Timeout)?
            .map_err(|e| Self::classify_error(&e.to_string()))?;

        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_error() {
        assert_eq!(
            OpenAiGenerator::classify_error("HTTP 429 Too Many Requests"),
            ProviderError::RateLimited
        );
        assert_eq!(
            OpenAiGenerator::classify_error("request timed out"),
            ProviderError::Timeout
        );
        assert!(matches!(
            OpenAiGenerator::classify_error("connection refused"),
            ProviderError::Unavailable(_)
        ));
    }
}
