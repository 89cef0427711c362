//! 有界重试包装
//!
//! 对任意 TextGenerator 增加「失败后最多重试一次、带退避」的语义；
//! 超出后直接把错误交还给阶段，由阶段决定降级，绝不无限循环。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::ProviderError;
use crate::llm::TextGenerator;

/// 带单次重试的生成器装饰层
pub struct RetryingGenerator {
    inner: Arc<dyn TextGenerator>,
    backoff: Duration,
}

impl RetryingGenerator {
    pub fn new(inner: Arc<dyn TextGenerator>, backoff_ms: u64) -> Self {
        Self {
            inner,
            backoff: Duration::from_millis(backoff_ms),
        }
    }
}

#[async_trait]
impl TextGenerator for RetryingGenerator {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }

    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, ProviderError> {
        match self.inner.complete(prompt, max_tokens).await {
            Ok(text) => Ok(text),
            Err(first) => {
                tracing::warn!(error = %first, backoff_ms = self.backoff.as_millis() as u64, "Generator failed, retrying once");
                tokio::time::sleep(self.backoff).await;
                self.inner.complete(prompt, max_tokens).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockGenerator;

    #[tokio::test]
    async fn test_retries_exactly_once_then_succeeds() {
        let mock = Arc::new(MockGenerator::with_script(vec![
            Err(ProviderError::RateLimited),
            Ok("second try".to_string()),
        ]));
        let retrying = RetryingGenerator::new(mock.clone(), 1);

        let out = retrying.complete("p", 64).await.unwrap();
        assert_eq!(out, "second try");
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_second_failure_is_returned() {
        let mock = Arc::new(MockGenerator::with_script(vec![
            Err(ProviderError::Timeout),
            Err(ProviderError::Unavailable("down".to_string())),
            Ok("never reached".to_string()),
        ]));
        let retrying = RetryingGenerator::new(mock.clone(), 1);

        let err = retrying.complete("p", 64).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
        // 第三个脚本条目不应被消费：重试有界
        assert_eq!(mock.calls(), 2);
    }
}
