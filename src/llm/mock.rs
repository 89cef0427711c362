//! Mock 生成器（用于测试，无需 API）
//!
//! 按脚本顺序返回预置的成功/失败；脚本耗尽后返回固定兜底文本。
//! 记录收到的 prompt，便于测试断言各阶段的提示词拼装。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::ProviderError;
use crate::llm::TextGenerator;

/// 脚本化 Mock 客户端
pub struct MockGenerator {
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    prompts: Mutex<Vec<String>>,
    fallback: String,
}

impl MockGenerator {
    /// 无脚本：所有调用返回兜底文本（空 JSON 对象，阶段解析后走默认载荷）
    pub fn new() -> Self {
        Self::with_script(Vec::new())
    }

    pub fn with_script(script: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            prompts: Mutex::new(Vec::new()),
            fallback: "{}".to_string(),
        }
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }

    /// 已消费的调用次数
    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    /// 第 i 次调用收到的 prompt
    pub fn prompt(&self, i: usize) -> Option<String> {
        self.prompts.lock().unwrap().get(i).cloned()
    }
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn complete(&self, prompt: &str, _max_tokens: u32) -> Result<String, ProviderError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match self.script.lock().unwrap().pop_front() {
            Some(entry) => entry,
            None => Ok(self.fallback.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_order_then_fallback() {
        let mock = MockGenerator::with_script(vec![
            Ok("first".to_string()),
            Err(ProviderError::RateLimited),
        ]);

        assert_eq!(mock.complete("a", 8).await.unwrap(), "first");
        assert_eq!(
            mock.complete("b", 8).await.unwrap_err(),
            ProviderError::RateLimited
        );
        assert_eq!(mock.complete("c", 8).await.unwrap(), "{}");
        assert_eq!(mock.calls(), 3);
        assert_eq!(mock.prompt(1).as_deref(), Some("b"));
    }
}
