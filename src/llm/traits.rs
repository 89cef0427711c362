//! 文本生成服务抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 TextGenerator；流水线各阶段只依赖
//! `complete(prompt, max_tokens)` 这一个调用契约，失败分为限流 / 超时 / 不可用三类。

use async_trait::async_trait;

use crate::core::ProviderError;

/// 文本生成客户端 trait：单条 prompt 进、单段文本出
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// 单次补全；三类失败均可由调用方重试，但阶段内重试次数有界
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, ProviderError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
