//! 错误类型：生成服务 / 记忆层 / 流水线阶段 三类
//!
//! ProviderError 由调用方有界重试后降级；MemoryError 按类型分别处理
//! （读路径回退为空、WriteFailed 留待下次睡眠、NotFound 仅记录）；
//! StageError 只在 Classifier 与 Synthesis 两个关键阶段触发兜底输出。

use thiserror::Error;

/// 文本生成服务的三类失败，均可由调用方重试，但阶段内最多重试一次
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Provider rate limited")]
    RateLimited,

    #[error("Provider request timeout")]
    Timeout,

    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

/// 记忆层错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// 短期存储介质不可用：当前写入失败，读路径回退为空结果
    #[error("Short-term storage unavailable: {0}")]
    StorageUnavailable(String),

    /// 长期库写入失败：条目留在短期层，下次睡眠重试
    #[error("Long-term write failed: {0}")]
    WriteFailed(String),

    /// reinforce 的目标 id 不存在（已提升或已淘汰）
    #[error("Memory entry not found: {0}")]
    NotFound(uuid::Uuid),
}

/// 阶段执行错误；除两个关键阶段外一律降级为空结果，不上抛
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    /// 超过阶段截止时间，结果被丢弃
    #[error("Stage deadline exceeded")]
    Timeout,

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// LLM 输出无法解析为该阶段的结构化载荷
    #[error("Malformed stage output: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_into_stage_error() {
        let e: StageError = ProviderError::RateLimited.into();
        assert_eq!(e, StageError::Provider(ProviderError::RateLimited));
    }

    #[test]
    fn test_error_display() {
        let id = uuid::Uuid::nil();
        let e = MemoryError::NotFound(id);
        assert!(e.to_string().contains(&id.to_string()));
    }
}
