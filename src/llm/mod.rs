//! 生成服务层：TextGenerator 抽象与实现（OpenAI 兼容 / Mock）、有界重试

pub mod mock;
pub mod openai;
pub mod retry;
pub mod traits;

pub use mock::MockGenerator;
pub use openai::OpenAiGenerator;
pub use retry::RetryingGenerator;
pub use traits::TextGenerator;

use std::sync::Arc;

use crate::config::AppConfig;

/// 根据配置与环境变量选择生成后端；无 API Key 或 provider = mock 时回落 Mock
pub fn create_generator_from_config(cfg: &AppConfig) -> Arc<dyn TextGenerator> {
    let provider = cfg.llm.provider.to_lowercase();
    let has_key = std::env::var("OPENAI_API_KEY").is_ok();

    let inner: Arc<dyn TextGenerator> = if provider != "mock" && has_key {
        tracing::info!("Using OpenAI-compatible generator ({})", cfg.llm.model);
        Arc::new(OpenAiGenerator::new(
            cfg.llm.base_url.as_deref(),
            &cfg.llm.model,
            None,
            cfg.llm.request_timeout_secs,
        ))
    } else {
        tracing::warn!("No API key set or provider=mock, using Mock generator");
        Arc::new(MockGenerator::new())
    };

    Arc::new(RetryingGenerator::new(inner, cfg.llm.retry_backoff_ms))
}
