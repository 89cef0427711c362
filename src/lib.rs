//! Mnemo - Rust 认知运行时
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类与请求阶段状态机
//! - **emotion**: 6 维有界情绪向量，单写者落账
//! - **llm**: 文本生成服务抽象与实现（OpenAI 兼容 / Mock）、有界重试
//! - **memory**: 遗忘曲线、短期 / 长期两层存储、睡眠整固、持久化、人格笔记
//! - **pipeline**: 七阶段认知流水线（分类 -> 情绪/回忆并行 -> 合成 -> 后台扇出）
//! - **runtime**: 无界面装配层与手动触发入口
//! - **observability**: tracing 初始化

pub mod config;
pub mod core;
pub mod emotion;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod pipeline;
pub mod runtime;

pub use runtime::CognitiveRuntime;
