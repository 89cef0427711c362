//! 认知流水线：阶段契约、请求上下文、编排器与后台扇出
//!
//! 拓扑固定：Classifier 领跑 -> Affect/Recall 并行 -> Synthesis 汇总 ->
//! 响应返回 -> Reward/Archivist/ToolDecider 后台扇出。

pub mod affect;
pub mod archivist;
pub mod background;
pub mod classifier;
pub mod context;
pub mod orchestrator;
pub mod recall;
pub mod reward;
pub mod stage;
pub mod synthesis;
pub mod tool_decider;

pub use affect::AffectStage;
pub use archivist::ArchivistStage;
pub use background::{BackgroundHandle, BackgroundJob, BackgroundSupervisor};
pub use classifier::ClassifierStage;
pub use context::PipelineContext;
pub use orchestrator::{Pipeline, PipelineReply};
pub use recall::RecallStage;
pub use reward::RewardStage;
pub use stage::{
    AffectAssessment, AgentCommand, ArchiveOutcome, Classification, InputKind, InteractionQuality,
    MemoryWriteRequest, RecallOutcome, ResponseStrategy, RewardAssessment, Sentiment, Stage,
    StageName, StagePayload, StageResult, SynthesisOutcome, ToolPlan, Urgency,
};
pub use synthesis::SynthesisStage;
pub use tool_decider::ToolDeciderStage;
