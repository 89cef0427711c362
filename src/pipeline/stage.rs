//! 阶段契约：统一的 run(context) -> StageResult
//!
//! 七个专职阶段共用同一 trait；结果载荷是按角色封闭的 tagged enum，
//! 下游拿不到未定义字段。阶段之间不得直接等待彼此，顺序只由编排器拓扑决定。

use async_trait::async_trait;
use uuid::Uuid;

use crate::core::StageError;
use crate::emotion::EmotionDelta;
use crate::memory::{Category, Importance, MemoryEntry, PersonaSection};
use crate::pipeline::context::PipelineContext;

/// 阶段名（固定集合，注册制，不可由用户扩展）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageName {
    Classifier,
    Affect,
    Recall,
    Synthesis,
    Reward,
    Archivist,
    ToolDecider,
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StageName::Classifier => "classifier",
            StageName::Affect => "affect",
            StageName::Recall => "recall",
            StageName::Synthesis => "synthesis",
            StageName::Reward => "reward",
            StageName::Archivist => "archivist",
            StageName::ToolDecider => "tool_decider",
        };
        f.write_str(s)
    }
}

/// 输入类别（Classifier 产出）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputKind {
    Conversation,
    Information,
    Emotional,
    Task,
    MemoryQuery,
    Urgent,
}

impl InputKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "conversation" => Some(InputKind::Conversation),
            "information" => Some(InputKind::Information),
            "emotional" => Some(InputKind::Emotional),
            "task" => Some(InputKind::Task),
            "memory_query" => Some(InputKind::MemoryQuery),
            "urgent" => Some(InputKind::Urgent),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Urgency {
    Low,
    Medium,
    High,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseStrategy {
    Conversational,
    Informative,
    Emotional,
    Technical,
    Creative,
}

/// Classifier 载荷
#[derive(Clone, Debug)]
pub struct Classification {
    pub kind: InputKind,
    pub language: String,
    pub urgency: Urgency,
    pub needs_recall: bool,
    pub needs_tools: bool,
}

impl Classification {
    /// 分类失败时的兜底：按普通会话处理，语言取请求 locale
    pub fn fallback(locale: &str) -> Self {
        Self {
            kind: InputKind::Conversation,
            language: locale.to_string(),
            urgency: Urgency::Medium,
            needs_recall: true,
            needs_tools: false,
        }
    }
}

/// Affect 载荷
#[derive(Clone, Debug)]
pub struct AffectAssessment {
    pub sentiment: Sentiment,
    /// 情绪强度 [0,1]
    pub intensity: f32,
    /// 记忆增幅 [1.0, 3.0]；>= 2.0 时提议写入的条目重要性上调一级
    pub memory_boost: f32,
}

impl AffectAssessment {
    pub fn neutral() -> Self {
        Self {
            sentiment: Sentiment::Neutral,
            intensity: 0.0,
            memory_boost: 1.0,
        }
    }
}

/// Recall 载荷
#[derive(Clone, Debug)]
pub struct RecallOutcome {
    pub query: String,
    pub short_term: Vec<MemoryEntry>,
    pub long_term: Vec<(MemoryEntry, f32)>,
}

impl RecallOutcome {
    pub fn empty() -> Self {
        Self {
            query: String::new(),
            short_term: Vec::new(),
            long_term: Vec::new(),
        }
    }
}

/// Synthesis 载荷：返回给调用方的最终内容
#[derive(Clone, Debug)]
pub struct SynthesisOutcome {
    pub strategy: ResponseStrategy,
    pub tone: String,
    pub text: String,
}

/// Reward 载荷（后台）
#[derive(Clone, Debug)]
pub struct RewardAssessment {
    pub satisfaction: f32,
    pub quality: InteractionQuality,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InteractionQuality {
    Excellent,
    Good,
    Neutral,
    Poor,
}

/// Archivist 载荷（后台）：待追加的人格笔记
#[derive(Clone, Debug)]
pub struct ArchiveOutcome {
    pub notes: Vec<(PersonaSection, String)>,
}

/// ToolDecider 载荷（后台）：边界处一次性解析出的封闭命令集
#[derive(Clone, Debug)]
pub struct ToolPlan {
    pub commands: Vec<AgentCommand>,
}

/// 运行时可执行的命令；字符串意图只在 ToolDecider 解析一次，此后不再二次解析
#[derive(Clone, Debug, PartialEq)]
pub enum AgentCommand {
    RememberShortTerm {
        content: String,
        category: Category,
        importance: Importance,
    },
    Reinforce {
        id: Uuid,
    },
    PersonaNote {
        section: PersonaSection,
        note: String,
    },
}

/// 按角色封闭的结果载荷
#[derive(Clone, Debug)]
pub enum StagePayload {
    Classification(Classification),
    Affect(AffectAssessment),
    Recall(RecallOutcome),
    Synthesis(SynthesisOutcome),
    Reward(RewardAssessment),
    Archive(ArchiveOutcome),
    ToolPlan(ToolPlan),
}

/// 阶段提出的短期记忆写请求（由编排器统一执行）
#[derive(Clone, Debug)]
pub struct MemoryWriteRequest {
    pub content: String,
    pub category: Category,
    pub importance: Importance,
}

/// 阶段结果：载荷 + 记忆写请求 + 情绪增量提议 + 置信度
#[derive(Clone, Debug)]
pub struct StageResult {
    pub stage: StageName,
    pub payload: StagePayload,
    pub memory_writes: Vec<MemoryWriteRequest>,
    pub emotion_deltas: Vec<EmotionDelta>,
    pub confidence: f32,
}

impl StageResult {
    pub fn new(stage: StageName, payload: StagePayload) -> Self {
        Self {
            stage,
            payload,
            memory_writes: Vec::new(),
            emotion_deltas: Vec::new(),
            confidence: 0.5,
        }
    }

    pub fn with_writes(mut self, writes: Vec<MemoryWriteRequest>) -> Self {
        self.memory_writes = writes;
        self
    }

    pub fn with_deltas(mut self, deltas: Vec<EmotionDelta>) -> Self {
        self.emotion_deltas = deltas;
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}

/// 阶段 trait：给定共享请求上下文，产出结构化结果
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> StageName;

    async fn run(&self, ctx: &PipelineContext) -> Result<StageResult, StageError>;
}

/// 从 LLM 输出中提取 JSON 块（```json 围栏或首个 { 到末个 }）
pub(crate) fn extract_json(output: &str) -> Option<&str> {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end > start {
        Some(&trimmed[start..=end])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_from_fenced_block() {
        let text = "Sure, here it is:\n```json\n{\"a\": 1}\n```\nDone.";
        assert_eq!(extract_json(text), Some("{\"a\": 1}"));
    }

    #[test]
    fn test_extract_json_from_bare_braces() {
        let text = "prefix {\"kind\": \"task\"} suffix";
        assert_eq!(extract_json(text), Some("{\"kind\": \"task\"}"));
    }

    #[test]
    fn test_extract_json_absent() {
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn test_confidence_is_clamped() {
        let r = StageResult::new(
            StageName::Affect,
            StagePayload::Affect(AffectAssessment::neutral()),
        )
        .with_confidence(3.5);
        assert_eq!(r.confidence, 1.0);
    }
}
