//! Classifier 阶段：输入分类
//!
//! 流水线的第一棒，单独运行。给输入打上类别 / 语言 / 紧急度标签，
//! 并判断是否需要记忆检索与工具。本阶段失败对请求是致命的，
//! 因此编排器用通用兜底分类顶替而不是中止请求。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::core::StageError;
use crate::llm::TextGenerator;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::stage::{
    extract_json, Classification, InputKind, Stage, StageName, StagePayload, StageResult, Urgency,
};

const PROMPT: &str = r#"You are the input classifier of a conversational agent.
Label the user input. Answer ONLY with JSON:
{
  "input_type": "conversation|information|emotional|task|memory_query|urgent",
  "language": "<two-letter code>",
  "urgency": "low|medium|high",
  "needs_memory_search": true|false,
  "needs_tools": true|false,
  "confidence": 0.0-1.0
}

Recent messages:
{history}

User input: {input}"#;

/// LLM 原始回复的宽松形状；缺字段走默认
#[derive(Deserialize, Default)]
struct RawClassification {
    #[serde(default)]
    input_type: String,
    #[serde(default)]
    language: String,
    #[serde(default)]
    urgency: String,
    #[serde(default = "default_true")]
    needs_memory_search: bool,
    #[serde(default)]
    needs_tools: bool,
    #[serde(default = "default_confidence")]
    confidence: f32,
}

fn default_true() -> bool {
    true
}

fn default_confidence() -> f32 {
    0.5
}

pub struct ClassifierStage {
    generator: Arc<dyn TextGenerator>,
    max_tokens: u32,
}

impl ClassifierStage {
    pub fn new(generator: Arc<dyn TextGenerator>, max_tokens: u32) -> Self {
        Self { generator, max_tokens }
    }

    fn parse(output: &str, locale: &str) -> Result<(Classification, f32), StageError> {
        let json = extract_json(output)
            .ok_or_else(|| StageError::Malformed("no JSON in classifier output".to_string()))?;
        let raw: RawClassification = serde_json::from_str(json)
            .map_err(|e| StageError::Malformed(format!("classifier JSON: {}", e)))?;

        let classification = Classification {
            kind: InputKind::parse(&raw.input_type).unwrap_or(InputKind::Conversation),
            language: if raw.language.trim().is_empty() {
                locale.to_string()
            } else {
                raw.language.trim().to_lowercase()
            },
            urgency: match raw.urgency.trim().to_lowercase().as_str() {
                "high" => Urgency::High,
                "low" => Urgency::Low,
                _ => Urgency::Medium,
            },
            needs_recall: raw.needs_memory_search,
            needs_tools: raw.needs_tools,
        };
        Ok((classification, raw.confidence.clamp(0.0, 1.0)))
    }
}

#[async_trait]
impl Stage for ClassifierStage {
    fn name(&self) -> StageName {
        StageName::Classifier
    }

    async fn run(&self, ctx: &PipelineContext) -> Result<StageResult, StageError> {
        let prompt = PROMPT
            .replace("{history}", &ctx.history_block(6))
            .replace("{input}", &ctx.input_text);

        let output = self.generator.complete(&prompt, self.max_tokens).await?;
        let (classification, confidence) = Self::parse(&output, &ctx.locale)?;

        Ok(StageResult::new(
            StageName::Classifier,
            StagePayload::Classification(classification),
        )
        .with_confidence(confidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emotion::EmotionalSnapshot;
    use crate::llm::MockGenerator;

    fn ctx(input: &str) -> PipelineContext {
        PipelineContext::new(input, "en", Vec::new(), EmotionalSnapshot::default())
    }

    #[tokio::test]
    async fn test_parses_labels() {
        let mock = Arc::new(MockGenerator::with_script(vec![Ok(r#"{
            "input_type": "memory_query", "language": "de", "urgency": "high",
            "needs_memory_search": true, "needs_tools": false, "confidence": 0.9
        }"#
        .to_string())]));
        let stage = ClassifierStage::new(mock, 256);

        let result = stage.run(&ctx("was habe ich gestern gesagt?")).await.unwrap();
        match result.payload {
            StagePayload::Classification(c) => {
                assert_eq!(c.kind, InputKind::MemoryQuery);
                assert_eq!(c.language, "de");
                assert_eq!(c.urgency, Urgency::High);
                assert!(c.needs_recall);
            }
            other => panic!("unexpected payload: {:?}", other),
        }
        assert!((result.confidence - 0.9).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_unknown_labels_fall_back_to_defaults() {
        let mock = Arc::new(MockGenerator::with_script(vec![Ok(
            r#"{"input_type": "prophecy", "urgency": "apocalyptic"}"#.to_string(),
        )]));
        let stage = ClassifierStage::new(mock, 256);

        let result = stage.run(&ctx("hello")).await.unwrap();
        match result.payload {
            StagePayload::Classification(c) => {
                assert_eq!(c.kind, InputKind::Conversation);
                assert_eq!(c.urgency, Urgency::Medium);
                assert_eq!(c.language, "en");
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_json_output_is_malformed() {
        let mock = Arc::new(MockGenerator::with_script(vec![Ok(
            "I think this is a question.".to_string(),
        )]));
        let stage = ClassifierStage::new(mock, 256);
        let err = stage.run(&ctx("hello")).await.unwrap_err();
        assert!(matches!(err, StageError::Malformed(_)));
    }
}
