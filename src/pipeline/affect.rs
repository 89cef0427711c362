//! Affect 阶段：情绪评估
//!
//! 与 Recall 并行。评估输入的情绪效价与强度，产出情绪增量提议
//! （带理由，逐条钳到 ±0.2）与记忆增幅系数。失败只降级为中性结果，
//! 不影响请求。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::core::StageError;
use crate::emotion::{Dimension, EmotionDelta};
use crate::llm::TextGenerator;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::stage::{
    extract_json, AffectAssessment, Sentiment, Stage, StageName, StagePayload, StageResult,
};

/// 单条增量提议的绝对值上限
const MAX_DELTA: f64 = 0.2;

const PROMPT: &str = r#"You are the affect appraisal of a conversational agent.
Assess the emotional content of the user input and propose bounded adjustments
to the agent's emotional state. Answer ONLY with JSON:
{
  "sentiment": "positive|negative|neutral",
  "intensity": 0.0-1.0,
  "memory_boost": 1.0-3.0,
  "deltas": [
    {"dimension": "happiness|trust|energy|curiosity|frustration|motivation",
     "delta": -0.2 to 0.2, "reason": "<short reason>"}
  ],
  "confidence": 0.0-1.0
}

Current emotional state:
{emotions}

User input: {input}"#;

#[derive(Deserialize, Default)]
struct RawAffect {
    #[serde(default)]
    sentiment: String,
    #[serde(default)]
    intensity: f32,
    #[serde(default = "default_boost")]
    memory_boost: f32,
    #[serde(default)]
    deltas: Vec<RawDelta>,
    #[serde(default = "default_confidence")]
    confidence: f32,
}

#[derive(Deserialize, Default)]
struct RawDelta {
    #[serde(default)]
    dimension: String,
    #[serde(default)]
    delta: f64,
    #[serde(default)]
    reason: String,
}

fn default_boost() -> f32 {
    1.0
}

fn default_confidence() -> f32 {
    0.5
}

pub struct AffectStage {
    generator: Arc<dyn TextGenerator>,
    max_tokens: u32,
}

impl AffectStage {
    pub fn new(generator: Arc<dyn TextGenerator>, max_tokens: u32) -> Self {
        Self { generator, max_tokens }
    }

    fn parse(output: &str) -> Result<(AffectAssessment, Vec<EmotionDelta>, f32), StageError> {
        let json = extract_json(output)
            .ok_or_else(|| StageError::Malformed("no JSON in affect output".to_string()))?;
        let raw: RawAffect = serde_json::from_str(json)
            .map_err(|e| StageError::Malformed(format!("affect JSON: {}", e)))?;

        let assessment = AffectAssessment {
            sentiment: match raw.sentiment.trim().to_lowercase().as_str() {
                "positive" => Sentiment::Positive,
                "negative" => Sentiment::Negative,
                _ => Sentiment::Neutral,
            },
            intensity: raw.intensity.clamp(0.0, 1.0),
            memory_boost: raw.memory_boost.clamp(1.0, 3.0),
        };

        let deltas = raw
            .deltas
            .into_iter()
            .filter_map(|d| {
                let dimension = Dimension::parse(&d.dimension)?;
                if d.delta == 0.0 {
                    return None;
                }
                Some(EmotionDelta::new(
                    dimension,
                    d.delta.clamp(-MAX_DELTA, MAX_DELTA),
                    d.reason,
                ))
            })
            .collect();

        Ok((assessment, deltas, raw.confidence.clamp(0.0, 1.0)))
    }
}

#[async_trait]
impl Stage for AffectStage {
    fn name(&self) -> StageName {
        StageName::Affect
    }

    async fn run(&self, ctx: &PipelineContext) -> Result<StageResult, StageError> {
        let prompt = PROMPT
            .replace("{emotions}", &ctx.emotion_block())
            .replace("{input}", &ctx.input_text);

        let output = self.generator.complete(&prompt, self.max_tokens).await?;
        let (assessment, deltas, confidence) = Self::parse(&output)?;

        Ok(StageResult::new(StageName::Affect, StagePayload::Affect(assessment))
            .with_deltas(deltas)
            .with_confidence(confidence))
    }
}
