//! Synthesis 阶段：汇合并生成最终回复
//!
//! 两条并行支线汇合后运行，拿 Classifier + Affect + Recall 的产出组装
//! 回复策略与文本。本阶段的结果就是返回给调用方的内容；失败时由
//! 编排器给出明确标记为降级的兜底回复。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::core::StageError;
use crate::llm::TextGenerator;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::stage::{
    extract_json, ResponseStrategy, Stage, StageName, StagePayload, StageResult, SynthesisOutcome,
};

const PROMPT: &str = r#"You are the response synthesis of a conversational agent.
Compose the final reply using the analysis below. Answer ONLY with JSON:
{
  "strategy": "conversational|informative|emotional|technical|creative",
  "tone": "<one word>",
  "reply": "<the reply to the user>",
  "confidence": 0.0-1.0
}

Input type: {kind}
Sentiment: {sentiment}
Current emotional state:
{emotions}

Remembered context:
{memories}

Recent messages:
{history}

User input: {input}"#;

#[derive(Deserialize, Default)]
struct RawSynthesis {
    #[serde(default)]
    strategy: String,
    #[serde(default)]
    tone: String,
    #[serde(default)]
    reply: String,
    #[serde(default = "default_confidence")]
    confidence: f32,
}

fn default_confidence() -> f32 {
    0.5
}

pub struct SynthesisStage {
    generator: Arc<dyn TextGenerator>,
    max_tokens: u32,
}

impl SynthesisStage {
    pub fn new(generator: Arc<dyn TextGenerator>, max_tokens: u32) -> Self {
        Self { generator, max_tokens }
    }

    /// 召回条目拼成 prompt 片段；两层合并，长期带相关度
    fn memories_block(ctx: &PipelineContext) -> String {
        let mut lines = Vec::new();
        if let Some(recall) = ctx.recall() {
            for entry in &recall.short_term {
                lines.push(format!("- [{}] {}", entry.category, entry.content));
            }
            for (entry, score) in &recall.long_term {
                lines.push(format!("- [{} {:.2}] {}", entry.category, score, entry.content));
            }
        }
        if lines.is_empty() {
            "(nothing recalled)".to_string()
        } else {
            lines.join("\n")
        }
    }

    fn parse(output: &str) -> Result<(SynthesisOutcome, f32), StageError> {
        let json = extract_json(output)
            .ok_or_else(|| StageError::Malformed("no JSON in synthesis output".to_string()))?;
        let raw: RawSynthesis = serde_json::from_str(json)
            .map_err(|e| StageError::Malformed(format!("synthesis JSON: {}", e)))?;

        if raw.reply.trim().is_empty() {
            return Err(StageError::Malformed("synthesis produced empty reply".to_string()));
        }

        let outcome = SynthesisOutcome {
            strategy: match raw.strategy.trim().to_lowercase().as_str() {
                "informative" => ResponseStrategy::Informative,
                "emotional" => ResponseStrategy::Emotional,
                "technical" => ResponseStrategy::Technical,
                "creative" => ResponseStrategy::Creative,
                _ => ResponseStrategy::Conversational,
            },
            tone: if raw.tone.trim().is_empty() {
                "friendly".to_string()
            } else {
                raw.tone.trim().to_string()
            },
            text: raw.reply.trim().to_string(),
        };
        Ok((outcome, raw.confidence.clamp(0.0, 1.0)))
    }
}

#[async_trait]
impl Stage for SynthesisStage {
    fn name(&self) -> StageName {
        StageName::Synthesis
    }

    async fn run(&self, ctx: &PipelineContext) -> Result<StageResult, StageError> {
        let kind = ctx
            .classification()
            .map(|c| format!("{:?}", c.kind).to_lowercase())
            .unwrap_or_else(|| "conversation".to_string());
        let sentiment = ctx
            .affect()
            .map(|a| format!("{:?}", a.sentiment).to_lowercase())
            .unwrap_or_else(|| "neutral".to_string());

        let prompt = PROMPT
            .replace("{kind}", &kind)
            .replace("{sentiment}", &sentiment)
            .replace("{emotions}", &ctx.emotion_block())
            .replace("{memories}", &Self::memories_block(ctx))
            .replace("{history}", &ctx.history_block(8))
            .replace("{input}", &ctx.input_text);

        let output = self.generator.complete(&prompt, self.max_tokens).await?;
        let (outcome, confidence) = Self::parse(&output)?;

        Ok(StageResult::new(StageName::Synthesis, StagePayload::Synthesis(outcome))
            .with_confidence(confidence))
    }
}
