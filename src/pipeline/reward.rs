//! Reward 阶段（后台）：交互质量评估
//!
//! 响应返回之后在后台运行，评估这轮交互的满意度与质量，产出学习信号。
//! 失败只记日志；提议的情绪增量不会进入在线状态（后台快照已冻结）。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::core::StageError;
use crate::llm::TextGenerator;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::stage::{
    extract_json, InteractionQuality, RewardAssessment, Stage, StageName, StagePayload, StageResult,
};

const PROMPT: &str = r#"You are the reward evaluation of a conversational agent.
Judge how well the reply served the user. Answer ONLY with JSON:
{
  "satisfaction": 0.0-1.0,
  "quality": "excellent|good|neutral|poor",
  "confidence": 0.0-1.0
}

User input: {input}
Agent reply: {reply}"#;

#[derive(Deserialize, Default)]
struct RawReward {
    #[serde(default = "default_half")]
    satisfaction: f32,
    #[serde(default)]
    quality: String,
    #[serde(default = "default_half")]
    confidence: f32,
}

fn default_half() -> f32 {
    0.5
}

pub struct RewardStage {
    generator: Arc<dyn TextGenerator>,
    max_tokens: u32,
}

impl RewardStage {
    pub fn new(generator: Arc<dyn TextGenerator>, max_tokens: u32) -> Self {
        Self { generator, max_tokens }
    }
}

#[async_trait]
impl Stage for RewardStage {
    fn name(&self) -> StageName {
        StageName::Reward
    }

    async fn run(&self, ctx: &PipelineContext) -> Result<StageResult, StageError> {
        let reply = ctx
            .synthesis()
            .map(|s| s.text.clone())
            .unwrap_or_else(|| "(degraded reply)".to_string());
        let prompt = PROMPT
            .replace("{input}", &ctx.input_text)
            .replace("{reply}", &reply);

        let output = self.generator.complete(&prompt, self.max_tokens).await?;
        let json = extract_json(&output)
            .ok_or_else(|| StageError::Malformed("no JSON in reward output".to_string()))?;
        let raw: RawReward = serde_json::from_str(json)
            .map_err(|e| StageError::Malformed(format!("reward JSON: {}", e)))?;

        let assessment = RewardAssessment {
            satisfaction: raw.satisfaction.clamp(0.0, 1.0),
            quality: match raw.quality.trim().to_lowercase().as_str() {
                "excellent" => InteractionQuality::Excellent,
                "good" => InteractionQuality::Good,
                "poor" | "bad" => InteractionQuality::Poor,
                _ => InteractionQuality::Neutral,
            },
        };

        Ok(StageResult::new(StageName::Reward, StagePayload::Reward(assessment))
            .with_confidence(raw.confidence))
    }
}
