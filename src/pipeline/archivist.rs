//! Archivist 阶段（后台）：人格笔记归档
//!
//! 决定这轮交互里哪些内容值得写进身份 / 用户画像 / 偏好三个分区。
//! 读当前分区内容以避免重复；产出的笔记由后台监督者统一落盘。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::core::StageError;
use crate::llm::TextGenerator;
use crate::memory::{PersonaNotes, PersonaSection};
use crate::pipeline::context::PipelineContext;
use crate::pipeline::stage::{
    extract_json, ArchiveOutcome, Stage, StageName, StagePayload, StageResult,
};

/// 每个分区带入 prompt 的最大字符数
const SECTION_PREVIEW_CHARS: usize = 500;

const PROMPT: &str = r#"You are the archivist of a conversational agent.
Decide which durable notes this exchange adds. Do not repeat notes already present.
Answer ONLY with JSON:
{
  "notes": [
    {"section": "identity|user|preferences", "note": "<one sentence>"}
  ],
  "confidence": 0.0-1.0
}

Existing identity notes:
{identity}

Existing user notes:
{user}

Existing preference notes:
{preferences}

User input: {input}
Agent reply: {reply}"#;

#[derive(Deserialize, Default)]
struct RawArchive {
    #[serde(default)]
    notes: Vec<RawNote>,
    #[serde(default = "default_confidence")]
    confidence: f32,
}

#[derive(Deserialize, Default)]
struct RawNote {
    #[serde(default)]
    section: String,
    #[serde(default)]
    note: String,
}

fn default_confidence() -> f32 {
    0.5
}

pub struct ArchivistStage {
    generator: Arc<dyn TextGenerator>,
    persona: Arc<PersonaNotes>,
    max_tokens: u32,
}

impl ArchivistStage {
    pub fn new(generator: Arc<dyn TextGenerator>, persona: Arc<PersonaNotes>, max_tokens: u32) -> Self {
        Self {
            generator,
            persona,
            max_tokens,
        }
    }

    fn section_preview(&self, section: PersonaSection) -> String {
        let content = self.persona.read(section);
        if content.is_empty() {
            return "(empty)".to_string();
        }
        content.chars().take(SECTION_PREVIEW_CHARS).collect()
    }
}

#[async_trait]
impl Stage for ArchivistStage {
    fn name(&self) -> StageName {
        StageName::Archivist
    }

    async fn run(&self, ctx: &PipelineContext) -> Result<StageResult, StageError> {
        let reply = ctx
            .synthesis()
            .map(|s| s.text.clone())
            .unwrap_or_default();
        let prompt = PROMPT
            .replace("{identity}", &self.section_preview(PersonaSection::Identity))
            .replace("{user}", &self.section_preview(PersonaSection::User))
            .replace("{preferences}", &self.section_preview(PersonaSection::Preferences))
            .replace("{input}", &ctx.input_text)
            .replace("{reply}", &reply);

        let output = self.generator.complete(&prompt, self.max_tokens).await?;
        let json = extract_json(&output)
            .ok_or_else(|| StageError::Malformed("no JSON in archivist output".to_string()))?;
        let raw: RawArchive = serde_json::from_str(json)
            .map_err(|e| StageError::Malformed(format!("archivist JSON: {}", e)))?;

        let notes = raw
            .notes
            .into_iter()
            .filter_map(|n| {
                let section = PersonaSection::parse(&n.section)?;
                let note = n.note.trim().to_string();
                if note.is_empty() {
                    None
                } else {
                    Some((section, note))
                }
            })
            .collect();

        Ok(StageResult::new(
            StageName::Archivist,
            StagePayload::Archive(ArchiveOutcome { notes }),
        )
        .with_confidence(raw.confidence))
    }
}
