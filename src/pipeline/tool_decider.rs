//! ToolDecider 阶段（后台）：把自由文本意图解析成封闭命令集
//!
//! LLM 的字符串意图只在这里解析一次，得到 AgentCommand 枚举；
//! 未知命令名直接丢弃并告警，业务逻辑深处不再二次解析字符串。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use crate::core::StageError;
use crate::llm::TextGenerator;
use crate::memory::{Category, Importance, PersonaSection, ShortTermStore};
use crate::pipeline::context::PipelineContext;
use crate::pipeline::stage::{
    extract_json, AgentCommand, Stage, StageName, StagePayload, StageResult, ToolPlan,
};

/// 带入 prompt 的活跃条目数上限
const ACTIVE_PREVIEW: usize = 10;

const PROMPT: &str = r#"You are the follow-up planner of a conversational agent.
Decide which memory commands this exchange warrants. Answer ONLY with JSON:
{
  "commands": [
    {"command": "remember", "content": "<fact>", "category": "user|system|context|chat|dream", "importance": "low|normal|high"},
    {"command": "reinforce", "id": "<uuid of an active entry>"},
    {"command": "persona_note", "section": "identity|user|preferences", "note": "<one sentence>"}
  ],
  "confidence": 0.0-1.0
}
Use an empty list when nothing is warranted.

Active short-term entries:
{active}

User input: {input}
Agent reply: {reply}"#;

#[derive(Deserialize, Default)]
struct RawPlan {
    #[serde(default)]
    commands: Vec<RawCommand>,
    #[serde(default = "default_confidence")]
    confidence: f32,
}

#[derive(Deserialize, Default)]
struct RawCommand {
    #[serde(default)]
    command: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    importance: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    section: String,
    #[serde(default)]
    note: String,
}

fn default_confidence() -> f32 {
    0.5
}

pub struct ToolDeciderStage {
    generator: Arc<dyn TextGenerator>,
    short_term: Arc<ShortTermStore>,
    max_tokens: u32,
}

impl ToolDeciderStage {
    pub fn new(generator: Arc<dyn TextGenerator>, short_term: Arc<ShortTermStore>, max_tokens: u32) -> Self {
        Self {
            generator,
            short_term,
            max_tokens,
        }
    }

    /// 边界处的一次性解析；未知命令名丢弃
    fn resolve(raw: RawCommand) -> Option<AgentCommand> {
        match raw.command.trim().to_lowercase().as_str() {
            "remember" => {
                let content = raw.content.trim();
                if content.is_empty() {
                    return None;
                }
                Some(AgentCommand::RememberShortTerm {
                    content: content.to_string(),
                    category: Category::parse(&raw.category).unwrap_or(Category::Context),
                    importance: Importance::parse(&raw.importance).unwrap_or(Importance::Normal),
                })
            }
            "reinforce" => {
                let id = Uuid::parse_str(raw.id.trim()).ok()?;
                Some(AgentCommand::Reinforce { id })
            }
            "persona_note" => {
                let section = PersonaSection::parse(&raw.section)?;
                let note = raw.note.trim();
                if note.is_empty() {
                    return None;
                }
                Some(AgentCommand::PersonaNote {
                    section,
                    note: note.to_string(),
                })
            }
            other => {
                tracing::warn!(command = other, "Unknown agent command dropped");
                None
            }
        }
    }
}

#[async_trait]
impl Stage for ToolDeciderStage {
    fn name(&self) -> StageName {
        StageName::ToolDecider
    }

    async fn run(&self, ctx: &PipelineContext) -> Result<StageResult, StageError> {
        let mut active = self.short_term.list_active(None, None);
        active.truncate(ACTIVE_PREVIEW);
        let active_block = if active.is_empty() {
            "(none)".to_string()
        } else {
            active
                .iter()
                .map(|e| format!("- {} [{}] {}", e.id, e.category, e.content))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let reply = ctx.synthesis().map(|s| s.text.clone()).unwrap_or_default();
        let prompt = PROMPT
            .replace("{active}", &active_block)
            .replace("{input}", &ctx.input_text)
            .replace("{reply}", &reply);

        let output = self.generator.complete(&prompt, self.max_tokens).await?;
        let json = extract_json(&output)
            .ok_or_else(|| StageError::Malformed("no JSON in tool decider output".to_string()))?;
        let raw: RawPlan = serde_json::from_str(json)
            .map_err(|e| StageError::Malformed(format!("tool decider JSON: {}", e)))?;

        let commands = raw.commands.into_iter().filter_map(Self::resolve).collect();

        Ok(StageResult::new(
            StageName::ToolDecider,
            StagePayload::ToolPlan(ToolPlan { commands }),
        )
        .with_confidence(raw.confidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emotion::EmotionalSnapshot;
    use crate::llm::MockGenerator;
    use crate::memory::{DecayModel, StoreTuning};

    fn store() -> Arc<ShortTermStore> {
        Arc::new(ShortTermStore::new(DecayModel::default(), StoreTuning::default()))
    }

    #[tokio::test]
    async fn test_resolves_known_commands_drops_unknown() {
        let st = store();
        let id = st.add("existing", Category::User, Importance::Normal).unwrap();

        let script = format!(
            r#"{{"commands": [
                {{"command": "remember", "content": "user has a cat", "category": "user", "importance": "high"}},
                {{"command": "reinforce", "id": "{}"}},
                {{"command": "self_destruct"}},
                {{"command": "reinforce", "id": "not-a-uuid"}}
            ]}}"#,
            id
        );
        let mock = Arc::new(MockGenerator::with_script(vec![Ok(script)]));
        let stage = ToolDeciderStage::new(mock, st, 256);
        let ctx = PipelineContext::new("my cat is named Miles", "en", Vec::new(), EmotionalSnapshot::default());

        let result = stage.run(&ctx).await.unwrap();
        match result.payload {
            StagePayload::ToolPlan(plan) => {
                assert_eq!(plan.commands.len(), 2);
                assert!(matches!(plan.commands[0], AgentCommand::RememberShortTerm { .. }));
                assert_eq!(plan.commands[1], AgentCommand::Reinforce { id });
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_active_entries_are_listed_in_prompt() {
        let st = store();
        let id = st.add("likes jazz", Category::User, Importance::Normal).unwrap();

        let mock = Arc::new(MockGenerator::with_script(vec![Ok(r#"{"commands": []}"#.to_string())]));
        let stage = ToolDeciderStage::new(mock.clone(), st, 256);
        let ctx = PipelineContext::new("hi", "en", Vec::new(), EmotionalSnapshot::default());
        stage.run(&ctx).await.unwrap();

        let prompt = mock.prompt(0).unwrap();
        assert!(prompt.contains(&id.to_string()));
    }
}
