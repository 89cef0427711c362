//! Recall 阶段：记忆检索与写入提议
//!
//! 与 Affect 并行。先用 LLM 从输入中抽取检索 query 与值得记住的新事实，
//! 再查短期 list_active 与长期 query。LLM 失败时退回用原文检索；
//! 存储失败时退回空结果——本阶段从不让请求失败。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::core::StageError;
use crate::llm::TextGenerator;
use crate::memory::{Category, Importance, LongTermStore, ShortTermStore};
use crate::pipeline::context::PipelineContext;
use crate::pipeline::stage::{
    extract_json, MemoryWriteRequest, RecallOutcome, Stage, StageName, StagePayload, StageResult,
};

/// 短期侧最多带入的条目数
const SHORT_TERM_LIMIT: usize = 8;

const PROMPT: &str = r#"You are the memory recall of a conversational agent.
Extract a search query for the memory store and list new facts worth keeping.
Answer ONLY with JSON:
{
  "query": "<search query>",
  "facts": [
    {"content": "<fact>", "category": "user|system|context|chat|dream",
     "importance": "low|normal|high"}
  ],
  "confidence": 0.0-1.0
}

User input: {input}"#;

#[derive(Deserialize, Default)]
struct RawRecall {
    #[serde(default)]
    query: String,
    #[serde(default)]
    facts: Vec<RawFact>,
    #[serde(default = "default_confidence")]
    confidence: f32,
}

#[derive(Deserialize, Default)]
struct RawFact {
    #[serde(default)]
    content: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    importance: String,
}

fn default_confidence() -> f32 {
    0.5
}

pub struct RecallStage {
    generator: Arc<dyn TextGenerator>,
    short_term: Arc<ShortTermStore>,
    long_term: Arc<dyn LongTermStore>,
    top_k: usize,
    max_tokens: u32,
}

impl RecallStage {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        short_term: Arc<ShortTermStore>,
        long_term: Arc<dyn LongTermStore>,
        top_k: usize,
        max_tokens: u32,
    ) -> Self {
        Self {
            generator,
            short_term,
            long_term,
            top_k,
            max_tokens,
        }
    }

    fn parse(output: &str) -> Option<(String, Vec<MemoryWriteRequest>, f32)> {
        let json = extract_json(output)?;
        let raw: RawRecall = serde_json::from_str(json).ok()?;
        let writes = raw
            .facts
            .into_iter()
            .filter(|f| !f.content.trim().is_empty())
            .map(|f| MemoryWriteRequest {
                content: f.content.trim().to_string(),
                category: Category::parse(&f.category).unwrap_or(Category::Context),
                importance: Importance::parse(&f.importance).unwrap_or(Importance::Normal),
            })
            .collect();
        Some((raw.query, writes, raw.confidence.clamp(0.0, 1.0)))
    }
}

#[async_trait]
impl Stage for RecallStage {
    fn name(&self) -> StageName {
        StageName::Recall
    }

    async fn run(&self, ctx: &PipelineContext) -> Result<StageResult, StageError> {
        let prompt = PROMPT.replace("{input}", &ctx.input_text);

        // LLM 抽取失败不终止本阶段：退回用原始输入作为检索 query
        let (query, writes, confidence) = match self.generator.complete(&prompt, self.max_tokens).await
        {
            Ok(output) => Self::parse(&output)
                .unwrap_or_else(|| (ctx.input_text.clone(), Vec::new(), 0.3)),
            Err(e) => {
                tracing::warn!(stage = "recall", "Query extraction degraded: {}", e);
                (ctx.input_text.clone(), Vec::new(), 0.2)
            }
        };
        let query = if query.trim().is_empty() {
            ctx.input_text.clone()
        } else {
            query
        };

        let mut short_term = self.short_term.list_active(None, None);
        short_term.truncate(SHORT_TERM_LIMIT);

        let long_term = match self.long_term.query(&query, self.top_k).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(stage = "recall", "Long-term query degraded to empty: {}", e);
                Vec::new()
            }
        };

        Ok(StageResult::new(
            StageName::Recall,
            StagePayload::Recall(RecallOutcome {
                query,
                short_term,
                long_term,
            }),
        )
        .with_writes(writes)
        .with_confidence(confidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{MemoryError, ProviderError};
    use crate::emotion::EmotionalSnapshot;
    use crate::llm::MockGenerator;
    use crate::memory::{DecayModel, InMemoryLongTerm, MemoryEntry, StoreTuning};

    fn ctx(input: &str) -> PipelineContext {
        PipelineContext::new(input, "en", Vec::new(), EmotionalSnapshot::default())
    }

    fn stores() -> (Arc<ShortTermStore>, Arc<InMemoryLongTerm>) {
        (
            Arc::new(ShortTermStore::new(DecayModel::default(), StoreTuning::default())),
            Arc::new(InMemoryLongTerm::new(100)),
        )
    }

    #[tokio::test]
    async fn test_queries_both_tiers_and_proposes_writes() {
        let (st, lt) = stores();
        let jazz = st.add("user likes jazz music", Category::User, Importance::High).unwrap();
        lt.put(&st.get(jazz).unwrap()).await.unwrap();

        let mock = Arc::new(MockGenerator::with_script(vec![Ok(r#"{
            "query": "jazz music taste",
            "facts": [{"content": "user owns a saxophone", "category": "user", "importance": "high"}],
            "confidence": 0.7
        }"#
        .to_string())]));
        let stage = RecallStage::new(mock, st, lt, 5, 256);

        let result = stage.run(&ctx("I bought a saxophone for my jazz practice")).await.unwrap();
        assert_eq!(result.memory_writes.len(), 1);
        assert_eq!(result.memory_writes[0].category, Category::User);
        match result.payload {
            StagePayload::Recall(r) => {
                assert_eq!(r.query, "jazz music taste");
                assert_eq!(r.short_term.len(), 1);
                assert_eq!(r.long_term.len(), 1);
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_llm_failure_degrades_to_raw_input_query() {
        let (st, lt) = stores();
        let mock = Arc::new(MockGenerator::with_script(vec![Err(
            ProviderError::Unavailable("down".to_string()),
        )]));
        let stage = RecallStage::new(mock, st, lt, 5, 256);

        let result = stage.run(&ctx("where do penguins live")).await.unwrap();
        match result.payload {
            StagePayload::Recall(r) => assert_eq!(r.query, "where do penguins live"),
            other => panic!("unexpected payload: {:?}", other),
        }
        assert!(result.memory_writes.is_empty());
    }

    struct BrokenLongTerm;

    #[async_trait]
    impl LongTermStore for BrokenLongTerm {
        async fn put(&self, _e: &MemoryEntry) -> Result<(), MemoryError> {
            Err(MemoryError::WriteFailed("offline".to_string()))
        }
        async fn query(&self, _t: &str, _k: usize) -> Result<Vec<(MemoryEntry, f32)>, MemoryError> {
            Err(MemoryError::WriteFailed("offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_store_failure_degrades_to_empty_recall() {
        let (st, _) = stores();
        let mock = Arc::new(MockGenerator::with_script(vec![Ok(
            r#"{"query": "anything"}"#.to_string(),
        )]));
        let stage = RecallStage::new(mock, st, Arc::new(BrokenLongTerm), 5, 256);

        let result = stage.run(&ctx("hello")).await.unwrap();
        match result.payload {
            StagePayload::Recall(r) => assert!(r.long_term.is_empty()),
            other => panic!("unexpected payload: {:?}", other),
        }
    }
}
