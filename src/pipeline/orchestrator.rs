//! 流水线编排器：固定拓扑的主控
//!
//! Classifier 单独领跑 -> Affect 与 Recall 并行（有界超时汇合）->
//! Synthesis 汇总 -> 返回响应 -> 冻结快照投后台扇出。
//! 阶段只前进不重试；超时的阶段按失败降级，迟到的结果被丢弃。
//! 情绪增量按阶段完成顺序收集，每个请求只 apply 一次。

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::core::{RequestPhase, StageError};
use crate::emotion::{EmotionDelta, EmotionHandle, EmotionalSnapshot};
use crate::memory::{Message, ShortTermStore};
use crate::pipeline::background::{BackgroundHandle, BackgroundJob};
use crate::pipeline::context::PipelineContext;
use crate::pipeline::stage::{
    AffectAssessment, Classification, MemoryWriteRequest, RecallOutcome, ResponseStrategy, Stage,
    StageName, StagePayload, StageResult, SynthesisOutcome,
};

/// 记忆增幅达到此值时，写请求的重要性上调一级
const BOOST_BUMP_THRESHOLD: f32 = 2.0;

/// 兜底回复文本（Synthesis 失败时，明确降级而不是无响应）
const DEGRADED_REPLY: &str =
    "I'm having trouble forming a proper reply right now. Could you say that again?";

/// 返回给调用方的最终载荷；永远是完整回复或显式标记的降级回复
#[derive(Clone, Debug)]
pub struct PipelineReply {
    pub request_id: Uuid,
    pub text: String,
    pub degraded: bool,
    pub emotional_snapshot: EmotionalSnapshot,
}

/// 编排器：持有四个关键路径阶段与副作用句柄
pub struct Pipeline {
    classifier: Arc<dyn Stage>,
    affect: Arc<dyn Stage>,
    recall: Arc<dyn Stage>,
    synthesis: Arc<dyn Stage>,
    short_term: Arc<ShortTermStore>,
    emotions: Arc<EmotionHandle>,
    background: BackgroundHandle,
    stage_timeout: Duration,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        classifier: Arc<dyn Stage>,
        affect: Arc<dyn Stage>,
        recall: Arc<dyn Stage>,
        synthesis: Arc<dyn Stage>,
        short_term: Arc<ShortTermStore>,
        emotions: Arc<EmotionHandle>,
        background: BackgroundHandle,
        stage_timeout: Duration,
    ) -> Self {
        Self {
            classifier,
            affect,
            recall,
            synthesis,
            short_term,
            emotions,
            background,
            stage_timeout,
        }
    }

    /// 带截止时间运行一个阶段；超时映射为 StageError::Timeout，迟到结果随 future 一起丢弃
    async fn run_guarded(&self, stage: &Arc<dyn Stage>, ctx: &PipelineContext) -> Result<StageResult, StageError> {
        match tokio::time::timeout(self.stage_timeout, stage.run(ctx)).await {
            Ok(result) => result,
            Err(_) => Err(StageError::Timeout),
        }
    }

    /// 处理一条用户输入，走完整个状态机并返回响应
    pub async fn process(&self, input: &str, locale: &str, history: Vec<Message>) -> PipelineReply {
        let snapshot = self.emotions.snapshot().await;
        let mut ctx = PipelineContext::new(input, locale, history, snapshot);
        let request_id = ctx.request_id;
        let mut phase = RequestPhase::Classifying;
        let mut deltas: Vec<EmotionDelta> = Vec::new();
        let mut writes: Vec<MemoryWriteRequest> = Vec::new();
        let mut degraded = false;

        tracing::debug!(%request_id, %phase, "Request accepted");

        // CLASSIFYING：失败对请求致命，但给兜底分类而不是中止
        let mut classifier_result = match self.run_guarded(&self.classifier, &ctx).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(%request_id, "Classifier degraded to fallback: {}", e);
                StageResult::new(
                    StageName::Classifier,
                    StagePayload::Classification(Classification::fallback(&ctx.locale)),
                )
                .with_confidence(0.0)
            }
        };
        // 待落账的增量与写请求抽走再入表：后续阶段经上下文只见载荷，见不到未落账增量
        deltas.append(&mut classifier_result.emotion_deltas);
        writes.append(&mut classifier_result.memory_writes);
        ctx.insert_result(classifier_result);

        // PARALLEL_ANALYSIS：两条支线各自降级，谁失败都不拖垮请求
        phase = phase.advance();
        tracing::debug!(%request_id, %phase, "Fanning out affect and recall");
        let (affect_outcome, recall_outcome) = tokio::join!(
            self.run_guarded(&self.affect, &ctx),
            self.run_guarded(&self.recall, &ctx),
        );

        let mut affect_result = affect_outcome.unwrap_or_else(|e| {
            tracing::warn!(%request_id, "Affect degraded to neutral: {}", e);
            StageResult::new(StageName::Affect, StagePayload::Affect(AffectAssessment::neutral()))
                .with_confidence(0.0)
        });
        let mut recall_result = recall_outcome.unwrap_or_else(|e| {
            tracing::warn!(%request_id, "Recall degraded to empty: {}", e);
            StageResult::new(StageName::Recall, StagePayload::Recall(RecallOutcome::empty()))
                .with_confidence(0.0)
        });

        let boost = match affect_result.payload {
            StagePayload::Affect(ref a) => a.memory_boost,
            _ => 1.0,
        };
        deltas.append(&mut affect_result.emotion_deltas);
        writes.append(&mut affect_result.memory_writes);
        deltas.append(&mut recall_result.emotion_deltas);
        writes.append(&mut recall_result.memory_writes);
        ctx.insert_result(affect_result);
        ctx.insert_result(recall_result);

        // SYNTHESIZING：失败时给显式标记的降级回复
        phase = phase.advance();
        tracing::debug!(%request_id, %phase, "Joining for synthesis");
        let mut synthesis_result = match self.run_guarded(&self.synthesis, &ctx).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(%request_id, "Synthesis degraded: {}", e);
                degraded = true;
                StageResult::new(
                    StageName::Synthesis,
                    StagePayload::Synthesis(SynthesisOutcome {
                        strategy: ResponseStrategy::Conversational,
                        tone: "apologetic".to_string(),
                        text: DEGRADED_REPLY.to_string(),
                    }),
                )
                .with_confidence(0.0)
            }
        };
        deltas.append(&mut synthesis_result.emotion_deltas);
        writes.append(&mut synthesis_result.memory_writes);
        let text = match synthesis_result.payload {
            StagePayload::Synthesis(ref s) => s.text.clone(),
            _ => DEGRADED_REPLY.to_string(),
        };
        ctx.insert_result(synthesis_result);

        // 记忆写请求统一执行；高情绪增幅上调重要性
        self.execute_writes(&writes, boost);

        // 情绪落账：整个请求只此一次，互斥段在 EmotionHandle 内部
        let emotional_snapshot = self.emotions.apply_queued(&deltas).await;

        // RESPONDED -> BACKGROUND_PROCESSING：冻结快照投后台，随即返回
        phase = phase.advance();
        tracing::debug!(%request_id, %phase, "Reply ready");
        phase = phase.advance();
        self.background.submit(BackgroundJob { ctx });
        phase = phase.advance();
        tracing::debug!(%request_id, %phase, degraded, "Request complete");

        PipelineReply {
            request_id,
            text,
            degraded,
            emotional_snapshot,
        }
    }

    fn execute_writes(&self, writes: &[MemoryWriteRequest], boost: f32) {
        for write in writes {
            let importance = if boost >= BOOST_BUMP_THRESHOLD {
                write.importance.bump()
            } else {
                write.importance
            };
            match self.short_term.add(write.content.clone(), write.category, importance) {
                Ok(id) => {
                    tracing::debug!(%id, category = %write.category, "Short-term entry written");
                }
                Err(e) => {
                    tracing::warn!("Short-term write failed: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ProviderError;
    use crate::emotion::Dimension;
    use crate::llm::MockGenerator;
    use crate::memory::{Category, DecayModel, Importance, PersonaNotes, StoreTuning};
    use crate::pipeline::affect::AffectStage;
    use crate::pipeline::background::BackgroundSupervisor;
    use crate::pipeline::classifier::ClassifierStage;
    use crate::pipeline::recall::RecallStage;
    use crate::pipeline::synthesis::SynthesisStage;
    use crate::memory::InMemoryLongTerm;
    use tokio_util::sync::CancellationToken;

    const CLASSIFIER_OK: &str =
        r#"{"input_type": "conversation", "language": "en", "urgency": "low", "needs_memory_search": true}"#;
    const AFFECT_OK: &str = r#"{"sentiment": "positive", "intensity": 0.5, "memory_boost": 1.0,
        "deltas": [{"dimension": "happiness", "delta": 0.1, "reason": "kind words"}]}"#;
    const RECALL_OK: &str = r#"{"query": "greeting", "facts": []}"#;
    const SYNTHESIS_OK: &str = r#"{"strategy": "conversational", "tone": "warm", "reply": "Hello there!"}"#;

    struct Fixture {
        pipeline: Pipeline,
        short_term: Arc<ShortTermStore>,
        emotions: Arc<EmotionHandle>,
        _cancel: CancellationToken,
    }

    /// 每个关键路径阶段一个独立的 Mock 脚本
    fn fixture(
        classifier: Vec<Result<String, ProviderError>>,
        affect: Vec<Result<String, ProviderError>>,
        recall: Vec<Result<String, ProviderError>>,
        synthesis: Vec<Result<String, ProviderError>>,
    ) -> Fixture {
        let short_term = Arc::new(ShortTermStore::new(DecayModel::default(), StoreTuning::default()));
        let long_term = Arc::new(InMemoryLongTerm::new(100));
        let emotions = Arc::new(EmotionHandle::default());
        let dir = tempfile::tempdir().unwrap();
        let persona = Arc::new(PersonaNotes::new(dir.path()));

        let cancel = CancellationToken::new();
        let supervisor = BackgroundSupervisor::new(
            Vec::new(),
            short_term.clone(),
            persona,
            Duration::from_secs(1),
        );
        let (background, _join) = supervisor.spawn(4, cancel.clone());

        let pipeline = Pipeline::new(
            Arc::new(ClassifierStage::new(Arc::new(MockGenerator::with_script(classifier)), 256)),
            Arc::new(AffectStage::new(Arc::new(MockGenerator::with_script(affect)), 256)),
            Arc::new(RecallStage::new(
                Arc::new(MockGenerator::with_script(recall)),
                short_term.clone(),
                long_term,
                5,
                256,
            )),
            Arc::new(SynthesisStage::new(Arc::new(MockGenerator::with_script(synthesis)), 512)),
            short_term.clone(),
            emotions.clone(),
            background,
            Duration::from_secs(5),
        );

        Fixture {
            pipeline,
            short_term,
            emotions,
            _cancel: cancel,
        }
    }

    fn ok(s: &str) -> Vec<Result<String, ProviderError>> {
        vec![Ok(s.to_string())]
    }

    #[tokio::test]
    async fn test_full_request_produces_reply_and_applies_deltas() {
        let f = fixture(
            ok(CLASSIFIER_OK),
            ok(AFFECT_OK),
            ok(RECALL_OK),
            ok(SYNTHESIS_OK),
        );
        let reply = f.pipeline.process("hi there", "en", Vec::new()).await;

        assert_eq!(reply.text, "Hello there!");
        assert!(!reply.degraded);
        assert!((reply.emotional_snapshot.get(Dimension::Happiness) - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_affect_failure_still_produces_reply_without_deltas() {
        // Scenario D：Affect 失败（超时同路径），Synthesis 拿到空 Affect，仍出回复，无增量落账
        let f = fixture(
            ok(CLASSIFIER_OK),
            vec![
                Err(ProviderError::Timeout),
                Err(ProviderError::Timeout),
            ],
            ok(RECALL_OK),
            ok(SYNTHESIS_OK),
        );
        let reply = f.pipeline.process("hi", "en", Vec::new()).await;

        assert_eq!(reply.text, "Hello there!");
        assert!(!reply.degraded);
        assert_eq!(reply.emotional_snapshot.get(Dimension::Happiness), 0.0);
        let snapshot = f.emotions.snapshot().await;
        assert_eq!(snapshot, EmotionalSnapshot::default());
    }

    #[tokio::test]
    async fn test_classifier_failure_uses_fallback_and_continues() {
        let f = fixture(
            vec![Err(ProviderError::Unavailable("down".to_string())), Err(ProviderError::Unavailable("down".to_string()))],
            ok(AFFECT_OK),
            ok(RECALL_OK),
            ok(SYNTHESIS_OK),
        );
        let reply = f.pipeline.process("hi", "en", Vec::new()).await;
        assert_eq!(reply.text, "Hello there!");
        assert!(!reply.degraded);
    }

    #[tokio::test]
    async fn test_synthesis_failure_yields_marked_degraded_reply() {
        let f = fixture(
            ok(CLASSIFIER_OK),
            ok(AFFECT_OK),
            ok(RECALL_OK),
            vec![
                Err(ProviderError::Unavailable("down".to_string())),
                Err(ProviderError::Unavailable("down".to_string())),
            ],
        );
        let reply = f.pipeline.process("hi", "en", Vec::new()).await;
        assert!(reply.degraded);
        assert!(!reply.text.is_empty());
    }

    #[tokio::test]
    async fn test_recall_facts_are_written_with_boosted_importance() {
        let affect_boosted = r#"{"sentiment": "positive", "intensity": 0.9, "memory_boost": 2.5, "deltas": []}"#;
        let recall_with_fact =
            r#"{"query": "saxophone", "facts": [{"content": "user plays saxophone", "category": "user", "importance": "normal"}]}"#;
        let f = fixture(
            ok(CLASSIFIER_OK),
            ok(affect_boosted),
            ok(recall_with_fact),
            ok(SYNTHESIS_OK),
        );
        f.pipeline.process("I play saxophone!", "en", Vec::new()).await;

        let active = f.short_term.list_active(Some(Category::User), None);
        assert_eq!(active.len(), 1);
        // boost >= 2.0：normal 上调为 high
        assert_eq!(active[0].importance, Importance::High);
    }
}
