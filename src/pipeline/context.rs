//! 请求上下文
//!
//! 构造后不可变，唯一的例外是显式的 stage_results 表；生命周期只覆盖一次请求，
//! 从不持久化。后台扇出拿到的是冻结的克隆快照。

use std::collections::HashMap;

use uuid::Uuid;

use crate::emotion::EmotionalSnapshot;
use crate::memory::Message;
use crate::pipeline::stage::{
    AffectAssessment, Classification, RecallOutcome, StageName, StagePayload, StageResult,
    SynthesisOutcome,
};

/// 单次请求的共享上下文
#[derive(Clone, Debug)]
pub struct PipelineContext {
    pub request_id: Uuid,
    pub input_text: String,
    pub locale: String,
    pub history: Vec<Message>,
    pub emotional_snapshot: EmotionalSnapshot,
    stage_results: HashMap<StageName, StageResult>,
}

impl PipelineContext {
    pub fn new(
        input_text: impl Into<String>,
        locale: impl Into<String>,
        history: Vec<Message>,
        emotional_snapshot: EmotionalSnapshot,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            input_text: input_text.into(),
            locale: locale.into(),
            history,
            emotional_snapshot,
            stage_results: HashMap::new(),
        }
    }

    pub(crate) fn insert_result(&mut self, result: StageResult) {
        self.stage_results.insert(result.stage, result);
    }

    pub fn result(&self, stage: StageName) -> Option<&StageResult> {
        self.stage_results.get(&stage)
    }

    pub fn classification(&self) -> Option<&Classification> {
        match self.result(StageName::Classifier)?.payload {
            StagePayload::Classification(ref c) => Some(c),
            _ => None,
        }
    }

    pub fn affect(&self) -> Option<&AffectAssessment> {
        match self.result(StageName::Affect)?.payload {
            StagePayload::Affect(ref a) => Some(a),
            _ => None,
        }
    }

    pub fn recall(&self) -> Option<&RecallOutcome> {
        match self.result(StageName::Recall)?.payload {
            StagePayload::Recall(ref r) => Some(r),
            _ => None,
        }
    }

    pub fn synthesis(&self) -> Option<&SynthesisOutcome> {
        match self.result(StageName::Synthesis)?.payload {
            StagePayload::Synthesis(ref s) => Some(s),
            _ => None,
        }
    }

    /// 最近 n 条历史的文本块，供阶段 prompt 拼装
    pub fn history_block(&self, n: usize) -> String {
        if self.history.is_empty() {
            return "(no prior messages)".to_string();
        }
        self.history
            .iter()
            .rev()
            .take(n)
            .rev()
            .map(|m| {
                let who = match m.role {
                    crate::memory::Role::User => "user",
                    crate::memory::Role::Assistant => "assistant",
                };
                format!("{}: {}", who, m.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// 情绪快照的文本块
    pub fn emotion_block(&self) -> String {
        self.emotional_snapshot
            .as_pairs()
            .into_iter()
            .map(|(name, value)| format!("- {}: {:+.2}", name, value))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stage::StageResult;

    #[test]
    fn test_results_map_is_the_only_mutable_part() {
        let mut ctx = PipelineContext::new(
            "hello",
            "en",
            vec![Message::user("hi"), Message::assistant("hey")],
            EmotionalSnapshot::default(),
        );
        assert!(ctx.classification().is_none());

        ctx.insert_result(StageResult::new(
            StageName::Classifier,
            StagePayload::Classification(Classification::fallback("en")),
        ));
        assert!(ctx.classification().is_some());
        assert_eq!(ctx.history.len(), 2);
    }

    #[test]
    fn test_history_block_tail() {
        let ctx = PipelineContext::new(
            "x",
            "en",
            vec![
                Message::user("one"),
                Message::assistant("two"),
                Message::user("three"),
            ],
            EmotionalSnapshot::default(),
        );
        let block = ctx.history_block(2);
        assert!(!block.contains("one"));
        assert!(block.contains("two"));
        assert!(block.contains("user: three"));
    }
}
