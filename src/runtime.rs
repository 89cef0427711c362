//! 无界面认知运行时
//!
//! 供任意前端调用的装配层：从配置构建生成器 / 两层记忆 / 情绪 / 流水线 /
//! 睡眠调度与后台监督，对外只暴露 process 与三个手动触发操作。
//! 与 TUI/网关等外围解耦，外围只是它的客户端。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::emotion::{EmotionHandle, EmotionalSnapshot};
use crate::llm::{create_generator_from_config, TextGenerator};
use crate::memory::{
    Category, ConsolidationRecord, ConsolidationTriggers, ConsolidationWorker, ConversationMemory,
    DecayModel, InMemoryLongTerm, LongTermStore, MemoryEntry, MemoryPersistence, Message,
    PersonaNotes, ShortTermStore, StoreTuning,
};
use crate::pipeline::{
    AffectStage, ArchivistStage, BackgroundSupervisor, ClassifierStage, Pipeline, PipelineReply,
    RecallStage, RewardStage, Stage, SynthesisStage, ToolDeciderStage,
};

/// 认知运行时：一次构建，跨请求复用
pub struct CognitiveRuntime {
    pipeline: Pipeline,
    conversation: Mutex<ConversationMemory>,
    short_term: Arc<ShortTermStore>,
    emotions: Arc<EmotionHandle>,
    worker: Arc<ConsolidationWorker>,
    locale: String,
    cancel: CancellationToken,
}

impl CognitiveRuntime {
    /// 按配置与环境变量选择生成后端并构建
    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let generator = create_generator_from_config(cfg);
        Self::new(cfg, generator)
    }

    /// 用显式生成器构建（测试与嵌入场景）
    pub fn new(cfg: &AppConfig, generator: Arc<dyn TextGenerator>) -> anyhow::Result<Self> {
        let data_dir = cfg
            .app
            .data_dir
            .clone()
            .unwrap_or_else(|| std::path::PathBuf::from("data"));
        let persistence = Arc::new(MemoryPersistence::new(&data_dir));
        let persona = Arc::new(PersonaNotes::new(&data_dir));

        let decay = DecayModel::new(cfg.memory.base_half_life_secs, cfg.memory.reinforcement_growth);
        let tuning = StoreTuning {
            eviction_floor: cfg.memory.eviction_floor,
            promotion_ceiling: cfg.memory.promotion_ceiling,
            promotion_repeat_threshold: cfg.memory.promotion_repeat_threshold,
        };
        let short_term =
            Arc::new(ShortTermStore::new(decay, tuning).with_persistence(persistence.clone()));
        let long_term: Arc<dyn LongTermStore> =
            Arc::new(InMemoryLongTerm::new(cfg.memory.long_term_max_entries));

        let emotions = Arc::new(
            EmotionHandle::new(EmotionalSnapshot::default()).with_persistence(persistence.clone()),
        );

        let worker = Arc::new(
            ConsolidationWorker::new(
                short_term.clone(),
                long_term.clone(),
                ConsolidationTriggers {
                    interval: chrono::Duration::hours(cfg.consolidation.interval_hours as i64),
                    interaction_threshold: cfg.consolidation.interaction_threshold,
                },
            )
            .with_persistence(persistence),
        );

        let cancel = CancellationToken::new();
        worker.clone().spawn_scheduler(
            Duration::from_secs(cfg.consolidation.check_period_secs),
            cancel.clone(),
        );

        let max_tokens = cfg.llm.max_tokens;
        let background_stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(RewardStage::new(generator.clone(), max_tokens)),
            Arc::new(ArchivistStage::new(generator.clone(), persona.clone(), max_tokens)),
            Arc::new(ToolDeciderStage::new(generator.clone(), short_term.clone(), max_tokens)),
        ];
        let supervisor = BackgroundSupervisor::new(
            background_stages,
            short_term.clone(),
            persona,
            Duration::from_secs(cfg.pipeline.background_timeout_secs),
        );
        let (background, _join) = supervisor.spawn(cfg.pipeline.background_queue_size, cancel.clone());

        let pipeline = Pipeline::new(
            Arc::new(ClassifierStage::new(generator.clone(), max_tokens)),
            Arc::new(AffectStage::new(generator.clone(), max_tokens)),
            Arc::new(RecallStage::new(
                generator.clone(),
                short_term.clone(),
                long_term,
                cfg.memory.recall_top_k,
                max_tokens,
            )),
            Arc::new(SynthesisStage::new(generator, max_tokens)),
            short_term.clone(),
            emotions.clone(),
            background,
            Duration::from_secs(cfg.pipeline.stage_timeout_secs),
        );

        Ok(Self {
            pipeline,
            conversation: Mutex::new(ConversationMemory::new(cfg.app.max_context_turns)),
            short_term,
            emotions,
            worker,
            locale: cfg.app.locale.clone(),
            cancel,
        })
    }

    /// 处理一条用户输入：走完流水线、维护对话历史、累计睡眠触发计数
    pub async fn process(&self, input: &str) -> PipelineReply {
        self.process_localized(input, &self.locale).await
    }

    pub async fn process_localized(&self, input: &str, locale: &str) -> PipelineReply {
        let history = {
            let conversation = self.conversation.lock().await;
            conversation.messages().to_vec()
        };

        let reply = self.pipeline.process(input, locale, history).await;

        {
            let mut conversation = self.conversation.lock().await;
            conversation.push(Message::user(input));
            conversation.push(Message::assistant(reply.text.clone()));
        }
        self.worker.record_interaction();
        reply
    }

    /// 手动触发一次睡眠；已在运行时幂等返回 None
    pub async fn trigger_consolidation(&self) -> Option<ConsolidationRecord> {
        self.worker.try_run().await
    }

    /// 当前情绪快照
    pub async fn get_emotional_snapshot(&self) -> EmotionalSnapshot {
        self.emotions.snapshot().await
    }

    /// 当前活跃的短期条目（可按类别过滤）
    pub fn get_active_short_term(&self, category: Option<Category>) -> Vec<MemoryEntry> {
        self.short_term.list_active(category, None)
    }

    /// 停止后台调度与监督任务
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for CognitiveRuntime {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
