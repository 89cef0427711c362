//! 后台扇出：Reward / Archivist / ToolDecider 的监督执行
//!
//! 响应返回后，编排器把冻结的上下文快照投进有界队列；监督任务逐个跑
//! 三个后台阶段（各自带截止时间），失败只记日志，绝不影响下一个请求。
//! 队列满载时丢弃任务并告警，而不是阻塞响应路径。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::memory::{PersonaNotes, ShortTermStore};
use crate::pipeline::context::PipelineContext;
use crate::pipeline::stage::{AgentCommand, Stage, StagePayload, StageResult};

/// 一份后台工作：冻结的请求上下文（含全部阶段结果）
#[derive(Debug)]
pub struct BackgroundJob {
    pub ctx: PipelineContext,
}

/// 投递句柄；clone 后可跨任务使用
#[derive(Clone)]
pub struct BackgroundHandle {
    tx: mpsc::Sender<BackgroundJob>,
}

impl BackgroundHandle {
    /// 非阻塞投递；队列满时丢弃并告警，返回是否已入队
    pub fn submit(&self, job: BackgroundJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::warn!(request_id = %job.ctx.request_id, "Background queue full, job dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("Background supervisor stopped, job dropped");
                false
            }
        }
    }
}

/// 后台监督者：持有三个后台阶段与效果执行所需的存储句柄
pub struct BackgroundSupervisor {
    stages: Vec<Arc<dyn Stage>>,
    short_term: Arc<ShortTermStore>,
    persona: Arc<PersonaNotes>,
    stage_timeout: Duration,
}

impl BackgroundSupervisor {
    pub fn new(
        stages: Vec<Arc<dyn Stage>>,
        short_term: Arc<ShortTermStore>,
        persona: Arc<PersonaNotes>,
        stage_timeout: Duration,
    ) -> Self {
        Self {
            stages,
            short_term,
            persona,
            stage_timeout,
        }
    }

    /// 启动监督任务，返回投递句柄与 JoinHandle
    pub fn spawn(
        self,
        queue_size: usize,
        cancel: CancellationToken,
    ) -> (BackgroundHandle, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<BackgroundJob>(queue_size.max(1));
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    job = rx.recv() => {
                        match job {
                            Some(job) => self.run_job(job).await,
                            None => break,
                        }
                    }
                    _ = cancel.cancelled() => {
                        tracing::info!("Background supervisor stopped");
                        break;
                    }
                }
            }
        });
        (BackgroundHandle { tx }, handle)
    }

    async fn run_job(&self, job: BackgroundJob) {
        let request_id = job.ctx.request_id;
        for stage in &self.stages {
            let name = stage.name();
            match tokio::time::timeout(self.stage_timeout, stage.run(&job.ctx)).await {
                Ok(Ok(result)) => self.apply_effects(result).await,
                Ok(Err(e)) => {
                    tracing::warn!(%request_id, stage = %name, "Background stage failed: {}", e);
                }
                Err(_) => {
                    tracing::warn!(%request_id, stage = %name, "Background stage deadline exceeded");
                }
            }
        }
    }

    /// 执行一个后台阶段的副作用；情绪增量在后台一律丢弃（快照已冻结）
    async fn apply_effects(&self, result: StageResult) {
        for delta in &result.emotion_deltas {
            tracing::debug!(
                stage = %result.stage,
                dimension = delta.dimension.as_str(),
                "Background emotion delta dropped"
            );
        }

        for write in &result.memory_writes {
            if let Err(e) = self
                .short_term
                .add(write.content.clone(), write.category, write.importance)
            {
                tracing::warn!(stage = %result.stage, "Background memory write failed: {}", e);
            }
        }

        match result.payload {
            StagePayload::Archive(archive) => {
                for (section, note) in archive.notes {
                    if let Err(e) = self.persona.append(section, &note) {
                        tracing::warn!("Persona note append failed: {}", e);
                    }
                }
            }
            StagePayload::ToolPlan(plan) => {
                for command in plan.commands {
                    self.execute_command(command);
                }
            }
            StagePayload::Reward(reward) => {
                tracing::info!(
                    satisfaction = reward.satisfaction,
                    quality = ?reward.quality,
                    "Interaction reward"
                );
            }
            _ => {}
        }
    }

    fn execute_command(&self, command: AgentCommand) {
        match command {
            AgentCommand::RememberShortTerm {
                content,
                category,
                importance,
            } => {
                if let Err(e) = self.short_term.add(content, category, importance) {
                    tracing::warn!("Remember command failed: {}", e);
                }
            }
            AgentCommand::Reinforce { id } => {
                // NotFound 不致命：条目可能已被提升或淘汰
                if let Err(e) = self.short_term.reinforce(id) {
                    tracing::info!("Reinforce skipped: {}", e);
                }
            }
            AgentCommand::PersonaNote { section, note } => {
                if let Err(e) = self.persona.append(section, &note) {
                    tracing::warn!("Persona note append failed: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emotion::EmotionalSnapshot;
    use crate::llm::MockGenerator;
    use crate::memory::{Category, DecayModel, Importance, PersonaSection, StoreTuning};
    use crate::pipeline::tool_decider::ToolDeciderStage;

    fn fixtures() -> (Arc<ShortTermStore>, Arc<PersonaNotes>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (
            Arc::new(ShortTermStore::new(DecayModel::default(), StoreTuning::default())),
            Arc::new(PersonaNotes::new(dir.path())),
            dir,
        )
    }

    #[tokio::test]
    async fn test_tool_plan_effects_are_executed() {
        let (st, persona, _dir) = fixtures();
        let existing = st.add("existing fact", Category::User, Importance::Normal).unwrap();

        let script = format!(
            r#"{{"commands": [
                {{"command": "remember", "content": "new fact", "category": "context", "importance": "normal"}},
                {{"command": "reinforce", "id": "{}"}},
                {{"command": "persona_note", "section": "preferences", "note": "short replies"}}
            ]}}"#,
            existing
        );
        let mock = Arc::new(MockGenerator::with_script(vec![Ok(script)]));
        let decider: Arc<dyn Stage> = Arc::new(ToolDeciderStage::new(mock, st.clone(), 256));

        let supervisor = BackgroundSupervisor::new(
            vec![decider],
            st.clone(),
            persona.clone(),
            Duration::from_secs(5),
        );
        let cancel = CancellationToken::new();
        let (handle, join) = supervisor.spawn(4, cancel.clone());

        let ctx = PipelineContext::new("remember this", "en", Vec::new(), EmotionalSnapshot::default());
        assert!(handle.submit(BackgroundJob { ctx }));

        // 等后台消化
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        join.await.unwrap();

        assert_eq!(st.len(), 2);
        assert_eq!(st.get(existing).unwrap().reinforcement_count, 1);
        assert!(persona.read(PersonaSection::Preferences).contains("short replies"));
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        // 容量 1 且无消费端：第二份任务必须被丢弃而不是阻塞
        let (tx, _rx) = mpsc::channel::<BackgroundJob>(1);
        let handle = BackgroundHandle { tx };

        let ctx1 = PipelineContext::new("a", "en", Vec::new(), EmotionalSnapshot::default());
        let ctx2 = PipelineContext::new("b", "en", Vec::new(), EmotionalSnapshot::default());
        assert!(handle.submit(BackgroundJob { ctx: ctx1 }));
        assert!(!handle.submit(BackgroundJob { ctx: ctx2 }));
    }
}
