//! 睡眠进程：短期层的提升与淘汰
//!
//! 状态机 IDLE -> SWEEPING -> APPLYING -> IDLE，由原子状态字保证触发幂等：
//! 已在运行时新触发直接忽略，不排队。提升先于淘汰执行；put 失败的条目
//! 留在短期层等下次睡眠。每个完成的周期追加一条 ConsolidationRecord。

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::memory::long_term::LongTermStore;
use crate::memory::persistence::MemoryPersistence;
use crate::memory::short_term::ShortTermStore;

/// 一个完成周期的诊断记录（只追加，只读回）
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsolidationRecord {
    pub timestamp: DateTime<Utc>,
    pub entries_scanned: usize,
    pub entries_promoted: usize,
    pub entries_evicted: usize,
}

/// 触发条件
#[derive(Debug, Clone, Copy)]
pub struct ConsolidationTriggers {
    /// 距上次完成周期超过此间隔触发
    pub interval: chrono::Duration,
    /// 交互计数达到此值触发
    pub interaction_threshold: u64,
}

impl Default for ConsolidationTriggers {
    fn default() -> Self {
        Self {
            interval: chrono::Duration::hours(24),
            interaction_threshold: 100,
        }
    }
}

const STATE_IDLE: u8 = 0;
const STATE_SWEEPING: u8 = 1;
const STATE_APPLYING: u8 = 2;

/// 睡眠进程：持有两层存储与触发参数
pub struct ConsolidationWorker {
    short_term: Arc<ShortTermStore>,
    long_term: Arc<dyn LongTermStore>,
    persistence: Option<Arc<MemoryPersistence>>,
    triggers: ConsolidationTriggers,
    state: AtomicU8,
    interactions: AtomicU64,
    last_completed: std::sync::Mutex<Option<DateTime<Utc>>>,
}

impl ConsolidationWorker {
    pub fn new(
        short_term: Arc<ShortTermStore>,
        long_term: Arc<dyn LongTermStore>,
        triggers: ConsolidationTriggers,
    ) -> Self {
        Self {
            short_term,
            long_term,
            persistence: None,
            triggers,
            state: AtomicU8::new(STATE_IDLE),
            interactions: AtomicU64::new(0),
            last_completed: std::sync::Mutex::new(None),
        }
    }

    pub fn with_persistence(mut self, persistence: Arc<MemoryPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// 每完成一次请求调用一次；计数在周期完成时清零
    pub fn record_interaction(&self) {
        self.interactions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn interactions_since_last(&self) -> u64 {
        self.interactions.load(Ordering::Relaxed)
    }

    /// 是否满足任一触发条件（时间间隔 / 交互计数）
    pub fn should_run(&self, now: DateTime<Utc>) -> bool {
        if self.interactions.load(Ordering::Relaxed) >= self.triggers.interaction_threshold {
            return true;
        }
        let last = self.last_completed.lock().unwrap();
        match *last {
            Some(t) => now - t >= self.triggers.interval,
            // 从未睡过：只按交互计数触发，避免进程一启动就清扫
            None => false,
        }
    }

    /// 执行一个完整周期；已在 SWEEPING/APPLYING 时为幂等空操作（返回 None，不产生记录）
    pub async fn try_run(&self) -> Option<ConsolidationRecord> {
        self.try_run_at(Utc::now()).await
    }

    pub async fn try_run_at(&self, now: DateTime<Utc>) -> Option<ConsolidationRecord> {
        if self
            .state
            .compare_exchange(STATE_IDLE, STATE_SWEEPING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Consolidation trigger ignored: cycle already in progress");
            return None;
        }

        let scanned = self.short_term.len();
        let plan = self.short_term.sweep_at(now);

        self.state.store(STATE_APPLYING, Ordering::Release);

        // 先尝试全部提升，成功者才从短期层删除；淘汰放到提升之后，
        // 中途被打断也不会丢失尚未归档的数据
        let mut promoted = 0usize;
        for entry in &plan.promote {
            match self.long_term.put(entry).await {
                Ok(()) => {
                    self.short_term.delete(entry.id);
                    promoted += 1;
                }
                Err(e) => {
                    tracing::warn!(id = %entry.id, "Promotion deferred to next sweep: {}", e);
                }
            }
        }

        let mut evicted = 0usize;
        for id in &plan.evict {
            if self.short_term.delete(*id) {
                evicted += 1;
            }
        }

        let record = ConsolidationRecord {
            timestamp: now,
            entries_scanned: scanned,
            entries_promoted: promoted,
            entries_evicted: evicted,
        };

        if let Some(p) = &self.persistence {
            if let Err(e) = p.append_consolidation(&record) {
                tracing::warn!("Consolidation record append failed: {}", e);
            }
        }

        *self.last_completed.lock().unwrap() = Some(now);
        self.interactions.store(0, Ordering::Relaxed);
        self.state.store(STATE_IDLE, Ordering::Release);

        tracing::info!(
            scanned = record.entries_scanned,
            promoted = record.entries_promoted,
            evicted = record.entries_evicted,
            "Consolidation cycle complete"
        );
        Some(record)
    }

    /// 长驻调度任务：周期性检查触发条件，直到取消
    pub fn spawn_scheduler(
        self: Arc<Self>,
        check_period: std::time::Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(check_period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if self.should_run(Utc::now()) {
                            self.try_run().await;
                        }
                    }
                    _ = cancel.cancelled() => {
                        tracing::info!("Consolidation scheduler stopped");
                        break;
                    }
                }
            }
        })
    }
}
