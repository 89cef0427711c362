//! 短期记忆：带衰减的条目存储
//!
//! 条目按 id 存于 DashMap（条目级串行、读并发）；strength 永远由
//! (now - last_reinforced_at, reinforcement_count) 经遗忘曲线重算，
//! 只在创建时手置 1.0。sweep 只产出决策清单，不触碰长期库。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::MemoryError;
use crate::memory::decay::DecayModel;
use crate::memory::persistence::MemoryPersistence;

/// 条目类别
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    User,
    System,
    Context,
    Chat,
    Dream,
}

impl Category {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "user" => Some(Category::User),
            "system" => Some(Category::System),
            "context" => Some(Category::Context),
            "chat" => Some(Category::Chat),
            "dream" => Some(Category::Dream),
            _ => None,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Category::User => "user",
            Category::System => "system",
            Category::Context => "context",
            Category::Chat => "chat",
            Category::Dream => "dream",
        };
        f.write_str(s)
    }
}

/// 条目重要性
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Low,
    Normal,
    High,
}

impl Importance {
    /// 提升一级（High 封顶）；Affect 阶段的 memory boost 经此生效
    pub fn bump(self) -> Self {
        match self {
            Importance::Low => Importance::Normal,
            Importance::Normal | Importance::High => Importance::High,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(Importance::Low),
            "normal" | "medium" => Some(Importance::Normal),
            "high" => Some(Importance::High),
            _ => None,
        }
    }
}

/// 短期记忆条目
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: Uuid,
    pub content: String,
    pub category: Category,
    pub importance: Importance,
    pub created_at: DateTime<Utc>,
    pub last_reinforced_at: DateTime<Utc>,
    pub reinforcement_count: u32,
    pub strength: f64,
}

impl MemoryEntry {
    fn new(content: String, category: Category, importance: Importance, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content,
            category,
            importance,
            created_at: now,
            last_reinforced_at: now,
            reinforcement_count: 0,
            strength: 1.0,
        }
    }

    fn age_secs(&self, now: DateTime<Utc>) -> f64 {
        (now - self.last_reinforced_at).num_milliseconds() as f64 / 1000.0
    }
}

/// sweep 的决策清单：promote 携带条目副本（所有权经复制转移），evict 只携带 id
#[derive(Debug, Default)]
pub struct SweepPlan {
    pub promote: Vec<MemoryEntry>,
    pub evict: Vec<Uuid>,
}

/// 分层阈值
#[derive(Debug, Clone, Copy)]
pub struct StoreTuning {
    /// 低于此值（开区间）淘汰
    pub eviction_floor: f64,
    /// 达到此值（闭区间）提升
    pub promotion_ceiling: f64,
    /// 强化次数达到此值时无条件提升
    pub promotion_repeat_threshold: u32,
}

impl Default for StoreTuning {
    fn default() -> Self {
        Self {
            eviction_floor: 0.05,
            promotion_ceiling: 0.8,
            promotion_repeat_threshold: 3,
        }
    }
}

/// 短期记忆存储
pub struct ShortTermStore {
    entries: DashMap<Uuid, MemoryEntry>,
    decay: DecayModel,
    tuning: StoreTuning,
    persistence: Option<Arc<MemoryPersistence>>,
}

impl ShortTermStore {
    pub fn new(decay: DecayModel, tuning: StoreTuning) -> Self {
        Self {
            entries: DashMap::new(),
            decay,
            tuning,
            persistence: None,
        }
    }

    /// 绑定磁盘快照并加载既有条目；介质此刻不可用只告警，写入时再报 StorageUnavailable
    pub fn with_persistence(mut self, persistence: Arc<MemoryPersistence>) -> Self {
        match persistence.load_short_term() {
            Ok(loaded) => {
                for entry in loaded {
                    self.entries.insert(entry.id, entry);
                }
            }
            Err(e) => {
                tracing::warn!("Short-term snapshot load failed: {}", e);
            }
        }
        self.persistence = Some(persistence);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 新建条目，strength 1.0；返回唯一 id。介质不可用时回滚并报 StorageUnavailable
    pub fn add(
        &self,
        content: impl Into<String>,
        category: Category,
        importance: Importance,
    ) -> Result<Uuid, MemoryError> {
        self.add_at(content, category, importance, Utc::now())
    }

    pub fn add_at(
        &self,
        content: impl Into<String>,
        category: Category,
        importance: Importance,
        now: DateTime<Utc>,
    ) -> Result<Uuid, MemoryError> {
        let entry = MemoryEntry::new(content.into(), category, importance, now);
        let id = entry.id;
        self.entries.insert(id, entry);

        if let Err(e) = self.persist() {
            self.entries.remove(&id);
            return Err(e);
        }
        Ok(id)
    }

    /// 强化：重置 last_reinforced_at、递增计数；id 不存在时报 NotFound
    pub fn reinforce(&self, id: Uuid) -> Result<(), MemoryError> {
        self.reinforce_at(id, Utc::now())
    }

    pub fn reinforce_at(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), MemoryError> {
        let mut entry = self.entries.get_mut(&id).ok_or(MemoryError::NotFound(id))?;
        entry.last_reinforced_at = now;
        entry.reinforcement_count += 1;
        entry.strength = self.decay.strength(0.0, entry.reinforcement_count);
        drop(entry);

        if let Err(e) = self.persist() {
            tracing::warn!("Short-term snapshot save failed after reinforce: {}", e);
        }
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Option<MemoryEntry> {
        self.entries.get(&id).map(|e| e.value().clone())
    }

    /// 活跃条目：重算后 strength 超过阈值（默认 >0），强度降序、同强度按最近强化优先。只读
    pub fn list_active(
        &self,
        category: Option<Category>,
        min_strength: Option<f64>,
    ) -> Vec<MemoryEntry> {
        self.list_active_at(category, min_strength, Utc::now())
    }

    pub fn list_active_at(
        &self,
        category: Option<Category>,
        min_strength: Option<f64>,
        now: DateTime<Utc>,
    ) -> Vec<MemoryEntry> {
        let floor = min_strength.unwrap_or(0.0);
        let mut active: Vec<MemoryEntry> = self
            .entries
            .iter()
            .filter(|e| category.map_or(true, |c| e.category == c))
            .map(|e| {
                let mut entry = e.value().clone();
                entry.strength = self.decay.strength(entry.age_secs(now), entry.reinforcement_count);
                entry
            })
            .filter(|e| e.strength > floor)
            .collect();

        active.sort_by(|a, b| {
            b.strength
                .partial_cmp(&a.strength)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.last_reinforced_at.cmp(&a.last_reinforced_at))
        });
        active
    }

    /// 全量重算强度并产出提升/淘汰清单；一个条目绝不同时出现在两侧。
    /// 从未被强化的条目无论强度多高都留在短期层。
    pub fn sweep(&self) -> SweepPlan {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> SweepPlan {
        let mut plan = SweepPlan::default();

        for mut entry in self.entries.iter_mut() {
            entry.strength = self.decay.strength(entry.age_secs(now), entry.reinforcement_count);

            if entry.strength < self.tuning.eviction_floor {
                plan.evict.push(entry.id);
            } else if entry.reinforcement_count >= self.tuning.promotion_repeat_threshold
                || (entry.reinforcement_count > 0 && entry.strength >= self.tuning.promotion_ceiling)
            {
                plan.promote.push(entry.value().clone());
            }
        }
        plan
    }

    /// 删除条目（提升成功或淘汰后由睡眠进程调用）
    pub fn delete(&self, id: Uuid) -> bool {
        let removed = self.entries.remove(&id).is_some();
        if removed {
            if let Err(e) = self.persist() {
                tracing::warn!("Short-term snapshot save failed after delete: {}", e);
            }
        }
        removed
    }

    fn persist(&self) -> Result<(), MemoryError> {
        if let Some(p) = &self.persistence {
            let snapshot: Vec<MemoryEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
            p.save_short_term(&snapshot)?;
        }
        Ok(())
    }
}
