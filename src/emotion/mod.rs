//! 情绪状态：6 维有界向量，单写者
//!
//! 阶段只提议带理由的增量，绝不直写；一次请求的全部增量在 apply_queued 中
//! 一次性落账（同维先求和再钳位，与顺序无关），跨请求的落账由互斥段串行，
//! 互斥只包住 apply + 快照持久化，不包住整个请求。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::memory::persistence::MemoryPersistence;

/// 固定的 6 个情绪维度
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Happiness,
    Trust,
    Energy,
    Curiosity,
    Frustration,
    Motivation,
}

/// 全部维度，定序（快照数组与此同序）
pub const DIMENSIONS: [Dimension; 6] = [
    Dimension::Happiness,
    Dimension::Trust,
    Dimension::Energy,
    Dimension::Curiosity,
    Dimension::Frustration,
    Dimension::Motivation,
];

impl Dimension {
    fn index(self) -> usize {
        match self {
            Dimension::Happiness => 0,
            Dimension::Trust => 1,
            Dimension::Energy => 2,
            Dimension::Curiosity => 3,
            Dimension::Frustration => 4,
            Dimension::Motivation => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Dimension::Happiness => "happiness",
            Dimension::Trust => "trust",
            Dimension::Energy => "energy",
            Dimension::Curiosity => "curiosity",
            Dimension::Frustration => "frustration",
            Dimension::Motivation => "motivation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "happiness" => Some(Dimension::Happiness),
            "trust" => Some(Dimension::Trust),
            "energy" => Some(Dimension::Energy),
            "curiosity" => Some(Dimension::Curiosity),
            "frustration" => Some(Dimension::Frustration),
            "motivation" => Some(Dimension::Motivation),
            _ => None,
        }
    }
}

/// 情绪快照：每维 [-1, 1]，所有维度恒在
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmotionalSnapshot {
    values: [f64; 6],
}

impl Default for EmotionalSnapshot {
    fn default() -> Self {
        Self { values: [0.0; 6] }
    }
}

impl EmotionalSnapshot {
    pub fn get(&self, dim: Dimension) -> f64 {
        self.values[dim.index()]
    }

    /// 按固定维度顺序返回 (名称, 值)，供 prompt 与诊断输出
    pub fn as_pairs(&self) -> Vec<(&'static str, f64)> {
        DIMENSIONS.iter().map(|d| (d.as_str(), self.get(*d))).collect()
    }

    #[cfg(test)]
    pub fn with_value(mut self, dim: Dimension, value: f64) -> Self {
        self.values[dim.index()] = value.clamp(-1.0, 1.0);
        self
    }
}

/// 一条情绪增量提议；reason 仅用于观测，绝不参与控制流
#[derive(Clone, Debug)]
pub struct EmotionDelta {
    pub dimension: Dimension,
    pub delta: f64,
    pub reason: String,
}

impl EmotionDelta {
    pub fn new(dimension: Dimension, delta: f64, reason: impl Into<String>) -> Self {
        Self {
            dimension,
            delta,
            reason: reason.into(),
        }
    }
}

/// 情绪状态的唯一持有者；所有变更经 apply_queued 串行落账
pub struct EmotionHandle {
    inner: tokio::sync::Mutex<EmotionalSnapshot>,
    persistence: Option<Arc<MemoryPersistence>>,
}

impl EmotionHandle {
    pub fn new(initial: EmotionalSnapshot) -> Self {
        Self {
            inner: tokio::sync::Mutex::new(initial),
            persistence: None,
        }
    }

    /// 绑定持久化并加载上次快照（无快照时保持 initial）
    pub fn with_persistence(mut self, persistence: Arc<MemoryPersistence>) -> Self {
        if let Some(snapshot) = persistence.load_emotional() {
            self.inner = tokio::sync::Mutex::new(snapshot);
        }
        self.persistence = Some(persistence);
        self
    }

    /// 当前快照（下一请求可见的即是上一请求 apply 后的值）
    pub async fn snapshot(&self) -> EmotionalSnapshot {
        self.inner.lock().await.clone()
    }

    /// 原子落账：同维增量求和、加到当前值、钳到 [-1,1]；返回新快照。
    /// 互斥段只覆盖本函数体（单写者不变式）。
    pub async fn apply_queued(&self, deltas: &[EmotionDelta]) -> EmotionalSnapshot {
        let mut sums = [0.0f64; 6];
        for d in deltas {
            tracing::debug!(dimension = d.dimension.as_str(), delta = d.delta, reason = %d.reason, "Emotion delta");
            sums[d.dimension.index()] += d.delta;
        }

        let mut state = self.inner.lock().await;
        for (i, sum) in sums.iter().enumerate() {
            if *sum != 0.0 {
                state.values[i] = (state.values[i] + sum).clamp(-1.0, 1.0);
            }
        }
        let snapshot = state.clone();
        if let Some(p) = &self.persistence {
            if let Err(e) = p.save_emotional(&snapshot) {
                tracing::warn!("Emotional snapshot save failed: {}", e);
            }
        }
        snapshot
    }
}

impl Default for EmotionHandle {
    fn default() -> Self {
        Self::new(EmotionalSnapshot::default())
    }
}
