//! 长期记忆：相似度检索库的适配层
//!
//! put / query 视作可能缓慢且可重试的外部调用；失败必须以类型化错误上浮，
//! 由调用方决定重试、留待下次睡眠或记日志后放弃。自带关键词重叠的内存实现
//! 与禁用时的空实现，后续可接真实向量引擎。

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::core::MemoryError;
use crate::memory::short_term::MemoryEntry;

/// 长期库 trait：写入与按文本相似度检索
#[async_trait]
pub trait LongTermStore: Send + Sync {
    /// 存入一个条目（短期层提升时复制进来）
    async fn put(&self, entry: &MemoryEntry) -> Result<(), MemoryError>;

    /// 按查询检索最相关的 k 条，按相关度降序返回 (条目, 分数)
    async fn query(&self, text: &str, k: usize) -> Result<Vec<(MemoryEntry, f32)>, MemoryError>;

    /// 是否启用（Noop 实现返回 false）
    fn enabled(&self) -> bool {
        true
    }
}

/// 空实现：未启用长期记忆时使用
#[derive(Clone, Default)]
pub struct NoopLongTerm;

#[async_trait]
impl LongTermStore for NoopLongTerm {
    async fn put(&self, _entry: &MemoryEntry) -> Result<(), MemoryError> {
        Ok(())
    }

    async fn query(&self, _text: &str, _k: usize) -> Result<Vec<(MemoryEntry, f32)>, MemoryError> {
        Ok(Vec::new())
    }

    fn enabled(&self) -> bool {
        false
    }
}

/// 将文本切分为小写词集合，用于简单相似度（词重叠）
fn tokenize_lower(s: &str) -> HashSet<String> {
    s.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| w.len() > 1)
        .collect()
}

/// 内存实现：按关键词重叠打分，分数归一到 [0,1]
pub struct InMemoryLongTerm {
    /// (条目, 小写词集合)
    store: Arc<RwLock<Vec<(MemoryEntry, HashSet<String>)>>>,
    max_entries: usize,
}

impl InMemoryLongTerm {
    pub fn new(max_entries: usize) -> Self {
        Self {
            store: Arc::new(RwLock::new(Vec::new())),
            max_entries,
        }
    }

    pub fn len(&self) -> usize {
        self.store.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryLongTerm {
    fn default() -> Self {
        Self::new(2000)
    }
}

#[async_trait]
impl LongTermStore for InMemoryLongTerm {
    async fn put(&self, entry: &MemoryEntry) -> Result<(), MemoryError> {
        let content = entry.content.trim();
        if content.is_empty() {
            return Ok(());
        }
        let tokens = tokenize_lower(content);
        let mut store = self
            .store
            .write()
            .map_err(|e| MemoryError::WriteFailed(e.to_string()))?;
        store.push((entry.clone(), tokens));
        let n = store.len();
        if n > self.max_entries {
            store.drain(0..n - self.max_entries);
        }
        Ok(())
    }

    async fn query(&self, text: &str, k: usize) -> Result<Vec<(MemoryEntry, f32)>, MemoryError> {
        let query_tokens = tokenize_lower(text);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }
        let store = self
            .store
            .read()
            .map_err(|e| MemoryError::WriteFailed(e.to_string()))?;
        let mut scored: Vec<(MemoryEntry, f32)> = store
            .iter()
            .map(|(entry, doc_tokens)| {
                let overlap = query_tokens.intersection(doc_tokens).count();
                let score = overlap as f32 / query_tokens.len() as f32;
                (entry.clone(), score)
            })
            .filter(|(_, score)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}
