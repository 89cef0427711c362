//! 记忆持久化
//!
//! 短期条目与情绪快照为整文件 JSON（每次覆盖写），睡眠记录为 JSONL 追加日志。
//! 布局：<data_dir>/short_term.json、emotional_state.json、consolidation_log.jsonl。

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::core::MemoryError;
use crate::emotion::EmotionalSnapshot;
use crate::memory::consolidation::ConsolidationRecord;
use crate::memory::short_term::MemoryEntry;

/// 文件持久化：持有数据根目录
#[derive(Debug)]
pub struct MemoryPersistence {
    root: PathBuf,
}

impl MemoryPersistence {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn short_term_path(&self) -> PathBuf {
        self.root.join("short_term.json")
    }

    fn emotional_path(&self) -> PathBuf {
        self.root.join("emotional_state.json")
    }

    fn consolidation_log_path(&self) -> PathBuf {
        self.root.join("consolidation_log.jsonl")
    }

    fn ensure_root(&self) -> Result<(), MemoryError> {
        std::fs::create_dir_all(&self.root)
            .map_err(|e| MemoryError::StorageUnavailable(e.to_string()))
    }

    /// 从 JSON 文件加载短期条目；文件不存在时返回空 Vec
    pub fn load_short_term(&self) -> anyhow::Result<Vec<MemoryEntry>> {
        let path = self.short_term_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// 整文件覆盖写短期条目快照；介质不可用以 StorageUnavailable 上浮
    pub fn save_short_term(&self, entries: &[MemoryEntry]) -> Result<(), MemoryError> {
        self.ensure_root()?;
        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| MemoryError::StorageUnavailable(e.to_string()))?;
        std::fs::write(self.short_term_path(), json)
            .map_err(|e| MemoryError::StorageUnavailable(e.to_string()))
    }

    /// 加载情绪快照；文件不存在或损坏时返回 None（调用方落默认值）
    pub fn load_emotional(&self) -> Option<EmotionalSnapshot> {
        let data = std::fs::read_to_string(self.emotional_path()).ok()?;
        serde_json::from_str(&data).ok()
    }

    /// 每次 apply 后覆盖写情绪快照
    pub fn save_emotional(&self, snapshot: &EmotionalSnapshot) -> Result<(), MemoryError> {
        self.ensure_root()?;
        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|e| MemoryError::StorageUnavailable(e.to_string()))?;
        std::fs::write(self.emotional_path(), json)
            .map_err(|e| MemoryError::StorageUnavailable(e.to_string()))
    }

    /// 追加一条睡眠记录（JSONL，一行一条，只写不改）
    pub fn append_consolidation(&self, record: &ConsolidationRecord) -> Result<(), MemoryError> {
        self.ensure_root()?;
        let line = serde_json::to_string(record)
            .map_err(|e| MemoryError::StorageUnavailable(e.to_string()))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.consolidation_log_path())
            .map_err(|e| MemoryError::StorageUnavailable(e.to_string()))?;
        writeln!(file, "{}", line).map_err(|e| MemoryError::StorageUnavailable(e.to_string()))
    }

    /// 读回全部睡眠记录（诊断用）
    pub fn load_consolidation_log(&self) -> anyhow::Result<Vec<ConsolidationRecord>> {
        let path = self.consolidation_log_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read_to_string(&path)?;
        let mut records = Vec::new();
        for line in data.lines().filter(|l| !l.trim().is_empty()) {
            records.push(serde_json::from_str(line)?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::decay::DecayModel;
    use crate::memory::short_term::{Category, Importance, ShortTermStore, StoreTuning};
    use chrono::Utc;

    #[test]
    fn test_short_term_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = MemoryPersistence::new(dir.path());

        let store = ShortTermStore::new(DecayModel::default(), StoreTuning::default());
        let id = store.add("persist me", Category::User, Importance::High).unwrap();
        let entries = vec![store.get(id).unwrap()];

        persistence.save_short_term(&entries).unwrap();
        let loaded = persistence.load_short_term().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, id);
        assert_eq!(loaded[0].content, "persist me");
        assert_eq!(loaded[0].category, Category::User);
    }

    #[test]
    fn test_missing_files_load_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = MemoryPersistence::new(dir.path().join("nested"));
        assert!(persistence.load_short_term().unwrap().is_empty());
        assert!(persistence.load_emotional().is_none());
        assert!(persistence.load_consolidation_log().unwrap().is_empty());
    }

    #[test]
    fn test_consolidation_log_appends() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = MemoryPersistence::new(dir.path());
        for i in 0..3u64 {
            persistence
                .append_consolidation(&ConsolidationRecord {
                    timestamp: Utc::now(),
                    entries_scanned: 10 + i as usize,
                    entries_promoted: 1,
                    entries_evicted: 2,
                })
                .unwrap();
        }
        let log = persistence.load_consolidation_log().unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log[2].entries_scanned, 12);
    }

    #[test]
    fn test_unavailable_medium_reports_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        // 以普通文件充当父目录：create_dir_all 必然失败，即使以 root 运行
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();
        let persistence = MemoryPersistence::new(blocker.join("sub"));

        let err = persistence.save_short_term(&[]).unwrap_err();
        assert!(matches!(err, MemoryError::StorageUnavailable(_)));
    }
}
