//! 人格笔记：身份 / 用户画像 / 偏好 三个追加型分区
//!
//! 由后台 Archivist 阶段写入，Markdown 文件一区一个，位于数据目录下。
//! 写失败只告警，绝不影响请求路径。

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// 笔记分区
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersonaSection {
    /// 自我认知（原 soul）
    Identity,
    /// 用户画像
    User,
    /// 偏好
    Preferences,
}

impl PersonaSection {
    fn file_name(self) -> &'static str {
        match self {
            PersonaSection::Identity => "identity.md",
            PersonaSection::User => "user.md",
            PersonaSection::Preferences => "preferences.md",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "identity" | "soul" => Some(PersonaSection::Identity),
            "user" => Some(PersonaSection::User),
            "preferences" | "preference" => Some(PersonaSection::Preferences),
            _ => None,
        }
    }
}

/// 人格笔记存储；append 串行化，read 原样返回整区内容
pub struct PersonaNotes {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl PersonaNotes {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().join("persona"),
            write_lock: Mutex::new(()),
        }
    }

    pub fn append(&self, section: PersonaSection, note: &str) -> anyhow::Result<()> {
        let note = note.trim();
        if note.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().unwrap();
        std::fs::create_dir_all(&self.root)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join(section.file_name()))?;
        writeln!(file, "- {}", note)?;
        Ok(())
    }

    pub fn read(&self, section: PersonaSection) -> String {
        std::fs::read_to_string(self.root.join(section.file_name())).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let notes = PersonaNotes::new(dir.path());
        notes.append(PersonaSection::User, "prefers short answers").unwrap();
        notes.append(PersonaSection::User, "works night shifts").unwrap();

        let content = notes.read(PersonaSection::User);
        assert!(content.contains("- prefers short answers"));
        assert!(content.contains("- works night shifts"));
        assert!(notes.read(PersonaSection::Identity).is_empty());
    }

    #[test]
    fn test_blank_note_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let notes = PersonaNotes::new(dir.path());
        notes.append(PersonaSection::Preferences, "   ").unwrap();
        assert!(notes.read(PersonaSection::Preferences).is_empty());
    }

    #[test]
    fn test_section_parse_accepts_legacy_soul() {
        assert_eq!(PersonaSection::parse("soul"), Some(PersonaSection::Identity));
        assert_eq!(PersonaSection::parse("USER"), Some(PersonaSection::User));
        assert_eq!(PersonaSection::parse("unknown"), None);
    }
}
