//! 记忆层：遗忘曲线、短期（衰减存储）、长期（相似检索）、睡眠整固、持久化、对话与人格笔记

pub mod consolidation;
pub mod conversation;
pub mod decay;
pub mod long_term;
pub mod persistence;
pub mod persona;
pub mod short_term;

pub use consolidation::{ConsolidationRecord, ConsolidationTriggers, ConsolidationWorker};
pub use conversation::{ConversationMemory, Message, Role};
pub use decay::DecayModel;
pub use long_term::{InMemoryLongTerm, LongTermStore, NoopLongTerm};
pub use persistence::MemoryPersistence;
pub use persona::{PersonaNotes, PersonaSection};
pub use short_term::{Category, Importance, MemoryEntry, ShortTermStore, StoreTuning, SweepPlan};
