//! 请求阶段状态机
//!
//! CLASSIFYING -> PARALLEL_ANALYSIS -> SYNTHESIZING -> RESPONDED ->
//! BACKGROUND_PROCESSING -> DONE；只允许前进，单个请求内不回退、不重试已完成阶段。

use serde::Serialize;

/// 一次请求在流水线中的阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum RequestPhase {
    Classifying,
    ParallelAnalysis,
    Synthesizing,
    Responded,
    BackgroundProcessing,
    Done,
}

impl RequestPhase {
    /// 前进到下一阶段；在 Done 上保持不变
    pub fn advance(self) -> Self {
        match self {
            RequestPhase::Classifying => RequestPhase::ParallelAnalysis,
            RequestPhase::ParallelAnalysis => RequestPhase::Synthesizing,
            RequestPhase::Synthesizing => RequestPhase::Responded,
            RequestPhase::Responded => RequestPhase::BackgroundProcessing,
            RequestPhase::BackgroundProcessing => RequestPhase::Done,
            RequestPhase::Done => RequestPhase::Done,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == RequestPhase::Done
    }
}

impl std::fmt::Display for RequestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RequestPhase::Classifying => "classifying",
            RequestPhase::ParallelAnalysis => "parallel_analysis",
            RequestPhase::Synthesizing => "synthesizing",
            RequestPhase::Responded => "responded",
            RequestPhase::BackgroundProcessing => "background_processing",
            RequestPhase::Done => "done",
        };
        f.write_str(s)
    }
}
