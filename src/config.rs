//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `MNEMO__*` 覆盖（双下划线表示嵌套，
//! 如 `MNEMO__LLM__PROVIDER=openai`、`MNEMO__MEMORY__EVICTION_FLOOR=0.1`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub memory: MemorySection,
    #[serde(default)]
    pub consolidation: ConsolidationSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
}

/// [app] 段：应用名、数据目录、对话轮数上限、默认语言
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 持久化根目录（短期记忆快照、情绪快照、睡眠日志、人格笔记），未设置时用 ./data
    pub data_dir: Option<PathBuf>,
    /// 对话历史保留轮数
    #[serde(default = "default_max_context_turns")]
    pub max_context_turns: usize,
    /// 输入未带 locale 时的默认值
    #[serde(default = "default_locale")]
    pub locale: String,
}

fn default_max_context_turns() -> usize {
    20
}

fn default_locale() -> String {
    "en".to_string()
}

/// [llm] 段：生成服务后端与调用参数
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmSection {
    /// 后端：openai 兼容端点 / mock；无 API Key 时自动回落 mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 每个阶段单次补全的 token 上限
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// 单次请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// 阶段内唯一一次重试前的退避（毫秒）
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    768
}

fn default_request_timeout() -> u64 {
    30
}

fn default_retry_backoff_ms() -> u64 {
    500
}

/// [memory] 段：遗忘曲线与分层阈值
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    /// 基础半衰期（秒）；无强化的条目约在 3 倍半衰期后跌破淘汰下限
    pub base_half_life_secs: f64,
    /// 每次强化对有效半衰期的放大系数（间隔重复效应）
    pub reinforcement_growth: f64,
    /// 强度低于此值（开区间）时淘汰
    pub eviction_floor: f64,
    /// 强度达到此值（闭区间）时提升进长期库
    pub promotion_ceiling: f64,
    /// 强化次数达到此值时无条件提升
    pub promotion_repeat_threshold: u32,
    /// 内存长期库最大条目数
    pub long_term_max_entries: usize,
    /// Recall 阶段长期检索条数
    pub recall_top_k: usize,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            base_half_life_secs: 21_600.0,
            reinforcement_growth: 1.6,
            eviction_floor: 0.05,
            promotion_ceiling: 0.8,
            promotion_repeat_threshold: 3,
            long_term_max_entries: 2000,
            recall_top_k: 5,
        }
    }
}

/// [consolidation] 段：睡眠触发条件
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsolidationSection {
    /// 距上次睡眠超过此间隔（小时）触发
    pub interval_hours: u64,
    /// 交互计数达到此值触发
    pub interaction_threshold: u64,
    /// 调度器检查触发条件的周期（秒）
    pub check_period_secs: u64,
}

impl Default for ConsolidationSection {
    fn default() -> Self {
        Self {
            interval_hours: 24,
            interaction_threshold: 100,
            check_period_secs: 60,
        }
    }
}

/// [pipeline] 段：阶段截止时间与后台队列
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    /// 关键路径上单个阶段的截止时间（秒）
    pub stage_timeout_secs: u64,
    /// 后台阶段各自的截止时间（秒）
    pub background_timeout_secs: u64,
    /// 后台任务队列容量；满载时丢弃并告警，绝不阻塞响应路径
    pub background_queue_size: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            stage_timeout_secs: 20,
            background_timeout_secs: 30,
            background_queue_size: 32,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            llm: LlmSection::default(),
            memory: MemorySection::default(),
            consolidation: ConsolidationSection::default(),
            pipeline: PipelineSection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 MNEMO__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 MNEMO__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("MNEMO")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
