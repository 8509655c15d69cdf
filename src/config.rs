//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__LEARNING__SCHEDULE=daily`）。
//! 所有阈值（1.5× 基线、30% 失败率、100 条采样环形缓冲、1000 条历史上限等）都是策略旋钮，默认值即参考值。

use std::path::PathBuf;

use serde::Deserialize;

use crate::learning::ScheduleType;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub selection: SelectionSection,
    pub monitor: MonitorSection,
    pub adaptation: AdaptationSection,
    pub learning: LearningSection,
    pub orchestrator: OrchestratorSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 是否输出 JSON 格式日志
    #[serde(default)]
    pub json_logs: bool,
}

/// [selection] 段：打分权重与协作方超时
#[derive(Debug, Clone, Deserialize)]
pub struct SelectionSection {
    #[serde(default = "default_task_fit_weight")]
    pub task_fit_weight: f64,
    #[serde(default = "default_knowledge_weight")]
    pub knowledge_weight: f64,
    #[serde(default = "default_history_weight")]
    pub history_weight: f64,
    /// 单次知识图谱 / 历史库调用超时（毫秒）
    #[serde(default = "default_collaborator_timeout_ms")]
    pub collaborator_timeout_ms: u64,
    /// 特征值达到该阈值时写入选择理由（"elevated ..."）
    #[serde(default = "default_elevated_threshold")]
    pub elevated_threshold: f64,
}

fn default_task_fit_weight() -> f64 {
    0.4
}

fn default_knowledge_weight() -> f64 {
    0.3
}

fn default_history_weight() -> f64 {
    0.3
}

fn default_collaborator_timeout_ms() -> u64 {
    2000
}

fn default_elevated_threshold() -> f64 {
    0.5
}

impl Default for SelectionSection {
    fn default() -> Self {
        Self {
            task_fit_weight: default_task_fit_weight(),
            knowledge_weight: default_knowledge_weight(),
            history_weight: default_history_weight(),
            collaborator_timeout_ms: default_collaborator_timeout_ms(),
            elevated_threshold: default_elevated_threshold(),
        }
    }
}

/// [monitor] 段：采样周期、缓冲上限、基线容差
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSection {
    #[serde(default = "default_sample_interval_secs")]
    pub sample_interval_secs: u64,
    #[serde(default = "default_max_resource_samples")]
    pub max_resource_samples: usize,
    #[serde(default = "default_max_trend_points")]
    pub max_trend_points: usize,
    /// 耗时超过基线的倍数即报问题
    #[serde(default = "default_duration_tolerance")]
    pub duration_tolerance: f64,
    #[serde(default = "default_memory_tolerance")]
    pub memory_tolerance: f64,
    /// 质量低于期望的比例即报问题
    #[serde(default = "default_quality_tolerance")]
    pub quality_tolerance: f64,
    /// 计算历史基线时回看的天数
    #[serde(default = "default_baseline_window_days")]
    pub baseline_window_days: u32,
}

fn default_sample_interval_secs() -> u64 {
    5
}

fn default_max_resource_samples() -> usize {
    100
}

fn default_max_trend_points() -> usize {
    50
}

fn default_duration_tolerance() -> f64 {
    1.5
}

fn default_memory_tolerance() -> f64 {
    1.3
}

fn default_quality_tolerance() -> f64 {
    0.8
}

fn default_baseline_window_days() -> u32 {
    30
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            sample_interval_secs: default_sample_interval_secs(),
            max_resource_samples: default_max_resource_samples(),
            max_trend_points: default_max_trend_points(),
            duration_tolerance: default_duration_tolerance(),
            memory_tolerance: default_memory_tolerance(),
            quality_tolerance: default_quality_tolerance(),
            baseline_window_days: default_baseline_window_days(),
        }
    }
}

/// [adaptation] 段：中途切换
#[derive(Debug, Clone, Deserialize)]
pub struct AdaptationSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 单次执行最多切换次数（防止来回切换）
    #[serde(default = "default_max_adaptations")]
    pub max_adaptations: u32,
    /// 切换时对已完成工作的进度补偿
    #[serde(default = "default_progress_increment")]
    pub progress_increment: f64,
    /// 主动检查周期（秒），0 表示关闭
    #[serde(default = "default_proactive_check_secs")]
    pub proactive_check_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_adaptations() -> u32 {
    3
}

fn default_progress_increment() -> f64 {
    0.1
}

fn default_proactive_check_secs() -> u64 {
    30
}

impl Default for AdaptationSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_adaptations: default_max_adaptations(),
            progress_increment: default_progress_increment(),
            proactive_check_secs: default_proactive_check_secs(),
        }
    }
}

/// [learning] 段：批量学习与调度
#[derive(Debug, Clone, Deserialize)]
pub struct LearningSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// 定时学习时，未学习的结果少于该值则跳过本轮
    #[serde(default = "default_min_batch_size")]
    pub min_batch_size: usize,
    /// 上下文分组的最小样本数
    #[serde(default = "default_min_context_samples")]
    pub min_context_samples: usize,
    /// 显著性达到 1.0 所需样本数
    #[serde(default = "default_significance_reference")]
    pub significance_reference: usize,
    /// 失败频率超过该值才生成失败预防规则
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: f64,
    #[serde(default)]
    pub schedule: ScheduleType,
    /// schedule = interval 时的周期（秒）
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// 学习失败后的冷却时间（秒）
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// 洞察 Markdown 输出目录，未设置时不落盘
    pub insights_dir: Option<PathBuf>,
}

fn default_batch_size() -> usize {
    30
}

fn default_min_batch_size() -> usize {
    5
}

fn default_min_context_samples() -> usize {
    3
}

fn default_significance_reference() -> usize {
    10
}

fn default_failure_threshold() -> f64 {
    0.3
}

fn default_interval_secs() -> u64 {
    3600
}

fn default_cooldown_secs() -> u64 {
    300
}

impl Default for LearningSection {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: default_batch_size(),
            min_batch_size: default_min_batch_size(),
            min_context_samples: default_min_context_samples(),
            significance_reference: default_significance_reference(),
            failure_threshold: default_failure_threshold(),
            schedule: ScheduleType::default(),
            interval_secs: default_interval_secs(),
            cooldown_secs: default_cooldown_secs(),
            insights_dir: None,
        }
    }
}

/// [orchestrator] 段：并发、超时、历史
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSection {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// 单次执行墙钟超时（秒）
    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,
    /// 历史上限，溢出时丢弃最旧的一半
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,
    /// 历史 JSON 文件，未设置时仅保存在内存
    pub history_path: Option<PathBuf>,
}

fn default_max_concurrent() -> usize {
    8
}

fn default_execution_timeout_secs() -> u64 {
    600
}

fn default_history_cap() -> usize {
    1000
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            execution_timeout_secs: default_execution_timeout_secs(),
            history_cap: default_history_cap(),
            history_path: None,
        }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
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
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_reference_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.selection.task_fit_weight, 0.4);
        assert_eq!(cfg.monitor.sample_interval_secs, 5);
        assert_eq!(cfg.monitor.max_resource_samples, 100);
        assert_eq!(cfg.monitor.duration_tolerance, 1.5);
        assert_eq!(cfg.learning.failure_threshold, 0.3);
        assert_eq!(cfg.orchestrator.history_cap, 1000);
        assert_eq!(cfg.learning.schedule, ScheduleType::Hourly);
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hive.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            "[monitor]\nduration_tolerance = 2.0\n\n[learning]\nschedule = \"daily\"\nbatch_size = 40\n"
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.monitor.duration_tolerance, 2.0);
        assert_eq!(cfg.monitor.memory_tolerance, 1.3);
        assert_eq!(cfg.learning.schedule, ScheduleType::Daily);
        assert_eq!(cfg.learning.batch_size, 40);
        assert!(cfg.learning.enabled);
    }
}
