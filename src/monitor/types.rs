//! 监控数据结构：检查点、检查点指标、基线、资源采样、趋势

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adaptation::PatternAdaptation;

/// 策略上报的检查点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionCheckpoint {
    pub step_id: String,
    /// 0..=1
    pub progress: f64,
    /// 不透明的状态快照（切换时作为 ExecutionState.data 转交）
    pub state: Value,
    pub timestamp: DateTime<Utc>,
    /// 截至此刻的内存占用，缺省时取最近一次采样
    pub memory_mb: Option<f64>,
    /// 截至此刻累计的外部调用次数
    pub api_calls: u64,
    /// 策略自评的中间质量
    pub quality: Option<f64>,
}

impl ExecutionCheckpoint {
    pub fn new(step_id: impl Into<String>, progress: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            step_id: step_id.into(),
            progress: progress.clamp(0.0, 1.0),
            state: Value::Null,
            timestamp,
            memory_mb: None,
            api_calls: 0,
            quality: None,
        }
    }

    pub fn with_state(mut self, state: Value) -> Self {
        self.state = state;
        self
    }

    pub fn with_memory(mut self, memory_mb: f64) -> Self {
        self.memory_mb = Some(memory_mb);
        self
    }

    pub fn with_api_calls(mut self, api_calls: u64) -> Self {
        self.api_calls = api_calls;
        self
    }

    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality = Some(quality);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreachMetric {
    Duration,
    Memory,
    Quality,
}

/// 超出基线容差的一项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineBreach {
    pub metric: BreachMetric,
    pub actual: f64,
    pub expected: f64,
    /// Duration / Memory：actual / expected；Quality：expected / actual
    pub ratio: f64,
    /// 超出容差的倍数（刚好越过容差时为 1.0）
    pub severity: f64,
}

/// 单个检查点的衍生指标
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetric {
    pub step_id: String,
    pub timestamp: DateTime<Utc>,
    pub progress: f64,
    /// 自执行开始至今
    pub duration_secs: f64,
    pub memory_mb: f64,
    pub api_calls: u64,
    pub estimated_quality: f64,
    pub efficiency: f64,
    pub breaches: Vec<BaselineBreach>,
    /// 人类可读的问题描述
    pub issues: Vec<String>,
}

impl CheckpointMetric {
    pub fn breach(&self, metric: BreachMetric) -> Option<&BaselineBreach> {
        self.breaches.iter().find(|b| b.metric == metric)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineSource {
    /// 来自历史性能库
    Historical,
    /// 来自模式档案的静态基线
    Profile,
}

/// 某模式的期望性能
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceBaseline {
    pub pattern: String,
    pub duration_secs: f64,
    pub quality: f64,
    pub memory_mb: f64,
    pub api_calls: f64,
    pub source: BaselineSource,
    pub sample_count: usize,
}

/// 周期性资源采样
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub timestamp: DateTime<Utc>,
    pub memory_mb: f64,
    pub cpu_percent: f64,
    /// 距上次采样的外部调用速率（次/秒）
    pub api_call_rate: f64,
    /// 距上次刷新的网络吞吐（KB）
    pub network_kb: f64,
}

/// 趋势序列（每条有上限，超出丢最旧）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceTrend {
    pub efficiency: VecDeque<f64>,
    pub quality: VecDeque<f64>,
    /// 单位耗时完成的进度
    pub speed: VecDeque<f64>,
}

/// 监控详情
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetailedMetrics {
    pub checkpoint_metrics: Vec<CheckpointMetric>,
    pub adaptation_events: Vec<PatternAdaptation>,
    pub resource_samples: Vec<ResourceSample>,
    pub trend: PerformanceTrend,
}
