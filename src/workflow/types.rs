//! 工作流数据模型
//!
//! 请求、任务特征、模式选择结果、执行记录与最终结果（Outcome）。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adaptation::PatternAdaptation;

pub type ExecutionId = String;

/// 请求优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
        }
    }
}

/// 调用方给出的复杂度提示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityHint {
    #[default]
    Unknown,
    Simple,
    Moderate,
    Complex,
}

impl std::fmt::Display for ComplexityHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComplexityHint::Unknown => write!(f, "unknown"),
            ComplexityHint::Simple => write!(f, "simple"),
            ComplexityHint::Moderate => write!(f, "moderate"),
            ComplexityHint::Complex => write!(f, "complex"),
        }
    }
}

/// 工作流请求：创建后不再修改（编排器内以 Arc 共享）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRequest {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub expected_complexity: ComplexityHint,
}

impl WorkflowRequest {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: format!("req_{}", uuid::Uuid::new_v4()),
            description: description.into(),
            context: BTreeMap::new(),
            priority: Priority::Normal,
            expected_complexity: ComplexityHint::Unknown,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_complexity(mut self, hint: ComplexityHint) -> Self {
        self.expected_complexity = hint;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}

/// 任务特征向量，每一维都在 [0,1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TaskCharacteristics {
    pub complexity: f64,
    pub dynamism: f64,
    pub planning_feasibility: f64,
    pub exploration_needs: f64,
    pub resource_requirements: f64,
}

impl TaskCharacteristics {
    pub fn as_array(&self) -> [f64; 5] {
        [
            self.complexity,
            self.dynamism,
            self.planning_feasibility,
            self.exploration_needs,
            self.resource_requirements,
        ]
    }

    /// 总体方差
    pub fn variance(&self) -> f64 {
        let values = self.as_array();
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
    }
}

/// 选择时给出的预期表现
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ExpectedPerformance {
    pub duration_secs: f64,
    pub quality: f64,
    pub resource_utilization: f64,
}

/// 模式选择结果（每个请求一次，之后不变）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternSelection {
    pub selected_pattern: String,
    /// 被选模式的综合得分
    pub score: f64,
    pub confidence: f64,
    pub reasoning: String,
    /// 其余模式，按得分降序
    pub alternatives: Vec<(String, f64)>,
    pub expected: ExpectedPerformance,
    pub characteristics: TaskCharacteristics,
}

/// 执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Adapting,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

/// 学习用的执行指标汇总
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WorkflowMetrics {
    pub total_execution_secs: f64,
    pub average_memory_mb: f64,
    pub total_api_calls: u64,
    pub average_quality: f64,
    pub efficiency_score: f64,
    pub adaptation_count: u32,
    pub checkpoint_timestamps: Vec<DateTime<Utc>>,
}

/// 质量评估；成功的结果一定带 output_quality
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct QualityAssessment {
    pub completeness: f64,
    pub accuracy: f64,
    pub output_quality: Option<f64>,
}

/// 一次执行：由编排器独占，结束后归档为 WorkflowOutcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub execution_id: ExecutionId,
    pub request: WorkflowRequest,
    pub selection: PatternSelection,
    pub current_pattern: String,
    pub status: ExecutionStatus,
    pub adaptations: Vec<PatternAdaptation>,
    pub metrics: WorkflowMetrics,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// 失败原因（取消、超时、策略报错）
    pub failure_cause: Option<String>,
    pub output: Option<Value>,
}

/// 完成（成功或失败）的执行结果，学习系统的输入单元
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowOutcome {
    pub execution_id: ExecutionId,
    pub request: WorkflowRequest,
    pub pattern_used: String,
    pub success: bool,
    pub metrics: WorkflowMetrics,
    pub quality: QualityAssessment,
    pub adaptations: Vec<PatternAdaptation>,
    pub failure_reason: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl WorkflowOutcome {
    /// 从结束的执行构造结果；成功但缺少 output_quality 时用平均质量补齐
    pub fn from_execution(execution: &WorkflowExecution, success: bool, quality: QualityAssessment) -> Self {
        let mut quality = quality;
        if success && quality.output_quality.is_none() {
            quality.output_quality = Some(execution.metrics.average_quality);
        }
        Self {
            execution_id: execution.execution_id.clone(),
            request: execution.request.clone(),
            pattern_used: execution.current_pattern.clone(),
            success,
            metrics: execution.metrics.clone(),
            quality,
            adaptations: execution.adaptations.clone(),
            failure_reason: execution.failure_cause.clone(),
            completed_at: execution.completed_at.unwrap_or_else(Utc::now),
        }
    }

    /// 学习用的输出质量（失败且未评估时为 0）
    pub fn output_quality(&self) -> f64 {
        self.quality.output_quality.unwrap_or(0.0)
    }
}
