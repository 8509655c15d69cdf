//! 学习产出的数据结构

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightType {
    ParameterTuning,
    PatternPreference,
    ResourceAllocation,
    FlowOptimization,
}

/// 从成功执行中提炼的优化洞察
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationInsight {
    pub insight_type: InsightType,
    pub success_factors: Vec<String>,
    /// 如 pattern=react、complexity=high、priority=normal
    pub applicability_conditions: Vec<String>,
    pub expected_improvement: f64,
    pub confidence: f64,
    pub implementation_steps: Vec<String>,
    pub sample_size: usize,
}

/// 某一上下文内各模式的表现排名
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextualPattern {
    /// 复杂度分档:优先级:rich|simple
    pub context_signature: String,
    pub applicable_patterns: Vec<String>,
    /// 按 质量/耗时 降序
    pub performance_ranking: Vec<String>,
    pub significance: f64,
    pub sample_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostLevel {
    Low,
    Medium,
    High,
}

/// 失败预防规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailurePrevention {
    pub pattern: String,
    /// 共同的失败特征
    pub failure_pattern: String,
    pub prevention_strategy: String,
    /// 在检查点问题描述中出现即视为预警
    pub warning_signals: Vec<String>,
    pub effectiveness: f64,
    pub cost: CostLevel,
}

/// 一轮学习的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningInsights {
    pub optimization_insights: Vec<OptimizationInsight>,
    pub contextual_patterns: Vec<ContextualPattern>,
    pub failure_preventions: Vec<FailurePrevention>,
    pub confidence: f64,
    /// 本批覆盖的模式 / 复杂度，如 pattern:react、complexity:high
    pub applicability_scope: Vec<String>,
    pub sample_size: usize,
    pub generated_at: DateTime<Utc>,
}

impl LearningInsights {
    pub fn empty(generated_at: DateTime<Utc>) -> Self {
        Self {
            optimization_insights: Vec::new(),
            contextual_patterns: Vec::new(),
            failure_preventions: Vec::new(),
            confidence: 0.0,
            applicability_scope: Vec::new(),
            sample_size: 0,
            generated_at,
        }
    }

    pub fn insight_count(&self) -> usize {
        self.optimization_insights.len() + self.contextual_patterns.len() + self.failure_preventions.len()
    }
}
