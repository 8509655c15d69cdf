//! 切换相关数据结构

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::monitor::BreachMetric;

/// 问题类别（检查点越界或外部反馈）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    PerformanceDegradation,
    ResourcePressure,
    QualityIssue,
    ComplexityUnderestimated,
    InsufficientPlanning,
}

impl IssueCategory {
    /// 能缓解该问题的模式强项标签
    pub fn strength_tag(&self) -> &'static str {
        match self {
            IssueCategory::PerformanceDegradation => "speed",
            IssueCategory::ResourcePressure => "efficiency",
            IssueCategory::QualityIssue => "quality",
            IssueCategory::ComplexityUnderestimated => "decomposition",
            IssueCategory::InsufficientPlanning => "planning",
        }
    }

    pub fn from_breach(metric: BreachMetric) -> Self {
        match metric {
            BreachMetric::Duration => IssueCategory::PerformanceDegradation,
            BreachMetric::Memory => IssueCategory::ResourcePressure,
            BreachMetric::Quality => IssueCategory::QualityIssue,
        }
    }
}

impl std::fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IssueCategory::PerformanceDegradation => "performance_degradation",
            IssueCategory::ResourcePressure => "resource_pressure",
            IssueCategory::QualityIssue => "quality_issue",
            IssueCategory::ComplexityUnderestimated => "complexity_underestimated",
            IssueCategory::InsufficientPlanning => "insufficient_planning",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    #[default]
    Low,
    Medium,
    High,
}

impl Urgency {
    /// 提升一级（High 不变）
    pub fn raise(self) -> Self {
        match self {
            Urgency::Low => Urgency::Medium,
            _ => Urgency::High,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpectedImpact {
    /// 相对耗时改善（正数表示更快）
    pub performance_delta: f64,
    pub quality_delta: f64,
    pub risk: RiskLevel,
}

/// 一次中途切换记录，追加后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternAdaptation {
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub from_pattern: String,
    pub to_pattern: String,
    pub success: bool,
    pub expected_impact: ExpectedImpact,
}

impl PatternAdaptation {
    pub fn with_outcome(mut self, success: bool) -> Self {
        self.success = success;
        self
    }
}

/// 是否需要切换的评估结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationAssessment {
    pub should_adapt: bool,
    pub reason: String,
    pub urgency: Urgency,
    pub suggested_pattern: Option<String>,
    pub categories: Vec<IssueCategory>,
    /// 最大越界倍数（无越界为 0）
    pub severity: f64,
    /// 命中的失败预防规则（failure_pattern）
    pub matched_rules: Vec<String>,
}

impl AdaptationAssessment {
    pub fn none() -> Self {
        Self {
            should_adapt: false,
            reason: String::new(),
            urgency: Urgency::Low,
            suggested_pattern: None,
            categories: Vec::new(),
            severity: 0.0,
            matched_rules: Vec::new(),
        }
    }
}

/// 跨模式转交的执行状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    /// 当前模式名
    pub current_phase: String,
    pub phase_progress: f64,
    /// 累计进度积分，每次切换加固定补偿，不封顶
    pub overall_progress: f64,
    pub adaptations: u32,
    pub data: Map<String, Value>,
}

impl ExecutionState {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            current_phase: pattern.into(),
            phase_progress: 0.0,
            overall_progress: 0.0,
            adaptations: 0,
            data: Map::new(),
        }
    }

    /// 用检查点的状态快照更新（对象字段合并，其余值放入 "snapshot"）
    pub fn absorb(&mut self, progress: f64, snapshot: &Value) {
        self.phase_progress = progress;
        match snapshot {
            Value::Object(map) => {
                for (k, v) in map {
                    self.data.insert(k.clone(), v.clone());
                }
            }
            Value::Null => {}
            other => {
                self.data.insert("snapshot".to_string(), other.clone());
            }
        }
    }
}

/// 切换结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionResult {
    pub success: bool,
    pub new_state: ExecutionState,
    /// 转交数据序列化后的字节数
    pub transfer_bytes: usize,
    pub lossy: bool,
    pub dropped_fields: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urgency_raise_saturates() {
        assert_eq!(Urgency::Low.raise(), Urgency::Medium);
        assert_eq!(Urgency::Medium.raise(), Urgency::High);
        assert_eq!(Urgency::High.raise(), Urgency::High);
        assert!(Urgency::High > Urgency::Low);
    }

    #[test]
    fn test_state_absorbs_snapshot() {
        let mut state = ExecutionState::new("react");
        state.absorb(0.4, &serde_json::json!({"findings": ["a"], "scratch": 1}));
        state.absorb(0.5, &serde_json::json!("raw"));
        assert_eq!(state.phase_progress, 0.5);
        assert_eq!(state.data.len(), 3);
        assert_eq!(state.data["snapshot"], serde_json::json!("raw"));
    }
}
