//! 模式档案：适用条件、强弱项、性能基线、任务匹配权重
//!
//! 启动时注册，之后只读；唯一的写入来自学习系统的权重调整（见 PatternRegistry::apply_weights）。

use serde::{Deserialize, Serialize};

use crate::workflow::TaskCharacteristics;

/// 模式家族：任务分析器按家族给出建议
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternFamily {
    /// 迭代式 reason-act
    Reactive,
    /// 先规划后执行
    PlanAhead,
    /// 拆分子任务
    Decomposition,
    Custom,
}

/// 任务匹配权重：五个特征及其反向值的线性组合
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct FitWeights {
    #[serde(default)]
    pub complexity: f64,
    #[serde(default)]
    pub dynamism: f64,
    #[serde(default)]
    pub planning_feasibility: f64,
    #[serde(default)]
    pub exploration_needs: f64,
    #[serde(default)]
    pub resource_requirements: f64,
    #[serde(default)]
    pub inverse_dynamism: f64,
    #[serde(default)]
    pub inverse_planning: f64,
    #[serde(default)]
    pub inverse_exploration: f64,
}

impl FitWeights {
    pub fn task_fit(&self, c: &TaskCharacteristics) -> f64 {
        self.complexity * c.complexity
            + self.dynamism * c.dynamism
            + self.planning_feasibility * c.planning_feasibility
            + self.exploration_needs * c.exploration_needs
            + self.resource_requirements * c.resource_requirements
            + self.inverse_dynamism * (1.0 - c.dynamism)
            + self.inverse_planning * (1.0 - c.planning_feasibility)
            + self.inverse_exploration * (1.0 - c.exploration_needs)
    }
}

/// 静态性能基线（无历史数据时的兜底）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceProfile {
    pub avg_duration_secs: f64,
    pub memory_mb: f64,
    pub api_calls: f64,
    pub quality: f64,
    pub scalability: f64,
    pub adaptability: f64,
}

/// 模式档案
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternProfile {
    pub name: String,
    pub family: PatternFamily,
    /// 适用条件标签
    pub applicability: Vec<String>,
    /// 强项标签（切换时按问题类别匹配，如 speed / efficiency / quality / planning / decomposition）
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub baseline: PerformanceProfile,
    pub fit: FitWeights,
    /// 能解读的状态字段；None 表示全部接受
    pub state_keys: Option<Vec<String>>,
    /// 学习得到的历史权重，默认 1.0
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

impl PatternProfile {
    pub fn task_fit(&self, c: &TaskCharacteristics) -> f64 {
        self.fit.task_fit(c)
    }

    pub fn has_strength(&self, tag: &str) -> bool {
        self.strengths.iter().any(|s| s.eq_ignore_ascii_case(tag))
    }

    /// reason-act：exploration 0.4、dynamism 0.3、(1-planning) 0.2、complexity 0.1
    pub fn react() -> Self {
        Self {
            name: "react".to_string(),
            family: PatternFamily::Reactive,
            applicability: vec!["exploratory".into(), "dynamic".into(), "open_ended".into()],
            strengths: vec!["exploration".into(), "adaptability".into(), "speed".into()],
            weaknesses: vec!["long_horizon".into(), "token_cost".into()],
            baseline: PerformanceProfile {
                avg_duration_secs: 30.0,
                memory_mb: 256.0,
                api_calls: 12.0,
                quality: 0.8,
                scalability: 0.6,
                adaptability: 0.9,
            },
            fit: FitWeights {
                exploration_needs: 0.4,
                dynamism: 0.3,
                inverse_planning: 0.2,
                complexity: 0.1,
                ..Default::default()
            },
            state_keys: None,
            weight: 1.0,
        }
    }

    /// 先规划后执行：planning 0.6、complexity 0.3、(1-dynamism) 0.1
    pub fn plan_execute() -> Self {
        Self {
            name: "plan_execute".to_string(),
            family: PatternFamily::PlanAhead,
            applicability: vec!["structured".into(), "predictable".into()],
            strengths: vec!["planning".into(), "efficiency".into(), "quality".into()],
            weaknesses: vec!["dynamic_environments".into()],
            baseline: PerformanceProfile {
                avg_duration_secs: 45.0,
                memory_mb: 192.0,
                api_calls: 8.0,
                quality: 0.85,
                scalability: 0.7,
                adaptability: 0.4,
            },
            fit: FitWeights {
                planning_feasibility: 0.6,
                complexity: 0.3,
                inverse_dynamism: 0.1,
                ..Default::default()
            },
            state_keys: Some(vec![
                "plan".into(),
                "completed_steps".into(),
                "findings".into(),
                "artifacts".into(),
            ]),
            weight: 1.0,
        }
    }

    /// 拆分子任务：complexity 0.5、planning 0.3、(1-exploration) 0.2
    pub fn decompose() -> Self {
        Self {
            name: "decompose".to_string(),
            family: PatternFamily::Decomposition,
            applicability: vec!["large".into(), "multi_part".into()],
            strengths: vec!["decomposition".into(), "scalability".into(), "quality".into()],
            weaknesses: vec!["coordination_overhead".into()],
            baseline: PerformanceProfile {
                avg_duration_secs: 60.0,
                memory_mb: 384.0,
                api_calls: 20.0,
                quality: 0.85,
                scalability: 0.9,
                adaptability: 0.6,
            },
            fit: FitWeights {
                complexity: 0.5,
                planning_feasibility: 0.3,
                inverse_exploration: 0.2,
                ..Default::default()
            },
            state_keys: Some(vec![
                "subtasks".into(),
                "completed_steps".into(),
                "findings".into(),
                "artifacts".into(),
            ]),
            weight: 1.0,
        }
    }

    /// 内置三种模式
    pub fn builtin() -> Vec<PatternProfile> {
        vec![Self::react(), Self::plan_execute(), Self::decompose()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(c: f64, d: f64, p: f64, e: f64, r: f64) -> TaskCharacteristics {
        TaskCharacteristics {
            complexity: c,
            dynamism: d,
            planning_feasibility: p,
            exploration_needs: e,
            resource_requirements: r,
        }
    }

    #[test]
    fn test_react_fit_uses_documented_weights() {
        let fit = PatternProfile::react().task_fit(&chars(1.0, 1.0, 0.0, 1.0, 1.0));
        assert!((fit - 1.0).abs() < 1e-9);
        let fit = PatternProfile::react().task_fit(&chars(0.0, 0.0, 1.0, 0.0, 0.0));
        assert!(fit.abs() < 1e-9);
    }

    #[test]
    fn test_builtin_fits_stay_in_unit_range() {
        for profile in PatternProfile::builtin() {
            for c in [chars(0.0, 0.0, 0.0, 0.0, 0.0), chars(1.0, 1.0, 1.0, 1.0, 1.0)] {
                let fit = profile.task_fit(&c);
                assert!((0.0..=1.0).contains(&fit), "{} fit {}", profile.name, fit);
            }
        }
    }

    #[test]
    fn test_strength_lookup_is_case_insensitive() {
        assert!(PatternProfile::plan_execute().has_strength("Planning"));
        assert!(!PatternProfile::react().has_strength("planning"));
    }
}
