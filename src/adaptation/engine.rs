//! 自适应引擎：评估是否切换、生成切换记录、执行状态转交
//!
//! 失败预防规则由学习系统整体替换（set_rules），评估时读取当前快照。

use std::sync::{Arc, RwLock};

use crate::adaptation::{
    AdaptationAssessment, ExecutionState, ExpectedImpact, IssueCategory, PatternAdaptation,
    RiskLevel, TransitionResult, Urgency,
};
use crate::config::AdaptationSection;
use crate::core::{Clock, HiveError};
use crate::learning::FailurePrevention;
use crate::monitor::CheckpointMetric;
use crate::patterns::{PatternProfile, PatternRegistry};

pub struct AdaptationEngine {
    config: AdaptationSection,
    registry: Arc<PatternRegistry>,
    rules: RwLock<Arc<Vec<FailurePrevention>>>,
    clock: Arc<dyn Clock>,
}

impl AdaptationEngine {
    pub fn new(config: AdaptationSection, registry: Arc<PatternRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            registry,
            rules: RwLock::new(Arc::new(Vec::new())),
            clock,
        }
    }

    pub fn config(&self) -> &AdaptationSection {
        &self.config
    }

    pub fn set_rules(&self, rules: Vec<FailurePrevention>) {
        *self.rules.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(rules);
    }

    pub fn rules(&self) -> Arc<Vec<FailurePrevention>> {
        self.rules.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// 汇总检查点越界与外部反馈，给出紧急度与建议模式
    pub fn assess_adaptation_need(
        &self,
        metric: Option<&CheckpointMetric>,
        state: &ExecutionState,
        feedback: &[IssueCategory],
    ) -> AdaptationAssessment {
        let mut categories: Vec<IssueCategory> = Vec::new();
        let mut severity: f64 = 0.0;
        let mut reasons: Vec<String> = Vec::new();

        if let Some(metric) = metric {
            for breach in &metric.breaches {
                let category = IssueCategory::from_breach(breach.metric);
                if !categories.contains(&category) {
                    categories.push(category);
                }
                severity = severity.max(breach.severity);
            }
            reasons.extend(metric.issues.iter().cloned());
        }
        for category in feedback {
            if !categories.contains(category) {
                categories.push(*category);
            }
            reasons.push(format!("feedback: {}", category));
        }
        if categories.is_empty() {
            return AdaptationAssessment::none();
        }

        let mut urgency = if categories.len() >= 3 || severity >= 1.5 {
            Urgency::High
        } else if categories.len() >= 2 || severity >= 1.2 {
            Urgency::Medium
        } else {
            Urgency::Low
        };

        let issues_text = reasons.join("; ").to_lowercase();
        let matched_rules: Vec<String> = self
            .rules()
            .iter()
            .filter(|rule| rule.pattern == state.current_phase)
            .filter(|rule| {
                rule.warning_signals
                    .iter()
                    .any(|signal| !signal.is_empty() && issues_text.contains(&signal.to_lowercase()))
            })
            .map(|rule| rule.failure_pattern.clone())
            .collect();
        if !matched_rules.is_empty() {
            urgency = urgency.raise();
            reasons.push(format!("matches known failure '{}'", matched_rules.join("', '")));
        }

        let suggested_pattern = self.suggest(&state.current_phase, &categories);
        let within_budget = state.adaptations < self.config.max_adaptations;
        let should_adapt = self.config.enabled && suggested_pattern.is_some() && within_budget;
        if !within_budget {
            reasons.push(format!(
                "adaptation limit {} reached",
                self.config.max_adaptations
            ));
        }

        AdaptationAssessment {
            should_adapt,
            reason: reasons.join("; "),
            urgency,
            suggested_pattern,
            categories,
            severity,
            matched_rules,
        }
    }

    /// 按问题类别对应的强项挑选其他模式；都不匹配时取权重最高的其他模式
    fn suggest(&self, current: &str, categories: &[IssueCategory]) -> Option<String> {
        let profiles = self.registry.profiles();
        let others: Vec<&Arc<PatternProfile>> =
            profiles.iter().filter(|p| p.name != current).collect();
        let best = |candidates: Vec<&Arc<PatternProfile>>| {
            candidates
                .into_iter()
                .max_by(|a, b| a.weight.total_cmp(&b.weight).then_with(|| b.name.cmp(&a.name)))
                .map(|p| p.name.clone())
        };
        for category in categories {
            let tag = category.strength_tag();
            let matching: Vec<&Arc<PatternProfile>> =
                others.iter().copied().filter(|p| p.has_strength(tag)).collect();
            if let Some(name) = best(matching) {
                return Some(name);
            }
        }
        best(others)
    }

    /// 为当前模式生成切换记录（尚未执行，success=false）
    pub fn generate_adaptation(
        &self,
        current_pattern: &str,
        reason: &str,
        categories: &[IssueCategory],
        state: &ExecutionState,
    ) -> Result<PatternAdaptation, HiveError> {
        let current = self.registry.get(current_pattern).ok_or_else(|| {
            HiveError::NotAvailable(format!("pattern '{}' is not registered", current_pattern))
        })?;
        let target_name = self.suggest(current_pattern, categories).ok_or_else(|| {
            HiveError::NotAvailable(format!("no alternative to '{}' registered", current_pattern))
        })?;
        let target = self.registry.get(&target_name).ok_or_else(|| {
            HiveError::System(format!("pattern '{}' vanished from registry", target_name))
        })?;

        let from = &current.profile.baseline;
        let to = &target.profile.baseline;
        let performance_delta = if from.avg_duration_secs > 0.0 {
            (from.avg_duration_secs - to.avg_duration_secs) / from.avg_duration_secs
        } else {
            0.0
        };
        let risk = if state.overall_progress > 0.7 {
            RiskLevel::High
        } else if state.overall_progress > 0.4 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        Ok(PatternAdaptation {
            timestamp: self.clock.now(),
            reason: reason.to_string(),
            from_pattern: current_pattern.to_string(),
            to_pattern: target_name,
            success: false,
            expected_impact: ExpectedImpact {
                performance_delta,
                quality_delta: to.quality - from.quality,
                risk,
            },
        })
    }

    /// 执行状态转交；失败时不修改传入的 state
    pub fn transition(
        &self,
        from: &str,
        to: &str,
        state: &ExecutionState,
    ) -> Result<TransitionResult, HiveError> {
        if state.current_phase != from {
            return Err(HiveError::Validation(format!(
                "transition from '{}' but current pattern is '{}'",
                from, state.current_phase
            )));
        }
        if from == to {
            return Err(HiveError::Validation(format!(
                "transition target '{}' equals current pattern",
                to
            )));
        }
        let target = self.registry.get(to).ok_or_else(|| {
            HiveError::NotAvailable(format!("pattern '{}' is not registered", to))
        })?;
        if state.adaptations >= self.config.max_adaptations {
            return Err(HiveError::Validation(format!(
                "adaptation limit {} reached",
                self.config.max_adaptations
            )));
        }

        let mut new_state = state.clone();
        let mut dropped_fields = Vec::new();
        if let Some(keys) = &target.profile.state_keys {
            new_state.data.retain(|k, _| {
                let keep = keys.iter().any(|allowed| allowed == k);
                if !keep {
                    dropped_fields.push(k.clone());
                }
                keep
            });
        }
        dropped_fields.sort();
        new_state.current_phase = to.to_string();
        new_state.phase_progress = 0.0;
        new_state.overall_progress += self.config.progress_increment;
        new_state.adaptations += 1;

        let transfer_bytes = serde_json::to_vec(&new_state.data)
            .map(|bytes| bytes.len())
            .map_err(|e| HiveError::System(format!("state serialization failed: {}", e)))?;

        tracing::info!(
            "Transition {} -> {} ({} bytes, {} dropped)",
            from,
            to,
            transfer_bytes,
            dropped_fields.len()
        );
        Ok(TransitionResult {
            success: true,
            new_state,
            transfer_bytes,
            lossy: !dropped_fields.is_empty(),
            dropped_fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ManualClock;
    use crate::learning::CostLevel;
    use crate::monitor::{BaselineBreach, BreachMetric};
    use crate::patterns::SimulatedStrategy;

    fn engine() -> AdaptationEngine {
        let registry = Arc::new(PatternRegistry::new());
        for profile in PatternProfile::builtin() {
            let strategy = Arc::new(SimulatedStrategy::new(&profile.name));
            registry.register(profile, strategy).unwrap();
        }
        AdaptationEngine::new(
            AdaptationSection::default(),
            registry,
            Arc::new(ManualClock::default()),
        )
    }

    fn metric(breaches: Vec<(BreachMetric, f64)>, issues: &[&str]) -> CheckpointMetric {
        CheckpointMetric {
            step_id: "s".into(),
            timestamp: chrono::Utc::now(),
            progress: 0.5,
            duration_secs: 10.0,
            memory_mb: 100.0,
            api_calls: 1,
            estimated_quality: 0.8,
            efficiency: 1.0,
            breaches: breaches
                .into_iter()
                .map(|(metric, severity)| BaselineBreach {
                    metric,
                    actual: 1.0,
                    expected: 1.0,
                    ratio: severity,
                    severity,
                })
                .collect(),
            issues: issues.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_no_issues_no_adaptation() {
        let e = engine();
        let a = e.assess_adaptation_need(Some(&metric(vec![], &[])), &ExecutionState::new("react"), &[]);
        assert!(!a.should_adapt);
        assert!(a.categories.is_empty());
    }

    #[test]
    fn test_memory_double_baseline_is_high_urgency() {
        let e = engine();
        let m = metric(
            vec![(BreachMetric::Memory, 2.0 / 1.3)],
            &["memory exceeds baseline by 30%"],
        );
        let a = e.assess_adaptation_need(Some(&m), &ExecutionState::new("react"), &[]);
        assert!(a.should_adapt);
        assert_eq!(a.urgency, Urgency::High);
        // ResourcePressure -> efficiency 强项
        assert_eq!(a.suggested_pattern.as_deref(), Some("plan_execute"));
    }

    #[test]
    fn test_urgency_from_category_count() {
        let e = engine();
        let state = ExecutionState::new("react");
        let m = metric(vec![(BreachMetric::Duration, 1.05)], &["duration exceeds baseline by 50%"]);
        assert_eq!(e.assess_adaptation_need(Some(&m), &state, &[]).urgency, Urgency::Low);
        let a = e.assess_adaptation_need(Some(&m), &state, &[IssueCategory::QualityIssue]);
        assert_eq!(a.urgency, Urgency::Medium);
        let a = e.assess_adaptation_need(
            Some(&m),
            &state,
            &[IssueCategory::QualityIssue, IssueCategory::InsufficientPlanning],
        );
        assert_eq!(a.urgency, Urgency::High);
    }

    #[test]
    fn test_feedback_alone_triggers_assessment() {
        let e = engine();
        let a = e.assess_adaptation_need(
            None,
            &ExecutionState::new("react"),
            &[IssueCategory::ComplexityUnderestimated],
        );
        assert!(a.should_adapt);
        assert_eq!(a.suggested_pattern.as_deref(), Some("decompose"));
        assert!(a.reason.contains("complexity_underestimated"));
    }

    #[test]
    fn test_failure_rule_raises_urgency() {
        let e = engine();
        e.set_rules(vec![FailurePrevention {
            pattern: "react".into(),
            failure_pattern: "timeout".into(),
            prevention_strategy: "cap step budget".into(),
            warning_signals: vec!["duration".into()],
            effectiveness: 0.3,
            cost: CostLevel::Low,
        }]);
        let m = metric(vec![(BreachMetric::Duration, 1.05)], &["duration exceeds baseline by 50%"]);
        let a = e.assess_adaptation_need(Some(&m), &ExecutionState::new("react"), &[]);
        assert_eq!(a.urgency, Urgency::Medium);
        assert_eq!(a.matched_rules, vec!["timeout".to_string()]);

        // 其他模式不受该规则影响
        let a = e.assess_adaptation_need(Some(&m), &ExecutionState::new("decompose"), &[]);
        assert_eq!(a.urgency, Urgency::Low);
    }

    #[test]
    fn test_adaptation_budget_blocks_should_adapt() {
        let e = engine();
        let mut state = ExecutionState::new("react");
        state.adaptations = 3;
        let a = e.assess_adaptation_need(None, &state, &[IssueCategory::QualityIssue]);
        assert!(!a.should_adapt);
        assert!(a.reason.contains("limit"));
    }

    #[test]
    fn test_generate_adaptation_risk_by_progress() {
        let e = engine();
        let mut state = ExecutionState::new("react");
        state.overall_progress = 0.8;
        let a = e
            .generate_adaptation("react", "slow", &[IssueCategory::InsufficientPlanning], &state)
            .unwrap();
        assert_eq!(a.from_pattern, "react");
        assert_eq!(a.to_pattern, "plan_execute");
        assert_eq!(a.expected_impact.risk, RiskLevel::High);
        assert!(!a.success);
        assert!(e.generate_adaptation("ghost", "x", &[], &state).is_err());
    }

    #[test]
    fn test_transition_updates_progress_and_drops_fields() {
        let e = engine();
        let mut state = ExecutionState::new("react");
        state.phase_progress = 0.6;
        state.overall_progress = 0.3;
        state.data.insert("findings".into(), serde_json::json!(["x"]));
        state.data.insert("scratchpad".into(), serde_json::json!("thoughts"));

        let result = e.transition("react", "plan_execute", &state).unwrap();
        assert!(result.success);
        assert_eq!(result.new_state.current_phase, "plan_execute");
        assert_eq!(result.new_state.phase_progress, 0.0);
        assert!(result.new_state.overall_progress > state.overall_progress);
        assert!(result.lossy);
        assert_eq!(result.dropped_fields, vec!["scratchpad".to_string()]);
        assert!(result.transfer_bytes > 0);
        assert_eq!(result.new_state.adaptations, 1);
        // 原状态不变
        assert_eq!(state.current_phase, "react");
    }

    #[test]
    fn test_transition_failures() {
        let e = engine();
        let state = ExecutionState::new("react");
        assert!(matches!(
            e.transition("react", "ghost", &state),
            Err(HiveError::NotAvailable(_))
        ));
        assert!(matches!(
            e.transition("plan_execute", "decompose", &state),
            Err(HiveError::Validation(_))
        ));
        let mut exhausted = state.clone();
        exhausted.adaptations = 3;
        assert!(matches!(
            e.transition("react", "decompose", &exhausted),
            Err(HiveError::Validation(_))
        ));
    }
}
