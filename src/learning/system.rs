//! 学习系统：从一批执行结果中提炼洞察，并回写到选择器权重与失败预防规则
//!
//! 流程：
//! 1. 成功结果 -> 效率 / 资源因子 -> OptimizationInsight（按类型 + 适用条件合并）
//! 2. 全部结果按上下文签名分组 -> 组内按 质量/耗时 排名 -> ContextualPattern
//! 3. 失败结果按模式分组，失败率超过阈值 -> FailurePrevention
//! 4. 汇总置信度与适用范围；洞察存储不可用时只跳过持久化

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::adaptation::AdaptationEngine;
use crate::config::LearningSection;
use crate::core::{Clock, HiveError};
use crate::knowledge::{best_effort, InsightStore};
use crate::learning::{
    ContextualPattern, CostLevel, FailurePrevention, InsightType, LearningInsights,
    OptimizationInsight,
};
use crate::patterns::{PatternProfile, PatternRegistry};
use crate::selection::TaskAnalyzer;
use crate::workflow::{ComplexityHint, WorkflowOutcome, WorkflowRequest};

/// 优先作为失败特征的词
const KNOWN_SIGNALS: &[&str] = &[
    "timeout", "timed", "deadline", "memory", "quality", "cancelled", "limit", "unavailable",
    "panic", "crash", "error",
];
/// 预期提升的保守上限
const MAX_EXPECTED_IMPROVEMENT: f64 = 0.3;
/// 置信度随样本数增长的尺度
const CONFIDENCE_SCALE: f64 = 25.0;
/// 新权重中旧值的占比
const WEIGHT_SMOOTHING: f64 = 0.7;

/// 批次置信度：样本数决定区间 [b(n), b(n+1))，b(k) = 1 - e^(-k/25)；
/// 密度只在区间内插值，因此置信度随 n 单调不减且小于 1
fn batch_confidence(n: usize, density: f64) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let base = |k: usize| 1.0 - (-(k as f64) / CONFIDENCE_SCALE).exp();
    let (low, high) = (base(n), base(n + 1));
    low + density.clamp(0.0, 1.0) * (high - low)
}

struct Factor {
    name: &'static str,
    impact: f64,
    group: InsightType,
}

#[derive(Default)]
struct InsightAccumulator {
    factors: BTreeSet<String>,
    steps: Vec<String>,
    impact_sum: f64,
    factor_count: usize,
    outcomes: usize,
}

pub struct LearningSystem {
    config: LearningSection,
    registry: Arc<PatternRegistry>,
    engine: Arc<AdaptationEngine>,
    store: Arc<dyn InsightStore>,
    analyzer: TaskAnalyzer,
    clock: Arc<dyn Clock>,
    collaborator_timeout_ms: u64,
}

impl LearningSystem {
    pub fn new(
        config: LearningSection,
        registry: Arc<PatternRegistry>,
        engine: Arc<AdaptationEngine>,
        store: Arc<dyn InsightStore>,
        clock: Arc<dyn Clock>,
        collaborator_timeout_ms: u64,
    ) -> Self {
        Self {
            config,
            registry,
            engine,
            store,
            analyzer: TaskAnalyzer::new(),
            clock,
            collaborator_timeout_ms,
        }
    }

    pub fn config(&self) -> &LearningSection {
        &self.config
    }

    fn ensure_enabled(&self) -> Result<(), HiveError> {
        if self.config.enabled {
            Ok(())
        } else {
            Err(HiveError::Configuration("learning is disabled".into()))
        }
    }

    pub async fn learn_from_outcomes(
        &self,
        outcomes: &[WorkflowOutcome],
    ) -> Result<LearningInsights, HiveError> {
        self.ensure_enabled()?;
        let now = self.clock.now();
        if outcomes.is_empty() {
            return Ok(LearningInsights::empty(now));
        }

        let profiles: HashMap<String, Arc<PatternProfile>> = self
            .registry
            .profiles()
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect();
        let buckets: Vec<&'static str> = outcomes
            .iter()
            .map(|o| self.complexity_bucket(&o.request))
            .collect();

        let optimization_insights = self.optimization_insights(outcomes, &buckets, &profiles);
        let contextual_patterns = self.contextual_patterns(outcomes, &buckets);
        let failure_preventions = self.failure_preventions(outcomes, &profiles);

        let produced =
            optimization_insights.len() + contextual_patterns.len() + failure_preventions.len();
        let density = produced as f64 / outcomes.len() as f64;
        let confidence = batch_confidence(outcomes.len(), density);

        let mut scope = BTreeSet::new();
        for (outcome, bucket) in outcomes.iter().zip(&buckets) {
            scope.insert(format!("pattern:{}", outcome.pattern_used));
            scope.insert(format!("complexity:{}", bucket));
        }

        let insights = LearningInsights {
            optimization_insights,
            contextual_patterns,
            failure_preventions,
            confidence,
            applicability_scope: scope.into_iter().collect(),
            sample_size: outcomes.len(),
            generated_at: now,
        };
        tracing::info!(
            "Learned from {} outcomes: {} optimizations, {} contexts, {} failure rules (confidence {:.2})",
            outcomes.len(),
            insights.optimization_insights.len(),
            insights.contextual_patterns.len(),
            insights.failure_preventions.len(),
            insights.confidence
        );

        if best_effort(
            "insight persistence",
            self.collaborator_timeout_ms,
            self.store.persist(&insights),
        )
        .await
        .is_none()
        {
            tracing::warn!("Learning insights computed but not persisted");
        }
        Ok(insights)
    }

    /// low / medium / high；有提示时直接采用提示
    fn complexity_bucket(&self, request: &WorkflowRequest) -> &'static str {
        match request.expected_complexity {
            ComplexityHint::Simple => "low",
            ComplexityHint::Moderate => "medium",
            ComplexityHint::Complex => "high",
            ComplexityHint::Unknown => {
                let complexity = self.analyzer.characterize(request).complexity;
                if complexity < 0.35 {
                    "low"
                } else if complexity < 0.7 {
                    "medium"
                } else {
                    "high"
                }
            }
        }
    }

    fn extract_factors(outcome: &WorkflowOutcome, profile: Option<&PatternProfile>) -> Vec<Factor> {
        let m = &outcome.metrics;
        let mut factors = Vec::new();
        if m.efficiency_score >= 0.8 {
            factors.push(Factor {
                name: "fast_execution",
                impact: m.efficiency_score.min(1.0),
                group: InsightType::ParameterTuning,
            });
        }
        if outcome.adaptations.is_empty() {
            factors.push(Factor {
                name: "no_adaptations",
                impact: 0.3,
                group: InsightType::PatternPreference,
            });
        } else if outcome.adaptations.iter().any(|a| a.success) {
            factors.push(Factor {
                name: "successful_adaptation",
                impact: 0.5,
                group: InsightType::FlowOptimization,
            });
        }
        let quality = outcome.output_quality();
        if quality >= 0.8 {
            factors.push(Factor {
                name: "high_output_quality",
                impact: quality.min(1.0),
                group: InsightType::PatternPreference,
            });
        }
        if let Some(profile) = profile {
            let base = &profile.baseline;
            if m.average_memory_mb > 0.0 && base.memory_mb > 0.0 && m.average_memory_mb < base.memory_mb
            {
                factors.push(Factor {
                    name: "low_memory_footprint",
                    impact: 1.0 - m.average_memory_mb / base.memory_mb,
                    group: InsightType::ResourceAllocation,
                });
            }
            if base.api_calls > 0.0 && (m.total_api_calls as f64) < base.api_calls {
                factors.push(Factor {
                    name: "low_api_usage",
                    impact: 1.0 - m.total_api_calls as f64 / base.api_calls,
                    group: InsightType::ResourceAllocation,
                });
            }
        }
        factors
    }

    fn step_for(factor: &str, pattern: &str) -> String {
        match factor {
            "fast_execution" => format!("keep {} step budget and timeouts at current settings", pattern),
            "no_adaptations" => format!("select {} directly for this context", pattern),
            "successful_adaptation" => "allow mid-run adaptation away from the initial pattern".to_string(),
            "high_output_quality" => format!("prefer {} when output quality matters", pattern),
            "low_memory_footprint" => format!("lower the memory reservation for {}", pattern),
            "low_api_usage" => format!("lower the API-call budget for {}", pattern),
            other => format!("reinforce {} for {}", other, pattern),
        }
    }

    fn optimization_insights(
        &self,
        outcomes: &[WorkflowOutcome],
        buckets: &[&'static str],
        profiles: &HashMap<String, Arc<PatternProfile>>,
    ) -> Vec<OptimizationInsight> {
        let mut merged: BTreeMap<(InsightType, Vec<String>), InsightAccumulator> = BTreeMap::new();
        for (outcome, bucket) in outcomes.iter().zip(buckets) {
            if !outcome.success {
                continue;
            }
            let factors = Self::extract_factors(
                outcome,
                profiles.get(&outcome.pattern_used).map(|p| p.as_ref()),
            );
            if factors.is_empty() {
                continue;
            }

            let mut by_group: BTreeMap<InsightType, f64> = BTreeMap::new();
            for f in &factors {
                *by_group.entry(f.group).or_insert(0.0) += f.impact;
            }
            let insight_type = by_group
                .iter()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(t, _)| *t)
                .unwrap_or(InsightType::PatternPreference);

            let conditions = vec![
                format!("pattern={}", outcome.pattern_used),
                format!("complexity={}", bucket),
                format!("priority={}", outcome.request.priority),
            ];
            let acc = merged.entry((insight_type, conditions)).or_default();
            acc.outcomes += 1;
            for f in &factors {
                acc.factors.insert(f.name.to_string());
                acc.impact_sum += f.impact;
                acc.factor_count += 1;
                let step = Self::step_for(f.name, &outcome.pattern_used);
                if !acc.steps.contains(&step) {
                    acc.steps.push(step);
                }
            }
        }

        merged
            .into_iter()
            .map(|((insight_type, conditions), acc)| {
                let avg_impact = acc.impact_sum / acc.factor_count.max(1) as f64;
                OptimizationInsight {
                    insight_type,
                    success_factors: acc.factors.into_iter().collect(),
                    applicability_conditions: conditions,
                    expected_improvement: (avg_impact * 0.5).min(MAX_EXPECTED_IMPROVEMENT),
                    confidence: self.significance(acc.outcomes),
                    implementation_steps: acc.steps,
                    sample_size: acc.outcomes,
                }
            })
            .collect()
    }

    fn significance(&self, samples: usize) -> f64 {
        (samples as f64 / self.config.significance_reference.max(1) as f64).min(1.0)
    }

    fn contextual_patterns(
        &self,
        outcomes: &[WorkflowOutcome],
        buckets: &[&'static str],
    ) -> Vec<ContextualPattern> {
        let mut groups: BTreeMap<String, Vec<&WorkflowOutcome>> = BTreeMap::new();
        for (outcome, bucket) in outcomes.iter().zip(buckets) {
            let richness = if outcome.request.context.len() >= 3 {
                "rich"
            } else {
                "simple"
            };
            let signature = format!("{}:{}:{}", bucket, outcome.request.priority, richness);
            groups.entry(signature).or_default().push(outcome);
        }

        let mut result = Vec::new();
        for (signature, members) in groups {
            if members.len() < self.config.min_context_samples {
                continue;
            }
            // 模式 -> (Σ 质量/耗时, 样本数, 是否有成功)
            let mut per_pattern: BTreeMap<&str, (f64, usize, bool)> = BTreeMap::new();
            for o in &members {
                let slot = per_pattern.entry(o.pattern_used.as_str()).or_insert((0.0, 0, false));
                slot.0 += o.output_quality() / o.metrics.total_execution_secs.max(1e-3);
                slot.1 += 1;
                slot.2 |= o.success;
            }
            let mut ranked: Vec<(&str, f64, bool)> = per_pattern
                .into_iter()
                .map(|(name, (sum, n, any_success))| (name, sum / n as f64, any_success))
                .collect();
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

            result.push(ContextualPattern {
                context_signature: signature,
                applicable_patterns: ranked
                    .iter()
                    .filter(|(_, _, ok)| *ok)
                    .map(|(name, _, _)| name.to_string())
                    .collect(),
                performance_ranking: ranked.iter().map(|(name, _, _)| name.to_string()).collect(),
                significance: self.significance(members.len()),
                sample_size: members.len(),
            });
        }
        result
    }

    fn failure_preventions(
        &self,
        outcomes: &[WorkflowOutcome],
        profiles: &HashMap<String, Arc<PatternProfile>>,
    ) -> Vec<FailurePrevention> {
        let mut per_pattern: BTreeMap<&str, (usize, Vec<&WorkflowOutcome>)> = BTreeMap::new();
        for o in outcomes {
            let slot = per_pattern.entry(o.pattern_used.as_str()).or_insert((0, Vec::new()));
            slot.0 += 1;
            if !o.success {
                slot.1.push(o);
            }
        }

        let mut rules = Vec::new();
        for (pattern, (total, failed)) in per_pattern {
            if failed.is_empty() {
                continue;
            }
            let rate = failed.len() as f64 / total as f64;
            if rate <= self.config.failure_threshold {
                continue;
            }
            let signal = common_signal(&failed);
            let mut warning_signals = vec![signal.clone()];
            for derived in derived_signals(&failed, profiles.get(pattern).map(|p| p.as_ref())) {
                if !warning_signals.contains(&derived) {
                    warning_signals.push(derived);
                }
            }
            let cost = if rate >= 0.6 {
                CostLevel::High
            } else if rate >= 0.45 {
                CostLevel::Medium
            } else {
                CostLevel::Low
            };
            tracing::debug!(
                "Pattern '{}' fails {:.0}% of runs, common signal '{}'",
                pattern,
                rate * 100.0,
                signal
            );
            rules.push(FailurePrevention {
                pattern: pattern.to_string(),
                prevention_strategy: prevention_for(&signal),
                failure_pattern: signal,
                warning_signals,
                effectiveness: 0.75 * rate,
                cost,
            });
        }
        rules
    }

    /// 回写：更新模式权重（平滑后整表替换）并合并失败预防规则
    pub fn apply_learnings(&self, insights: &LearningInsights) -> Result<HashMap<String, f64>, HiveError> {
        self.ensure_enabled()?;

        let mut weights = HashMap::new();
        for profile in self.registry.profiles() {
            let name = profile.name.as_str();
            let mut context_terms = Vec::new();
            for ctx in &insights.contextual_patterns {
                let Some(rank) = ctx.performance_ranking.iter().position(|p| p == name) else {
                    continue;
                };
                let len = ctx.performance_ranking.len();
                let position = if len > 1 {
                    1.0 - 2.0 * rank as f64 / (len - 1) as f64
                } else if ctx.applicable_patterns.iter().any(|p| p == name) {
                    1.0
                } else {
                    -1.0
                };
                context_terms.push(0.3 * ctx.significance * position);
            }
            let penalty: f64 = insights
                .failure_preventions
                .iter()
                .filter(|r| r.pattern == name)
                .map(|r| r.effectiveness / 0.75 * 0.5)
                .sum();
            if context_terms.is_empty() && penalty == 0.0 {
                continue;
            }
            let context_adj = if context_terms.is_empty() {
                0.0
            } else {
                context_terms.iter().sum::<f64>() / context_terms.len() as f64
            };
            let target = (1.0 + context_adj - penalty).clamp(0.5, 1.5);
            let weight =
                (WEIGHT_SMOOTHING * profile.weight + (1.0 - WEIGHT_SMOOTHING) * target).clamp(0.5, 1.5);
            weights.insert(profile.name.clone(), weight);
        }
        self.registry.apply_weights(&weights);

        let mut rules: Vec<FailurePrevention> = self
            .engine
            .rules()
            .iter()
            .filter(|old| {
                !insights
                    .failure_preventions
                    .iter()
                    .any(|new| new.pattern == old.pattern && new.failure_pattern == old.failure_pattern)
            })
            .cloned()
            .collect();
        rules.extend(insights.failure_preventions.iter().cloned());
        let rule_count = rules.len();
        self.engine.set_rules(rules);

        tracing::info!(
            "Applied learnings: {} pattern weights updated, {} failure rules active",
            weights.len(),
            rule_count
        );
        Ok(weights)
    }
}

/// 失败原因中出现在至少一半记录里的最常见词
fn common_signal(failed: &[&WorkflowOutcome]) -> String {
    let reasons: Vec<String> = failed
        .iter()
        .filter_map(|o| o.failure_reason.as_ref())
        .map(|r| r.to_lowercase())
        .collect();
    if reasons.is_empty() {
        return "unspecified failure".to_string();
    }

    let mut counts: HashMap<String, usize> = HashMap::new();
    for reason in &reasons {
        let words: BTreeSet<&str> = reason
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 3)
            .collect();
        for w in words {
            *counts.entry(w.to_string()).or_insert(0) += 1;
        }
    }

    let mut candidates: Vec<(String, usize)> = counts
        .into_iter()
        .filter(|(_, n)| n * 2 >= reasons.len())
        .collect();
    candidates.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then_with(|| {
                let ka = KNOWN_SIGNALS.contains(&a.0.as_str());
                let kb = KNOWN_SIGNALS.contains(&b.0.as_str());
                kb.cmp(&ka)
            })
            .then_with(|| b.0.len().cmp(&a.0.len()))
            .then_with(|| a.0.cmp(&b.0))
    });
    candidates
        .into_iter()
        .next()
        .map(|(w, _)| w)
        .unwrap_or_else(|| "unspecified failure".to_string())
}

/// 从失败执行的指标推出可在检查点问题中观察到的预警词
fn derived_signals(failed: &[&WorkflowOutcome], profile: Option<&PatternProfile>) -> Vec<String> {
    let n = failed.len() as f64;
    let mut signals = Vec::new();
    let efficiency = failed.iter().map(|o| o.metrics.efficiency_score).sum::<f64>() / n;
    if efficiency < 0.5 {
        signals.push("duration".to_string());
    }
    if let Some(profile) = profile {
        let memory = failed.iter().map(|o| o.metrics.average_memory_mb).sum::<f64>() / n;
        if memory > profile.baseline.memory_mb * 1.3 {
            signals.push("memory".to_string());
        }
        let scored: Vec<f64> = failed
            .iter()
            .map(|o| o.metrics.average_quality)
            .filter(|q| *q > 0.0)
            .collect();
        if !scored.is_empty()
            && scored.iter().sum::<f64>() / (scored.len() as f64) < profile.baseline.quality * 0.8
        {
            signals.push("quality".to_string());
        }
    }
    signals
}

fn prevention_for(signal: &str) -> String {
    match signal {
        "timeout" | "timed" | "deadline" | "duration" | "slow" => {
            "checkpoint more often and switch patterns once duration exceeds baseline".to_string()
        }
        "memory" | "oom" => "prefer a lower-footprint pattern once memory passes tolerance".to_string(),
        "quality" => "add a review checkpoint and switch to a quality-oriented pattern".to_string(),
        "cancelled" => "shorten steps so cancellation loses less work".to_string(),
        other => format!(
            "watch for '{}' and prefer an alternative pattern for similar requests",
            other
        ),
    }
}
