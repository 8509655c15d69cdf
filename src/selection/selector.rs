//! 模式选择器
//!
//! 得分 = w_fit·任务匹配 + w_kg·Σ知识图谱置信度 + w_hist·Σ历史置信度。
//! 知识图谱与历史库都是尽力而为：不可达时对应项为 0，选择本身不失败。

use std::sync::Arc;

use crate::config::SelectionSection;
use crate::core::HiveError;
use crate::knowledge::{
    best_effort, HistoricalPerformanceStore, KnowledgeGraph, PatternKnowledge,
    PatternRecommendation,
};
use crate::patterns::{PatternProfile, PatternRegistry};
use crate::selection::{TaskAnalysis, TaskAnalyzer};
use crate::workflow::{ExpectedPerformance, PatternSelection, TaskCharacteristics, WorkflowRequest};

pub struct PatternSelector {
    registry: Arc<PatternRegistry>,
    analyzer: TaskAnalyzer,
    knowledge_graph: Arc<dyn KnowledgeGraph>,
    history: Arc<dyn HistoricalPerformanceStore>,
    config: SelectionSection,
}

impl PatternSelector {
    pub fn new(
        registry: Arc<PatternRegistry>,
        knowledge_graph: Arc<dyn KnowledgeGraph>,
        history: Arc<dyn HistoricalPerformanceStore>,
        config: SelectionSection,
    ) -> Self {
        Self {
            registry,
            analyzer: TaskAnalyzer::new(),
            knowledge_graph,
            history,
            config,
        }
    }

    pub fn analyzer(&self) -> &TaskAnalyzer {
        &self.analyzer
    }

    pub async fn select_pattern(&self, request: &WorkflowRequest) -> Result<PatternSelection, HiveError> {
        if request.description.trim().is_empty() {
            return Err(HiveError::selection_failed(HiveError::Validation(
                "request description is empty".into(),
            )));
        }
        // 整个选择过程只使用这一份快照
        let profiles = self.registry.profiles();
        if profiles.is_empty() {
            return Err(HiveError::selection_failed(HiveError::System(
                "no patterns registered".into(),
            )));
        }

        let analysis = self.analyzer.analyze(request, &profiles);
        let timeout_ms = self.config.collaborator_timeout_ms;
        let recommendations = best_effort(
            "knowledge graph query",
            timeout_ms,
            self.knowledge_graph.query_recommendations(&request.description),
        )
        .await
        .unwrap_or_default();
        let knowledge = best_effort(
            "pattern knowledge query",
            timeout_ms,
            self.history.query_pattern_knowledge(&analysis.suggested_patterns),
        )
        .await
        .unwrap_or_default();

        let mut scored: Vec<(Arc<PatternProfile>, f64)> = profiles
            .iter()
            .map(|profile| {
                let score = self.score(profile, &analysis.characteristics, &recommendations, &knowledge);
                (profile.clone(), score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.name.cmp(&b.0.name)));

        let mut ranked = scored.into_iter();
        let (best, best_score) = ranked.next().ok_or_else(|| {
            HiveError::selection_failed(HiveError::System("scoring produced no candidates".into()))
        })?;
        let alternatives: Vec<(String, f64)> =
            ranked.map(|(p, score)| (p.name.clone(), score)).collect();

        let reasoning = self.reasoning(&analysis, &recommendations, &knowledge, &profiles);
        let confidence = (0.5 * analysis.confidence + 0.5 * best_score.min(1.0)).clamp(0.0, 1.0);
        tracing::info!(
            "Selected pattern '{}' (score {:.3}, confidence {:.2}) for request {}",
            best.name,
            best_score,
            confidence,
            request.id
        );

        Ok(PatternSelection {
            selected_pattern: best.name.clone(),
            score: best_score,
            confidence,
            reasoning,
            alternatives,
            expected: expected_performance(&best, &analysis.characteristics),
            characteristics: analysis.characteristics,
        })
    }

    fn score(
        &self,
        profile: &PatternProfile,
        characteristics: &TaskCharacteristics,
        recommendations: &[PatternRecommendation],
        knowledge: &[PatternKnowledge],
    ) -> f64 {
        let fit = profile.task_fit(characteristics);
        let kg: f64 = recommendations
            .iter()
            .filter(|r| r.pattern == profile.name)
            .map(|r| r.confidence)
            .sum();
        let hist: f64 = knowledge
            .iter()
            .filter(|k| k.pattern == profile.name)
            .map(|k| (k.confidence_score * profile.weight).clamp(0.0, 1.0))
            .sum();
        self.config.task_fit_weight * fit + self.config.knowledge_weight * kg + self.config.history_weight * hist
    }

    fn reasoning(
        &self,
        analysis: &TaskAnalysis,
        recommendations: &[PatternRecommendation],
        knowledge: &[PatternKnowledge],
        profiles: &[Arc<PatternProfile>],
    ) -> String {
        let c = &analysis.characteristics;
        let named = [
            ("complexity", c.complexity),
            ("dynamism", c.dynamism),
            ("planningFeasibility", c.planning_feasibility),
            ("explorationNeeds", c.exploration_needs),
            ("resourceRequirements", c.resource_requirements),
        ];
        let mut parts: Vec<String> = named
            .iter()
            .filter(|(_, v)| *v >= self.config.elevated_threshold)
            .map(|(name, v)| format!("elevated {} ({:.2})", name, v))
            .collect();
        if c.planning_feasibility < 0.3 {
            parts.push(format!(
                "low planningFeasibility ({:.2})",
                c.planning_feasibility
            ));
        }

        let registered = |name: &str| profiles.iter().any(|p| p.name == name);
        if let Some(top) = recommendations
            .iter()
            .filter(|r| registered(r.pattern.as_str()))
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
        {
            parts.push(format!(
                "knowledge graph recommends {} ({:.2})",
                top.pattern, top.confidence
            ));
        }
        if let Some(best) = knowledge
            .iter()
            .filter(|k| registered(k.pattern.as_str()))
            .max_by(|a, b| a.confidence_score.total_cmp(&b.confidence_score))
        {
            parts.push(format!(
                "best historical performer {} ({:.0}% success over {} runs)",
                best.pattern,
                best.success_rate * 100.0,
                best.sample_count
            ));
        }

        if parts.is_empty() {
            "based on intrinsic pattern-task fit alone".to_string()
        } else {
            parts.join("; ")
        }
    }
}

/// 静态基线按复杂度 / 动态性放大
pub fn expected_performance(profile: &PatternProfile, c: &TaskCharacteristics) -> ExpectedPerformance {
    ExpectedPerformance {
        duration_secs: profile.baseline.avg_duration_secs
            * (1.0 + c.complexity)
            * (1.0 + 0.5 * c.dynamism),
        quality: (profile.baseline.quality * (1.0 - 0.1 * c.complexity - 0.1 * c.dynamism))
            .clamp(0.0, 1.0),
        resource_utilization: (0.3 + 0.5 * c.resource_requirements + 0.2 * c.complexity)
            .clamp(0.0, 1.0),
    }
}
