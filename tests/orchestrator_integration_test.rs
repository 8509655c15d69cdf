//! 编排器端到端测试：选择、监控下执行、中途切换、取消、学习回写

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hive::adaptation::IssueCategory;
use hive::config::AppConfig;
use hive::core::{CollaboratorError, OrchestratorBuilder, CAUSE_CANCELLED};
use hive::knowledge::{
    HistoricalPerformanceStore, KnowledgeGraph, PatternKnowledge, PatternRecommendation,
    PerformanceDataPoint,
};
use hive::learning::ScheduleType;
use hive::monitor::{FixedProbe, ProbeReading, ResourceProbe};
use hive::patterns::{PatternProfile, SimulatedStrategy, Strategy};
use hive::workflow::{
    ExecutionStatus, QualityAssessment, WorkflowMetrics, WorkflowOutcome, WorkflowRequest,
};
use hive::Orchestrator;

const LOG_TASK: &str = "analyze the log file and summarize anomalies";

fn probe() -> Arc<dyn ResourceProbe> {
    Arc::new(FixedProbe::new(ProbeReading {
        memory_mb: 50.0,
        cpu_percent: 1.0,
        network_kb: 0.0,
    }))
}

fn manual_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.learning.schedule = ScheduleType::Manual;
    config
}

/// react 使用给定策略，其余两个内置模式使用默认模拟策略
fn with_react(react: SimulatedStrategy) -> Orchestrator {
    let react: Arc<dyn Strategy> = Arc::new(react);
    OrchestratorBuilder::new(manual_config())
        .with_pattern(PatternProfile::react(), react)
        .with_pattern(
            PatternProfile::plan_execute(),
            Arc::new(SimulatedStrategy::new("plan_execute")),
        )
        .with_pattern(
            PatternProfile::decompose(),
            Arc::new(SimulatedStrategy::new("decompose")),
        )
        .with_probe(probe())
        .build()
        .unwrap()
}

fn outcome(pattern: &str, success: bool, reason: Option<&str>) -> WorkflowOutcome {
    WorkflowOutcome {
        execution_id: uuid::Uuid::new_v4().to_string(),
        request: WorkflowRequest::new("investigate why the nightly export is slow"),
        pattern_used: pattern.to_string(),
        success,
        metrics: WorkflowMetrics {
            total_execution_secs: 20.0,
            efficiency_score: 0.85,
            average_memory_mb: 200.0,
            total_api_calls: 10,
            ..WorkflowMetrics::default()
        },
        quality: QualityAssessment {
            completeness: 1.0,
            accuracy: 0.9,
            output_quality: if success { Some(0.9) } else { None },
        },
        adaptations: Vec::new(),
        failure_reason: reason.map(String::from),
        completed_at: chrono::Utc::now(),
    }
}

#[tokio::test]
async fn test_log_analysis_selects_react_with_reasoning() {
    let orch = with_react(SimulatedStrategy::new("react"));
    let selection = orch
        .selector()
        .select_pattern(&WorkflowRequest::new(LOG_TASK))
        .await
        .unwrap();
    assert_eq!(selection.selected_pattern, "react");
    assert!(selection.reasoning.contains("elevated"));
    assert_eq!(selection.alternatives.len(), 2);
    assert!(selection
        .alternatives
        .iter()
        .all(|(_, score)| *score <= selection.score));
}

#[tokio::test]
async fn test_memory_pressure_switches_to_efficient_pattern() {
    // 600MB 远超 react 基线 256MB 的 1.3 倍
    let orch = with_react(SimulatedStrategy::new("react").with_memory(600.0, 0.0));
    let exec = orch.execute(WorkflowRequest::new(LOG_TASK)).await.unwrap();

    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert_eq!(exec.selection.selected_pattern, "react");
    assert_eq!(exec.current_pattern, "plan_execute");
    assert_eq!(exec.adaptations.len(), 1);
    let adaptation = &exec.adaptations[0];
    assert_eq!(adaptation.from_pattern, "react");
    assert_eq!(adaptation.to_pattern, "plan_execute");
    assert!(adaptation.success);
    assert_eq!(exec.metrics.adaptation_count, 1);

    // 切换后的策略从已完成的步骤继续
    let output = exec.output.unwrap();
    let findings = output["findings"].as_array().unwrap();
    assert!(findings.iter().any(|f| f.as_str() == Some("react step 1")));
    assert!(findings.iter().any(|f| f.as_str() == Some("plan_execute step 5")));

    let history = orch.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].pattern_used, "plan_execute");
    assert_eq!(history[0].adaptations.len(), 1);
}

#[tokio::test]
async fn test_strategy_feedback_triggers_adaptation() {
    let orch = with_react(
        SimulatedStrategy::new("react").with_feedback_at(1, IssueCategory::InsufficientPlanning),
    );
    let exec = orch.execute(WorkflowRequest::new(LOG_TASK)).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert_eq!(exec.current_pattern, "plan_execute");
    assert_eq!(exec.adaptations.len(), 1);
    assert!(exec.adaptations[0].reason.contains("insufficient_planning"));
}

#[tokio::test]
async fn test_cancel_records_failed_outcome() {
    let orch = with_react(
        SimulatedStrategy::new("react").with_step_delay(Duration::from_secs(60)),
    );
    let ticket = orch.submit(WorkflowRequest::new(LOG_TASK)).await.unwrap();
    assert_eq!(orch.active_count(), 1);
    let running = orch.status(&ticket.execution_id).unwrap();
    assert_eq!(running.status, ExecutionStatus::Running);

    orch.cancel(&ticket.execution_id).unwrap();
    let exec = ticket.wait().await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert_eq!(exec.failure_cause.as_deref(), Some(CAUSE_CANCELLED));
    assert_eq!(orch.active_count(), 0);

    let history = orch.history();
    assert_eq!(history.len(), 1);
    assert!(!history[0].success);
    assert_eq!(history[0].failure_reason.as_deref(), Some(CAUSE_CANCELLED));
}

#[tokio::test]
async fn test_strategy_error_fails_execution() {
    let orch = with_react(SimulatedStrategy::new("react").failing_at(2, "upstream api unavailable"));
    let exec = orch.execute(WorkflowRequest::new(LOG_TASK)).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert_eq!(
        exec.failure_cause.as_deref(),
        Some("upstream api unavailable")
    );
    assert_eq!(exec.metrics.checkpoint_timestamps.len(), 2);
}

#[tokio::test]
async fn test_frequent_timeouts_become_prevention_rule() {
    let orch = with_react(SimulatedStrategy::new("react"));
    let mut outcomes = Vec::new();
    for i in 0..50 {
        if i % 5 < 2 {
            outcomes.push(outcome("react", false, Some("timeout while waiting for tool")));
        } else {
            outcomes.push(outcome("react", true, None));
        }
    }

    let insights = orch.learn_now(&outcomes).await.unwrap();
    assert_eq!(insights.sample_size, 50);
    assert_eq!(insights.failure_preventions.len(), 1);
    let rule = &insights.failure_preventions[0];
    assert_eq!(rule.pattern, "react");
    assert_eq!(rule.failure_pattern, "timeout");
    assert!((rule.effectiveness - 0.3).abs() < 1e-9);

    let installed = orch.engine().rules();
    assert_eq!(installed.len(), 1);
    assert_eq!(installed[0].failure_pattern, "timeout");
}

#[tokio::test]
async fn test_successful_batch_produces_no_rules() {
    let orch = with_react(SimulatedStrategy::new("react"));
    let outcomes: Vec<_> = (0..20).map(|_| outcome("plan_execute", true, None)).collect();
    let insights = orch.learn_now(&outcomes).await.unwrap();
    assert!(insights.failure_preventions.is_empty());
    assert!(!insights.optimization_insights.is_empty());
    assert!(orch.engine().rules().is_empty());
    assert!(insights.confidence > 0.0 && insights.confidence <= 1.0);
}

struct BrokenGraph;

#[async_trait]
impl KnowledgeGraph for BrokenGraph {
    async fn query_recommendations(
        &self,
        _description: &str,
    ) -> Result<Vec<PatternRecommendation>, CollaboratorError> {
        Err(CollaboratorError::Unavailable("graph offline".into()))
    }

    async fn ping(&self) -> bool {
        false
    }
}

struct BrokenStore;

#[async_trait]
impl HistoricalPerformanceStore for BrokenStore {
    async fn query_pattern_knowledge(
        &self,
        _patterns: &[String],
    ) -> Result<Vec<PatternKnowledge>, CollaboratorError> {
        Err(CollaboratorError::Unavailable("store offline".into()))
    }

    async fn get_performance_history(
        &self,
        _days: u32,
    ) -> Result<Vec<PerformanceDataPoint>, CollaboratorError> {
        Err(CollaboratorError::Unavailable("store offline".into()))
    }

    async fn store_metrics(&self, _point: PerformanceDataPoint) -> Result<(), CollaboratorError> {
        Err(CollaboratorError::Rejected("read only".into()))
    }

    async fn ping(&self) -> bool {
        false
    }
}

#[tokio::test]
async fn test_failing_collaborators_degrade_to_task_fit() {
    let orch = OrchestratorBuilder::new(manual_config())
        .with_simulated_patterns()
        .with_knowledge_graph(Arc::new(BrokenGraph))
        .with_history_store(Arc::new(BrokenStore))
        .with_probe(probe())
        .build()
        .unwrap();

    let selection = orch
        .selector()
        .select_pattern(&WorkflowRequest::new(LOG_TASK))
        .await
        .unwrap();
    let profile = orch.registry().get(&selection.selected_pattern).unwrap().profile;
    let fit = profile.task_fit(&selection.characteristics);
    assert!((selection.score - 0.4 * fit).abs() < 1e-9);
    assert!(!selection.reasoning.contains("knowledge graph"));

    // 执行本身不受协作方故障影响
    let exec = orch.execute(WorkflowRequest::new(LOG_TASK)).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert_eq!(orch.history().len(), 1);

    let health = orch.get_health().await;
    assert!(!health.connectivity.knowledge_graph);
    assert!(!health.connectivity.historical_store);
}

#[tokio::test]
async fn test_learning_from_history_reweights_patterns() {
    let mut config = manual_config();
    config.learning.min_batch_size = 3;
    let orch = OrchestratorBuilder::new(config)
        .with_simulated_patterns()
        .with_probe(probe())
        .build()
        .unwrap();
    for _ in 0..3 {
        orch.execute(WorkflowRequest::new(LOG_TASK)).await.unwrap();
    }
    let insights = orch.learn_from_history().await.unwrap().unwrap();
    assert_eq!(insights.sample_size, 3);
    assert!(insights
        .applicability_scope
        .contains(&"pattern:react".to_string()));

    let react = orch.registry().get("react").unwrap().profile;
    assert!(react.weight >= 0.5 && react.weight <= 1.5);
    orch.shutdown().await;
}
