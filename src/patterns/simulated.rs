//! 模拟策略（用于测试与演示，无需外部服务）
//!
//! 按固定步数推进，每步上报一个检查点；可配置内存、调用数、质量、在第 k 步失败或上报反馈。
//! 从转交的 ExecutionState 恢复时跳过 completed_steps 之前的步骤，并沿用已有的 findings。

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::adaptation::IssueCategory;
use crate::monitor::ExecutionCheckpoint;
use crate::patterns::{Strategy, StrategyContext, StrategyReport};
use crate::workflow::QualityAssessment;

#[derive(Debug, Clone)]
pub struct SimulatedStrategy {
    name: String,
    steps: u32,
    step_delay: Duration,
    memory_mb: f64,
    memory_growth_mb: f64,
    api_calls_per_step: u64,
    quality: f64,
    fail_at: Option<(u32, String)>,
    feedback_at: Option<(u32, IssueCategory)>,
}

impl SimulatedStrategy {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: 5,
            step_delay: Duration::from_millis(10),
            memory_mb: 64.0,
            memory_growth_mb: 0.0,
            api_calls_per_step: 1,
            quality: 0.85,
            fail_at: None,
            feedback_at: None,
        }
    }

    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = steps.max(1);
        self
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// 首步内存与每步增长
    pub fn with_memory(mut self, memory_mb: f64, growth_mb: f64) -> Self {
        self.memory_mb = memory_mb;
        self.memory_growth_mb = growth_mb;
        self
    }

    pub fn with_api_calls_per_step(mut self, calls: u64) -> Self {
        self.api_calls_per_step = calls;
        self
    }

    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality = quality.clamp(0.0, 1.0);
        self
    }

    /// 在第 step 步（从 0 计）失败
    pub fn failing_at(mut self, step: u32, error: impl Into<String>) -> Self {
        self.fail_at = Some((step, error.into()));
        self
    }

    /// 在第 step 步的检查点之后上报问题类别
    pub fn with_feedback_at(mut self, step: u32, category: IssueCategory) -> Self {
        self.feedback_at = Some((step, category));
        self
    }

    fn start_step(&self, ctx: &StrategyContext) -> u32 {
        ctx.resume
            .as_ref()
            .and_then(|s| s.data.get("completed_steps"))
            .and_then(|v| v.as_u64())
            .map(|done| (done as u32).min(self.steps.saturating_sub(1)))
            .unwrap_or(0)
    }

    fn carried_findings(ctx: &StrategyContext) -> Vec<Value> {
        ctx.resume
            .as_ref()
            .and_then(|s| s.data.get("findings"))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Strategy for SimulatedStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: StrategyContext) -> Result<StrategyReport, String> {
        let start = self.start_step(&ctx);
        let mut findings = Self::carried_findings(&ctx);
        tracing::debug!(
            "Simulated '{}' running {} from step {}/{}",
            self.name,
            ctx.execution_id,
            start,
            self.steps
        );

        for step in start..self.steps {
            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    return Ok(StrategyReport::failure("cancelled"));
                }
                _ = tokio::time::sleep(self.step_delay) => {}
            }
            if let Some((fail_step, error)) = &self.fail_at {
                if *fail_step == step {
                    return Ok(StrategyReport::failure(error.clone()));
                }
            }

            findings.push(json!(format!("{} step {}", self.name, step + 1)));
            let segment_steps = (step - start + 1) as u64;
            let checkpoint = ExecutionCheckpoint::new(
                format!("{}-{}", self.name, step + 1),
                (step + 1) as f64 / self.steps as f64,
                ctx.now(),
            )
            .with_state(json!({
                "completed_steps": step + 1,
                "findings": findings,
                "plan": format!("{} steps via {}", self.steps, self.name),
            }))
            .with_memory(self.memory_mb + self.memory_growth_mb * step as f64)
            .with_api_calls(self.api_calls_per_step * segment_steps)
            .with_quality(self.quality);

            if !ctx.checkpoint(checkpoint).await {
                return Ok(StrategyReport::failure("detached from orchestrator"));
            }
            if let Some((feedback_step, category)) = self.feedback_at {
                if feedback_step == step {
                    ctx.feedback(category).await;
                }
            }
        }

        Ok(StrategyReport::success(
            QualityAssessment {
                completeness: 1.0,
                accuracy: self.quality,
                output_quality: Some(self.quality),
            },
            Some(json!({
                "pattern": self.name,
                "request": ctx.request.description,
                "findings": findings,
            })),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptation::ExecutionState;
    use crate::core::ManualClock;
    use crate::monitor::ExecutionCheckpoint;
    use crate::patterns::StrategyEvent;
    use crate::workflow::WorkflowRequest;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn context(
        resume: Option<ExecutionState>,
        cancel: CancellationToken,
    ) -> (StrategyContext, mpsc::Receiver<StrategyEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let ctx = StrategyContext::new(
            "exec-1".to_string(),
            "react",
            Arc::new(WorkflowRequest::new("find the bug")),
            resume,
            cancel,
            tx,
        );
        (ctx, rx)
    }

    fn checkpoints(rx: &mut mpsc::Receiver<StrategyEvent>) -> Vec<ExecutionCheckpoint> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let StrategyEvent::Checkpoint(cp) = event {
                out.push(cp);
            }
        }
        out
    }

    #[tokio::test]
    async fn test_runs_all_steps() {
        let strategy = SimulatedStrategy::new("react")
            .with_steps(4)
            .with_step_delay(Duration::from_millis(1))
            .with_api_calls_per_step(2);
        let (ctx, mut rx) = context(None, CancellationToken::new());
        let report = strategy.run(ctx).await.unwrap();
        assert!(report.success);
        assert_eq!(report.quality.output_quality, Some(0.85));

        let cps = checkpoints(&mut rx);
        assert_eq!(cps.len(), 4);
        assert_eq!(cps[3].progress, 1.0);
        assert_eq!(cps[3].api_calls, 8);
        assert_eq!(cps[3].state["findings"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_checkpoints_use_context_clock() {
        let start = chrono::DateTime::parse_from_rfc3339("2020-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let clock = Arc::new(ManualClock::new(start));
        let strategy = SimulatedStrategy::new("react")
            .with_steps(3)
            .with_step_delay(Duration::from_millis(1));
        let (ctx, mut rx) = context(None, CancellationToken::new());
        strategy.run(ctx.with_clock(clock)).await.unwrap();

        let cps = checkpoints(&mut rx);
        assert_eq!(cps.len(), 3);
        assert!(cps.iter().all(|cp| cp.timestamp == start));
    }

    #[tokio::test]
    async fn test_resume_skips_completed_steps() {
        let mut state = ExecutionState::new("plan_execute");
        state.data.insert("completed_steps".into(), json!(2));
        state
            .data
            .insert("findings".into(), json!(["plan_execute step 1", "plan_execute step 2"]));
        let strategy = SimulatedStrategy::new("react")
            .with_steps(4)
            .with_step_delay(Duration::from_millis(1));
        let (ctx, mut rx) = context(Some(state), CancellationToken::new());
        strategy.run(ctx).await.unwrap();

        let cps = checkpoints(&mut rx);
        assert_eq!(cps.len(), 2);
        assert_eq!(cps[0].step_id, "react-3");
        assert_eq!(cps[0].api_calls, 1);
        assert_eq!(cps[1].state["findings"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_failure_and_feedback() {
        let strategy = SimulatedStrategy::new("react")
            .with_steps(5)
            .with_step_delay(Duration::from_millis(1))
            .with_feedback_at(0, IssueCategory::QualityIssue)
            .failing_at(2, "tool crashed");
        let (ctx, mut rx) = context(None, CancellationToken::new());
        let report = strategy.run(ctx).await.unwrap();
        assert!(!report.success);
        assert_eq!(report.error.as_deref(), Some("tool crashed"));

        let mut feedback = 0;
        let mut cps = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                StrategyEvent::Feedback(IssueCategory::QualityIssue) => feedback += 1,
                StrategyEvent::Checkpoint(_) => cps += 1,
                _ => {}
            }
        }
        assert_eq!(feedback, 1);
        assert_eq!(cps, 2);
    }

    #[tokio::test]
    async fn test_cancellation_stops_early() {
        let strategy = SimulatedStrategy::new("react")
            .with_steps(100)
            .with_step_delay(Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let (ctx, _rx) = context(None, cancel.clone());
        cancel.cancel();
        let report = strategy.run(ctx).await.unwrap();
        assert_eq!(report.error.as_deref(), Some("cancelled"));
    }
}
