//! 单次执行的事件循环
//!
//! 一个执行对应一个驱动任务：策略跑在独立的子任务里，通过 channel 上报检查点与反馈；
//! 驱动按到达顺序处理检查点（交给 Monitor），需要时调用 Adaptation Engine 切换策略。
//! 同一执行同一时刻最多只有一次切换在进行（切换在循环内同步完成）。
//! 取消与墙钟超时走同一条路径：停掉当前策略，以失败结束。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::adaptation::{AdaptationEngine, ExecutionState, IssueCategory};
use crate::core::{Clock, HiveError};
use crate::monitor::{CheckpointMetric, ExecutionCheckpoint, ExecutionMonitor, MonitorHandle};
use crate::patterns::{PatternRegistry, StrategyContext, StrategyEvent, StrategyReport};
use crate::workflow::{ExecutionStatus, QualityAssessment, WorkflowExecution, WorkflowRequest};

/// 策略事件缓冲
const EVENT_BUFFER: usize = 64;

/// 失败原因：取消
pub const CAUSE_CANCELLED: &str = "cancelled";
/// 失败原因：墙钟超时
pub const CAUSE_TIMEOUT: &str = "timeout";

pub(crate) struct ExecutionDriver {
    pub registry: Arc<PatternRegistry>,
    pub monitor: Arc<ExecutionMonitor>,
    pub engine: Arc<AdaptationEngine>,
    pub timeout: Duration,
    /// 主动检查周期，None 表示关闭
    pub proactive_every: Option<Duration>,
    pub clock: Arc<dyn Clock>,
}

/// 驱动一次执行所需的输入
pub(crate) struct DriveInput {
    /// 与编排器共享的执行快照（供状态查询）
    pub execution: Arc<Mutex<WorkflowExecution>>,
    pub request: Arc<WorkflowRequest>,
    pub handle: MonitorHandle,
    pub cancel: CancellationToken,
    pub feedback: mpsc::Receiver<IssueCategory>,
}

/// 驱动结束时的结果
#[derive(Debug, Clone)]
pub(crate) struct DriveResult {
    pub success: bool,
    pub quality: QualityAssessment,
    pub output: Option<Value>,
    pub failure: Option<String>,
}

impl DriveResult {
    fn failed(cause: impl Into<String>) -> Self {
        Self {
            success: false,
            quality: QualityAssessment::default(),
            output: None,
            failure: Some(cause.into()),
        }
    }

    fn from_report(report: StrategyReport) -> Self {
        let failure = if report.success {
            None
        } else {
            Some(
                report
                    .error
                    .unwrap_or_else(|| "strategy reported failure".to_string()),
            )
        };
        Self {
            success: report.success,
            quality: report.quality,
            output: report.output,
            failure,
        }
    }
}

/// 正在运行的一段策略
struct Segment {
    pattern: String,
    token: CancellationToken,
    events: mpsc::Receiver<StrategyEvent>,
    join: JoinHandle<Result<StrategyReport, String>>,
}

enum Step {
    Cancelled,
    TimedOut,
    Event(StrategyEvent),
    Feedback(IssueCategory),
    Proactive,
    Finished(Result<Result<StrategyReport, String>, JoinError>),
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn lock(execution: &Mutex<WorkflowExecution>) -> std::sync::MutexGuard<'_, WorkflowExecution> {
    execution.lock().unwrap_or_else(|e| e.into_inner())
}

impl ExecutionDriver {
    pub async fn drive(&self, input: &mut DriveInput) -> DriveResult {
        let (execution_id, initial) = {
            let exec = lock(&input.execution);
            (exec.execution_id.clone(), exec.current_pattern.clone())
        };
        let mut state = ExecutionState::new(&initial);
        let mut segment = match self.spawn_segment(&execution_id, &initial, input, None) {
            Ok(segment) => segment,
            Err(e) => return DriveResult::failed(e.to_string()),
        };

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);
        let mut proactive = self.proactive_every.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        // 已触发过切换评估的最新检查点，主动检查不重复评估同一个
        let mut last_assessed: Option<String> = None;

        loop {
            let step = tokio::select! {
                biased;
                _ = input.cancel.cancelled() => Step::Cancelled,
                _ = &mut deadline => Step::TimedOut,
                Some(event) = segment.events.recv() => Step::Event(event),
                Some(category) = input.feedback.recv() => Step::Feedback(category),
                _ = next_tick(&mut proactive) => Step::Proactive,
                joined = &mut segment.join => Step::Finished(joined),
            };

            match step {
                Step::Cancelled => {
                    segment.token.cancel();
                    tracing::info!("Execution {} cancelled on '{}'", execution_id, segment.pattern);
                    return DriveResult::failed(CAUSE_CANCELLED);
                }
                Step::TimedOut => {
                    segment.token.cancel();
                    tracing::warn!(
                        "Execution {} timed out after {:?} on '{}'",
                        execution_id,
                        self.timeout,
                        segment.pattern
                    );
                    return DriveResult::failed(CAUSE_TIMEOUT);
                }
                Step::Event(StrategyEvent::Checkpoint(checkpoint)) => {
                    let metric = self.record_checkpoint(input, &mut state, checkpoint);
                    if !metric.issues.is_empty() {
                        last_assessed = Some(metric.step_id.clone());
                        self.consider(
                            &execution_id,
                            input,
                            &mut segment,
                            &mut state,
                            Some(&metric),
                            &[],
                        );
                    }
                }
                Step::Event(StrategyEvent::Feedback(category)) | Step::Feedback(category) => {
                    let latest = input.handle.latest();
                    self.consider(
                        &execution_id,
                        input,
                        &mut segment,
                        &mut state,
                        latest.as_ref(),
                        &[category],
                    );
                }
                Step::Proactive => {
                    let Some(latest) = input.handle.latest() else {
                        continue;
                    };
                    if latest.issues.is_empty()
                        || last_assessed.as_deref() == Some(latest.step_id.as_str())
                    {
                        continue;
                    }
                    last_assessed = Some(latest.step_id.clone());
                    self.consider(
                        &execution_id,
                        input,
                        &mut segment,
                        &mut state,
                        Some(&latest),
                        &[],
                    );
                }
                Step::Finished(joined) => {
                    // 策略结束前发出的检查点仍按顺序计入
                    while let Ok(event) = segment.events.try_recv() {
                        if let StrategyEvent::Checkpoint(checkpoint) = event {
                            self.record_checkpoint(input, &mut state, checkpoint);
                        }
                    }
                    return match joined {
                        Ok(Ok(report)) => DriveResult::from_report(report),
                        Ok(Err(e)) => DriveResult::failed(e),
                        Err(e) => DriveResult::failed(format!("strategy task failed: {}", e)),
                    };
                }
            }
        }
    }

    fn record_checkpoint(
        &self,
        input: &DriveInput,
        state: &mut ExecutionState,
        checkpoint: ExecutionCheckpoint,
    ) -> CheckpointMetric {
        state.absorb(checkpoint.progress, &checkpoint.state);
        let metric = self.monitor.capture_checkpoint(&input.handle, checkpoint);
        let metrics = self.monitor.get_metrics(&input.handle);
        lock(&input.execution).metrics = metrics;
        metric
    }

    fn spawn_segment(
        &self,
        execution_id: &str,
        pattern: &str,
        input: &DriveInput,
        resume: Option<ExecutionState>,
    ) -> Result<Segment, HiveError> {
        let registered = self.registry.get(pattern).ok_or_else(|| {
            HiveError::NotAvailable(format!("pattern '{}' is not registered", pattern))
        })?;
        let token = input.cancel.child_token();
        let (tx, events) = mpsc::channel(EVENT_BUFFER);
        let ctx = StrategyContext::new(
            execution_id.to_string(),
            pattern,
            input.request.clone(),
            resume,
            token.clone(),
            tx,
        )
        .with_clock(self.clock.clone());
        let strategy = registered.strategy.clone();
        let join = tokio::spawn(async move { strategy.run(ctx).await });
        tracing::debug!("Execution {} running strategy '{}'", execution_id, pattern);
        Ok(Segment {
            pattern: pattern.to_string(),
            token,
            events,
            join,
        })
    }

    fn set_status(input: &DriveInput, status: ExecutionStatus) {
        lock(&input.execution).status = status;
    }

    /// 评估并在需要时切换；切换失败时保持原策略继续运行
    fn consider(
        &self,
        execution_id: &str,
        input: &DriveInput,
        segment: &mut Segment,
        state: &mut ExecutionState,
        metric: Option<&CheckpointMetric>,
        feedback: &[IssueCategory],
    ) {
        let assessment = self.engine.assess_adaptation_need(metric, state, feedback);
        if !assessment.should_adapt {
            if !assessment.categories.is_empty() {
                tracing::debug!(
                    "Execution {} keeps '{}': {}",
                    execution_id,
                    state.current_phase,
                    assessment.reason
                );
            }
            return;
        }

        Self::set_status(input, ExecutionStatus::Adapting);
        let from = state.current_phase.clone();
        let adaptation = match self.engine.generate_adaptation(
            &from,
            &assessment.reason,
            &assessment.categories,
            state,
        ) {
            Ok(adaptation) => adaptation,
            Err(e) => {
                tracing::warn!("Execution {} cannot plan adaptation: {}", execution_id, e);
                Self::set_status(input, ExecutionStatus::Running);
                return;
            }
        };

        let switched = self
            .engine
            .transition(&from, &adaptation.to_pattern, state)
            .and_then(|result| {
                let next = self.spawn_segment(
                    execution_id,
                    &adaptation.to_pattern,
                    input,
                    Some(result.new_state.clone()),
                )?;
                Ok((result, next))
            });

        match switched {
            Ok((result, next)) => {
                segment.token.cancel();
                *segment = next;
                *state = result.new_state;
                let adaptation = adaptation.with_outcome(true);
                self.monitor.record_adaptation(&input.handle, adaptation.clone());
                let metrics = self.monitor.get_metrics(&input.handle);
                {
                    let mut exec = lock(&input.execution);
                    exec.current_pattern = adaptation.to_pattern.clone();
                    exec.metrics = metrics;
                    exec.adaptations.push(adaptation.clone());
                }
                tracing::info!(
                    "Execution {} adapted {} -> {} ({:?} urgency, {} bytes handed over{})",
                    execution_id,
                    adaptation.from_pattern,
                    adaptation.to_pattern,
                    assessment.urgency,
                    result.transfer_bytes,
                    if result.lossy { ", lossy" } else { "" }
                );
            }
            Err(e) => {
                tracing::warn!(
                    "Execution {} stays on '{}', transition to '{}' failed: {}",
                    execution_id,
                    from,
                    adaptation.to_pattern,
                    e
                );
            }
        }
        Self::set_status(input, ExecutionStatus::Running);
    }
}
