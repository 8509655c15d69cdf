//! 编排器：选择 -> 监控下执行 -> 中途切换 -> 记录结果 -> 定时学习
//!
//! 每个执行由独立的驱动任务负责，编排器只保存其共享快照、取消 token 与反馈通道；
//! 执行数受信号量限制（max_concurrent）。结果写入有上限的历史，并尽力回写历史性能库与知识图谱。
//! 学习定时器是编排器生命周期内的一个后台任务，shutdown 时随关闭 token 一起停止。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::adaptation::{AdaptationEngine, IssueCategory};
use crate::config::AppConfig;
use crate::core::builder::Collaborators;
use crate::core::driver::{DriveInput, ExecutionDriver};
use crate::core::history::{HistoryPersistence, OutcomeHistory};
use crate::core::{Clock, HiveError};
use crate::knowledge::{best_effort, PerformanceDataPoint};
use crate::learning::{LearningInsights, LearningSchedule, LearningSystem};
use crate::monitor::{ExecutionMonitor, ResourceProbe};
use crate::patterns::PatternRegistry;
use crate::selection::PatternSelector;
use crate::workflow::{
    ExecutionId, ExecutionStatus, PatternSelection, WorkflowExecution, WorkflowMetrics,
    WorkflowOutcome, WorkflowRequest,
};

/// 外部反馈缓冲
const FEEDBACK_BUFFER: usize = 16;
/// shutdown 等待进行中执行收尾的上限
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// 各协作方的连通性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Connectivity {
    pub knowledge_graph: bool,
    pub historical_store: bool,
    pub insight_store: bool,
}

/// 健康快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub active_executions: usize,
    /// 历史结果的平均效率
    pub average_efficiency: f64,
    /// active / max_concurrent
    pub load_ratio: f64,
    pub connectivity: Connectivity,
}

/// 已提交的执行；wait 等待其结束
pub struct ExecutionTicket {
    pub execution_id: ExecutionId,
    pub selection: PatternSelection,
    join: JoinHandle<WorkflowExecution>,
}

impl ExecutionTicket {
    pub async fn wait(self) -> Result<WorkflowExecution, HiveError> {
        self.join
            .await
            .map_err(|e| HiveError::System(format!("execution task failed: {}", e)))
    }
}

struct ActiveExecution {
    snapshot: Arc<Mutex<WorkflowExecution>>,
    cancel: CancellationToken,
    feedback: mpsc::Sender<IssueCategory>,
}

struct Inner {
    config: AppConfig,
    registry: Arc<PatternRegistry>,
    selector: PatternSelector,
    monitor: Arc<ExecutionMonitor>,
    engine: Arc<AdaptationEngine>,
    learning: LearningSystem,
    driver: ExecutionDriver,
    collaborators: Collaborators,
    history: Mutex<OutcomeHistory>,
    persistence: Option<HistoryPersistence>,
    active: Mutex<HashMap<ExecutionId, ActiveExecution>>,
    permits: Arc<Semaphore>,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
    /// 学习周期互斥（定时与手动不重叠）
    learning_lock: tokio::sync::Mutex<()>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Orchestrator {
    /// 由 OrchestratorBuilder 调用
    pub(crate) fn assemble(
        config: AppConfig,
        registry: Arc<PatternRegistry>,
        collaborators: Collaborators,
        probe: Arc<dyn ResourceProbe>,
        clock: Arc<dyn Clock>,
        shutdown: CancellationToken,
    ) -> Self {
        let timeout_ms = config.selection.collaborator_timeout_ms;
        let selector = PatternSelector::new(
            registry.clone(),
            collaborators.knowledge_graph.clone(),
            collaborators.history_store.clone(),
            config.selection.clone(),
        );
        let monitor = Arc::new(ExecutionMonitor::new(
            config.monitor.clone(),
            registry.clone(),
            collaborators.history_store.clone(),
            probe,
            clock.clone(),
            timeout_ms,
        ));
        let engine = Arc::new(AdaptationEngine::new(
            config.adaptation.clone(),
            registry.clone(),
            clock.clone(),
        ));
        let learning = LearningSystem::new(
            config.learning.clone(),
            registry.clone(),
            engine.clone(),
            collaborators.insight_store.clone(),
            clock.clone(),
            timeout_ms,
        );
        let proactive_every = match config.adaptation.proactive_check_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let driver = ExecutionDriver {
            registry: registry.clone(),
            monitor: monitor.clone(),
            engine: engine.clone(),
            timeout: Duration::from_secs(config.orchestrator.execution_timeout_secs.max(1)),
            proactive_every,
            clock: clock.clone(),
        };

        let mut history = OutcomeHistory::new(config.orchestrator.history_cap);
        let persistence = config
            .orchestrator
            .history_path
            .as_ref()
            .map(HistoryPersistence::new);
        if let Some(store) = &persistence {
            match store.load() {
                Ok(outcomes) => {
                    if !outcomes.is_empty() {
                        tracing::info!(
                            "Restored {} outcomes from {}",
                            outcomes.len(),
                            store.path().display()
                        );
                    }
                    history.restore(outcomes);
                }
                Err(e) => tracing::warn!(
                    "Failed to load history from {}: {}",
                    store.path().display(),
                    e
                ),
            }
        }

        let permits = Arc::new(Semaphore::new(config.orchestrator.max_concurrent.max(1)));
        Self {
            inner: Arc::new(Inner {
                config,
                registry,
                selector,
                monitor,
                engine,
                learning,
                driver,
                collaborators,
                history: Mutex::new(history),
                persistence,
                active: Mutex::new(HashMap::new()),
                permits,
                clock,
                shutdown,
                learning_lock: tokio::sync::Mutex::new(()),
                timer: Mutex::new(None),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<PatternRegistry> {
        &self.inner.registry
    }

    pub fn selector(&self) -> &PatternSelector {
        &self.inner.selector
    }

    pub fn monitor(&self) -> &Arc<ExecutionMonitor> {
        &self.inner.monitor
    }

    pub fn engine(&self) -> &Arc<AdaptationEngine> {
        &self.inner.engine
    }

    pub fn learning(&self) -> &LearningSystem {
        &self.inner.learning
    }

    /// 提交并等待结束
    pub async fn execute(&self, request: WorkflowRequest) -> Result<WorkflowExecution, HiveError> {
        self.submit(request).await?.wait().await
    }

    /// 选择模式、启动监控并在后台运行；返回时执行已登记为 active
    pub async fn submit(&self, request: WorkflowRequest) -> Result<ExecutionTicket, HiveError> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(HiveError::NotAvailable(
                "orchestrator is shutting down".into(),
            ));
        }
        let selection = inner.selector.select_pattern(&request).await?;
        let permit = inner
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| HiveError::System("execution slots are closed".into()))?;

        let execution_id = Uuid::new_v4().to_string();
        let handle = inner
            .monitor
            .start_monitoring(&execution_id, &selection)
            .await?;
        let execution = WorkflowExecution {
            execution_id: execution_id.clone(),
            request: request.clone(),
            selection: selection.clone(),
            current_pattern: selection.selected_pattern.clone(),
            status: ExecutionStatus::Running,
            adaptations: Vec::new(),
            metrics: WorkflowMetrics::default(),
            started_at: handle.started_at(),
            completed_at: None,
            failure_cause: None,
            output: None,
        };
        let snapshot = Arc::new(Mutex::new(execution));
        let cancel = inner.shutdown.child_token();
        let (feedback_tx, feedback_rx) = mpsc::channel(FEEDBACK_BUFFER);
        lock(&inner.active).insert(
            execution_id.clone(),
            ActiveExecution {
                snapshot: snapshot.clone(),
                cancel: cancel.clone(),
                feedback: feedback_tx,
            },
        );
        tracing::info!(
            "Execution {} started on '{}' (score {:.3}, confidence {:.2})",
            execution_id,
            selection.selected_pattern,
            selection.score,
            selection.confidence
        );

        let input = DriveInput {
            execution: snapshot,
            request: Arc::new(request),
            handle,
            cancel,
            feedback: feedback_rx,
        };
        let task_inner = inner.clone();
        let join = tokio::spawn(async move {
            let execution = task_inner.run_execution(input).await;
            drop(permit);
            execution
        });

        Ok(ExecutionTicket {
            execution_id,
            selection,
            join,
        })
    }

    /// 取消进行中的执行；结果仍记为失败（原因 cancelled）
    pub fn cancel(&self, execution_id: &str) -> Result<(), HiveError> {
        let active = lock(&self.inner.active);
        let entry = active.get(execution_id).ok_or_else(|| {
            HiveError::NotAvailable(format!("execution '{}' is not active", execution_id))
        })?;
        tracing::info!("Cancelling execution {}", execution_id);
        entry.cancel.cancel();
        Ok(())
    }

    /// 外部反馈：检测到的问题类别，交给该执行的切换评估
    pub fn report_feedback(&self, execution_id: &str, category: IssueCategory) -> Result<(), HiveError> {
        let active = lock(&self.inner.active);
        let entry = active.get(execution_id).ok_or_else(|| {
            HiveError::NotAvailable(format!("execution '{}' is not active", execution_id))
        })?;
        match entry.feedback.try_send(category) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Feedback for {} dropped, queue full", execution_id);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(HiveError::NotAvailable(format!(
                "execution '{}' is finishing",
                execution_id
            ))),
        }
    }

    /// 进行中执行的当前快照
    pub fn status(&self, execution_id: &str) -> Option<WorkflowExecution> {
        lock(&self.inner.active)
            .get(execution_id)
            .map(|entry| lock(&entry.snapshot).clone())
    }

    pub fn active_count(&self) -> usize {
        lock(&self.inner.active).len()
    }

    /// 历史结果（按时间顺序）
    pub fn history(&self) -> Vec<WorkflowOutcome> {
        lock(&self.inner.history).all()
    }

    pub async fn get_health(&self) -> HealthSnapshot {
        let inner = &self.inner;
        let active_executions = self.active_count();
        let average_efficiency = lock(&inner.history).average_efficiency();
        let max = inner.config.orchestrator.max_concurrent.max(1);
        let timeout = Duration::from_millis(inner.config.selection.collaborator_timeout_ms);
        let c = &inner.collaborators;
        let (knowledge_graph, historical_store, insight_store) = tokio::join!(
            tokio::time::timeout(timeout, c.knowledge_graph.ping()),
            tokio::time::timeout(timeout, c.history_store.ping()),
            tokio::time::timeout(timeout, c.insight_store.ping()),
        );
        HealthSnapshot {
            active_executions,
            average_efficiency,
            load_ratio: active_executions as f64 / max as f64,
            connectivity: Connectivity {
                knowledge_graph: knowledge_graph.unwrap_or(false),
                historical_store: historical_store.unwrap_or(false),
                insight_store: insight_store.unwrap_or(false),
            },
        }
    }

    /// 手动学习：对给定结果学习并立即回写
    pub async fn learn_now(&self, outcomes: &[WorkflowOutcome]) -> Result<LearningInsights, HiveError> {
        self.inner.learn_and_apply(outcomes).await
    }

    /// 对历史中最近一批未学习的结果学习；不足 min_batch_size 时返回 None
    pub async fn learn_from_history(&self) -> Result<Option<LearningInsights>, HiveError> {
        self.inner.learn_from_history().await
    }

    /// 启动学习定时器（manual 调度或学习关闭时不启动）
    pub fn start(&self) {
        let inner = &self.inner;
        if !inner.config.learning.enabled {
            tracing::info!("Learning disabled, no learning timer");
            return;
        }
        let schedule = LearningSchedule::new(&inner.config.learning, inner.clock.now());
        let Some(poll) = schedule.poll_interval() else {
            tracing::info!("Learning schedule is manual, no learning timer");
            return;
        };
        let mut timer = lock(&inner.timer);
        if timer.is_some() {
            return;
        }
        tracing::info!(
            "Learning timer started ({:?} schedule, polling every {:?})",
            schedule.schedule(),
            poll
        );
        let task_inner = inner.clone();
        *timer = Some(tokio::spawn(async move {
            task_inner.learning_loop(schedule, poll).await;
        }));
    }

    /// 停止定时器、取消进行中的执行、等待其记录结果后落盘历史
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        tracing::info!("Orchestrator shutting down ({} active)", self.active_count());
        inner.shutdown.cancel();
        let timer = lock(&inner.timer).take();
        if let Some(timer) = timer {
            let _ = timer.await;
        }

        let slots = inner.config.orchestrator.max_concurrent.max(1) as u32;
        match tokio::time::timeout(DRAIN_TIMEOUT, inner.permits.acquire_many(slots)).await {
            Ok(Ok(_all)) => {}
            _ => tracing::warn!("Active executions did not finish within {:?}", DRAIN_TIMEOUT),
        }
        inner.save_history();
        tracing::info!("Orchestrator stopped");
    }
}

impl Inner {
    async fn run_execution(&self, mut input: DriveInput) -> WorkflowExecution {
        let result = self.driver.drive(&mut input).await;
        input.handle.stop();

        let metrics = self.monitor.get_metrics(&input.handle);
        let execution = {
            let mut exec = lock(&input.execution);
            exec.metrics = metrics;
            exec.status = if result.success {
                ExecutionStatus::Completed
            } else {
                ExecutionStatus::Failed
            };
            exec.completed_at = Some(self.clock.now());
            exec.failure_cause = result.failure.clone();
            exec.output = result.output.clone();
            exec.clone()
        };

        let outcome = WorkflowOutcome::from_execution(&execution, result.success, result.quality);
        self.record_outcome(outcome).await;
        lock(&self.active).remove(&execution.execution_id);

        match &execution.failure_cause {
            None => tracing::info!(
                "Execution {} completed on '{}' in {:.2}s ({} adaptations)",
                execution.execution_id,
                execution.current_pattern,
                execution.metrics.total_execution_secs,
                execution.adaptations.len()
            ),
            Some(cause) => tracing::warn!(
                "Execution {} failed on '{}': {}",
                execution.execution_id,
                execution.current_pattern,
                cause
            ),
        }
        execution
    }

    /// 结果入历史，并尽力回写历史性能库 / 知识图谱
    async fn record_outcome(&self, outcome: WorkflowOutcome) {
        let timeout_ms = self.config.selection.collaborator_timeout_ms;
        let point = PerformanceDataPoint {
            timestamp: outcome.completed_at,
            execution_id: outcome.execution_id.clone(),
            pattern: outcome.pattern_used.clone(),
            duration_secs: outcome.metrics.total_execution_secs,
            memory_mb: outcome.metrics.average_memory_mb,
            api_calls: outcome.metrics.total_api_calls,
            quality: outcome.output_quality(),
            efficiency: outcome.metrics.efficiency_score,
            success: outcome.success,
        };
        best_effort(
            "performance write-back",
            timeout_ms,
            self.collaborators.history_store.store_metrics(point),
        )
        .await;
        if outcome.success {
            best_effort(
                "knowledge graph write-back",
                timeout_ms,
                self.collaborators.knowledge_graph.record_outcome(
                    &outcome.request.description,
                    &outcome.pattern_used,
                    outcome.output_quality(),
                ),
            )
            .await;
        }
        lock(&self.history).push(outcome);
    }

    async fn learn_and_apply(&self, outcomes: &[WorkflowOutcome]) -> Result<LearningInsights, HiveError> {
        let _cycle = self.learning_lock.lock().await;
        let insights = self.learning.learn_from_outcomes(outcomes).await?;
        self.learning.apply_learnings(&insights)?;
        Ok(insights)
    }

    async fn learn_from_history(&self) -> Result<Option<LearningInsights>, HiveError> {
        let learning = &self.config.learning;
        let batch = lock(&self.history).unlearned_batch(learning.batch_size);
        if batch.len() < learning.min_batch_size.max(1) {
            tracing::debug!(
                "Skipping learning cycle: {} new outcomes, need {}",
                batch.len(),
                learning.min_batch_size
            );
            return Ok(None);
        }
        let insights = self.learn_and_apply(&batch).await?;
        lock(&self.history).mark_learned(batch.len());
        self.save_history();
        Ok(Some(insights))
    }

    async fn learning_loop(&self, mut schedule: LearningSchedule, poll: Duration) {
        let mut ticker = tokio::time::interval_at(Instant::now() + poll, poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let now = self.clock.now();
                    if !schedule.should_run_now(now) {
                        continue;
                    }
                    match self.learn_from_history().await {
                        Ok(Some(insights)) => {
                            tracing::info!(
                                "Scheduled learning produced {} insights",
                                insights.insight_count()
                            );
                            schedule.record_successful_run(now);
                        }
                        Ok(None) => schedule.record_skipped_run(now),
                        Err(e) => {
                            tracing::warn!("Scheduled learning failed: {}", e);
                            schedule.record_failed_run(now);
                        }
                    }
                }
            }
        }
        tracing::info!("Learning timer stopped");
    }

    fn save_history(&self) {
        let Some(store) = &self.persistence else {
            return;
        };
        let outcomes = lock(&self.history).all();
        if let Err(e) = store.save(&outcomes) {
            tracing::warn!("Failed to save history to {}: {}", store.path().display(), e);
        }
    }
}
