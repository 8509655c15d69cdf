//! 执行监控器
//!
//! 每个执行一个 MonitorHandle：启动时确定基线，后台采样任务按固定周期写入资源环形缓冲；
//! 策略上报的检查点按到达顺序转换为 CheckpointMetric 并与基线比较，超出容差只记为问题（数据），不报错。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::adaptation::PatternAdaptation;
use crate::config::MonitorSection;
use crate::core::{Clock, HiveError};
use crate::knowledge::HistoricalPerformanceStore;
use crate::monitor::baseline::load_baseline;
use crate::monitor::ring::Ring;
use crate::monitor::{
    BaselineBreach, BreachMetric, CheckpointMetric, DetailedMetrics, ExecutionCheckpoint,
    PerformanceBaseline, PerformanceTrend, ResourceProbe, ResourceSample,
};
use crate::patterns::PatternRegistry;
use crate::workflow::{PatternSelection, WorkflowMetrics};

/// 超出容差倍数的上限（质量接近 0 时避免无穷大）
const MAX_SEVERITY: f64 = 10.0;

struct MonitorState {
    checkpoints: Vec<CheckpointMetric>,
    samples: Ring<ResourceSample>,
    efficiency: Ring<f64>,
    quality: Ring<f64>,
    speed: Ring<f64>,
    adaptations: Vec<PatternAdaptation>,
    /// 策略切换后调用计数从 0 重新开始，这里累加之前各段的总数
    api_offset: u64,
    last_reported_calls: u64,
    calls_at_last_sample: u64,
    last_sample_at: Option<DateTime<Utc>>,
}

impl MonitorState {
    fn new(config: &MonitorSection) -> Self {
        Self {
            checkpoints: Vec::new(),
            samples: Ring::new(config.max_resource_samples),
            efficiency: Ring::new(config.max_trend_points),
            quality: Ring::new(config.max_trend_points),
            speed: Ring::new(config.max_trend_points),
            adaptations: Vec::new(),
            api_offset: 0,
            last_reported_calls: 0,
            calls_at_last_sample: 0,
            last_sample_at: None,
        }
    }

    fn total_calls(&self) -> u64 {
        self.api_offset + self.last_reported_calls
    }

    fn record_calls(&mut self, reported: u64) -> u64 {
        if reported < self.last_reported_calls {
            self.api_offset += self.last_reported_calls;
        }
        self.last_reported_calls = reported;
        self.total_calls()
    }

    fn push_sample(&mut self, probe: &dyn ResourceProbe, now: DateTime<Utc>) {
        let reading = probe.sample();
        let total = self.total_calls();
        let api_call_rate = match self.last_sample_at {
            Some(prev) => {
                let elapsed = (now - prev).num_milliseconds() as f64 / 1000.0;
                if elapsed > 0.0 {
                    total.saturating_sub(self.calls_at_last_sample) as f64 / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        self.calls_at_last_sample = total;
        self.last_sample_at = Some(now);
        self.samples.push(ResourceSample {
            timestamp: now,
            memory_mb: reading.memory_mb,
            cpu_percent: reading.cpu_percent,
            api_call_rate,
            network_kb: reading.network_kb,
        });
    }
}

/// 单个执行的监控句柄；drop 或 stop 时停止后台采样
pub struct MonitorHandle {
    execution_id: String,
    baseline: PerformanceBaseline,
    started_at: DateTime<Utc>,
    state: Arc<Mutex<MonitorState>>,
    cancel: CancellationToken,
}

impl MonitorHandle {
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn baseline(&self) -> &PerformanceBaseline {
        &self.baseline
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// 最近一个检查点指标
    pub fn latest(&self) -> Option<CheckpointMetric> {
        self.lock().checkpoints.last().cloned()
    }

    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!("Stopping sampler for execution {}", self.execution_id);
            self.cancel.cancel();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub struct ExecutionMonitor {
    config: MonitorSection,
    registry: Arc<PatternRegistry>,
    history: Arc<dyn HistoricalPerformanceStore>,
    probe: Arc<dyn ResourceProbe>,
    clock: Arc<dyn Clock>,
    collaborator_timeout_ms: u64,
}

impl ExecutionMonitor {
    pub fn new(
        config: MonitorSection,
        registry: Arc<PatternRegistry>,
        history: Arc<dyn HistoricalPerformanceStore>,
        probe: Arc<dyn ResourceProbe>,
        clock: Arc<dyn Clock>,
        collaborator_timeout_ms: u64,
    ) -> Self {
        Self {
            config,
            registry,
            history,
            probe,
            clock,
            collaborator_timeout_ms,
        }
    }

    /// 加载基线并启动后台采样；被选模式未注册时返回 NotAvailable
    pub async fn start_monitoring(
        &self,
        execution_id: &str,
        selection: &PatternSelection,
    ) -> Result<MonitorHandle, HiveError> {
        let pattern = self.registry.get(&selection.selected_pattern).ok_or_else(|| {
            HiveError::NotAvailable(format!(
                "pattern '{}' is not registered",
                selection.selected_pattern
            ))
        })?;
        let baseline = load_baseline(
            self.history.as_ref(),
            &pattern.profile,
            self.config.baseline_window_days,
            self.collaborator_timeout_ms,
        )
        .await;
        tracing::info!(
            "Monitoring execution {} on '{}' (baseline {:.1}s, {:.0}MB, source {:?})",
            execution_id,
            baseline.pattern,
            baseline.duration_secs,
            baseline.memory_mb,
            baseline.source
        );

        let state = Arc::new(Mutex::new(MonitorState::new(&self.config)));
        let cancel = CancellationToken::new();
        self.spawn_sampler(state.clone(), cancel.clone());

        Ok(MonitorHandle {
            execution_id: execution_id.to_string(),
            baseline,
            started_at: self.clock.now(),
            state,
            cancel,
        })
    }

    fn spawn_sampler(&self, state: Arc<Mutex<MonitorState>>, cancel: CancellationToken) {
        let probe = self.probe.clone();
        let clock = self.clock.clone();
        let period = Duration::from_secs(self.config.sample_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = clock.now();
                        state
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .push_sample(probe.as_ref(), now);
                    }
                }
            }
        });
    }

    /// 检查点 -> 指标；必须按到达顺序调用
    pub fn capture_checkpoint(
        &self,
        handle: &MonitorHandle,
        checkpoint: ExecutionCheckpoint,
    ) -> CheckpointMetric {
        let baseline = &handle.baseline;
        let duration_secs =
            ((checkpoint.timestamp - handle.started_at).num_milliseconds() as f64 / 1000.0).max(0.0);

        let mut state = handle.lock();
        let memory_mb = match checkpoint.memory_mb {
            Some(m) => m,
            None => match state.samples.last() {
                Some(sample) => sample.memory_mb,
                None => self.probe.sample().memory_mb,
            },
        };
        let api_calls = state.record_calls(checkpoint.api_calls);
        let estimated_quality = checkpoint.quality.unwrap_or(baseline.quality).clamp(0.0, 1.0);

        let breaches = self.compare(baseline, duration_secs, memory_mb, estimated_quality);
        let issues = breaches.iter().map(|b| self.describe(b)).collect::<Vec<_>>();
        let efficiency = (relative_efficiency(duration_secs, baseline.duration_secs)
            + relative_efficiency(memory_mb, baseline.memory_mb))
            / 2.0;

        state.efficiency.push(efficiency);
        state.quality.push(estimated_quality);
        state.speed.push(if duration_secs > 0.0 {
            checkpoint.progress / duration_secs
        } else {
            0.0
        });

        let metric = CheckpointMetric {
            step_id: checkpoint.step_id,
            timestamp: checkpoint.timestamp,
            progress: checkpoint.progress,
            duration_secs,
            memory_mb,
            api_calls,
            estimated_quality,
            efficiency,
            breaches,
            issues,
        };
        if !metric.issues.is_empty() {
            tracing::debug!(
                "Execution {} checkpoint '{}' issues: {}",
                handle.execution_id,
                metric.step_id,
                metric.issues.join("; ")
            );
        }
        state.checkpoints.push(metric.clone());
        metric
    }

    fn compare(
        &self,
        baseline: &PerformanceBaseline,
        duration_secs: f64,
        memory_mb: f64,
        quality: f64,
    ) -> Vec<BaselineBreach> {
        let mut breaches = Vec::new();
        if baseline.duration_secs > 0.0
            && duration_secs > baseline.duration_secs * self.config.duration_tolerance
        {
            let ratio = duration_secs / baseline.duration_secs;
            breaches.push(BaselineBreach {
                metric: BreachMetric::Duration,
                actual: duration_secs,
                expected: baseline.duration_secs,
                ratio,
                severity: (ratio / self.config.duration_tolerance).min(MAX_SEVERITY),
            });
        }
        if baseline.memory_mb > 0.0 && memory_mb > baseline.memory_mb * self.config.memory_tolerance
        {
            let ratio = memory_mb / baseline.memory_mb;
            breaches.push(BaselineBreach {
                metric: BreachMetric::Memory,
                actual: memory_mb,
                expected: baseline.memory_mb,
                ratio,
                severity: (ratio / self.config.memory_tolerance).min(MAX_SEVERITY),
            });
        }
        if baseline.quality > 0.0 && quality < baseline.quality * self.config.quality_tolerance {
            let ratio = baseline.quality / quality.max(f64::EPSILON);
            breaches.push(BaselineBreach {
                metric: BreachMetric::Quality,
                actual: quality,
                expected: baseline.quality,
                ratio,
                severity: (ratio * self.config.quality_tolerance).min(MAX_SEVERITY),
            });
        }
        breaches
    }

    fn describe(&self, breach: &BaselineBreach) -> String {
        match breach.metric {
            BreachMetric::Duration => format!(
                "duration exceeds baseline by {:.0}%",
                (self.config.duration_tolerance - 1.0) * 100.0
            ),
            BreachMetric::Memory => format!(
                "memory exceeds baseline by {:.0}%",
                (self.config.memory_tolerance - 1.0) * 100.0
            ),
            BreachMetric::Quality => format!(
                "quality below {:.0}% of expected",
                self.config.quality_tolerance * 100.0
            ),
        }
    }

    pub fn record_adaptation(&self, handle: &MonitorHandle, adaptation: PatternAdaptation) {
        handle.lock().adaptations.push(adaptation);
    }

    /// 汇总为学习用的 WorkflowMetrics
    pub fn get_metrics(&self, handle: &MonitorHandle) -> WorkflowMetrics {
        let state = handle.lock();
        let elapsed =
            ((self.clock.now() - handle.started_at).num_milliseconds() as f64 / 1000.0).max(0.0);
        let last_duration = state
            .checkpoints
            .last()
            .map(|c| c.duration_secs)
            .unwrap_or(0.0);
        let total_execution_secs = elapsed.max(last_duration);

        let average_memory_mb = if !state.checkpoints.is_empty() {
            mean(state.checkpoints.iter().map(|c| c.memory_mb))
        } else {
            mean(state.samples.iter().map(|s| s.memory_mb))
        };
        let average_quality = if state.checkpoints.is_empty() {
            0.0
        } else {
            mean(state.checkpoints.iter().map(|c| c.estimated_quality))
        };
        let efficiency_score = if state.checkpoints.is_empty() {
            relative_efficiency(total_execution_secs, handle.baseline.duration_secs)
        } else {
            mean(state.checkpoints.iter().map(|c| c.efficiency))
        };

        WorkflowMetrics {
            total_execution_secs,
            average_memory_mb,
            total_api_calls: state.total_calls(),
            average_quality,
            efficiency_score,
            adaptation_count: state.adaptations.len() as u32,
            checkpoint_timestamps: state.checkpoints.iter().map(|c| c.timestamp).collect(),
        }
    }

    pub fn get_detailed_metrics(&self, handle: &MonitorHandle) -> DetailedMetrics {
        let state = handle.lock();
        DetailedMetrics {
            checkpoint_metrics: state.checkpoints.clone(),
            adaptation_events: state.adaptations.clone(),
            resource_samples: state.samples.to_vec(),
            trend: PerformanceTrend {
                efficiency: state.efficiency.as_deque().clone(),
                quality: state.quality.as_deque().clone(),
                speed: state.speed.as_deque().clone(),
            },
        }
    }
}

/// max(0, 1 − (actual − baseline) / baseline)；基线缺失时视为 1
fn relative_efficiency(actual: f64, baseline: f64) -> f64 {
    if baseline <= 0.0 {
        return 1.0;
    }
    (1.0 - (actual - baseline) / baseline).max(0.0)
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}
