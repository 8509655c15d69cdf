//! 执行监控：检查点、基线比较、资源采样、趋势

pub mod baseline;
pub mod execution;
pub mod probe;
pub mod ring;
pub mod types;

pub use execution::{ExecutionMonitor, MonitorHandle};
pub use probe::{FixedProbe, ProbeReading, ResourceProbe, SystemProbe};
pub use types::{
    BaselineBreach, BaselineSource, BreachMetric, CheckpointMetric, DetailedMetrics,
    ExecutionCheckpoint, PerformanceBaseline, PerformanceTrend, ResourceSample,
};
