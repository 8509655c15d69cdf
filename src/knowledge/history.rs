//! 历史性能库实现
//!
//! InMemoryPerformanceStore 保存最近的性能数据点（有上限），按模式汇总成功率 / 时长 / 质量；
//! 置信度 = 成功率 × min(1, 样本数 / 10)，样本少时不轻信。

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::core::{Clock, CollaboratorError, SystemClock};
use crate::knowledge::{HistoricalPerformanceStore, PatternKnowledge, PerformanceDataPoint};

/// 样本数达到该值时置信度不再打折
const FULL_CONFIDENCE_SAMPLES: f64 = 10.0;

/// 空实现：无历史
#[derive(Debug, Clone, Default)]
pub struct NoopPerformanceStore;

#[async_trait]
impl HistoricalPerformanceStore for NoopPerformanceStore {
    async fn query_pattern_knowledge(
        &self,
        _patterns: &[String],
    ) -> Result<Vec<PatternKnowledge>, CollaboratorError> {
        Ok(Vec::new())
    }

    async fn get_performance_history(
        &self,
        _days: u32,
    ) -> Result<Vec<PerformanceDataPoint>, CollaboratorError> {
        Ok(Vec::new())
    }

    async fn store_metrics(&self, _point: PerformanceDataPoint) -> Result<(), CollaboratorError> {
        Ok(())
    }

    async fn ping(&self) -> bool {
        false
    }
}

#[derive(Clone)]
pub struct InMemoryPerformanceStore {
    points: Arc<RwLock<Vec<PerformanceDataPoint>>>,
    max_points: usize,
    clock: Arc<dyn Clock>,
}

impl InMemoryPerformanceStore {
    pub fn new(max_points: usize) -> Self {
        Self {
            points: Arc::new(RwLock::new(Vec::new())),
            max_points,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn push(&self, point: PerformanceDataPoint) {
        let mut points = self.points.write().unwrap_or_else(|e| e.into_inner());
        points.push(point);
        let n = points.len();
        if n > self.max_points {
            points.drain(0..n - self.max_points);
        }
    }

    pub fn len(&self) -> usize {
        self.points.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryPerformanceStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl HistoricalPerformanceStore for InMemoryPerformanceStore {
    async fn query_pattern_knowledge(
        &self,
        patterns: &[String],
    ) -> Result<Vec<PatternKnowledge>, CollaboratorError> {
        let points = self.points.read().unwrap_or_else(|e| e.into_inner());
        let mut grouped: HashMap<&str, Vec<&PerformanceDataPoint>> = HashMap::new();
        for p in points.iter() {
            if patterns.iter().any(|name| name == &p.pattern) {
                grouped.entry(p.pattern.as_str()).or_default().push(p);
            }
        }

        let mut knowledge: Vec<PatternKnowledge> = grouped
            .into_iter()
            .map(|(pattern, samples)| {
                let n = samples.len() as f64;
                let successes = samples.iter().filter(|p| p.success).count() as f64;
                let success_rate = successes / n;
                PatternKnowledge {
                    pattern: pattern.to_string(),
                    confidence_score: success_rate * (n / FULL_CONFIDENCE_SAMPLES).min(1.0),
                    average_duration_secs: samples.iter().map(|p| p.duration_secs).sum::<f64>() / n,
                    success_rate,
                    quality_score: samples.iter().map(|p| p.quality).sum::<f64>() / n,
                    sample_count: samples.len(),
                }
            })
            .collect();
        knowledge.sort_by(|a, b| a.pattern.cmp(&b.pattern));
        Ok(knowledge)
    }

    async fn get_performance_history(
        &self,
        days: u32,
    ) -> Result<Vec<PerformanceDataPoint>, CollaboratorError> {
        let cutoff = self.clock.now() - chrono::Duration::days(days as i64);
        let points = self.points.read().unwrap_or_else(|e| e.into_inner());
        Ok(points
            .iter()
            .filter(|p| p.timestamp >= cutoff)
            .cloned()
            .collect())
    }

    async fn store_metrics(&self, point: PerformanceDataPoint) -> Result<(), CollaboratorError> {
        self.push(point);
        Ok(())
    }
}
