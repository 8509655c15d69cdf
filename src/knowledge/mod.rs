//! 外部知识协作方：知识图谱、历史性能库、洞察存储
//!
//! 三者都是尽力而为：调用点通过 best_effort 加超时，失败只记 warn 并降级为空结果，不影响选择 / 学习主流程。

pub mod graph;
pub mod history;
pub mod insights;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::CollaboratorError;
use crate::learning::LearningInsights;

pub use graph::{InMemoryKnowledgeGraph, NoopKnowledgeGraph};
pub use history::{InMemoryPerformanceStore, NoopPerformanceStore};
pub use insights::{MarkdownInsightStore, NoopInsightStore};

/// 知识图谱给出的模式推荐
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRecommendation {
    pub pattern: String,
    pub confidence: f64,
    /// 命中的历史描述
    pub source: Option<String>,
}

/// 历史性能库对某模式的汇总
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternKnowledge {
    pub pattern: String,
    pub confidence_score: f64,
    pub average_duration_secs: f64,
    pub success_rate: f64,
    pub quality_score: f64,
    pub sample_count: usize,
}

/// 一次执行的性能数据点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceDataPoint {
    pub timestamp: DateTime<Utc>,
    pub execution_id: String,
    pub pattern: String,
    pub duration_secs: f64,
    pub memory_mb: f64,
    pub api_calls: u64,
    pub quality: f64,
    pub efficiency: f64,
    pub success: bool,
}

/// 知识图谱服务
#[async_trait]
pub trait KnowledgeGraph: Send + Sync {
    /// 按描述查找相似任务的模式推荐
    async fn query_recommendations(
        &self,
        description: &str,
    ) -> Result<Vec<PatternRecommendation>, CollaboratorError>;

    /// 回写一次成功执行（描述 -> 模式）
    async fn record_outcome(
        &self,
        _description: &str,
        _pattern: &str,
        _confidence: f64,
    ) -> Result<(), CollaboratorError> {
        Ok(())
    }

    async fn ping(&self) -> bool {
        true
    }
}

/// 历史性能库
#[async_trait]
pub trait HistoricalPerformanceStore: Send + Sync {
    async fn query_pattern_knowledge(
        &self,
        patterns: &[String],
    ) -> Result<Vec<PatternKnowledge>, CollaboratorError>;

    /// 最近 days 天的数据点
    async fn get_performance_history(
        &self,
        days: u32,
    ) -> Result<Vec<PerformanceDataPoint>, CollaboratorError>;

    async fn store_metrics(&self, point: PerformanceDataPoint) -> Result<(), CollaboratorError>;

    async fn ping(&self) -> bool {
        true
    }
}

/// 长期记忆 / 洞察存储
#[async_trait]
pub trait InsightStore: Send + Sync {
    async fn persist(&self, insights: &LearningInsights) -> Result<(), CollaboratorError>;

    async fn ping(&self) -> bool {
        true
    }
}

/// 带超时地调用协作方；失败或超时返回 None 并记录 warn
pub async fn best_effort<T, F>(what: &str, timeout_ms: u64, fut: F) -> Option<T>
where
    F: Future<Output = Result<T, CollaboratorError>>,
{
    match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            tracing::warn!("{} failed, degrading to empty result: {}", what, e);
            None
        }
        Err(_) => {
            tracing::warn!(
                "{} failed, degrading to empty result: {}",
                what,
                CollaboratorError::Timeout(timeout_ms)
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_best_effort_passes_value_through() {
        let v = best_effort("ok", 100, async { Ok::<_, CollaboratorError>(7) }).await;
        assert_eq!(v, Some(7));
    }

    #[tokio::test]
    async fn test_best_effort_degrades_on_error() {
        let v: Option<u32> = best_effort("err", 100, async {
            Err(CollaboratorError::Unavailable("down".into()))
        })
        .await;
        assert!(v.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_best_effort_degrades_on_timeout() {
        let v: Option<u32> = best_effort("slow", 50, async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(1)
        })
        .await;
        assert!(v.is_none());
    }
}
