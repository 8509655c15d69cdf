//! 知识图谱实现
//!
//! InMemoryKnowledgeGraph：记录「任务描述 -> 成功模式」，按关键词重叠检索相似描述（无真实向量，
//! 后续可接图数据库）；NoopKnowledgeGraph：未接入时使用，始终无推荐。

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::core::CollaboratorError;
use crate::knowledge::{KnowledgeGraph, PatternRecommendation};

/// 空实现：无推荐
#[derive(Debug, Clone, Default)]
pub struct NoopKnowledgeGraph;

#[async_trait]
impl KnowledgeGraph for NoopKnowledgeGraph {
    async fn query_recommendations(
        &self,
        _description: &str,
    ) -> Result<Vec<PatternRecommendation>, CollaboratorError> {
        Ok(Vec::new())
    }

    async fn ping(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
struct GraphEntry {
    description: String,
    tokens: HashSet<String>,
    pattern: String,
    confidence: f64,
}

/// 将文本切分为小写词集合
fn tokenize_lower(s: &str) -> HashSet<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() > 2)
        .collect()
}

/// 内存知识图谱：按 Jaccard 相似度匹配描述
#[derive(Clone)]
pub struct InMemoryKnowledgeGraph {
    store: Arc<RwLock<Vec<GraphEntry>>>,
    max_entries: usize,
    /// 相似度低于该值不算命中
    min_similarity: f64,
}

impl InMemoryKnowledgeGraph {
    pub fn new(max_entries: usize) -> Self {
        Self {
            store: Arc::new(RwLock::new(Vec::new())),
            max_entries,
            min_similarity: 0.3,
        }
    }

    pub fn with_min_similarity(mut self, min_similarity: f64) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    /// 同步写入（预置知识用）
    pub fn add(&self, description: &str, pattern: &str, confidence: f64) {
        let tokens = tokenize_lower(description);
        if tokens.is_empty() {
            return;
        }
        let mut store = self.store.write().unwrap_or_else(|e| e.into_inner());
        store.push(GraphEntry {
            description: description.trim().to_string(),
            tokens,
            pattern: pattern.to_string(),
            confidence: confidence.clamp(0.0, 1.0),
        });
        let n = store.len();
        if n > self.max_entries {
            store.drain(0..n - self.max_entries);
        }
    }

    pub fn len(&self) -> usize {
        self.store.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn similarity(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
        let union = a.union(b).count();
        if union == 0 {
            return 0.0;
        }
        a.intersection(b).count() as f64 / union as f64
    }
}

impl Default for InMemoryKnowledgeGraph {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl KnowledgeGraph for InMemoryKnowledgeGraph {
    async fn query_recommendations(
        &self,
        description: &str,
    ) -> Result<Vec<PatternRecommendation>, CollaboratorError> {
        let query = tokenize_lower(description);
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let store = self.store.read().unwrap_or_else(|e| e.into_inner());

        // 每个模式：相似度加权的平均置信度，source 取最相似的那条
        let mut per_pattern: HashMap<&str, (f64, f64, f64, &str)> = HashMap::new();
        for entry in store.iter() {
            let sim = Self::similarity(&query, &entry.tokens);
            if sim < self.min_similarity {
                continue;
            }
            let slot = per_pattern
                .entry(entry.pattern.as_str())
                .or_insert((0.0, 0.0, 0.0, entry.description.as_str()));
            slot.0 += sim * entry.confidence;
            slot.1 += sim;
            if sim > slot.2 {
                slot.2 = sim;
                slot.3 = entry.description.as_str();
            }
        }

        let mut recommendations: Vec<PatternRecommendation> = per_pattern
            .into_iter()
            .map(|(pattern, (weighted, total_sim, best_sim, source))| PatternRecommendation {
                pattern: pattern.to_string(),
                confidence: (weighted / total_sim * best_sim).clamp(0.0, 1.0),
                source: Some(source.to_string()),
            })
            .collect();
        recommendations.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.pattern.cmp(&b.pattern))
        });
        Ok(recommendations)
    }

    async fn record_outcome(
        &self,
        description: &str,
        pattern: &str,
        confidence: f64,
    ) -> Result<(), CollaboratorError> {
        self.add(description, pattern, confidence);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_similar_description_gets_recommendation() {
        let graph = InMemoryKnowledgeGraph::default();
        graph.add("analyze the nginx log file for errors", "react", 0.9);
        graph.add("write a quarterly sales report", "plan_execute", 0.8);

        let recs = graph
            .query_recommendations("analyze the log file and summarize anomalies")
            .await
            .unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].pattern, "react");
        assert!(recs[0].confidence > 0.0 && recs[0].confidence <= 0.9);
        assert!(recs[0].source.as_deref().unwrap().contains("nginx"));
    }

    #[tokio::test]
    async fn test_unrelated_description_gets_nothing() {
        let graph = InMemoryKnowledgeGraph::default();
        graph.add("translate the manual into german", "plan_execute", 0.9);
        let recs = graph.query_recommendations("debug flaky websocket test").await.unwrap();
        assert!(recs.is_empty());
    }

    #[tokio::test]
    async fn test_record_outcome_is_capped() {
        let graph = InMemoryKnowledgeGraph::new(2);
        for i in 0..5 {
            graph
                .record_outcome(&format!("task number {i} alpha"), "react", 0.5)
                .await
                .unwrap();
        }
        assert_eq!(graph.len(), 2);
    }

    #[tokio::test]
    async fn test_noop_graph_reports_disconnected() {
        let graph = NoopKnowledgeGraph;
        assert!(graph.query_recommendations("anything").await.unwrap().is_empty());
        assert!(!graph.ping().await);
    }
}
