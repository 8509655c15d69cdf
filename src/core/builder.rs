//! 编排器构建器：统一装配注册表、协作方与各子系统
//!
//! 未显式提供的协作方使用进程内实现：知识图谱 / 历史性能库为内存版，
//! 洞察存储在配置了 learning.insights_dir 时写 Markdown，否则不落盘。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::{Clock, HiveError, Orchestrator, SystemClock};
use crate::knowledge::{
    HistoricalPerformanceStore, InMemoryKnowledgeGraph, InMemoryPerformanceStore, InsightStore,
    KnowledgeGraph, MarkdownInsightStore, NoopInsightStore,
};
use crate::monitor::{ResourceProbe, SystemProbe};
use crate::patterns::{PatternProfile, PatternRegistry, SimulatedStrategy, Strategy};

/// 外部协作方集合
#[derive(Clone)]
pub struct Collaborators {
    pub knowledge_graph: Arc<dyn KnowledgeGraph>,
    pub history_store: Arc<dyn HistoricalPerformanceStore>,
    pub insight_store: Arc<dyn InsightStore>,
}

pub struct OrchestratorBuilder {
    config: AppConfig,
    patterns: Vec<(PatternProfile, Arc<dyn Strategy>)>,
    knowledge_graph: Option<Arc<dyn KnowledgeGraph>>,
    history_store: Option<Arc<dyn HistoricalPerformanceStore>>,
    insight_store: Option<Arc<dyn InsightStore>>,
    probe: Option<Arc<dyn ResourceProbe>>,
    clock: Option<Arc<dyn Clock>>,
    shutdown: Option<CancellationToken>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            patterns: Vec::new(),
            knowledge_graph: None,
            history_store: None,
            insight_store: None,
            probe: None,
            clock: None,
            shutdown: None,
        }
    }

    /// 注册一个模式及其策略
    pub fn with_pattern(mut self, profile: PatternProfile, strategy: Arc<dyn Strategy>) -> Self {
        self.patterns.push((profile, strategy));
        self
    }

    /// 注册三个内置模式，策略为模拟实现
    pub fn with_simulated_patterns(mut self) -> Self {
        for profile in PatternProfile::builtin() {
            let strategy: Arc<dyn Strategy> = Arc::new(SimulatedStrategy::new(&profile.name));
            self.patterns.push((profile, strategy));
        }
        self
    }

    pub fn with_knowledge_graph(mut self, graph: Arc<dyn KnowledgeGraph>) -> Self {
        self.knowledge_graph = Some(graph);
        self
    }

    pub fn with_history_store(mut self, store: Arc<dyn HistoricalPerformanceStore>) -> Self {
        self.history_store = Some(store);
        self
    }

    pub fn with_insight_store(mut self, store: Arc<dyn InsightStore>) -> Self {
        self.insight_store = Some(store);
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// 外部关闭 token（如 ShutdownManager::token），执行的取消 token 都是它的子 token
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    pub fn build(self) -> Result<Orchestrator, HiveError> {
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let registry = Arc::new(PatternRegistry::new());
        for (profile, strategy) in self.patterns {
            registry.register(profile, strategy)?;
        }
        if registry.is_empty() {
            tracing::warn!("Orchestrator built with an empty pattern registry");
        }

        let insight_store: Arc<dyn InsightStore> = match self.insight_store {
            Some(store) => store,
            None => match &self.config.learning.insights_dir {
                Some(dir) => Arc::new(MarkdownInsightStore::new(dir)),
                None => Arc::new(NoopInsightStore),
            },
        };
        let collaborators = Collaborators {
            knowledge_graph: self
                .knowledge_graph
                .unwrap_or_else(|| Arc::new(InMemoryKnowledgeGraph::default())),
            history_store: self.history_store.unwrap_or_else(|| {
                Arc::new(InMemoryPerformanceStore::default().with_clock(clock.clone()))
            }),
            insight_store,
        };
        let probe: Arc<dyn ResourceProbe> = self.probe.unwrap_or_else(|| Arc::new(SystemProbe::new()));
        let shutdown = self.shutdown.unwrap_or_default();

        Ok(Orchestrator::assemble(
            self.config,
            registry,
            collaborators,
            probe,
            clock,
            shutdown,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_patterns_are_registered() {
        let orchestrator = OrchestratorBuilder::new(AppConfig::default())
            .with_simulated_patterns()
            .build()
            .unwrap();
        let names: Vec<_> = orchestrator
            .registry()
            .profiles()
            .iter()
            .map(|p| p.name.clone())
            .collect();
        assert_eq!(names, vec!["decompose", "plan_execute", "react"]);
    }

    #[test]
    fn test_mismatched_strategy_is_rejected() {
        let result = OrchestratorBuilder::new(AppConfig::default())
            .with_pattern(PatternProfile::react(), Arc::new(SimulatedStrategy::new("other")))
            .build();
        assert!(matches!(result, Err(HiveError::Validation(_))));
    }
}
