//! 洞察存储：学习结果落盘
//!
//! MarkdownInsightStore 把每轮学习追加到 `<dir>/INSIGHTS.md`（首次创建时写标题），便于人工审阅；
//! NoopInsightStore 不落盘。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::core::CollaboratorError;
use crate::knowledge::InsightStore;
use crate::learning::LearningInsights;

#[derive(Debug, Clone, Default)]
pub struct NoopInsightStore;

#[async_trait]
impl InsightStore for NoopInsightStore {
    async fn persist(&self, _insights: &LearningInsights) -> Result<(), CollaboratorError> {
        Ok(())
    }

    async fn ping(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
pub struct MarkdownInsightStore {
    path: PathBuf,
}

impl MarkdownInsightStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join("INSIGHTS.md"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn render(insights: &LearningInsights) -> String {
        let mut block = format!(
            "\n## {} (confidence {:.2})\n\n- **Scope**: {}\n",
            insights.generated_at.format("%Y-%m-%d %H:%M"),
            insights.confidence,
            insights.applicability_scope.join(", ")
        );
        for insight in &insights.optimization_insights {
            block.push_str(&format!(
                "- **{:?}** when {}: {} (+{:.0}%, confidence {:.2})\n",
                insight.insight_type,
                insight.applicability_conditions.join(" & "),
                insight.success_factors.join(", "),
                insight.expected_improvement * 100.0,
                insight.confidence
            ));
        }
        for ctx in &insights.contextual_patterns {
            block.push_str(&format!(
                "- **Context** `{}`: {} (n={}, significance {:.2})\n",
                ctx.context_signature,
                ctx.performance_ranking.join(" > "),
                ctx.sample_size,
                ctx.significance
            ));
        }
        for rule in &insights.failure_preventions {
            block.push_str(&format!(
                "- **Prevention** `{}` on '{}': {} (effectiveness {:.2})\n",
                rule.pattern, rule.failure_pattern, rule.prevention_strategy, rule.effectiveness
            ));
        }
        block.push('\n');
        block
    }

    async fn append(&self, block: &str) -> std::io::Result<()> {
        if let Some(p) = self.path.parent() {
            fs::create_dir_all(p).await?;
        }
        let fresh = fs::metadata(&self.path).await.is_err();
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        if fresh {
            file.write_all(b"# Learning Insights\n\n*Entries appended after each learning cycle.*\n\n---\n")
                .await?;
        }
        file.write_all(block.as_bytes()).await
    }
}

#[async_trait]
impl InsightStore for MarkdownInsightStore {
    async fn persist(&self, insights: &LearningInsights) -> Result<(), CollaboratorError> {
        self.append(&Self::render(insights))
            .await
            .map_err(|e| CollaboratorError::Unavailable(format!("{}: {}", self.path.display(), e)))
    }

    async fn ping(&self) -> bool {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => fs::create_dir_all(dir).await.is_ok(),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::{CostLevel, FailurePrevention};

    #[tokio::test]
    async fn test_markdown_store_appends_with_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = MarkdownInsightStore::new(dir.path().join("nested"));

        let mut insights = LearningInsights::empty(chrono::Utc::now());
        insights.failure_preventions.push(FailurePrevention {
            pattern: "react".into(),
            failure_pattern: "timeout".into(),
            prevention_strategy: "add step budget".into(),
            warning_signals: vec!["timeout".into()],
            effectiveness: 0.3,
            cost: CostLevel::Low,
        });
        store.persist(&insights).await.unwrap();
        store.persist(&insights).await.unwrap();

        let text = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(text.matches("# Learning Insights").count(), 1);
        assert_eq!(text.matches("**Prevention** `react`").count(), 2);
        assert!(store.ping().await);
    }
}
