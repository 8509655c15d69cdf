//! 执行结果历史
//!
//! 有上限的内存队列，溢出时丢弃最旧的一半；可选地以 JSON 文件持久化，跨进程恢复。

use std::collections::VecDeque;
use std::path::Path;

use crate::workflow::WorkflowOutcome;

#[derive(Debug)]
pub struct OutcomeHistory {
    outcomes: VecDeque<WorkflowOutcome>,
    cap: usize,
    /// 尚未交给学习系统的最新结果数
    unlearned: usize,
}

impl OutcomeHistory {
    pub fn new(cap: usize) -> Self {
        Self {
            outcomes: VecDeque::new(),
            cap: cap.max(2),
            unlearned: 0,
        }
    }

    pub fn push(&mut self, outcome: WorkflowOutcome) {
        self.outcomes.push_back(outcome);
        self.unlearned += 1;
        if self.outcomes.len() > self.cap {
            let discard = self.outcomes.len() / 2;
            self.outcomes.drain(..discard);
            self.unlearned = self.unlearned.min(self.outcomes.len());
            tracing::debug!("Outcome history over cap, discarded {} oldest", discard);
        }
    }

    /// 载入持久化的历史（视为已学习）
    pub fn restore(&mut self, outcomes: Vec<WorkflowOutcome>) {
        for outcome in outcomes {
            self.outcomes.push_back(outcome);
        }
        while self.outcomes.len() > self.cap {
            self.outcomes.pop_front();
        }
        self.unlearned = 0;
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn unlearned(&self) -> usize {
        self.unlearned
    }

    /// 最新的 n 条，按时间顺序
    pub fn recent(&self, n: usize) -> Vec<WorkflowOutcome> {
        let skip = self.outcomes.len().saturating_sub(n);
        self.outcomes.iter().skip(skip).cloned().collect()
    }

    /// 最早的一批未学习结果（至多 max 条，按时间顺序）；其余留给下一轮
    pub fn unlearned_batch(&self, max: usize) -> Vec<WorkflowOutcome> {
        let start = self.outcomes.len() - self.unlearned;
        self.outcomes
            .iter()
            .skip(start)
            .take(max)
            .cloned()
            .collect()
    }

    /// 标记最早的 n 条未学习结果为已学习；学习期间新加入的结果不受影响
    pub fn mark_learned(&mut self, n: usize) {
        self.unlearned = self.unlearned.saturating_sub(n);
    }

    pub fn all(&self) -> Vec<WorkflowOutcome> {
        self.outcomes.iter().cloned().collect()
    }

    /// 已记录结果的平均效率；无记录时为 0
    pub fn average_efficiency(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        self.outcomes
            .iter()
            .map(|o| o.metrics.efficiency_score)
            .sum::<f64>()
            / self.outcomes.len() as f64
    }
}

/// 单文件 JSON 持久化
#[derive(Debug, Clone)]
pub struct HistoryPersistence {
    path: std::path::PathBuf,
}

impl HistoryPersistence {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 文件不存在时返回空 Vec
    pub fn load(&self) -> anyhow::Result<Vec<WorkflowOutcome>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// 父目录不存在时自动创建
    pub fn save(&self, outcomes: &[WorkflowOutcome]) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(outcomes)?)?;
        Ok(())
    }
}
