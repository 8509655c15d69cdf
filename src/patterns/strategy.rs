//! 策略执行接口
//!
//! 具体策略（reason-act、plan-then-execute 等）在核心之外实现。编排器只依赖 Strategy trait：
//! 按模式名从注册表取出策略，交给它一个 StrategyContext，策略通过 context 上报检查点 / 反馈，
//! 完成后返回 StrategyReport。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::adaptation::{ExecutionState, IssueCategory};
use crate::core::{Clock, SystemClock};
use crate::monitor::ExecutionCheckpoint;
use crate::workflow::{ExecutionId, QualityAssessment, WorkflowRequest};

/// 策略向编排器发送的事件
#[derive(Debug, Clone)]
pub enum StrategyEvent {
    Checkpoint(ExecutionCheckpoint),
    /// 策略自身察觉到的问题类别
    Feedback(IssueCategory),
}

/// 策略运行上下文
#[derive(Clone)]
pub struct StrategyContext {
    pub execution_id: ExecutionId,
    pub pattern: String,
    pub request: Arc<WorkflowRequest>,
    /// 中途切换时由上一个策略转交的状态
    pub resume: Option<ExecutionState>,
    pub cancel: CancellationToken,
    clock: Arc<dyn Clock>,
    events: mpsc::Sender<StrategyEvent>,
}

impl StrategyContext {
    pub fn new(
        execution_id: ExecutionId,
        pattern: impl Into<String>,
        request: Arc<WorkflowRequest>,
        resume: Option<ExecutionState>,
        cancel: CancellationToken,
        events: mpsc::Sender<StrategyEvent>,
    ) -> Self {
        Self {
            execution_id,
            pattern: pattern.into(),
            request,
            resume,
            cancel,
            clock: Arc::new(SystemClock),
            events,
        }
    }

    /// 与监控共用的时钟，检查点时间戳应取自这里
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// 上报检查点；编排器已不再接收（被切换或取消）时返回 false
    pub async fn checkpoint(&self, checkpoint: ExecutionCheckpoint) -> bool {
        self.events
            .send(StrategyEvent::Checkpoint(checkpoint))
            .await
            .is_ok()
    }

    pub async fn feedback(&self, category: IssueCategory) -> bool {
        self.events
            .send(StrategyEvent::Feedback(category))
            .await
            .is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// 策略完成报告
#[derive(Debug, Clone, Default)]
pub struct StrategyReport {
    pub success: bool,
    pub quality: QualityAssessment,
    pub output: Option<Value>,
    pub error: Option<String>,
}

impl StrategyReport {
    pub fn success(quality: QualityAssessment, output: Option<Value>) -> Self {
        Self {
            success: true,
            quality,
            output,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            quality: QualityAssessment::default(),
            output: None,
            error: Some(error.into()),
        }
    }
}

/// 策略 trait：名称与注册的模式名一致
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// 运行直至完成；应定期检查 ctx.cancel 并上报检查点
    async fn run(&self, ctx: StrategyContext) -> Result<StrategyReport, String>;
}
