//! 中途切换：评估、生成记录、状态转交

pub mod engine;
pub mod types;

pub use engine::AdaptationEngine;
pub use types::{
    AdaptationAssessment, ExecutionState, ExpectedImpact, IssueCategory, PatternAdaptation,
    RiskLevel, TransitionResult, Urgency,
};
