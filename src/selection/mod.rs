//! 模式选择：任务分析 + 多源打分

pub mod analyzer;
pub mod selector;

pub use analyzer::{TaskAnalysis, TaskAnalyzer};
pub use selector::{expected_performance, PatternSelector};
