//! Hive - 自适应执行模式控制平面
//!
//! 为每个任务在多种执行策略（"模式"）之间做选择，监督执行是否符合预期，
//! 必要时中途切换策略，并把完成的执行转化为改进后续选择的知识。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排器、执行驱动、结果历史、错误、时钟、优雅关闭
//! - **workflow**: 请求 / 执行 / 结果数据模型
//! - **patterns**: 模式档案、注册表、策略接口、模拟策略
//! - **selection**: 任务分析与多因素模式选择
//! - **monitor**: 检查点、基线比较、资源采样、趋势
//! - **adaptation**: 切换评估、切换记录、状态转交
//! - **learning**: 洞察提炼、回写、学习调度
//! - **knowledge**: 知识图谱 / 历史性能库 / 洞察存储协作方
//! - **observability**: tracing 初始化

pub mod adaptation;
pub mod config;
pub mod core;
pub mod knowledge;
pub mod learning;
pub mod monitor;
pub mod observability;
pub mod patterns;
pub mod selection;
pub mod workflow;

pub use crate::core::{HiveError, Orchestrator, OrchestratorBuilder};
pub use crate::workflow::{WorkflowExecution, WorkflowOutcome, WorkflowRequest};
