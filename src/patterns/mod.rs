//! 模式：档案、注册表、策略接口与内置模拟策略

pub mod profile;
pub mod registry;
pub mod simulated;
pub mod strategy;

pub use profile::{FitWeights, PatternFamily, PatternProfile, PerformanceProfile};
pub use registry::{PatternRegistry, RegisteredPattern};
pub use simulated::SimulatedStrategy;
pub use strategy::{Strategy, StrategyContext, StrategyEvent, StrategyReport};
