//! 学习：结果分析、洞察回写、定时调度

pub mod schedule;
pub mod system;
pub mod types;

pub use schedule::{LearningSchedule, ScheduleType};
pub use system::LearningSystem;
pub use types::*;
