//! 请求、执行与结果的数据模型

pub mod types;

pub use types::*;
