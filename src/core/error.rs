//! 错误类型：核心操作错误与外部协作方错误
//!
//! 核心公开操作（选择、监控启动、切换、学习）统一返回 HiveError；
//! 知识图谱 / 历史性能库等尽力而为的协作方返回 CollaboratorError，由调用点降级为空结果，不向上传播。

use thiserror::Error;

/// 错误大类（对外可见的分类）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 请求为空 / 格式错误、未知模式名
    Validation,
    /// 功能被禁用时仍被调用
    Configuration,
    /// 选择、监控、切换、学习内部的意外失败
    System,
    /// 引用的模式或执行 ID 不存在
    NotAvailable,
}

/// 核心错误
#[derive(Error, Debug)]
pub enum HiveError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("System error: {0}")]
    System(String),

    #[error("Not available: {0}")]
    NotAvailable(String),

    /// 模式选择失败，携带触发原因
    #[error("Selection failed: {0}")]
    SelectionFailed(#[source] Box<HiveError>),
}

impl HiveError {
    /// SelectionFailed 取其原因的分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            HiveError::Validation(_) => ErrorKind::Validation,
            HiveError::Configuration(_) => ErrorKind::Configuration,
            HiveError::System(_) => ErrorKind::System,
            HiveError::NotAvailable(_) => ErrorKind::NotAvailable,
            HiveError::SelectionFailed(cause) => cause.kind(),
        }
    }

    pub fn selection_failed(cause: HiveError) -> Self {
        HiveError::SelectionFailed(Box::new(cause))
    }
}

/// 外部协作方（知识图谱、历史性能库、洞察存储）的失败
#[derive(Error, Debug, Clone)]
pub enum CollaboratorError {
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("Collaborator timed out after {0}ms")]
    Timeout(u64),

    #[error("Collaborator rejected request: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_failed_reports_cause_kind() {
        let err = HiveError::selection_failed(HiveError::Validation("empty description".into()));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("Selection failed"));
        assert!(err.to_string().contains("empty description"));

        let err = HiveError::selection_failed(HiveError::System("no patterns".into()));
        assert_eq!(err.kind(), ErrorKind::System);
    }

    #[test]
    fn test_plain_kinds() {
        assert_eq!(HiveError::Configuration("x".into()).kind(), ErrorKind::Configuration);
        assert_eq!(HiveError::NotAvailable("x".into()).kind(), ErrorKind::NotAvailable);
    }
}
