//! 进程级关闭信号
//!
//! Ctrl+C / SIGTERM 或主流程结束时取消根 token；编排器的执行 token 都是它的子 token，
//! 因此一次取消会停止学习定时器并让进行中的执行以 cancelled 结束。
//! 只记录第一个关闭原因。

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

/// 关闭原因
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    /// 主流程结束
    Completed,
    /// Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
    FatalError(String),
}

pub struct ShutdownManager {
    root: CancellationToken,
    reason: Mutex<Option<ShutdownReason>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            reason: Mutex::new(None),
        }
    }

    /// 根 token（交给 OrchestratorBuilder::with_shutdown_token）
    pub fn token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// 触发关闭；重复调用时保留第一次的原因
    pub fn shutdown(&self, reason: ShutdownReason) {
        {
            let mut slot = self.reason.lock().unwrap_or_else(|e| e.into_inner());
            if slot.is_none() {
                tracing::info!("Shutdown requested: {:?}", reason);
                *slot = Some(reason);
            }
        }
        self.root.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.root.is_cancelled()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub async fn wait_for_shutdown(&self) {
        self.root.cancelled().await;
    }

    /// 监听 Ctrl+C 与 SIGTERM（非 unix 平台仅 Ctrl+C）；关闭后监听任务自行退出
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let reason = tokio::select! {
                _ = manager.root.cancelled() => return,
                result = tokio::signal::ctrl_c() => match result {
                    Ok(()) => ShutdownReason::Interrupt,
                    Err(e) => {
                        tracing::warn!("Cannot listen for Ctrl+C: {}", e);
                        return;
                    }
                },
                _ = terminate() => ShutdownReason::Terminate,
            };
            manager.shutdown(reason);
        });
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!("Cannot listen for SIGTERM: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_cancels_root_and_child_tokens() {
        let manager = ShutdownManager::new();
        let child = manager.token().child_token();
        assert!(!manager.is_shutdown());
        manager.shutdown(ShutdownReason::Completed);
        assert!(manager.is_shutdown());
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn test_first_reason_wins() {
        let manager = Arc::new(ShutdownManager::new());
        manager.install_signal_handlers();
        manager.shutdown(ShutdownReason::FatalError("disk".into()));
        manager.shutdown(ShutdownReason::Completed);
        manager.wait_for_shutdown().await;
        assert_eq!(
            manager.reason(),
            Some(ShutdownReason::FatalError("disk".into()))
        );
    }
}
