//! Hive - 自适应执行模式控制平面
//!
//! 入口：加载配置、初始化日志、装配编排器，执行命令行给出的任务描述并输出执行记录。
//! 用法：`hive [任务描述]`，未给出时使用内置示例。

use std::sync::Arc;

use anyhow::Context;
use hive::config::load_config;
use hive::core::{OrchestratorBuilder, ShutdownManager, ShutdownReason};
use hive::workflow::WorkflowRequest;

const DEFAULT_TASK: &str =
    "Analyze the service logs from last week, find the root cause of the latency spikes and write a report";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, config_error) = match load_config(None) {
        Ok(config) => (config, None),
        Err(e) => (Default::default(), Some(e)),
    };

    if config.app.json_logs {
        hive::observability::init_json();
    } else {
        hive::observability::init();
    }
    if let Some(e) = config_error {
        tracing::warn!("Failed to load config, using defaults: {}", e);
    }

    let description = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let description = if description.trim().is_empty() {
        DEFAULT_TASK.to_string()
    } else {
        description
    };

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let orchestrator = OrchestratorBuilder::new(config)
        .with_simulated_patterns()
        .with_shutdown_token(shutdown.token())
        .build()
        .context("Failed to build orchestrator")?;
    orchestrator.start();

    let request = WorkflowRequest::new(description);
    let result = tokio::select! {
        result = orchestrator.execute(request) => Some(result),
        _ = shutdown.wait_for_shutdown() => None,
    };

    match result {
        Some(result) => {
            let execution = result.context("Execution failed")?;
            println!(
                "{}",
                serde_json::to_string_pretty(&execution).context("Failed to serialize execution")?
            );
            let health = orchestrator.get_health().await;
            tracing::info!(
                "Health: {} active, average efficiency {:.2}, load {:.2}",
                health.active_executions,
                health.average_efficiency,
                health.load_ratio
            );
        }
        None => tracing::info!(
            "Interrupted before the execution finished ({:?})",
            shutdown.reason()
        ),
    }

    shutdown.shutdown(ShutdownReason::Completed);
    orchestrator.shutdown().await;
    Ok(())
}
