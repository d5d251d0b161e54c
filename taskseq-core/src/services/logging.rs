//! Logging service

use crate::models::{AggregateStatus, LogLevel, TaskStatus};

/// Initialize logging with the specified level
///
/// `RUST_LOG`, when set, takes precedence over `level`.
pub fn init_logging(level: LogLevel) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = match level {
        LogLevel::Error => "taskseq_core=error,taskseq=error",
        LogLevel::Warn => "taskseq_core=warn,taskseq=warn",
        LogLevel::Info => "taskseq_core=info,taskseq=info",
        LogLevel::Debug => "taskseq_core=debug,taskseq=debug",
        LogLevel::Trace => "taskseq_core=trace,taskseq=trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()?;

    Ok(())
}

/// Log a task status transition
pub fn log_task_transition(workflow_id: &str, task_id: &str, status: TaskStatus, attempt: u32) {
    tracing::info!(
        workflow_id = workflow_id,
        task_id = task_id,
        status = %status,
        attempt = attempt,
        "Task transition"
    );
}

/// Log a task failure with the recorded reason
pub fn log_task_failure(workflow_id: &str, task_id: &str, optional: bool, error: &str) {
    tracing::warn!(
        workflow_id = workflow_id,
        task_id = task_id,
        optional = optional,
        error = error,
        "Task failed"
    );
}

/// Log an aggregate status change of a run
pub fn log_run_status(workflow_id: &str, status: AggregateStatus, fraction_complete: f64) {
    tracing::info!(
        workflow_id = workflow_id,
        status = %status,
        fraction_complete = fraction_complete,
        "Run status changed"
    );
}
