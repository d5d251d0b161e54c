//! Terminal progress reporter

use taskseq_core::workflow::ProgressEvent;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

/// One text line per progress event
pub fn format_event(event: &ProgressEvent) -> String {
    let mut task = match (&event.current_task_id, event.current_task_status) {
        (Some(id), Some(status)) => format!("{} {}", id, status),
        (Some(id), None) => id.clone(),
        _ => "-".to_string(),
    };
    if let Some(percent) = event.task_progress {
        task.push_str(&format!(" ({:.0}%)", percent));
    }
    format!(
        "[{:>3.0}%] {:<11} {}",
        event.fraction_complete * 100.0,
        event.aggregate_status.to_string(),
        task
    )
}

/// Print events until the runner is dropped
pub fn spawn_reporter(mut events: broadcast::Receiver<ProgressEvent>, json: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if json {
                        match serde_json::to_string(&event) {
                            Ok(line) => println!("{}", line),
                            Err(e) => tracing::warn!(error = %e, "Failed to encode progress event"),
                        }
                    } else {
                        println!("{}", format_event(&event));
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::debug!(missed, "Progress reporter fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
