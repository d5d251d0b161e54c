//! Command handlers

use crate::cli::reporter::spawn_reporter;
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use taskseq_core::client::AmbariClient;
use taskseq_core::models::{
    AggregateStatus, Configuration, LogLevel, RunState, TaskStatus, WorkflowContext,
};
use taskseq_core::workflow::{
    load_definition, JsonFileStore, RunStateStore, SequenceRunner, SequenceValidator,
    TaskSequence,
};

/// Options shared by every subcommand
#[derive(Debug, Default)]
pub struct GlobalOptions {
    pub config: Option<PathBuf>,
    pub server: Option<String>,
    pub cluster: Option<String>,
    pub state_dir: Option<PathBuf>,
    pub log_level: Option<LogLevel>,
}

/// What to do with a stored run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeAction {
    Continue,
    Retry,
    Skip,
}

/// Load the configuration file and apply command-line overrides
pub fn load_configuration(options: &GlobalOptions) -> Result<Configuration> {
    let path = match &options.config {
        Some(path) => path.clone(),
        None => Configuration::default_config_path()?,
    };
    let mut config = Configuration::load_from_file(&path)?;

    if let Some(server) = &options.server {
        config.server_url = server.clone();
    }
    if let Some(cluster) = &options.cluster {
        config.cluster_name = cluster.clone();
    }
    if let Some(state_dir) = &options.state_dir {
        config.state_dir = Some(state_dir.clone());
    }
    if let Some(level) = options.log_level {
        config.log_level = level;
    }

    config
        .validate()
        .map_err(|errors| anyhow::anyhow!("Invalid configuration:\n  {}", errors.join("\n  ")))?;
    Ok(config)
}

fn open_store(config: &Configuration) -> Result<Arc<JsonFileStore>> {
    let dir = config.resolved_state_dir();
    let store = JsonFileStore::new(&dir).context("Failed to open run state store")?;
    Ok(Arc::new(store))
}

fn create_runner(config: &Configuration, store: Arc<JsonFileStore>) -> Result<SequenceRunner> {
    let mut client = AmbariClient::new(&config.server_url, config.cluster_name.clone())?;
    if let (Some(user), Some(password)) = (&config.username, &config.password) {
        client = client.with_credentials(user, password);
    }
    Ok(SequenceRunner::new(
        Arc::new(client),
        store,
        config.runner_config(),
    ))
}

/// Read a JSON or YAML object; the configured cluster fills in `cluster` when absent
pub fn load_context(path: Option<&Path>, config: &Configuration) -> Result<WorkflowContext> {
    let context = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read context file {}", path.display()))?;
            let value: Value = serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse context file {}", path.display()))?;
            WorkflowContext::from_value(value)?
        }
        None => WorkflowContext::new(),
    };

    if context.contains("cluster") {
        Ok(context)
    } else {
        Ok(context.with("cluster", config.cluster_name.clone()))
    }
}

fn build_sequence(file: &Path, context: &WorkflowContext) -> Result<TaskSequence> {
    let definition = load_definition(file)?;
    definition
        .build(context)
        .with_context(|| format!("Failed to build sequence from {}", file.display()))
}

enum Drive {
    Start(TaskSequence, WorkflowContext),
    Resume(RunState, TaskSequence, WorkflowContext, ResumeAction),
}

/// Drive a run while printing its progress; Ctrl-C aborts after the current call
async fn drive(mut runner: SequenceRunner, drive: Drive, json: bool) -> Result<RunState> {
    let reporter = spawn_reporter(runner.subscribe(), json);

    let abort = runner.abort_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, aborting the run");
            abort.abort();
        }
    });

    let result = match drive {
        Drive::Start(sequence, context) => runner.start(sequence, context).await,
        Drive::Resume(state, sequence, context, action) => {
            let loaded = runner.resume(state, sequence, context).await;
            match (action, loaded) {
                (ResumeAction::Continue, loaded) => loaded,
                (_, Err(e)) => Err(e),
                (ResumeAction::Retry, Ok(_)) => runner.retry().await,
                (ResumeAction::Skip, Ok(_)) => runner.skip().await,
            }
        }
    };

    interrupt.abort();
    drop(runner);
    let _ = reporter.await;

    Ok(result?)
}

fn print_outcome(state: &RunState, json: bool) -> Result<()> {
    if json {
        // Progress events already went to stdout as JSON lines
        return Ok(());
    }
    println!();
    match state.aggregate_status {
        AggregateStatus::Completed => {
            println!("✅ Workflow '{}' completed", state.workflow_id)
        }
        AggregateStatus::Aborted => {
            println!("⏹  Workflow '{}' aborted", state.workflow_id)
        }
        AggregateStatus::Failed => {
            let task = state.current_task_id().unwrap_or("-");
            println!("❌ Workflow '{}' failed at task '{}'", state.workflow_id, task);
            if let Some(error) = state.errors.get(task) {
                println!("   {}", error);
            }
            println!();
            println!("Use 'taskseq retry' or 'taskseq skip' to continue, or 'taskseq abort' to give up");
        }
        other => println!("Workflow '{}' is {}", state.workflow_id, other),
    }
    Ok(())
}

fn fail_on_failure(state: &RunState) -> Result<()> {
    if state.aggregate_status == AggregateStatus::Failed {
        let task = state.current_task_id().unwrap_or("-");
        return Err(anyhow::anyhow!(
            "Workflow '{}' failed at task '{}'",
            state.workflow_id,
            task
        ));
    }
    Ok(())
}

/// Handle run command
pub async fn handle_run(
    config: &Configuration,
    file: PathBuf,
    context_file: Option<PathBuf>,
    skip_tasks: Vec<String>,
    json: bool,
) -> Result<()> {
    let context = load_context(context_file.as_deref(), config)?;
    let skip: Vec<&str> = skip_tasks.iter().map(String::as_str).collect();
    let sequence = build_sequence(&file, &context)?.without_tasks(&skip);

    let store = open_store(config)?;
    let runner = create_runner(config, store)?;
    let state = drive(runner, Drive::Start(sequence, context), json).await?;

    print_outcome(&state, json)?;
    fail_on_failure(&state)
}

/// Handle resume, retry and skip commands
pub async fn handle_resume(
    config: &Configuration,
    file: PathBuf,
    context_file: Option<PathBuf>,
    action: ResumeAction,
    json: bool,
) -> Result<()> {
    let context = load_context(context_file.as_deref(), config)?;
    let definition = load_definition(&file)?;
    let store = open_store(config)?;

    let persisted = store.load(&definition.workflow_id)?.ok_or_else(|| {
        anyhow::anyhow!(
            "No stored run for workflow '{}'. Use 'taskseq run' to start one.",
            definition.workflow_id
        )
    })?;

    if action != ResumeAction::Continue && persisted.aggregate_status != AggregateStatus::Failed {
        let command = if action == ResumeAction::Retry { "retry" } else { "skip" };
        return Err(anyhow::anyhow!(
            "Cannot {} workflow '{}' while it is {}. Use 'taskseq resume' to continue it.",
            command,
            persisted.workflow_id,
            persisted.aggregate_status
        ));
    }

    // Tasks pruned at start are not in the definition's conditional output either,
    // so rebuild from the stored order
    let full = definition.build(&context)?;
    let sequence = full.clone().without_tasks(
        &full
            .task_ids()
            .iter()
            .filter(|id| !persisted.task_order.contains(id))
            .map(String::as_str)
            .collect::<Vec<_>>(),
    );

    let runner = create_runner(config, store)?;
    let state = drive(runner, Drive::Resume(persisted, sequence, context, action), json).await?;

    print_outcome(&state, json)?;
    fail_on_failure(&state)
}

/// Handle abort command
pub fn handle_abort(config: &Configuration, workflow_id: String, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let state = SequenceRunner::abort_stored(&*store, &workflow_id)
        .with_context(|| format!("Failed to abort workflow '{}'", workflow_id))?;

    if json {
        let output = serde_json::json!({
            "workflow_id": state.workflow_id,
            "status": state.aggregate_status,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("⏹  Workflow '{}' marked {}", workflow_id, state.aggregate_status);
        println!("   Remote operations already submitted keep running on the server");
    }
    Ok(())
}

/// Handle status command
pub fn handle_status(config: &Configuration, workflow_id: String, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let state = store
        .load(&workflow_id)?
        .ok_or_else(|| anyhow::anyhow!("No stored run for workflow '{}'", workflow_id))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    println!("Workflow Run Status");
    println!("===================");
    println!("Workflow:    {}", state.workflow_id);
    println!("Run ID:      {}", state.run_id);
    println!("Status:      {}", state.aggregate_status);
    println!("Progress:    {:.0}%", state.fraction_complete() * 100.0);
    println!(
        "Started At:  {}",
        state.started_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!(
        "Updated At:  {}",
        state.updated_at.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(handle) = &state.request_handle {
        println!("Request:     {}", handle);
    }
    println!();
    println!("Tasks:");
    for (index, task_id) in state.task_order.iter().enumerate() {
        let status = state.status_of(task_id).unwrap_or(TaskStatus::Pending);
        let marker = if index == state.current_index { ">" } else { " " };
        let attempts = state.attempts_for(task_id);
        println!("  {} {:<32} {:<12} attempts: {}", marker, task_id, status.to_string(), attempts);
        if let Some(error) = state.errors.get(task_id) {
            println!("      {}", error);
        }
    }
    Ok(())
}

/// Handle discard command
pub fn handle_discard(config: &Configuration, workflow_id: String) -> Result<()> {
    let store = open_store(config)?;
    store
        .clear(&workflow_id)
        .with_context(|| format!("Failed to discard workflow '{}'", workflow_id))?;
    println!("🗑  Discarded stored run of '{}'", workflow_id);
    Ok(())
}

/// Handle list command
pub fn handle_list(config: &Configuration, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let mut states = Vec::new();
    for workflow_id in store.list()? {
        if let Some(state) = store.load(&workflow_id)? {
            states.push(state);
        }
    }

    if json {
        let output: Vec<Value> = states
            .iter()
            .map(|state| {
                serde_json::json!({
                    "workflow_id": state.workflow_id,
                    "run_id": state.run_id.to_string(),
                    "status": state.aggregate_status,
                    "current_task": state.current_task_id(),
                    "fraction_complete": state.fraction_complete(),
                    "updated_at": state.updated_at.to_rfc3339(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if states.is_empty() {
        println!("No stored runs");
        return Ok(());
    }
    println!("{:<32} {:<12} {:>8}  CURRENT TASK", "WORKFLOW", "STATUS", "PROGRESS");
    for state in &states {
        println!(
            "{:<32} {:<12} {:>7.0}%  {}",
            state.workflow_id,
            state.aggregate_status.to_string(),
            state.fraction_complete() * 100.0,
            state.current_task_id().unwrap_or("-")
        );
    }
    Ok(())
}

/// Handle validate command
pub fn handle_validate(file: PathBuf, json: bool) -> Result<()> {
    let content = std::fs::read_to_string(&file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let result = SequenceValidator::validate_document(&content)?;

    if json {
        let output = serde_json::json!({
            "file": file.display().to_string(),
            "valid": result.is_valid(),
            "errors": result
                .errors
                .iter()
                .map(|e| serde_json::json!({"field": e.field, "message": e.message}))
                .collect::<Vec<_>>(),
            "warnings": result.warnings,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if result.is_valid() {
        println!("✅ {} is valid", file.display());
        for warning in &result.warnings {
            println!("   ⚠️  {}", warning);
        }
    } else {
        println!("❌ {} is invalid", file.display());
        for error in &result.errors {
            println!("   {}: {}", error.field, error.message);
        }
        for warning in &result.warnings {
            println!("   ⚠️  {}", warning);
        }
    }

    if result.is_valid() {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "{} has {} validation error(s)",
            file.display(),
            result.errors.len()
        ))
    }
}
