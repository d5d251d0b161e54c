mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use cli::handlers::{self, GlobalOptions};
use std::path::PathBuf;
use taskseq_core::models::LogLevel;

#[derive(Parser, Debug)]
#[command(name = "taskseq")]
#[command(version = "0.1.0")]
#[command(about = "Resumable command sequences for cluster-management operations")]
#[command(
    help_template = "{name} - {version}\n{about}\n\n{usage-heading}\n  {usage}\n\n{all-args}{options}\n"
)]
struct Cli {
    /// Path to configuration file (default: <config dir>/taskseq/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cluster-management server URL, overrides the configuration
    #[arg(long, global = true)]
    server: Option<String>,

    /// Cluster name, overrides the configuration
    #[arg(long, global = true)]
    cluster: Option<String>,

    /// Directory holding run states, overrides the configuration
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_parser = parse_log_level)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a sequence definition from the first task
    ///
    /// Examples:
    ///   taskseq run enable-rm-ha.yaml --context rm.json
    ///   taskseq run reassign-master.yaml --skip-task cleanMySqlServer --json
    Run {
        /// Sequence definition file (YAML)
        file: PathBuf,

        /// Workflow context file (JSON or YAML object)
        #[arg(short, long)]
        context: Option<PathBuf>,

        /// Leave a task out of the sequence (repeatable)
        #[arg(long = "skip-task")]
        skip_tasks: Vec<String>,

        /// Print progress events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Continue the stored run of a sequence
    Resume {
        /// Sequence definition file (YAML)
        file: PathBuf,

        /// Workflow context file (JSON or YAML object)
        #[arg(short, long)]
        context: Option<PathBuf>,

        /// Print progress events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Retry the failed task of a stored run
    Retry {
        /// Sequence definition file (YAML)
        file: PathBuf,

        /// Workflow context file (JSON or YAML object)
        #[arg(short, long)]
        context: Option<PathBuf>,

        /// Print progress events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Skip the failed task of a stored run and continue
    Skip {
        /// Sequence definition file (YAML)
        file: PathBuf,

        /// Workflow context file (JSON or YAML object)
        #[arg(short, long)]
        context: Option<PathBuf>,

        /// Print progress events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Mark a stored run aborted
    Abort {
        /// Workflow id
        workflow_id: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show the stored run of a workflow
    Status {
        /// Workflow id
        workflow_id: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Delete the stored run of a workflow
    Discard {
        /// Workflow id
        workflow_id: String,
    },

    /// List stored runs
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Validate a sequence definition file
    Validate {
        /// Sequence definition file (YAML)
        file: PathBuf,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

fn parse_log_level(value: &str) -> Result<LogLevel, String> {
    match value.to_ascii_lowercase().as_str() {
        "error" => Ok(LogLevel::Error),
        "warn" => Ok(LogLevel::Warn),
        "info" => Ok(LogLevel::Info),
        "debug" => Ok(LogLevel::Debug),
        "trace" => Ok(LogLevel::Trace),
        other => Err(format!("unknown log level '{}'", other)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let options = GlobalOptions {
        config: cli.config,
        server: cli.server,
        cluster: cli.cluster,
        state_dir: cli.state_dir,
        log_level: cli.log_level,
    };
    let config = handlers::load_configuration(&options)?;
    if let Err(e) = taskseq_core::services::init_logging(config.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    match cli.command {
        Commands::Run {
            file,
            context,
            skip_tasks,
            json,
        } => {
            handlers::handle_run(&config, file, context, skip_tasks, json).await?;
        }
        Commands::Resume {
            file,
            context,
            json,
        } => {
            handlers::handle_resume(&config, file, context, handlers::ResumeAction::Continue, json)
                .await?;
        }
        Commands::Retry {
            file,
            context,
            json,
        } => {
            handlers::handle_resume(&config, file, context, handlers::ResumeAction::Retry, json)
                .await?;
        }
        Commands::Skip {
            file,
            context,
            json,
        } => {
            handlers::handle_resume(&config, file, context, handlers::ResumeAction::Skip, json)
                .await?;
        }
        Commands::Abort { workflow_id, json } => {
            handlers::handle_abort(&config, workflow_id, json)?;
        }
        Commands::Status { workflow_id, json } => {
            handlers::handle_status(&config, workflow_id, json)?;
        }
        Commands::Discard { workflow_id } => {
            handlers::handle_discard(&config, workflow_id)?;
        }
        Commands::List { json } => {
            handlers::handle_list(&config, json)?;
        }
        Commands::Validate { file, json } => {
            handlers::handle_validate(file, json)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_with_options() {
        let cli = Cli::try_parse_from([
            "taskseq",
            "run",
            "reassign.yaml",
            "--context",
            "ctx.json",
            "--skip-task",
            "cleanMySqlServer",
            "--skip-task",
            "configureMySqlServer",
            "--cluster",
            "prod",
            "--json",
        ])
        .unwrap();

        assert_eq!(cli.cluster.as_deref(), Some("prod"));
        match cli.command {
            Commands::Run {
                file,
                context,
                skip_tasks,
                json,
            } => {
                assert_eq!(file, PathBuf::from("reassign.yaml"));
                assert_eq!(context, Some(PathBuf::from("ctx.json")));
                assert_eq!(skip_tasks, vec!["cleanMySqlServer", "configureMySqlServer"]);
                assert!(json);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_log_level() {
        let cli = Cli::try_parse_from(["taskseq", "--log-level", "DEBUG", "list"]).unwrap();
        assert_eq!(cli.log_level, Some(LogLevel::Debug));
        assert!(Cli::try_parse_from(["taskseq", "--log-level", "loud", "list"]).is_err());
    }

    #[test]
    fn test_abort_requires_workflow_id() {
        assert!(Cli::try_parse_from(["taskseq", "abort"]).is_err());
        let cli = Cli::try_parse_from(["taskseq", "abort", "enableRmHA"]).unwrap();
        assert!(matches!(cli.command, Commands::Abort { workflow_id, json: false } if workflow_id == "enableRmHA"));
    }
}
