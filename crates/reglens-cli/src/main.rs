//! reglens - operator CLI.
//!
//! Offline counterpart to the daemon: indexes a repository into the
//! vector store, runs an analysis end to end, or fetches a stored audit
//! record. Uses the same environment configuration as the daemon.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reglens_core::{AnalysisRequest, Orchestrator, RuntimeConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "reglens")]
#[command(version, about = "Regulatory impact analysis over a code repository")]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index a source tree into the vector store
    Index {
        /// Repository root; defaults to the configured REPO_PATH
        #[arg(long)]
        repo: Option<PathBuf>,

        /// File extensions to index, comma separated
        #[arg(long, value_delimiter = ',', default_value = "py")]
        extensions: Vec<String>,
    },

    /// Analyze a regulatory text and print the final state
    Analyze {
        /// Regulatory text passed inline
        #[arg(long, conflicts_with = "file")]
        text: Option<String>,

        /// File containing the regulatory text
        #[arg(long)]
        file: Option<PathBuf>,

        /// Target repository; defaults to the configured REPO_PATH
        #[arg(long)]
        repo: Option<String>,
    },

    /// Print the audit record for an execution id
    Audit {
        /// Execution id of the run to fetch
        execution_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let config = RuntimeConfig::from_env().context("failed to load configuration")?;
    let default_repo = config.repo_path.clone();
    let orchestrator = Orchestrator::new(config).context("failed to initialize services")?;

    match cli.command {
        Command::Index { repo, extensions } => {
            let repo = repo.unwrap_or(default_repo);
            let report = orchestrator
                .index_repository(&repo, extensions)
                .await
                .with_context(|| format!("indexing {} failed", repo.display()))?;
            println!(
                "indexed {} files, skipped {}, pruned {} ({})",
                report.indexed,
                report.skipped,
                report.pruned,
                repo.display()
            );
        }

        Command::Analyze { text, file, repo } => {
            let regulatory_text = match (text, file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?,
                (None, None) => bail!("provide the regulatory text via --text or --file"),
            };

            let outcome = orchestrator
                .analyze(AnalysisRequest {
                    regulatory_text,
                    repo_path: repo,
                    api_key_override: None,
                })
                .await
                .context("analysis request rejected")?;

            let halted = outcome.state.error.clone();
            let payload = serde_json::json!({
                "state": outcome.state,
                "graph_visualization": outcome.graph_visualization,
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);

            if let Some(error) = halted {
                bail!("analysis halted: {error}");
            }
        }

        Command::Audit { execution_id } => {
            let record = orchestrator
                .audit_record(execution_id.clone())
                .await
                .context("audit store unavailable")?;
            match record {
                Some(state) => println!("{}", serde_json::to_string_pretty(&state)?),
                None => bail!("execution not found: {execution_id}"),
            }
        }
    }

    Ok(())
}
