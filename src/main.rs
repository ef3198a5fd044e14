#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

mod config;

use clap::{Parser, Subcommand};
use config::{database_url_candidates_for_cli, load_config, Config};
use remedy::dedup::{fingerprint, FailureSource};
use remedy::error::get_error_info;
use remedy::logs::clean_logs;
use remedy::{
    CheckSuiteEvent, CommandPreparer, Ecosystem, InstallerCache, PullKey, RemedyDb, RemedyError,
    Result,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "remedy")]
#[command(about = "Remediates failing CI checks on bot-authored pull requests")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file (default: .remedy/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply the database schema
    InitDb,

    /// Print the retry fingerprint of a failed run's log
    Fingerprint {
        /// Check run details URL (GitHub Actions job or CircleCI workflow)
        #[arg(long)]
        details_url: String,

        /// File holding the raw log
        #[arg(long)]
        log_file: PathBuf,
    },

    /// Parse a check_suite webhook payload and print the extracted event
    ParseEvent {
        /// File holding the webhook JSON body
        #[arg(long)]
        payload: PathBuf,
    },

    /// List usage records that are not yet completed
    Active {
        #[arg(long, requires_all = ["repo", "pr"])]
        owner: Option<u64>,

        #[arg(long, requires_all = ["owner", "pr"])]
        repo: Option<u64>,

        #[arg(long, requires_all = ["owner", "repo"])]
        pr: Option<u64>,
    },

    /// Install dependencies for a prepared repository directory
    Prepare {
        #[arg(long)]
        repo_id: u64,

        /// Ecosystems to install (default: all)
        #[arg(long = "ecosystem")]
        ecosystems: Vec<String>,
    },

    /// Print the resolved configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error [{}]: {e}", e.code());
            if let Some((_, fix)) = get_error_info(e.code()) {
                eprintln!("  fix: {fix}");
            }
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref()).await?;

    match cli.command {
        Commands::InitDb => {
            let db = connect(&config).await?;
            db.initialize_schema().await?;
            println!("Schema applied");
            Ok(())
        }

        Commands::Fingerprint {
            details_url,
            log_file,
        } => {
            let source = FailureSource::from_details_url(&details_url).ok_or_else(|| {
                RemedyError::ConfigError(format!("Unsupported details URL: {details_url}"))
            })?;
            let raw = tokio::fs::read_to_string(&log_file).await?;
            let cleaned = clean_logs(&raw);
            let output = serde_json::json!({
                "source": source.to_string(),
                "workflow_id": source.workflow_id(),
                "fingerprint": fingerprint(&source.workflow_id(), &cleaned),
                "raw_log_bytes": raw.len(),
                "cleaned_log_bytes": cleaned.len(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }

        Commands::ParseEvent { payload } => {
            let body = tokio::fs::read_to_string(&payload).await?;
            let event = CheckSuiteEvent::from_json(&body)?;
            println!("{}", serde_json::to_string_pretty(&event)?);
            Ok(())
        }

        Commands::Active { owner, repo, pr } => {
            let key = match (owner, repo, pr) {
                (Some(owner), Some(repo), Some(pr)) => Some(PullKey::new(owner, repo, pr)),
                _ => None,
            };
            let db = connect(&config).await?;
            let records = db.list_active_usage(key).await?;

            if records.is_empty() {
                println!("No active usage records");
                return Ok(());
            }
            println!("{:<10} {:<24} {:<28} {:>8}", "ID", "PULL", "CREATED", "TOKENS");
            println!("{}", "-".repeat(73));
            for record in records {
                println!(
                    "{:<10} {:<24} {:<28} {:>8}",
                    record.id,
                    record.key.to_string(),
                    record.created_at.to_rfc3339(),
                    record.tokens.total_tokens()
                );
            }
            Ok(())
        }

        Commands::Prepare {
            repo_id,
            ecosystems,
        } => {
            let wanted = if ecosystems.is_empty() {
                Ecosystem::ALL.to_vec()
            } else {
                ecosystems
                    .iter()
                    .map(|name| {
                        Ecosystem::try_from(name.as_str()).map_err(RemedyError::ConfigError)
                    })
                    .collect::<Result<Vec<_>>>()?
            };

            let cache = InstallerCache::new(CommandPreparer::new(&config.efs_root));
            let ready = cache
                .ensure_ready(repo_id, &wanted, config.installer_timeout)
                .await;
            info!(repo_id, ready = ready.len(), requested = wanted.len(), "Prepared repository");

            for ecosystem in wanted {
                let state = if ready.contains(&ecosystem) {
                    "ready"
                } else {
                    "not ready"
                };
                println!("{:<8} {state}", ecosystem.as_str());
            }
            Ok(())
        }

        Commands::ShowConfig => {
            print_config(&config);
            Ok(())
        }
    }
}

/// Tries each candidate URL in order and keeps the first that connects.
async fn connect(config: &Config) -> Result<RemedyDb> {
    let mut last_error = None;
    for (index, url) in database_url_candidates_for_cli(config).iter().enumerate() {
        match RemedyDb::new(url).await {
            Ok(db) => return Ok(db),
            Err(e) => {
                warn!(candidate = index, "Database connection failed: {e}");
                last_error = Some(e);
            }
        }
    }
    Err(last_error
        .unwrap_or_else(|| RemedyError::ConfigError("No database URL configured".to_string())))
}

fn print_config(config: &Config) {
    let pipeline = &config.pipeline;
    let loop_settings = &pipeline.loop_settings;
    println!("branch_prefix = \"{}\"", pipeline.branch_prefix);
    println!("execution_budget_secs = {}", pipeline.execution_budget.as_secs());
    println!("budget_buffer_secs = {}", loop_settings.budget_buffer.as_secs());
    println!("max_stagnant_iterations = {}", loop_settings.max_stagnant_iterations);
    println!("max_tool_calls_per_phase = {}", loop_settings.max_tool_calls_per_phase);
    println!("installer_timeout_secs = {}", config.installer_timeout.as_secs());
    println!("efs_root = \"{}\"", config.efs_root.display());
    let database_url = if config.database_url.is_some() {
        "<from config>"
    } else {
        "<from environment>"
    };
    println!("database_url = {database_url}");
}
