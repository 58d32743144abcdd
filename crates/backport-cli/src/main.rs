//! Backport CLI
//!
//! The `backport` command drives one trigger against GitHub and waits for
//! every job it queued to finish reporting.
//!
//! ## Commands
//!
//! - `run`: backport a pull request onto a named branch
//! - `labels`: backport a merged pull request onto each `target/` label
//! - `check`: run dry-run backport checks for each `target/` label
//! - `merged`: handle a merged pull request (backport, or clean up a bot backport)
//! - `validate`: check that a pull request against a release branch is a valid backport
//! - `config`: print the resolved configuration

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use backport_core::triggers::{
    backport_all_labels, backport_to_branch, handle_merged, run_check, validate_backport_pr,
    BackportValidity,
};
use backport_core::{BackportEngine, EngineConfig, GitCli, JobHandle, PullRequest, RepoSlug};
use backport_github::{GitHubClient, StaticTokenProvider};
use clap::{Parser, Subcommand};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "backport")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Backport merged pull requests onto release branches", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "BACKPORT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Backport a pull request onto a branch
    Run {
        /// Repository as owner/name
        #[arg(long, env = "BACKPORT_REPO")]
        repo: String,

        /// Pull request number
        #[arg(long)]
        pr: u64,

        /// Target branch
        #[arg(long)]
        branch: String,
    },

    /// Backport a pull request onto every branch named by its target labels
    Labels {
        #[arg(long, env = "BACKPORT_REPO")]
        repo: String,

        #[arg(long)]
        pr: u64,
    },

    /// Check whether a pull request backports cleanly to its target branches
    Check {
        #[arg(long, env = "BACKPORT_REPO")]
        repo: String,

        #[arg(long)]
        pr: u64,
    },

    /// Handle a merged pull request
    Merged {
        #[arg(long, env = "BACKPORT_REPO")]
        repo: String,

        #[arg(long)]
        pr: u64,
    },

    /// Validate a pull request against a release branch as a backport
    Validate {
        #[arg(long, env = "BACKPORT_REPO")]
        repo: String,

        #[arg(long)]
        pr: u64,
    },

    /// Print the resolved configuration as JSON
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    backport_core::telemetry::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref())?;

    if let Commands::Config = cli.command {
        return cmd_config(&config);
    }

    let engine = build_engine(config)?;
    match cli.command {
        Commands::Run { repo, pr, branch } => cmd_run(&engine, &repo, pr, &branch).await,
        Commands::Labels { repo, pr } => cmd_labels(&engine, &repo, pr).await,
        Commands::Check { repo, pr } => cmd_check(&engine, &repo, pr).await,
        Commands::Merged { repo, pr } => cmd_merged(&engine, &repo, pr).await,
        Commands::Validate { repo, pr } => cmd_validate(&engine, &repo, pr).await,
        Commands::Config => Ok(()),
    }
}

/// File (when given) or defaults, overlaid with the environment.
fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let mut config = match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    config.apply_env(|key| std::env::var(key).ok());
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn build_engine(config: EngineConfig) -> Result<BackportEngine> {
    let platform =
        GitHubClient::from_config(&config.github).context("Failed to create GitHub client")?;
    let tokens = StaticTokenProvider::from_config(&config.github)
        .context("Failed to set up repository tokens")?;
    Ok(BackportEngine::new(
        config,
        Arc::new(platform),
        Arc::new(GitCli::new()),
        Arc::new(tokens),
    ))
}

async fn fetch_pull_request(
    engine: &BackportEngine,
    repo: &str,
    number: u64,
) -> Result<(RepoSlug, PullRequest)> {
    let slug = RepoSlug::parse(repo)
        .with_context(|| format!("Repository must be owner/name, got '{repo}'"))?;
    let pr = engine
        .platform()
        .get_pull_request(&slug, number)
        .await
        .with_context(|| format!("Failed to fetch pull request #{number} of {slug}"))?;
    Ok((slug, pr))
}

async fn wait_for(handles: Vec<JobHandle>) {
    let total = handles.len();
    for handle in handles {
        let key = handle.key().to_string();
        handle.settled().await;
        info!(fingerprint = %key, "job finished");
    }
    info!("{total} job(s) finished");
}

async fn cmd_run(engine: &BackportEngine, repo: &str, number: u64, branch: &str) -> Result<()> {
    let (slug, pr) = fetch_pull_request(engine, repo, number).await?;
    let handle = backport_to_branch(engine, &slug, &pr, branch)
        .await
        .context("Failed to start backport")?;
    wait_for(handle.into_iter().collect()).await;
    Ok(())
}

async fn cmd_labels(engine: &BackportEngine, repo: &str, number: u64) -> Result<()> {
    let (slug, pr) = fetch_pull_request(engine, repo, number).await?;
    let handles = backport_all_labels(engine, &slug, &pr)
        .await
        .context("Failed to start backports")?;
    wait_for(handles).await;
    Ok(())
}

async fn cmd_check(engine: &BackportEngine, repo: &str, number: u64) -> Result<()> {
    let (slug, pr) = fetch_pull_request(engine, repo, number).await?;
    if pr.merged {
        info!(pr = number, "pull request already merged, skipping checks");
        return Ok(());
    }
    let handles = run_check(engine, &slug, &pr)
        .await
        .context("Failed to start backport checks")?;
    wait_for(handles).await;
    Ok(())
}

async fn cmd_merged(engine: &BackportEngine, repo: &str, number: u64) -> Result<()> {
    let (slug, pr) = fetch_pull_request(engine, repo, number).await?;
    let handles = handle_merged(engine, &slug, &pr)
        .await
        .context("Failed to handle merged pull request")?;
    wait_for(handles).await;
    Ok(())
}

async fn cmd_validate(engine: &BackportEngine, repo: &str, number: u64) -> Result<()> {
    let (slug, pr) = fetch_pull_request(engine, repo, number).await?;
    let validity = validate_backport_pr(engine, &slug, &pr)
        .await
        .context("Failed to validate backport")?;
    match validity {
        BackportValidity::NotABackport => info!(pr = number, "targets the default branch"),
        BackportValidity::Valid => info!(pr = number, "valid backport"),
        BackportValidity::Invalid(cause) => info!(pr = number, %cause, "invalid backport"),
    }
    Ok(())
}

fn cmd_config(config: &EngineConfig) -> Result<()> {
    let rendered =
        serde_json::to_string_pretty(config).context("Failed to serialize configuration")?;
    println!("{rendered}");
    Ok(())
}
