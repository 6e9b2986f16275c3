use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commitcast::coordinator::compose_digest;
use commitcast::summarizer::{OpenAiSummarizer, Summarizer};
use commitcast::{
    BranchFetcher, BranchSet, CheckpointStore, Config, DeliveryCoordinator, GitHubClient,
    GroupBotNotifier, Notifier, RepoCheckpoint, RepoConfig, Scheduler, StateDb,
};

/// Changed files listed per commit by `diagnose`
const DIAGNOSE_FILE_LIMIT: usize = 3;

#[derive(Parser)]
#[command(name = "commitcast")]
#[command(about = "Polls GitHub repositories and broadcasts digests of new commits")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the polling loop until interrupted
    Run,

    /// Run a single pass over all repositories and exit
    Once,

    /// Write a starter configuration file
    Init {
        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },

    /// Summarize the most recent commits of a repository without touching checkpoints
    Test {
        /// Repository as owner/repo
        repo: String,

        /// Branch to read (defaults to the repository's default listing)
        #[arg(short, long)]
        branch: Option<String>,

        /// Number of recent commits to summarize
        #[arg(short = 'n', long, default_value_t = 3)]
        count: u8,

        /// Also post the digest to the delivery channel
        #[arg(long)]
        send: bool,
    },

    /// Show what the next cycle would deliver for a repository, without delivering it
    Diagnose {
        /// Repository as owner/repo
        repo: String,
    },

    /// Show stored checkpoints
    Status {
        /// Only show this repository
        repo: Option<String>,
    },

    /// Forget a repository's checkpoint so the next cycle starts fresh
    Reset {
        /// Repository as owner/repo
        repo: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init { force } = cli.command {
        init_logging(cli.verbose, "info")?;
        return cmd_init(cli.config, force);
    }

    let config = load_config(cli.config.as_deref())?;
    init_logging(cli.verbose, &config.logging.level)?;
    info!("Starting commitcast v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Run => cmd_run(&config).await,
        Commands::Once => cmd_once(&config).await,
        Commands::Init { .. } => Ok(()),
        Commands::Test {
            repo,
            branch,
            count,
            send,
        } => cmd_test(&config, &repo, branch.as_deref(), count, send).await,
        Commands::Diagnose { repo } => cmd_diagnose(&config, &repo).await,
        Commands::Status { repo } => cmd_status(&config, repo.as_deref()),
        Commands::Reset { repo } => cmd_reset(&config, &repo),
    }
}

/// Initialize logging; `RUST_LOG` wins over `--verbose`, which wins over the config level
fn init_logging(verbose: bool, level: &str) -> Result<()> {
    let default_level = if verbose { "debug" } else { level };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    Ok(())
}

fn resolve_config_path(config_path: Option<&std::path::Path>) -> Result<PathBuf> {
    match config_path {
        Some(path) => Ok(path.to_path_buf()),
        None => Config::default_config_path(),
    }
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<&std::path::Path>) -> Result<Config> {
    let path = resolve_config_path(config_path)?;

    if !path.exists() {
        bail!(
            "Configuration file not found at {:?}. Run 'commitcast init' to create one",
            path
        );
    }

    Config::load(&path)
}

fn cmd_init(config_path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = resolve_config_path(config_path.as_deref())?;

    if path.exists() && !force {
        println!("⚠️  Configuration already exists at {:?}", path);
        println!("   Use --force to overwrite it");
        return Ok(());
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    Config::default().save(&path)?;

    println!("✅ Configuration written to {:?}", path);
    println!("   Edit repositories, delivery.group_id and summarizer.api_key,");
    println!("   then run 'commitcast run'");
    Ok(())
}

async fn cmd_run(config: &Config) -> Result<()> {
    let mut scheduler = Scheduler::from_config(config)?;

    println!(
        "🚀 Watching {} repositories every {:?} (Ctrl+C to stop)",
        config.repositories.len(),
        config.check_interval()?
    );

    scheduler.run().await
}

async fn cmd_once(config: &Config) -> Result<()> {
    let mut scheduler = Scheduler::from_config(config)?;
    let summary = scheduler.run_pass().await;

    println!("\n📊 Pass complete in {:.2}s", summary.duration.as_secs_f64());
    println!("   📨 Delivered: {}", summary.delivered);
    println!("   💤 No new commits: {}", summary.idle);
    println!("   ⚠️  Delivery failed: {}", summary.delivery_failed);
    println!("   ❌ Errors: {}", summary.errored);

    Ok(())
}

async fn cmd_test(
    config: &Config,
    repo: &str,
    branch: Option<&str>,
    count: u8,
    send: bool,
) -> Result<()> {
    let github = GitHubClient::new(config)?;
    let fetcher = BranchFetcher::new(Arc::new(github), count.clamp(1, 100));

    println!("🧪 Testing {}", repo);

    let commits: Vec<_> = fetcher
        .fetch_branch_commits(repo, branch, None, None, true)
        .await
        .into_iter()
        .rev()
        .collect();

    if commits.is_empty() {
        println!("No commits found (see log output for fetch errors)");
        return Ok(());
    }

    println!("Found {} recent commit(s)", commits.len());

    let summarizer = OpenAiSummarizer::from_config(&config.summarizer)?;
    let digest = compose_digest(
        summarizer.as_ref().map(|s| s as &dyn Summarizer),
        repo,
        &commits,
    )
    .await;

    println!("\nGenerated digest:");
    println!("{}", "-".repeat(50));
    println!("{}", digest);
    println!("{}", "-".repeat(50));

    if send {
        let notifier = GroupBotNotifier::from_config(&config.delivery)?;
        if notifier.deliver(&digest).await {
            println!("✅ Digest delivered");
        } else {
            println!("❌ Delivery failed");
        }
    }

    Ok(())
}

async fn cmd_diagnose(config: &Config, repo: &str) -> Result<()> {
    let repo_config = config
        .repo_configs()
        .into_iter()
        .find(|rc| rc.repo == repo);
    let configured = repo_config.is_some();
    let repo_config = repo_config.unwrap_or_else(|| RepoConfig {
        repo: repo.to_string(),
        branches: BranchSet::All,
    });

    let coordinator = DeliveryCoordinator::from_config(config)?;
    let (checkpoint, commits) = coordinator.pending_commits(&repo_config).await;

    println!("🔍 Diagnosing {}", repo);
    println!(
        "🌱 Branches: {}{}",
        repo_config.branches.describe(),
        if configured { "" } else { " (repository is not configured)" }
    );

    println!("📊 Checkpoint:");
    match &checkpoint {
        Some(checkpoint) => print_checkpoint(checkpoint),
        None => println!("   ⏳ None, the next cycle is a first check"),
    }

    if commits.is_empty() {
        println!("🆕 No new commits (see log output for fetch errors)");
        return Ok(());
    }

    println!("🆕 {} new commit(s) would be delivered next cycle:", commits.len());
    for commit in &commits {
        println!("  • {}: {}", commit.short_id, commit.headline());
        println!(
            "    👤 {} | 📅 {}",
            commit.author_name,
            commit.authored_at.format("%Y-%m-%d %H:%M:%S UTC")
        );

        if commit.changed_files.is_empty() {
            println!("    📁 File details unavailable");
            continue;
        }

        println!("    📁 {} file(s) changed", commit.changed_files.len());
        for file in commit.changed_files.iter().take(DIAGNOSE_FILE_LIMIT) {
            println!(
                "      - {} ({}, +{} -{})",
                file.path,
                file.change_kind.as_str(),
                file.additions,
                file.deletions
            );
        }
        if commit.changed_files.len() > DIAGNOSE_FILE_LIMIT {
            println!(
                "      ... and {} more",
                commit.changed_files.len() - DIAGNOSE_FILE_LIMIT
            );
        }
    }

    Ok(())
}

fn print_checkpoint(checkpoint: &RepoCheckpoint) {
    match checkpoint.last_check_time {
        Some(at) => println!("   🕒 Last delivered: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("   🕒 Last delivered: never"),
    }
    if let Some(id) = &checkpoint.last_commit_id {
        println!("   🔖 Last commit: {}", id);
    }
}

fn cmd_status(config: &Config, repo: Option<&str>) -> Result<()> {
    let db = StateDb::open_at(config.database_path())?;

    let checkpoints: Vec<_> = match repo {
        Some(repo) => db.load(repo)?.into_iter().collect(),
        None => db.list()?,
    };

    println!("📊 Checkpoints ({})", config.database_path().display());

    for checkpoint in checkpoints {
        println!("📁 {}", checkpoint.repo);
        print_checkpoint(&checkpoint);
    }

    for entry in &config.repositories {
        if repo.map_or(true, |r| r == entry.repo()) && db.load(entry.repo())?.is_none() {
            println!("📁 {}\n   ⏳ Not delivered yet", entry.repo());
        }
    }

    Ok(())
}

fn cmd_reset(config: &Config, repo: &str) -> Result<()> {
    let db = StateDb::open_at(config.database_path())?;

    if db.reset(repo)? {
        println!("✅ Checkpoint for {} removed; the next cycle treats it as a first check", repo);
    } else {
        println!("⚠️  No checkpoint stored for {}", repo);
    }

    Ok(())
}
