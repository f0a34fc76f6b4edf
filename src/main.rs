//! # Reel Curator CLI (`reel`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `reel init` | Create the SQLite database and run schema migrations |
//! | `reel run` | Run one ingestion in the foreground |
//! | `reel review` | Run one lifecycle review pass |
//! | `reel vote <id>` | Record a feedback vote |
//! | `reel runs` | List persisted run history |
//! | `reel stats` | Record counts per status and target |
//! | `reel serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! reel init --config ./config/reel.toml
//! reel run --entity "Gordon Ryan" --query "gordon ryan guard passing" --threshold 70
//! reel vote dQw4w9WgXcQ --not-helpful --category context_issue
//! RUST_LOG=reel_curator=debug reel serve
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use reel_curator::app::App;
use reel_curator::config;
use reel_curator::db;
use reel_curator::ingest::RunRequest;
use reel_curator::lifecycle::LifecycleManager;
use reel_curator::migrate;
use reel_curator::models::{FeedbackCategory, RunStatus};
use reel_curator::progress::{format_number, ProgressMode};
use reel_curator::server;
use reel_curator::sqlite_store::SqliteStore;
use reel_curator::stats;

#[derive(Parser)]
#[command(
    name = "reel",
    about = "Reel Curator — discovery, quality scoring and lifecycle management for instructional videos",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/reel.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Run one ingestion in the foreground and print its summary.
    Run {
        /// Target instructor or entity the videos must feature.
        #[arg(long)]
        entity: String,

        /// Catalog search query. Repeat for several queries; they run in order.
        #[arg(long = "query", required = true)]
        queries: Vec<String>,

        /// Minimum final score to accept. Defaults to `[curation].min_quality`.
        #[arg(long)]
        threshold: Option<u8>,

        /// Minimum duration in seconds. Defaults to `[curation].min_duration_secs`.
        #[arg(long)]
        min_duration: Option<u32>,

        /// Progress on stderr. Defaults to human when stderr is a TTY, else off.
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,
    },

    /// Run one lifecycle review pass over records with enough feedback.
    Review,

    /// Record a feedback vote for a record.
    #[command(group(ArgGroup::new("verdict").required(true).args(["helpful", "not_helpful"])))]
    Vote {
        external_id: String,

        #[arg(long)]
        helpful: bool,

        #[arg(long)]
        not_helpful: bool,

        /// quality_issue, context_issue, or too_advanced.
        #[arg(long)]
        category: Option<String>,
    },

    /// List recent ingestion runs.
    Runs {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },

    /// Show record counts per status and per target.
    Stats,

    /// Start the HTTP server (runs, SSE progress, lifecycle, feedback).
    Serve,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(p: ProgressArg) -> Self {
        match p {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

/// Open the record store without building any external collaborator.
async fn open_store(cfg: &config::Config) -> anyhow::Result<Arc<SqliteStore>> {
    let pool = db::connect(cfg).await?;
    migrate::apply(&pool).await?;
    Ok(Arc::new(SqliteStore::new(pool)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("reel_curator=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Run {
            entity,
            queries,
            threshold,
            min_duration,
            progress,
        } => {
            let app = App::from_config(&cfg).await?;
            let request = RunRequest {
                target_entity: entity,
                queries,
                min_quality: threshold.unwrap_or(cfg.curation.min_quality),
                min_duration_secs: min_duration.unwrap_or(cfg.curation.min_duration_secs),
            };
            let mode = progress
                .map(ProgressMode::from)
                .unwrap_or_else(ProgressMode::default_for_tty);

            let state = app.ingestion.run_to_completion(request, mode.sink()).await?;
            let summary = state.summary.unwrap_or_default();

            println!("run {} ({})", state.run_id, state.status.as_str());
            println!("  analyzed:   {}", summary.analyzed);
            println!("  approved:   {}", summary.approved);
            println!("  rejected:   {}", summary.rejected);
            println!("  duplicates: {}", summary.duplicates);
            println!("  quota used: {}", format_number(summary.quota_used as u64));
            for item in &summary.added {
                println!("  + {} [{}]", item.title, item.external_id);
            }
            if state.status == RunStatus::Failed {
                anyhow::bail!(
                    "run failed: {}",
                    state.error.unwrap_or_else(|| "unknown error".to_string())
                );
            }
        }
        Commands::Review => {
            let store = open_store(&cfg).await?;
            let manager =
                LifecycleManager::new(store.clone(), store, cfg.lifecycle.thresholds());
            let report = manager.review_all().await?;
            println!("lifecycle review");
            println!("  reviewed:   {}", report.reviewed);
            println!("  removed:    {}", report.removed);
            println!("  flagged:    {}", report.flagged);
            println!("  promoted:   {}", report.promoted);
            println!("  retargeted: {}", report.retargeted);
            if report.failed > 0 {
                println!("  failed:     {}", report.failed);
            }
        }
        Commands::Vote {
            external_id,
            helpful,
            not_helpful: _,
            category,
        } => {
            let category = category
                .as_deref()
                .map(str::parse::<FeedbackCategory>)
                .transpose()?;
            let store = open_store(&cfg).await?;
            if !store.record_vote(&external_id, helpful, category).await? {
                anyhow::bail!("record not found: {}", external_id);
            }
            println!("ok");
        }
        Commands::Runs { limit } => {
            stats::run_history(&cfg, limit).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
