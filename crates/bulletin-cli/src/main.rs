use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use bulletin_client::{HttpCrawler, SelectorConfig, SourceConfig};
use bulletin_core::{BulkLoader, Scheduler, SchedulerConfig, SyncCycle, TracingSchedulerReporter};
use bulletin_db::{Database, DatabaseConfig, EntryRepository};

#[derive(Parser)]
#[command(name = "bulletin", version, about = "Notice board sync scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bulk load, then keep the store in sync until Ctrl-C
    Run {
        #[command(flatten)]
        source: SourceArgs,

        /// Number of concurrent workers
        #[arg(long)]
        workers: Option<usize>,

        /// Seconds between successful syncs
        #[arg(long)]
        resync_interval_secs: Option<u64>,

        /// Skip the initial bulk load
        #[arg(long, default_value_t = false)]
        no_bulk_load: bool,
    },

    /// Run a single sync cycle against listing page 1
    Sync {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Load every listing page into the store once
    BulkLoad {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Show one page of stored entries, newest first
    List {
        /// Page number (1-based)
        #[arg(short, long, default_value_t = 1)]
        page: u32,

        /// Print entries as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Apply pending database migrations
    Migrate,
}

#[derive(Args)]
struct SourceArgs {
    /// Listing page URL of the notice board
    #[arg(long, env = "BULLETIN_SOURCE_URL")]
    listing_url: String,

    /// Query parameter carrying the page number
    #[arg(long, env = "BULLETIN_PAGE_PARAM", default_value = "page")]
    page_param: String,

    /// CSS selector matching one notice row
    #[arg(long, env = "BULLETIN_ROW_SELECTOR")]
    row_selector: Option<String>,

    /// CSS selector for the title, relative to the row
    #[arg(long, env = "BULLETIN_TITLE_SELECTOR")]
    title_selector: Option<String>,

    /// CSS selector for the link element, relative to the row
    #[arg(long, env = "BULLETIN_LINK_SELECTOR")]
    link_selector: Option<String>,

    /// CSS selector for the publish date, relative to the row
    #[arg(long, env = "BULLETIN_DATE_SELECTOR")]
    date_selector: Option<String>,

    /// CSS selector for the pagination links
    #[arg(long, env = "BULLETIN_PAGINATION_SELECTOR")]
    pagination_selector: Option<String>,

    /// Basic auth user for the notice board
    #[arg(long, env = "BULLETIN_SOURCE_USERNAME")]
    username: Option<String>,

    /// Basic auth password for the notice board
    #[arg(long, env = "BULLETIN_SOURCE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Request timeout in seconds
    #[arg(long, env = "BULLETIN_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,

    /// Upper bound on the page count announced by the pagination block
    #[arg(long, env = "BULLETIN_MAX_PAGES", default_value_t = bulletin_client::DEFAULT_MAX_PAGES)]
    max_pages: u32,
}

impl SourceArgs {
    fn into_config(self) -> SourceConfig {
        let defaults = SelectorConfig::default();
        let selectors = SelectorConfig {
            row: self.row_selector.unwrap_or(defaults.row),
            title: self.title_selector.unwrap_or(defaults.title),
            link: self.link_selector.unwrap_or(defaults.link),
            date: self.date_selector.unwrap_or(defaults.date),
            pagination: self.pagination_selector.unwrap_or(defaults.pagination),
        };

        let config = SourceConfig::new(self.listing_url)
            .with_page_param(self.page_param)
            .with_selectors(selectors)
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_max_pages(self.max_pages);

        match self.username {
            Some(username) => config.with_basic_auth(username, self.password.unwrap_or_default()),
            None => config,
        }
    }

    fn crawler(self) -> Result<HttpCrawler> {
        HttpCrawler::new(self.into_config()).context("Failed to create crawler")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("bulletin=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            source,
            workers,
            resync_interval_secs,
            no_bulk_load,
        } => {
            let mut config = SchedulerConfig::from_env().context("Invalid scheduler configuration")?;
            if let Some(workers) = workers {
                config = config.with_workers(workers);
            }
            if let Some(secs) = resync_interval_secs {
                config = config.with_resync_interval(Duration::from_secs(secs));
            }
            if no_bulk_load {
                config = config.with_bulk_load_on_start(false);
            }
            let crawler = source.crawler()?;
            let repo = connect_db().await?;
            cmd_run(crawler, repo, config).await?;
        }
        Commands::Sync { source } => {
            let crawler = source.crawler()?;
            let repo = connect_db().await?;
            cmd_sync(crawler, repo).await?;
        }
        Commands::BulkLoad { source } => {
            let crawler = source.crawler()?;
            let repo = connect_db().await?;
            cmd_bulk_load(crawler, repo).await?;
        }
        Commands::List { page, json } => {
            let repo = connect_db().await?;
            cmd_list(&repo, page, json).await?;
        }
        Commands::Migrate => {
            connect_db().await?;
            println!("Migrations applied");
        }
    }

    Ok(())
}

/// Connect to PostgreSQL using DATABASE_URL and apply pending migrations.
async fn connect_db() -> Result<EntryRepository> {
    let config = DatabaseConfig::from_env()?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await?;
    Ok(db.entry_repo())
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Ctrl-C received, shutting down"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C, shutting down"),
        }
        token.cancel();
    });
}

async fn cmd_run(crawler: HttpCrawler, repo: EntryRepository, config: SchedulerConfig) -> Result<()> {
    tracing::info!(
        workers = config.workers,
        resync_interval_secs = config.resync_interval.as_secs(),
        bulk_load = config.bulk_load_on_start,
        "Starting scheduler"
    );

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let scheduler = Scheduler::new(crawler, repo, config);
    scheduler
        .run(cancel, Arc::new(TracingSchedulerReporter))
        .await
        .context("Scheduler failed")?;

    tracing::info!("Scheduler stopped");
    Ok(())
}

async fn cmd_sync(crawler: HttpCrawler, repo: EntryRepository) -> Result<()> {
    let report = SyncCycle::new(crawler, repo)
        .execute()
        .await
        .context("Sync cycle failed")?;

    println!(
        "Fetched {} entries: {} new, {} already stored",
        report.fetched, report.created, report.skipped
    );
    Ok(())
}

async fn cmd_bulk_load(crawler: HttpCrawler, repo: EntryRepository) -> Result<()> {
    let report = BulkLoader::new(crawler, repo)
        .run(&TracingSchedulerReporter)
        .await;

    println!(
        "Loaded {} pages ({} failed): {} created, {} duplicates, {} failed",
        report.total_pages, report.pages_failed, report.created, report.duplicates, report.failed
    );
    Ok(())
}

async fn cmd_list(repo: &EntryRepository, page: u32, json: bool) -> Result<()> {
    let entries = repo.read_page(page).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No entries on page {}", page.max(1));
        return Ok(());
    }

    println!("Entries (page {}):\n", page.max(1));
    for entry in &entries {
        println!(
            "  {:<12} {}\n  {:<12} {}",
            entry.published_at, entry.title, "", entry.url
        );
    }
    println!("\nShown: {} entries", entries.len());

    Ok(())
}
