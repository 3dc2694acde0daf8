//! Touchpoint - mail and calendar ingestion driver
//!
//! Wires the SQLite store, the HTTP provider and the OAuth endpoint into a
//! sync service and exposes it as a handful of subcommands.

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;

use ingest::sync::DEFAULT_HISTORY_LIMIT;
use ingest::{
    HttpProvider, JobId, OAuthClient, Source, SqliteSyncStore, SyncConfig, SyncJob, SyncMode,
    SyncOrchestrator, SyncService, SyncStore, TenantId,
};

const DATABASE_FILE: &str = "touchpoint.db";

#[derive(Parser)]
#[command(name = "touchpoint")]
#[command(about = "Pull mail and calendar activity into Touchpoint tenants")]
struct Cli {
    /// Tenant to operate on
    #[arg(short, long, env = "TOUCHPOINT_TENANT")]
    tenant: String,

    /// Print job rows as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print (and open) the provider consent URL
    Authorize {
        /// Only print the URL
        #[arg(long)]
        no_browser: bool,
    },
    /// Exchange an authorization code and store the tenant's credential
    Grant {
        /// Code returned to the redirect target
        code: String,
    },
    /// Resume from the stored cursor
    Sync {
        #[arg(value_enum)]
        source: SourceArg,
    },
    /// Clear the cursor and read the whole feed again
    Resync {
        #[arg(value_enum)]
        source: SourceArg,
    },
    /// Read a bounded window around now without touching the cursor
    Window {
        #[arg(value_enum)]
        source: SourceArg,
        /// Days before now (defaults to the configured window)
        #[arg(long)]
        past_days: Option<i64>,
        /// Days after now (defaults to the configured window)
        #[arg(long)]
        future_days: Option<i64>,
    },
    /// Recent sync jobs, newest first
    History {
        #[arg(short, long, default_value_t = DEFAULT_HISTORY_LIMIT)]
        limit: usize,
    },
    /// Last job per source and the stored cursors
    Status,
    /// Ask a running job to stop before its next page
    Cancel { job_id: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceArg {
    Mail,
    Calendar,
}

impl From<SourceArg> for Source {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Mail => Source::Mail,
            SourceArg::Calendar => Source::Calendar,
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // Bootstrap config directory
    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let sync_config = SyncConfig::load().context("Failed to load sync settings")?;
    let db_path = config::data_path(DATABASE_FILE)?;
    info!("Using database at {}", db_path.display());

    let store: Arc<dyn SyncStore> = Arc::new(SqliteSyncStore::new(&db_path)?);
    let oauth = Arc::new(OAuthClient::new(&sync_config));
    let provider = Arc::new(HttpProvider::new(&sync_config)?);
    let orchestrator = SyncOrchestrator::new(sync_config.clone(), store.clone(), provider, oauth.clone());
    let service = SyncService::new(Arc::new(orchestrator));

    let tenant = TenantId::new(cli.tenant);

    match cli.command {
        Command::Authorize { no_browser } => {
            let url = oauth.authorize_url(tenant.as_str())?;
            println!("Visit this URL to grant access for tenant {}:\n{}", tenant, url);
            if !no_browser && let Err(e) = open::that(&url) {
                warn!("Failed to open browser: {}. Please open the URL manually.", e);
            }
        }
        Command::Grant { code } => {
            let grant = oauth.exchange_code(code.trim()).await?;
            service.orchestrator().tokens().store_grant(&tenant, &grant).await?;
            println!("Stored credential for tenant {}", tenant);
        }
        Command::Sync { source } => {
            run_job(&service, &tenant, source.into(), SyncMode::Incremental, cli.json).await?;
        }
        Command::Resync { source } => {
            run_job(&service, &tenant, source.into(), SyncMode::FullResync, cli.json).await?;
        }
        Command::Window {
            source,
            past_days,
            future_days,
        } => {
            let now = Utc::now();
            let (mut start, mut end) = sync_config.calendar_window(now);
            if let Some(days) = past_days {
                start = now - ChronoDuration::days(days);
            }
            if let Some(days) = future_days {
                end = now + ChronoDuration::days(days);
            }
            run_job(&service, &tenant, source.into(), SyncMode::Window { start, end }, cli.json).await?;
        }
        Command::History { limit } => {
            let jobs = service.job_history(&tenant, limit).await?;
            if jobs.is_empty() {
                println!("No sync jobs for tenant {}", tenant);
            }
            for job in &jobs {
                print_job(job, cli.json)?;
            }
        }
        Command::Status => {
            for source in [Source::Mail, Source::Calendar] {
                let cursor = service.orchestrator().cursor(&tenant, source).await?;
                println!(
                    "{}: cursor {}",
                    source,
                    cursor.as_ref().map(|c| c.as_str()).unwrap_or("(none)")
                );
                match service.last_job(&tenant, Some(source)).await? {
                    Some(job) => print_job(&job, cli.json)?,
                    None => println!("  never synced"),
                }
            }
        }
        Command::Cancel { job_id } => {
            service.request_cancel(&tenant, &JobId::new(job_id.clone())).await?;
            println!("Cancellation requested for job {}", job_id);
        }
    }

    Ok(())
}

/// Trigger a job and wait for it to finish
async fn run_job(
    service: &SyncService,
    tenant: &TenantId,
    source: Source,
    mode: SyncMode,
    json: bool,
) -> Result<()> {
    let id = service.trigger(tenant, source, mode).await?;
    println!("Started job {}", id);

    let job = service.wait_for(tenant, &id, Duration::from_millis(500)).await?;
    print_job(&job, json)?;

    if let Some(message) = &job.error_message {
        anyhow::bail!("Job {} failed: {}", job.id, message);
    }
    Ok(())
}

fn print_job(job: &SyncJob, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(job)?);
        return Ok(());
    }

    let c = &job.counters;
    println!(
        "  {} {} [{}] pages={} processed={} errors={} contacts={}/{} items={} unlinked={}",
        job.id,
        job.source,
        job.status,
        c.pages,
        c.processed,
        c.errors,
        c.contacts_created,
        c.contacts_upserted,
        c.items_upserted,
        c.unlinked
    );
    if let Some(duration) = job.duration() {
        println!("    took {}ms", duration.num_milliseconds());
    }
    if let Some(err) = &job.last_error {
        println!("    last record error: {}", err);
    }
    if let Some(err) = &job.error_message {
        println!("    failed: {}", err);
    }
    Ok(())
}
