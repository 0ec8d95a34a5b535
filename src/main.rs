use anyhow::{Context, Result};
use clap::Parser;
use site_sync::adapters::AdapterRegistry;
use site_sync::builder::HttpBuildExecutor;
use site_sync::bus::EventBus;
use site_sync::config;
use site_sync::db;
use site_sync::gateway::Gateway;
use site_sync::routes::{self, AppState};
use site_sync::scheduler::{self, Scheduler};
use site_sync::secrets::{CachedSecrets, ConfigSecretStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const SWEEP_INTERVAL_SECS: u64 = 3600;

#[derive(Parser, Debug)]
#[command(name = "site-sync", about = "Webhook ingestion and build batching service")]
struct Args {
    /// Path to the YAML config file (defaults to ./config.yaml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print an example config and exit.
    #[arg(long)]
    print_example_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    if args.print_example_config {
        print!("{}", config::example());
        return Ok(());
    }

    let cfg = config::load(args.config.as_deref()).context("failed to load config")?;
    cfg.ensure_dirs().context("failed to create data dir")?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/site-sync.db", cfg.app.data_dir));
    let pool = db::init_pool(&database_url).await.context("db connect")?;
    db::run_migrations(&pool).await.context("db migrate")?;

    let providers = cfg.webhook.providers.clone();
    let registry = Arc::new(AdapterRegistry::from_config(&providers));
    let secrets = Arc::new(CachedSecrets::new(
        Arc::new(ConfigSecretStore::new(providers.clone())),
        cfg.webhook.secret_cache_seconds,
    ));
    let bus = EventBus::new(1024);
    let gateway = Arc::new(Gateway::new(
        pool.clone(),
        registry,
        secrets,
        bus.clone(),
        providers,
        cfg.webhook.replay_window_seconds,
    ));

    let executor = Arc::new(HttpBuildExecutor::new(
        &cfg.build.base_url,
        cfg.build.token.clone(),
        cfg.build.timeout_seconds,
    )?);
    let sched = Arc::new(Scheduler::new(
        pool.clone(),
        cfg.batching.clone(),
        executor,
        cfg.app.max_backoff_seconds as i64,
    ));

    // Subscribe before serving so the first webhook's publish finds a receiver.
    let rx = bus.subscribe();
    tokio::spawn(scheduler::run_event_loop(sched.clone(), rx));
    tokio::spawn(scheduler::run_worker(sched, cfg.app.poll_interval_ms));
    tokio::spawn(sweep_loop(
        pool.clone(),
        cfg.webhook.receipt_ttl_hours,
        cfg.app.batch_ttl_hours,
        cfg.app.content_ttl_days,
    ));

    let app = routes::router(AppState {
        gateway,
        pool,
    });
    let listener = tokio::net::TcpListener::bind(&cfg.app.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", cfg.app.bind_addr))?;
    info!(addr = cfg.app.bind_addr.as_str(), "listening");
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

/// Periodically expire receipts, settled batches, and stale content.
async fn sweep_loop(
    pool: db::Pool,
    receipt_ttl_hours: i64,
    batch_ttl_hours: i64,
    content_ttl_days: i64,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
    loop {
        ticker.tick().await;
        match db::sweep_expired(&pool, receipt_ttl_hours, batch_ttl_hours, content_ttl_days).await {
            Ok((receipts, batches, content)) => {
                if receipts + batches + content > 0 {
                    info!(receipts, batches, content, "swept expired rows");
                }
            }
            Err(err) => warn!(error = %err, "sweep failed"),
        }
    }
}
