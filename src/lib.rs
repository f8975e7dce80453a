pub mod api;
pub mod cli;
pub mod clients;
pub mod config;
pub mod db;
pub mod domain;
pub mod entities;
pub mod notifications;
pub mod rate_limit;
pub mod retry;
pub mod scheduler;
pub mod services;
pub mod state;

use std::sync::Arc;
use tokio::signal;

use anyhow::Context;
use clap::Parser;
pub use config::Config;
use db::{DeleteOutcome, EpisodeStore, Store};
use domain::{MalId, TitleKey};
use scheduler::Scheduler;
use state::SharedState;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};

pub async fn run() -> anyhow::Result<()> {
    let config = Config::load()?;
    config.validate()?;

    let prometheus_handle = if config.observability.metrics_enabled {
        use metrics_exporter_prometheus::PrometheusBuilder;
        let builder = PrometheusBuilder::new();
        let handle = builder
            .install_recorder()
            .context("Failed to install Prometheus recorder")?;
        info!("Prometheus metrics recorder initialized");
        Some(handle)
    } else {
        None
    };

    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let mut log_level = config.general.log_level.clone();
    if config.general.suppress_connection_errors {
        log_level.push_str(",reqwest::retry=off,hyper_util=off");
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

    let fmt_layer = tracing_subscriber::fmt::layer();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    let cli = Cli::parse();

    let Some(command) = cli.command else {
        use clap::CommandFactory;
        Cli::command().print_help()?;
        return Ok(());
    };

    match command {
        Commands::Daemon => run_daemon(config, prometheus_handle).await,

        Commands::Reconcile => cmd_reconcile(config).await,

        Commands::Process { file } => cmd_process(&config, &file).await,

        Commands::List => cmd_list(&config).await,

        Commands::Remove { mal_id, dub } => cmd_remove(&config, mal_id, &dub).await,

        Commands::Init => {
            Config::create_default_if_missing()?;
            println!("✓ Config file created. Edit config.toml and run again.");
            Ok(())
        }
    }
}

async fn run_daemon(
    config: Config,
    prometheus_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
) -> anyhow::Result<()> {
    info!(
        "Ongoarr v{} starting in daemon mode...",
        env!("CARGO_PKG_VERSION")
    );

    let shared = Arc::new(SharedState::new(config.clone()).await?);
    let api_state = api::create_app_state(shared.clone(), prometheus_handle);

    let scheduler_handle = match (config.scheduler.enabled, shared.reconciler.clone()) {
        (true, Some(reconciler)) => {
            let sched = Scheduler::new(reconciler, config.scheduler.clone());
            Some(tokio::spawn(async move {
                if let Err(e) = sched.start().await {
                    error!("Scheduler error: {}", e);
                }
            }))
        }
        (true, None) => {
            anyhow::bail!("Scheduler enabled but catalog/registrar endpoints are not configured");
        }
        (false, _) => {
            info!("Scheduler disabled; running ingest only");
            None
        }
    };

    let server_handle: Option<tokio::task::JoinHandle<()>> = if config.server.enabled {
        let port = config.server.port;
        info!("Starting ingest API on port {}", port);

        let app = api::router(api_state);
        let addr = format!("0.0.0.0:{}", port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        Some(tokio::spawn(async move {
            info!("Ingest API running at http://0.0.0.0:{}", port);
            if let Err(e) = axum::serve(listener, app).await {
                error!("Web server error: {}", e);
            }
        }))
    } else {
        None
    };

    info!("Daemon running. Press Ctrl+C to stop.");

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received");
        }
        Err(e) => {
            error!("Error listening for shutdown: {}", e);
        }
    }

    if let Some(handle) = scheduler_handle {
        handle.abort();
    }
    if let Some(handle) = server_handle {
        handle.abort();
    }
    info!("Daemon stopped");

    Ok(())
}

async fn cmd_reconcile(config: Config) -> anyhow::Result<()> {
    info!("Running single reconciliation...");

    let shared = SharedState::new(config).await?;
    let Some(reconciler) = shared.reconciler else {
        anyhow::bail!(
            "catalog.base_url and registrar.base_url must be configured for reconciliation"
        );
    };

    let stats = reconciler.run_once().await?;

    println!("Reconciliation complete.");
    println!("  Titles checked:  {}", stats.titles_checked);
    println!("  New videos sent: {}", stats.new_videos);
    println!("  Titles retired:  {}", stats.completed);

    Ok(())
}

async fn cmd_process(config: &Config, file: &str) -> anyhow::Result<()> {
    use std::io::Read;

    let raw = if file == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read notification file: {file}"))?
    };

    let batch = notifications::parse_batch(&raw)?;
    batch.validate()?;

    let shared = SharedState::new(config.clone()).await?;
    let stats = retry::retry(config.tracking.notification_retries, || {
        shared.merger.process(&batch)
    })
    .await?;

    println!("Processed {} notification(s).", batch.items.len());
    println!("  Titles seen:    {}", stats.titles_seen);
    println!("  New titles:     {}", stats.created);
    println!("  Episodes added: {}", stats.episodes_added);
    if stats.conflicts > 0 {
        println!(
            "  Write conflicts: {} (redelivery will settle these)",
            stats.conflicts
        );
    }

    Ok(())
}

async fn cmd_list(config: &Config) -> anyhow::Result<()> {
    let store = Store::new(&config.general.database_path).await?;
    let titles = store.list_all().await?;

    if titles.is_empty() {
        println!("No titles tracked.");
        println!();
        println!("Titles appear once the first notification batch arrives.");
        return Ok(());
    }

    println!("Tracked Titles ({} total)", titles.len());
    println!("{:-<70}", "");

    for title in titles {
        let range = match (title.first_episode(), title.last_episode()) {
            (Some(first), Some(last)) if first != last => format!("{}-{}", first, last),
            (Some(first), _) => format!("{}", first),
            _ => "none".to_string(),
        };

        println!("• {} [{}]", title.key, range);
        println!(
            "  Episodes: {} | Updated: {}",
            title.episodes.len(),
            title.updated_at.format("%Y-%m-%d %H:%M UTC")
        );
    }

    Ok(())
}

async fn cmd_remove(config: &Config, mal_id: i32, dub: &str) -> anyhow::Result<()> {
    if mal_id < 0 {
        println!("Invalid title id: {}", mal_id);
        return Ok(());
    }
    if dub.is_empty() {
        println!("Dub label must not be empty.");
        return Ok(());
    }

    let store = Store::new(&config.general.database_path).await?;
    let key = TitleKey::new(MalId::new(mal_id), dub);

    let Some(title) = store.get(&key).await? else {
        println!("Title {} not found in tracked list.", key);
        return Ok(());
    };

    println!(
        "Stop tracking {} ({} episodes known)?",
        key,
        title.episodes.len()
    );
    println!("Enter 'y' to confirm, anything else to cancel:");

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;

    if input.trim().eq_ignore_ascii_case("y") {
        match store.delete(&key).await? {
            DeleteOutcome::Deleted => println!("✓ Removed: {}", key),
            DeleteOutcome::NotFound => println!("Already removed."),
        }
    } else {
        println!("Cancelled.");
    }

    Ok(())
}
