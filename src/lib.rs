pub mod api;
pub mod cache;
pub mod cli;
pub mod clients;
pub mod config;
pub mod constants;
pub mod context;
pub mod db;
pub mod domain;
pub mod entities;
pub mod error;
pub mod models;
pub mod scheduler;
pub mod services;
pub mod state;

use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

pub use config::Config;

use cli::{AuthCommands, Cli, Commands, LibraryCommands, ScrapeCommands};
use context::Context;
use scheduler::{Scheduler, run_logged};
use services::AdminKey;
use state::SharedState;

pub async fn run(config: Config) -> anyhow::Result<()> {
    let cli = Cli::parse();
    config.validate()?;

    init_tracing(&config)?;
    let prometheus_handle = init_metrics(&config)?;

    let command = cli.command();
    if command == Commands::AdminKey {
        let key = AdminKey::load_or_create(&config.admin.key_path)?;
        println!("{}", key.as_str());
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let state = SharedState::new(config, shutdown.clone())
        .await
        .context("Failed to initialise dependencies")?;
    let ctx = Context::with_token(shutdown.clone());

    match command {
        Commands::Daemon => run_daemon(state, prometheus_handle).await,
        Commands::Scrape { command } => run_scrape(&state, &ctx, &command).await,
        Commands::Library {
            command: LibraryCommands::RetryFailed,
        } => {
            let jobs = state.jobs();
            run_logged("retry_library_syncs", jobs.retry_library_syncs(&ctx)).await
        }
        Commands::Auth {
            command: AuthCommands::RefreshTokens,
        } => {
            let jobs = state.jobs();
            run_logged("refresh_tokens", jobs.refresh_tokens(&ctx)).await
        }
        Commands::AdminKey => Ok(()),
    }
}

fn init_tracing(config: &Config) -> anyhow::Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));

    let json = config.general.is_production();
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer));

    if config.observability.loki_enabled {
        let url = url::Url::parse(&config.observability.loki_url).context("Invalid Loki URL")?;

        let mut builder = tracing_loki::builder();
        for (key, value) in &config.observability.loki_labels {
            builder = builder.label(key.as_str(), value.as_str())?;
        }
        let (layer, task) = builder
            .extra_field("env", config.general.env.as_str())?
            .build_url(url)?;

        tokio::spawn(task);

        registry.with(layer).init();
        info!(url = %config.observability.loki_url, "Loki logging initialized");
    } else {
        registry.init();
    }
    Ok(())
}

fn init_metrics(config: &Config) -> anyhow::Result<Option<PrometheusHandle>> {
    if !config.observability.metrics_enabled {
        return Ok(None);
    }
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;
    info!("Prometheus metrics recorder initialized");
    Ok(Some(handle))
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!(error = %e, "Error listening for shutdown"),
        }
        shutdown.cancel();
    });
}

async fn run_scrape(
    state: &SharedState,
    ctx: &Context,
    command: &ScrapeCommands,
) -> anyhow::Result<()> {
    match command {
        ScrapeCommands::RecentlyUpdated => {
            let jobs = state.jobs();
            run_logged("delta_scrape", jobs.delta_scrape(ctx)).await
        }
        ScrapeCommands::FullSeed => {
            run_logged("full_seed", async {
                state.seeder().full_seed(ctx).await.context("Full seed failed")
            })
            .await
        }
        ScrapeCommands::AllRecentlyUpdated => {
            run_logged("seed_recently_updated", async {
                let counts = state
                    .seeder()
                    .seed_recently_updated(ctx)
                    .await
                    .context("Recently updated seed failed")?;
                info!(
                    items = counts.items,
                    success = counts.success,
                    skipped = counts.skipped,
                    failed = counts.failed,
                    "Recently updated listing seeded"
                );
                Ok(())
            })
            .await
        }
    }
}

/// Seeds an empty catalog before anything starts serving it.
async fn bootstrap(state: &SharedState, ctx: &Context) -> anyhow::Result<()> {
    if !state.config.scheduler.bootstrap_on_empty {
        return Ok(());
    }
    let rows = state.store.count_animes().await?;
    if rows > 0 {
        return Ok(());
    }
    info!("Catalog is empty, running the full seed");
    run_logged("bootstrap_seed", async {
        state
            .seeder()
            .full_seed(ctx)
            .await
            .context("Bootstrap seed failed")
    })
    .await
}

fn spawn_listeners(state: &SharedState, ctx: &Context) -> Vec<JoinHandle<()>> {
    if !state.store.is_postgres() {
        warn!("Database listeners need Postgres; library sync and imports are idle");
        return Vec::new();
    }

    let library_sync = state.library_sync.clone();
    let sync_ctx = ctx.child();
    let sync = tokio::spawn(async move {
        if let Err(e) = library_sync.listen(&sync_ctx).await {
            error!(error = %e, "Library sync listener stopped");
        }
    });

    let import_jobs = state.import_jobs.clone();
    let import_ctx = ctx.child();
    let imports = tokio::spawn(async move {
        if let Err(e) = import_jobs.listen(&import_ctx).await {
            error!(error = %e, "Import job listener stopped");
        }
    });

    vec![sync, imports]
}

async fn run_daemon(
    state: SharedState,
    prometheus_handle: Option<PrometheusHandle>,
) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        env = %state.config.general.env,
        "Aniways starting in daemon mode"
    );

    let shutdown = state.shutdown.clone();
    let ctx = Context::with_token(shutdown.clone());

    bootstrap(&state, &ctx).await?;

    let scheduler = Scheduler::new(
        state.config.scheduler.clone(),
        Arc::new(state.jobs()),
        shutdown.clone(),
    );
    let scheduler_handle = tokio::spawn(async move {
        if let Err(e) = scheduler.run().await {
            error!(error = format!("{e:#}"), "Scheduler error");
        }
    });

    let listener_handles = spawn_listeners(&state, &ctx);

    if state.config.server.enabled {
        let port = state.config.server.port;
        let admin_key = AdminKey::load_or_create(&state.config.admin.key_path)?;
        let app = api::router(api::AppState::new(state, admin_key, prometheus_handle));

        let addr = format!("0.0.0.0:{port}");
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;

        info!(port, "Web server listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.clone().cancelled_owned())
            .await
            .context("Web server error")?;
    } else {
        info!("Web server disabled; press Ctrl+C to stop");
        shutdown.cancelled().await;
    }

    // The server may have stopped on its own.
    shutdown.cancel();

    if let Err(e) = scheduler_handle.await {
        error!(error = %e, "Scheduler task panicked");
    }
    for handle in listener_handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Listener task panicked");
        }
    }

    info!("Daemon stopped");
    Ok(())
}
