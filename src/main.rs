//! Trafficinator: synthetic web-traffic generator for a Matomo analytics
//! backend. Consumes an immutable configuration snapshot at start and an
//! opaque shutdown signal; everything else (Control UI, presets,
//! deployment) is an external collaborator (spec §1).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trafficinator_backend::backfill::BackfillEngine;
use trafficinator_backend::catalog::Catalog;
use trafficinator_backend::config::Config;
use trafficinator_backend::engine::{funnel, VisitEngine};
use trafficinator_backend::error::{BackfillError, CatalogError, ConfigError};
use trafficinator_backend::shutdown::ShutdownHandle;

#[derive(Parser)]
#[command(name = "trafficinator", about = "Synthetic Matomo traffic generator")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Address to expose the Prometheus /metrics endpoint on.
    #[arg(long, env = "METRICS_LISTEN_ADDR", default_value = "127.0.0.1:9477")]
    metrics_listen_addr: SocketAddr,

    /// Disable the Prometheus metrics endpoint entirely.
    #[arg(long, env = "METRICS_DISABLED")]
    no_metrics: bool,

    /// Load an additional `.env`-style file over the process environment.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Build tracking requests without dispatching them; useful for
    /// validating a catalog/funnel configuration end to end.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run the live traffic generator until auto-stop or shutdown signal.
    Run,
    /// Run a one-off historical backfill and exit.
    Backfill,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    if !cli.no_metrics {
        if let Err(err) = trafficinator_backend::metrics::install(cli.metrics_listen_addr) {
            tracing::warn!(%err, "failed to start metrics endpoint; continuing without it");
        }
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            tracing::error!(%err, "failed to start async runtime");
            return ExitCode::from(1);
        }
    };

    runtime.block_on(async_main(
        cli.command.unwrap_or(Command::Run),
        cli.config,
        cli.dry_run,
    ))
}

async fn async_main(command: Command, config_path: Option<PathBuf>, dry_run: bool) -> ExitCode {
    let config = match Config::from_env_with_file(config_path.as_deref()) {
        Ok(c) => Arc::new(c),
        Err(err) => return exit_for_config_error(err),
    };

    let catalog = match Catalog::load(&config) {
        Ok(c) => Arc::new(c),
        Err(err) => return exit_for_catalog_error(err),
    };
    tracing::info!(
        urls = catalog.structure_summary.total_urls,
        categories = catalog.structure_summary.per_category.len(),
        "catalog loaded"
    );

    let funnels = match funnel::load_funnels(&config) {
        Ok(f) => f,
        Err(err) => return exit_for_catalog_error(err),
    };
    tracing::info!(funnels = funnels.len(), "funnel definitions loaded");

    if dry_run {
        tracing::info!("dry-run mode: requests are built and logged, never dispatched");
    }

    match command {
        Command::Run => run_live(catalog, config, funnels, dry_run).await,
        Command::Backfill => run_backfill(catalog, config, funnels, dry_run).await,
    }
}

async fn run_live(
    catalog: Arc<Catalog>,
    config: Arc<Config>,
    funnels: Vec<funnel::FunnelDef>,
    dry_run: bool,
) -> ExitCode {
    let engine = match VisitEngine::new(catalog, config, funnels, dry_run) {
        Ok(e) => e,
        Err(err) => {
            tracing::error!(%err, "failed to initialize visit engine");
            return ExitCode::from(1);
        }
    };

    let (handle, signal) = ShutdownHandle::new();
    Arc::new(handle).install_ctrl_c();

    match engine.run(signal).await {
        Ok(()) => {
            tracing::info!("trafficinator stopped cleanly");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(%err, "visit engine terminated with an unexpected error");
            ExitCode::from(1)
        }
    }
}

async fn run_backfill(
    catalog: Arc<Catalog>,
    config: Arc<Config>,
    funnels: Vec<funnel::FunnelDef>,
    dry_run: bool,
) -> ExitCode {
    if config.backfill.is_none() {
        tracing::error!("backfill subcommand requires BACKFILL_ENABLED=true");
        return exit_for_config_error(ConfigError::Missing("BACKFILL_ENABLED"));
    }

    let engine = match BackfillEngine::new_with_mode(catalog, config, funnels, dry_run) {
        Ok(e) => e,
        Err(err) => {
            tracing::error!(%err, "failed to initialize backfill engine");
            return ExitCode::from(1);
        }
    };

    match engine.run().await {
        Ok(summary) => {
            for day in &summary.days {
                tracing::info!(
                    day = %day.day,
                    planned = day.planned,
                    emitted = day.emitted,
                    succeeded = day.succeeded,
                    failed = day.failed,
                    "backfill day summary"
                );
            }
            if summary.budget_exhausted_early {
                tracing::info!("backfill stopped early: total visit budget exhausted");
            }
            ExitCode::SUCCESS
        }
        Err(err) => exit_for_backfill_error(err),
    }
}

fn exit_for_config_error(err: ConfigError) -> ExitCode {
    tracing::error!(%err, "configuration error");
    ExitCode::from(2)
}

fn exit_for_catalog_error(err: CatalogError) -> ExitCode {
    tracing::error!(%err, "catalog load error");
    ExitCode::from(3)
}

fn exit_for_backfill_error(err: BackfillError) -> ExitCode {
    tracing::error!(%err, "backfill aborted");
    ExitCode::from(4)
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trafficinator_backend=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
