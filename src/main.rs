use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use reportflow::cli::{Cli, Command};
use reportflow::config::{ConfigLoader, Settings};
use reportflow::db::{establish_async_connection_pool, run_pending_migrations};
use reportflow::logger::init_logger;
use reportflow::scheduler::reports::RunActivityReport;
use reportflow::scheduler::{ClaimEngine, ReportRegistry, RunExecutor, ScheduleWorker};
use reportflow::services::delivery::{DeliveryChannel, WebhookDelivery};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loader = match &cli.config {
        Some(path) => ConfigLoader::from_file(path),
        None => ConfigLoader::new()?,
    };
    let settings = loader.load()?;

    init_logger(&settings.logger)?;

    match cli.command {
        Command::Migrate => {
            let applied = run_pending_migrations(&settings.database.url).await?;
            if applied.is_empty() {
                info!("no pending migrations");
            } else {
                info!(count = applied.len(), migrations = ?applied, "migrations applied");
            }
        }
        Command::Worker => run_worker(settings).await?,
    }

    Ok(())
}

async fn run_worker(settings: Settings) -> anyhow::Result<()> {
    run_pending_migrations(&settings.database.url).await?;

    let pool = establish_async_connection_pool(&settings.database).await?;

    let mut registry = ReportRegistry::new();
    registry.register(RunActivityReport::default());
    let registry = Arc::new(registry);
    info!(reports = ?registry.keys(), "report generators registered");

    let delivery: Arc<dyn DeliveryChannel> = Arc::new(WebhookDelivery::new(Duration::from_secs(
        settings.worker.delivery_timeout_secs,
    )));

    let executor = Arc::new(RunExecutor::new(
        pool.clone(),
        registry,
        delivery,
        settings.worker.clone(),
    ));

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    let worker = ScheduleWorker::new(
        ClaimEngine::new(pool),
        executor,
        settings.worker.clone(),
        shutdown,
    );
    worker.run().await;

    Ok(())
}
