//! The polling loop driving the claim engine.
//!
//! Each worker process runs one of these; any number may poll the same
//! database concurrently. A tick claims a batch of due schedules and runs
//! them sequentially. Claim errors are logged and retried on the next tick;
//! nothing here is fatal short of cancellation.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::config::WorkerConfig;
use crate::scheduler::claim::ClaimEngine;
use crate::scheduler::executor::RunExecutor;

pub struct ScheduleWorker {
    claim_engine: ClaimEngine,
    executor: Arc<RunExecutor>,
    config: WorkerConfig,
    shutdown: CancellationToken,
}

impl ScheduleWorker {
    pub fn new(
        claim_engine: ClaimEngine,
        executor: Arc<RunExecutor>,
        config: WorkerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            claim_engine,
            executor,
            config,
            shutdown,
        }
    }

    /// Poll until cancelled.
    pub async fn run(&self) {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            poll_interval_secs = self.config.poll_interval_secs,
            batch_size = self.config.batch_size,
            "schedule worker started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("schedule worker stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }
    }

    async fn poll_once(&self) {
        match self.claim_engine.claim_due(self.config.batch_size).await {
            Ok(claimed) if claimed.is_empty() => {
                trace!("no due schedules");
            }
            Ok(claimed) => {
                debug!(count = claimed.len(), "claimed due schedules");
                for item in claimed {
                    let schedule_name = item.schedule.name.clone();
                    if let Err(e) = self.executor.execute(item).await {
                        error!(schedule = %schedule_name, error = %e, "run execution errored");
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "claim poll failed");
            }
        }
    }
}
