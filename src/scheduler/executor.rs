//! Drives one claimed schedule through a full run lifecycle.
//!
//! queued -> running -> generate (with timeout) -> deliver -> terminal
//! state, then schedule bookkeeping reconciliation. Generation failures and
//! timeouts finish the run as `failure`; the missed occurrence is not
//! rescheduled (its successor was already computed at claim time) and is
//! recovered, if at all, by an operator's run-now action.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::config::WorkerConfig;
use crate::db::AsyncDbPool;
use crate::error::{AppError, AppResult};
use crate::repositories::{RunRepository, ScheduleRepository};
use crate::scheduler::cadence::compute_next_run_at;
use crate::scheduler::claim::ClaimedSchedule;
use crate::scheduler::models::{RunCompletion, ScheduledReport};
use crate::scheduler::registry::ReportRegistry;
use crate::scheduler::types::{GenerateContext, ReportArtifact, RunStatus};
use crate::services::delivery::{DeliveryChannel, DeliveryNotice};
use crate::utils::token::DownloadToken;

pub struct RunExecutor {
    db_pool: AsyncDbPool,
    schedule_repo: ScheduleRepository,
    run_repo: RunRepository,
    registry: Arc<ReportRegistry>,
    delivery: Arc<dyn DeliveryChannel>,
    config: WorkerConfig,
}

impl RunExecutor {
    pub fn new(
        db_pool: AsyncDbPool,
        registry: Arc<ReportRegistry>,
        delivery: Arc<dyn DeliveryChannel>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            schedule_repo: ScheduleRepository::new(db_pool.clone()),
            run_repo: RunRepository::new(db_pool.clone()),
            db_pool,
            registry,
            delivery,
            config,
        }
    }

    /// Execute one claimed schedule end to end.
    ///
    /// Returns an error only for storage failures; a failed or timed-out
    /// generation is recorded on the run and is not an error here.
    pub async fn execute(&self, claimed: ClaimedSchedule) -> AppResult<()> {
        let schedule = &claimed.schedule;
        let run = self.run_repo.create(schedule.id, None).await?;
        self.run_repo
            .mark_running(run.id, Utc::now().naive_utc())
            .await?;

        let outcome = self.generate_with_timeout(schedule).await;
        let finished_at = Utc::now().naive_utc();

        match outcome {
            Ok(artifact) => {
                let token = DownloadToken::issue();
                let expires_at =
                    finished_at + chrono::Duration::hours(self.config.download_token_ttl_hours);

                let notice = DeliveryNotice {
                    run_id: run.id,
                    schedule_name: schedule.name.clone(),
                    report_key: schedule.report_key.clone(),
                    filename: artifact.filename.clone(),
                    content_type: artifact.content_type.clone(),
                    size_bytes: artifact.size_bytes(),
                    download_token: token.plaintext,
                    download_expires_at: expires_at,
                };
                let recipients = schedule.recipient_list();
                let receipts = self.delivery.deliver(&recipients, &notice).await;
                let delivered_to: Vec<String> = receipts
                    .into_iter()
                    .filter(|r| r.success)
                    .map(|r| r.recipient)
                    .collect();

                self.run_repo
                    .finish(
                        run.id,
                        RunStatus::Success,
                        RunCompletion {
                            finished_at,
                            error: None,
                            artifact: Some(artifact),
                            download_token_hash: Some(token.hash),
                            download_expires_at: Some(expires_at),
                            delivered_to,
                        },
                    )
                    .await?;

                info!(
                    schedule = %schedule.name,
                    run_id = %run.id,
                    "report run succeeded"
                );
            }
            Err(e) => {
                warn!(
                    schedule = %schedule.name,
                    run_id = %run.id,
                    error = %e,
                    "report run failed"
                );
                self.run_repo
                    .finish(
                        run.id,
                        RunStatus::Failure,
                        RunCompletion {
                            finished_at,
                            error: Some(e.to_string()),
                            artifact: None,
                            download_token_hash: None,
                            download_expires_at: None,
                            delivered_to: Vec::new(),
                        },
                    )
                    .await?;
            }
        }

        self.reconcile_schedule(&claimed).await
    }

    async fn generate_with_timeout(
        &self,
        schedule: &ScheduledReport,
    ) -> AppResult<ReportArtifact> {
        let generator = self.registry.get(&schedule.report_key)?;
        let ctx = GenerateContext {
            schedule_id: schedule.id,
            report_key: schedule.report_key.clone(),
            org_id: schedule.org_id,
            format: schedule.format,
            db_pool: self.db_pool.clone(),
        };

        let timeout = Duration::from_secs(self.config.generation_timeout_secs);
        match tokio::time::timeout(timeout, generator.generate(ctx)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Internal {
                source: anyhow::anyhow!(
                    "report generation timed out after {}s",
                    self.config.generation_timeout_secs
                ),
            }),
        }
    }

    /// Re-derive the schedule's bookkeeping after the run completed.
    ///
    /// The cadence fields may have been edited between claim and
    /// completion, so the next occurrence is recomputed from the schedule's
    /// current state rather than the claimed snapshot. A schedule deleted
    /// mid-run is simply gone; that is not an error.
    async fn reconcile_schedule(&self, claimed: &ClaimedSchedule) -> AppResult<()> {
        let current = match self.schedule_repo.get_by_id(claimed.schedule.id).await {
            Ok(schedule) => schedule,
            Err(AppError::NotFound { .. }) => {
                info!(schedule_id = %claimed.schedule.id, "schedule deleted during run");
                return Ok(());
            }
            Err(e) => {
                error!(schedule_id = %claimed.schedule.id, error = %e, "bookkeeping reload failed");
                return Err(e);
            }
        };

        let next_run_at = current.enabled.then(|| {
            compute_next_run_at(
                current.cadence,
                &current.time_of_day,
                current.day_of_week,
                current.day_of_month,
                Utc::now().naive_utc(),
            )
        });

        self.schedule_repo
            .update_bookkeeping(current.id, claimed.claimed_at, next_run_at)
            .await
    }
}
