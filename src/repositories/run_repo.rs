use chrono::{Duration, NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use uuid::Uuid;

use crate::db::AsyncDbPool;
use crate::error::{AppError, AppResult};
use crate::scheduler::models::{NewReportRun, ReportRun, RunCompletion, RunDownload};
use crate::scheduler::types::RunStatus;
use crate::schema::scheduled_report_runs;

/// One row per execution attempt: creation, the queued -> running ->
/// terminal transitions, history listing, and download reads.
///
/// `finish` is not idempotent; callers own the discipline of finishing each
/// run exactly once. A run abandoned in a transient state (worker crash) is
/// never finished automatically and surfaces through `stuck_runs`.
#[derive(Clone)]
pub struct RunRepository {
    pool: AsyncDbPool,
}

impl RunRepository {
    pub fn new(pool: AsyncDbPool) -> Self {
        Self { pool }
    }

    /// Record a new queued run for a schedule.
    pub async fn create(
        &self,
        schedule_id: Uuid,
        started_at: Option<NaiveDateTime>,
    ) -> AppResult<ReportRun> {
        let record = NewReportRun {
            id: Uuid::new_v4(),
            schedule_id,
            status: RunStatus::Queued,
            started_at,
            created_at: Utc::now().naive_utc(),
        };

        let mut conn = self.pool.get().await.map_err(|e| AppError::ConnectionPool {
            source: anyhow::Error::from(e),
        })?;

        diesel::insert_into(scheduled_report_runs::table)
            .values(&record)
            .get_result(&mut conn)
            .await
            .map_err(AppError::from)
    }

    /// Transition a queued run to running.
    pub async fn mark_running(&self, run_id: Uuid, started_at: NaiveDateTime) -> AppResult<()> {
        let mut conn = self.pool.get().await.map_err(|e| AppError::ConnectionPool {
            source: anyhow::Error::from(e),
        })?;

        let updated = diesel::update(scheduled_report_runs::table.find(run_id))
            .set((
                scheduled_report_runs::status.eq(RunStatus::Running),
                scheduled_report_runs::started_at.eq(Some(started_at)),
            ))
            .execute(&mut conn)
            .await
            .map_err(AppError::from)?;

        if updated == 0 {
            return Err(not_found(run_id));
        }
        Ok(())
    }

    /// Move a run into a terminal state, recording the artifact, download
    /// token hash and expiry, and the recipients actually reached.
    pub async fn finish(
        &self,
        run_id: Uuid,
        status: RunStatus,
        completion: RunCompletion,
    ) -> AppResult<()> {
        if !status.is_terminal() {
            return Err(AppError::Validation {
                field: "status".to_string(),
                reason: format!("'{}' is not a terminal run status", status),
            });
        }

        let (filename, content_type, encoding, bytes, size_bytes) = match completion.artifact {
            Some(artifact) => {
                let size = artifact.size_bytes();
                (
                    Some(artifact.filename),
                    Some(artifact.content_type),
                    Some(artifact.encoding),
                    Some(artifact.bytes),
                    Some(size),
                )
            }
            None => (None, None, None, None, None),
        };

        let mut conn = self.pool.get().await.map_err(|e| AppError::ConnectionPool {
            source: anyhow::Error::from(e),
        })?;

        let updated = diesel::update(scheduled_report_runs::table.find(run_id))
            .set((
                scheduled_report_runs::status.eq(status),
                scheduled_report_runs::finished_at.eq(Some(completion.finished_at)),
                scheduled_report_runs::error.eq(completion.error),
                scheduled_report_runs::output_filename.eq(filename),
                scheduled_report_runs::output_content_type.eq(content_type),
                scheduled_report_runs::output_encoding.eq(encoding),
                scheduled_report_runs::output_bytes.eq(bytes),
                scheduled_report_runs::output_size_bytes.eq(size_bytes),
                scheduled_report_runs::download_token_hash.eq(completion.download_token_hash),
                scheduled_report_runs::download_expires_at.eq(completion.download_expires_at),
                scheduled_report_runs::delivered_to.eq(serde_json::json!(completion.delivered_to)),
            ))
            .execute(&mut conn)
            .await
            .map_err(AppError::from)?;

        if updated == 0 {
            return Err(not_found(run_id));
        }
        Ok(())
    }

    /// Run history for a schedule, most recent first.
    pub async fn list_by_schedule(
        &self,
        schedule_id: Uuid,
        limit: i64,
    ) -> AppResult<Vec<ReportRun>> {
        let mut conn = self.pool.get().await.map_err(|e| AppError::ConnectionPool {
            source: anyhow::Error::from(e),
        })?;

        scheduled_report_runs::table
            .filter(scheduled_report_runs::schedule_id.eq(schedule_id))
            .order(scheduled_report_runs::created_at.desc())
            .limit(limit)
            .load(&mut conn)
            .await
            .map_err(AppError::from)
    }

    /// Artifact and token material for the download endpoint.
    pub async fn read_for_download(&self, run_id: Uuid) -> AppResult<RunDownload> {
        let mut conn = self.pool.get().await.map_err(|e| AppError::ConnectionPool {
            source: anyhow::Error::from(e),
        })?;

        scheduled_report_runs::table
            .find(run_id)
            .select((
                scheduled_report_runs::output_filename,
                scheduled_report_runs::output_content_type,
                scheduled_report_runs::output_encoding,
                scheduled_report_runs::output_bytes,
                scheduled_report_runs::output_size_bytes,
                scheduled_report_runs::download_token_hash,
                scheduled_report_runs::download_expires_at,
            ))
            .first(&mut conn)
            .await
            .map_err(|e| match e {
                diesel::result::Error::NotFound => not_found(run_id),
                _ => AppError::from(e),
            })
    }

    /// Runs still in a transient state older than `threshold`, oldest first.
    ///
    /// These are the casualties of a crash between claim and finish; they
    /// are surfaced for alerting, never retried automatically.
    pub async fn stuck_runs(&self, threshold: Duration, limit: i64) -> AppResult<Vec<ReportRun>> {
        let cutoff = Utc::now().naive_utc() - threshold;

        let mut conn = self.pool.get().await.map_err(|e| AppError::ConnectionPool {
            source: anyhow::Error::from(e),
        })?;

        scheduled_report_runs::table
            .filter(
                scheduled_report_runs::status
                    .eq_any([RunStatus::Queued, RunStatus::Running])
                    .and(scheduled_report_runs::created_at.lt(cutoff)),
            )
            .order(scheduled_report_runs::created_at.asc())
            .limit(limit)
            .load(&mut conn)
            .await
            .map_err(AppError::from)
    }
}

fn not_found(run_id: Uuid) -> AppError {
    AppError::NotFound {
        entity: "ReportRun".to_string(),
        field: "id".to_string(),
        value: run_id.to_string(),
    }
}
