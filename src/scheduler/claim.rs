//! Atomic claiming of due schedules.
//!
//! Any number of worker processes may poll `claim_due` concurrently against
//! the same database. Correctness rests entirely on row-level locking inside
//! a single transaction: due rows are selected with `FOR UPDATE SKIP LOCKED`
//! (rows locked by a concurrent claimant are excluded, not waited on) and
//! each claimed schedule's `next_run_at` is advanced before the transaction
//! commits. An occurrence can therefore be claimed at most once, fleet-wide.
//!
//! The flip side is deliberate: a worker that crashes between claim and run
//! completion loses that occurrence instead of retrying it, keeping the
//! scheduler live under crash loops. Operators recover missed occurrences
//! with `run_now`.

use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use uuid::Uuid;

use crate::db::AsyncDbPool;
use crate::error::{AppError, AppResult};
use crate::scheduler::cadence::compute_next_run_at;
use crate::scheduler::models::ScheduledReport;
use crate::schema::scheduled_report_schedules as schedules;

/// A schedule claimed for execution: the row as it looked before the claim
/// advanced its bookkeeping, plus the claim instant itself.
#[derive(Debug, Clone)]
pub struct ClaimedSchedule {
    pub schedule: ScheduledReport,
    pub claimed_at: NaiveDateTime,
}

#[derive(Clone)]
pub struct ClaimEngine {
    pool: AsyncDbPool,
}

impl ClaimEngine {
    pub fn new(pool: AsyncDbPool) -> Self {
        Self { pool }
    }

    /// Claim up to `limit` due schedules, most-overdue first.
    ///
    /// Within one transaction: select enabled schedules with
    /// `next_run_at <= now` ordered by `(next_run_at, id)`, skipping rows
    /// locked by concurrent claimants, then advance each one's
    /// `next_run_at` (computed from the claim instant, not the stale value)
    /// and stamp `last_run_at`. Contended rows simply do not appear in the
    /// result; the next poll picks up whatever is due then.
    pub async fn claim_due(&self, limit: i64) -> AppResult<Vec<ClaimedSchedule>> {
        let mut conn = self.pool.get().await.map_err(|e| AppError::ConnectionPool {
            source: anyhow::Error::from(e),
        })?;

        conn.transaction::<Vec<ClaimedSchedule>, AppError, _>(|conn| {
            async move {
                let now = Utc::now().naive_utc();

                let due: Vec<ScheduledReport> = schedules::table
                    .filter(schedules::enabled.eq(true))
                    .filter(schedules::next_run_at.le(now))
                    .order((schedules::next_run_at.asc(), schedules::id.asc()))
                    .limit(limit)
                    .for_update()
                    .skip_locked()
                    .load(conn)
                    .await?;

                for schedule in &due {
                    let next = compute_next_run_at(
                        schedule.cadence,
                        &schedule.time_of_day,
                        schedule.day_of_week,
                        schedule.day_of_month,
                        now,
                    );
                    diesel::update(schedules::table.find(schedule.id))
                        .set((
                            schedules::next_run_at.eq(Some(next)),
                            schedules::last_run_at.eq(Some(now)),
                            schedules::updated_at.eq(now),
                        ))
                        .execute(conn)
                        .await?;
                }

                Ok(due
                    .into_iter()
                    .map(|schedule| ClaimedSchedule {
                        schedule,
                        claimed_at: now,
                    })
                    .collect())
            }
            .scope_boxed()
        })
        .await
    }

    /// Claim one specific schedule immediately, regardless of `next_run_at`.
    ///
    /// The operator-facing recovery path for occurrences lost to a crash or
    /// a failed run. Bookkeeping advances exactly as in `claim_due`; for a
    /// disabled schedule `next_run_at` stays NULL.
    pub async fn run_now(&self, schedule_id: Uuid) -> AppResult<ClaimedSchedule> {
        let mut conn = self.pool.get().await.map_err(|e| AppError::ConnectionPool {
            source: anyhow::Error::from(e),
        })?;

        conn.transaction::<ClaimedSchedule, AppError, _>(|conn| {
            async move {
                let now = Utc::now().naive_utc();

                let schedule: ScheduledReport = schedules::table
                    .find(schedule_id)
                    .for_update()
                    .first(conn)
                    .await
                    .map_err(|e| match e {
                        diesel::result::Error::NotFound => AppError::NotFound {
                            entity: "ScheduledReport".to_string(),
                            field: "id".to_string(),
                            value: schedule_id.to_string(),
                        },
                        _ => AppError::from(e),
                    })?;

                let next = schedule.enabled.then(|| {
                    compute_next_run_at(
                        schedule.cadence,
                        &schedule.time_of_day,
                        schedule.day_of_week,
                        schedule.day_of_month,
                        now,
                    )
                });

                diesel::update(schedules::table.find(schedule.id))
                    .set((
                        schedules::next_run_at.eq(next),
                        schedules::last_run_at.eq(Some(now)),
                        schedules::updated_at.eq(now),
                    ))
                    .execute(conn)
                    .await?;

                Ok(ClaimedSchedule {
                    schedule,
                    claimed_at: now,
                })
            }
            .scope_boxed()
        })
        .await
    }
}
