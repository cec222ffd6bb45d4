use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::BigInt;
use diesel_async::RunQueryDsl;
use serde::Deserialize;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::db::AsyncDbPool;
use crate::error::{AppError, AppResult};
use crate::scheduler::cadence::compute_next_run_at;
use crate::scheduler::models::{
    NewScheduledReport, ScheduleWithLastRun, ScheduledReport, ScheduledReportChangeset,
};
use crate::scheduler::types::{Cadence, ReportFormat};
use crate::schema::scheduled_report_schedules;

/// Fields accepted when creating a schedule.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateScheduleParams {
    #[validate(length(min = 1, max = 255, message = "name must not be empty"))]
    pub name: String,
    #[validate(length(min = 1, max = 100, message = "report_key must not be empty"))]
    pub report_key: String,
    pub org_id: Option<Uuid>,
    pub cadence: Cadence,
    /// `HH:MM` wall-clock time; missing or malformed values fall back to 08:00.
    pub time_of_day: Option<String>,
    #[validate(range(min = 0, max = 6, message = "day_of_week must be between 0 and 6"))]
    pub day_of_week: Option<i32>,
    #[validate(range(min = 1, max = 31, message = "day_of_month must be between 1 and 31"))]
    pub day_of_month: Option<i32>,
    pub format: ReportFormat,
    #[validate(custom(function = "validate_recipients"))]
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

fn validate_recipients(recipients: &[String]) -> Result<(), ValidationError> {
    if recipients.iter().any(|r| r.trim().is_empty()) {
        let mut error = ValidationError::new("recipients");
        error.message = Some("recipients must not contain empty addresses".into());
        return Err(error);
    }
    Ok(())
}

/// Partial update applied to a schedule. `None` leaves a field untouched;
/// for nullable fields the inner Option clears the value.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateScheduleParams {
    #[validate(length(min = 1, max = 255, message = "name must not be empty"))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 100, message = "report_key must not be empty"))]
    pub report_key: Option<String>,
    pub org_id: Option<Option<Uuid>>,
    pub cadence: Option<Cadence>,
    pub time_of_day: Option<String>,
    pub day_of_week: Option<Option<i32>>,
    pub day_of_month: Option<Option<i32>>,
    pub format: Option<ReportFormat>,
    #[validate(custom(function = "validate_recipients"))]
    pub recipients: Option<Vec<String>>,
    pub enabled: Option<bool>,
}

impl UpdateScheduleParams {
    /// Day selectors arrive double-wrapped, which `validator` cannot range
    /// check; reject out-of-range values here before any write.
    fn validate_day_ranges(&self) -> AppResult<()> {
        if let Some(Some(dow)) = self.day_of_week {
            if !(0..=6).contains(&dow) {
                return Err(AppError::Validation {
                    field: "day_of_week".to_string(),
                    reason: "must be between 0 and 6".to_string(),
                });
            }
        }
        if let Some(Some(dom)) = self.day_of_month {
            if !(1..=31).contains(&dom) {
                return Err(AppError::Validation {
                    field: "day_of_month".to_string(),
                    reason: "must be between 1 and 31".to_string(),
                });
            }
        }
        Ok(())
    }
}

const LIST_WITH_LAST_RUN_SQL: &str = r#"
SELECT
    s.id, s.name, s.report_key, s.org_id, s.cadence, s.time_of_day,
    s.day_of_week, s.day_of_month, s.format, s.recipients, s.enabled,
    s.next_run_at, s.last_run_at, s.created_at, s.created_by,
    s.updated_at, s.updated_by,
    r.status AS last_run_status,
    r.finished_at AS last_run_finished_at
FROM scheduled_report_schedules s
LEFT JOIN LATERAL (
    SELECT status, finished_at
    FROM scheduled_report_runs
    WHERE schedule_id = s.id
    ORDER BY created_at DESC
    LIMIT 1
) r ON TRUE
ORDER BY s.name ASC, s.id ASC
LIMIT $1 OFFSET $2
"#;

/// CRUD over schedule definitions.
///
/// Every create and edit recomputes `next_run_at` from the cadence fields;
/// this repository and the claim engine are the only writers of that column.
#[derive(Clone)]
pub struct ScheduleRepository {
    pool: AsyncDbPool,
}

impl ScheduleRepository {
    pub fn new(pool: AsyncDbPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        params: CreateScheduleParams,
        actor: Option<&str>,
    ) -> AppResult<ScheduledReport> {
        params.validate()?;

        let now = Utc::now().naive_utc();
        let time_of_day = params
            .time_of_day
            .unwrap_or_else(|| "08:00".to_string());
        let next_run_at = params.enabled.then(|| {
            compute_next_run_at(
                params.cadence,
                &time_of_day,
                params.day_of_week,
                params.day_of_month,
                now,
            )
        });

        let record = NewScheduledReport {
            id: Uuid::new_v4(),
            name: params.name,
            report_key: params.report_key,
            org_id: params.org_id,
            cadence: params.cadence,
            time_of_day,
            day_of_week: params.day_of_week,
            day_of_month: params.day_of_month,
            format: params.format,
            recipients: serde_json::json!(params.recipients),
            enabled: params.enabled,
            next_run_at,
            created_at: now,
            created_by: actor.map(str::to_string),
            updated_at: now,
            updated_by: actor.map(str::to_string),
        };

        let mut conn = self.pool.get().await.map_err(|e| AppError::ConnectionPool {
            source: anyhow::Error::from(e),
        })?;

        diesel::insert_into(scheduled_report_schedules::table)
            .values(&record)
            .get_result(&mut conn)
            .await
            .map_err(AppError::from)
    }

    pub async fn get_by_id(&self, id: Uuid) -> AppResult<ScheduledReport> {
        let mut conn = self.pool.get().await.map_err(|e| AppError::ConnectionPool {
            source: anyhow::Error::from(e),
        })?;

        scheduled_report_schedules::table
            .find(id)
            .first(&mut conn)
            .await
            .map_err(|e| not_found_or(e, id))
    }

    /// Apply a partial edit.
    ///
    /// When any cadence-relevant field (`cadence`, `time_of_day`,
    /// `day_of_week`, `day_of_month`, `enabled`) actually changes,
    /// `next_run_at` is recomputed from now. Disabling clears it;
    /// re-enabling recomputes it.
    pub async fn update(
        &self,
        id: Uuid,
        params: UpdateScheduleParams,
        actor: Option<&str>,
    ) -> AppResult<ScheduledReport> {
        params.validate()?;
        params.validate_day_ranges()?;

        let current = self.get_by_id(id).await?;
        let now = Utc::now().naive_utc();

        let cadence = params.cadence.unwrap_or(current.cadence);
        let time_of_day = params
            .time_of_day
            .clone()
            .unwrap_or_else(|| current.time_of_day.clone());
        let day_of_week = params.day_of_week.unwrap_or(current.day_of_week);
        let day_of_month = params.day_of_month.unwrap_or(current.day_of_month);
        let enabled = params.enabled.unwrap_or(current.enabled);

        let cadence_changed = params.cadence.is_some_and(|c| c != current.cadence)
            || params
                .time_of_day
                .as_ref()
                .is_some_and(|t| *t != current.time_of_day)
            || params.day_of_week.is_some_and(|d| d != current.day_of_week)
            || params
                .day_of_month
                .is_some_and(|d| d != current.day_of_month)
            || params.enabled.is_some_and(|e| e != current.enabled);

        let next_run_at = if !enabled {
            None
        } else if cadence_changed || current.next_run_at.is_none() {
            Some(compute_next_run_at(
                cadence,
                &time_of_day,
                day_of_week,
                day_of_month,
                now,
            ))
        } else {
            current.next_run_at
        };

        let changeset = ScheduledReportChangeset {
            name: params.name,
            report_key: params.report_key,
            org_id: params.org_id,
            cadence: params.cadence,
            time_of_day: params.time_of_day,
            day_of_week: params.day_of_week,
            day_of_month: params.day_of_month,
            format: params.format,
            recipients: params.recipients.map(|r| serde_json::json!(r)),
            enabled: params.enabled,
            next_run_at: Some(next_run_at),
            updated_at: Some(now),
            updated_by: Some(actor.map(str::to_string)),
        };

        let mut conn = self.pool.get().await.map_err(|e| AppError::ConnectionPool {
            source: anyhow::Error::from(e),
        })?;

        diesel::update(scheduled_report_schedules::table.find(id))
            .set(&changeset)
            .get_result(&mut conn)
            .await
            .map_err(|e| not_found_or(e, id))
    }

    /// Delete a schedule; its run history cascades away with it.
    pub async fn delete(&self, id: Uuid) -> AppResult<()> {
        let mut conn = self.pool.get().await.map_err(|e| AppError::ConnectionPool {
            source: anyhow::Error::from(e),
        })?;

        let deleted = diesel::delete(scheduled_report_schedules::table.find(id))
            .execute(&mut conn)
            .await
            .map_err(AppError::from)?;

        if deleted == 0 {
            Err(AppError::NotFound {
                entity: "ScheduledReport".to_string(),
                field: "id".to_string(),
                value: id.to_string(),
            })
        } else {
            Ok(())
        }
    }

    /// List schedules joined to their most recent run, one query total.
    pub async fn list_with_last_run(
        &self,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<ScheduleWithLastRun>> {
        let mut conn = self.pool.get().await.map_err(|e| AppError::ConnectionPool {
            source: anyhow::Error::from(e),
        })?;

        diesel::sql_query(LIST_WITH_LAST_RUN_SQL)
            .bind::<BigInt, _>(limit)
            .bind::<BigInt, _>(offset)
            .load(&mut conn)
            .await
            .map_err(AppError::from)
    }

    /// Reconcile scheduling bookkeeping after a run completes.
    ///
    /// Called by the run executor with a freshly recomputed `next_run_at`,
    /// since the schedule's cadence fields may have been edited between
    /// claim and completion.
    pub async fn update_bookkeeping(
        &self,
        id: Uuid,
        last_run_at: NaiveDateTime,
        next_run_at: Option<NaiveDateTime>,
    ) -> AppResult<()> {
        let mut conn = self.pool.get().await.map_err(|e| AppError::ConnectionPool {
            source: anyhow::Error::from(e),
        })?;

        diesel::update(scheduled_report_schedules::table.find(id))
            .set((
                scheduled_report_schedules::last_run_at.eq(Some(last_run_at)),
                scheduled_report_schedules::next_run_at.eq(next_run_at),
                scheduled_report_schedules::updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(&mut conn)
            .await
            .map_err(AppError::from)?;

        Ok(())
    }
}

fn not_found_or(e: diesel::result::Error, id: Uuid) -> AppError {
    match e {
        diesel::result::Error::NotFound => AppError::NotFound {
            entity: "ScheduledReport".to_string(),
            field: "id".to_string(),
            value: id.to_string(),
        },
        _ => AppError::from(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_params() -> CreateScheduleParams {
        CreateScheduleParams {
            name: "weekly usage".to_string(),
            report_key: "run_activity".to_string(),
            org_id: None,
            cadence: Cadence::Weekly,
            time_of_day: Some("09:00".to_string()),
            day_of_week: Some(1),
            day_of_month: None,
            format: ReportFormat::Csv,
            recipients: vec!["https://hooks.example.com/reports".to_string()],
            enabled: true,
        }
    }

    #[test]
    fn create_params_validate() {
        assert!(base_params().validate().is_ok());

        let mut params = base_params();
        params.name = String::new();
        assert!(params.validate().is_err());

        let mut params = base_params();
        params.day_of_week = Some(7);
        assert!(params.validate().is_err());

        let mut params = base_params();
        params.day_of_month = Some(0);
        assert!(params.validate().is_err());

        let mut params = base_params();
        params.recipients = vec!["  ".to_string()];
        assert!(params.validate().is_err());
    }

    #[test]
    fn update_params_day_ranges() {
        let params = UpdateScheduleParams {
            day_of_week: Some(Some(9)),
            ..Default::default()
        };
        assert!(params.validate_day_ranges().is_err());

        let params = UpdateScheduleParams {
            day_of_week: Some(None),
            day_of_month: Some(Some(31)),
            ..Default::default()
        };
        assert!(params.validate_day_ranges().is_ok());
    }
}
