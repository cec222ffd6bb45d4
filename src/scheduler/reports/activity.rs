//! Built-in report: recent run activity across all schedules.
//!
//! An operational export of the scheduler's own run history, rendered as
//! CSV or JSON. Also serves as the reference generator implementation.

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::scheduler::types::{GenerateContext, ReportArtifact, ReportFormat, ReportGenerator, RunStatus};
use crate::schema::{scheduled_report_runs as runs, scheduled_report_schedules as schedules};

/// Rows included per report; history beyond this is available via the run
/// listing API.
const MAX_ROWS: i64 = 10_000;

#[derive(Debug, Clone, Deserialize)]
pub struct RunActivityReport {
    /// How many days of history to include
    #[serde(default = "default_days")]
    pub days: i64,
}

fn default_days() -> i64 {
    30
}

impl Default for RunActivityReport {
    fn default() -> Self {
        Self {
            days: default_days(),
        }
    }
}

#[derive(Queryable)]
struct ActivityRow {
    run_id: Uuid,
    schedule_name: String,
    status: RunStatus,
    created_at: NaiveDateTime,
    finished_at: Option<NaiveDateTime>,
    error: Option<String>,
    output_size_bytes: Option<i64>,
}

#[async_trait]
impl ReportGenerator for RunActivityReport {
    fn report_key() -> &'static str
    where
        Self: Sized,
    {
        "run_activity"
    }

    async fn generate(&self, ctx: GenerateContext) -> AppResult<ReportArtifact> {
        let now = Utc::now().naive_utc();
        let cutoff = now - chrono::Duration::days(self.days);

        let mut conn = ctx
            .db_pool
            .get()
            .await
            .map_err(|e| AppError::ConnectionPool {
                source: anyhow::Error::from(e),
            })?;

        let mut query = runs::table
            .inner_join(schedules::table)
            .filter(runs::created_at.ge(cutoff))
            .order(runs::created_at.desc())
            .limit(MAX_ROWS)
            .select((
                runs::id,
                schedules::name,
                runs::status,
                runs::created_at,
                runs::finished_at,
                runs::error,
                runs::output_size_bytes,
            ))
            .into_boxed();

        if let Some(org_id) = ctx.org_id {
            query = query.filter(schedules::org_id.eq(org_id));
        }

        let rows: Vec<ActivityRow> = query.load(&mut conn).await.map_err(AppError::from)?;

        let bytes = match ctx.format {
            ReportFormat::Csv => render_csv(&rows),
            ReportFormat::Json => render_json(&rows)?,
        };

        Ok(ReportArtifact {
            filename: format!(
                "run-activity-{}.{}",
                now.format("%Y%m%d"),
                ctx.format.file_extension()
            ),
            content_type: ctx.format.content_type().to_string(),
            encoding: "utf-8".to_string(),
            bytes,
        })
    }

    fn description(&self) -> Option<String> {
        Some(format!("Run activity over the last {} days", self.days))
    }
}

fn render_csv(rows: &[ActivityRow]) -> Vec<u8> {
    let mut out = String::from("run_id,schedule,status,created_at,finished_at,error,size_bytes\n");
    for row in rows {
        out.push_str(&format!(
            "{},{},{},{},{},{},{}\n",
            row.run_id,
            csv_field(&row.schedule_name),
            row.status,
            row.created_at,
            row.finished_at.map(|t| t.to_string()).unwrap_or_default(),
            csv_field(row.error.as_deref().unwrap_or("")),
            row.output_size_bytes
                .map(|s| s.to_string())
                .unwrap_or_default(),
        ));
    }
    out.into_bytes()
}

fn render_json(rows: &[ActivityRow]) -> AppResult<Vec<u8>> {
    let entries: Vec<serde_json::Value> = rows
        .iter()
        .map(|row| {
            serde_json::json!({
                "run_id": row.run_id,
                "schedule": row.schedule_name,
                "status": row.status,
                "created_at": row.created_at,
                "finished_at": row.finished_at,
                "error": row.error,
                "size_bytes": row.output_size_bytes,
            })
        })
        .collect();

    serde_json::to_vec_pretty(&entries).map_err(|e| AppError::Internal {
        source: anyhow::Error::from(e),
    })
}

/// Quote a CSV field when it contains a delimiter, quote, or newline.
fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}
