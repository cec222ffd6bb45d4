use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::scheduler::types::{Cadence, ReportArtifact, ReportFormat, RunStatus};
use crate::schema::{scheduled_report_runs, scheduled_report_schedules};
use crate::utils::token;

// ============================================================================
// Schedule models
// ============================================================================

#[derive(Debug, Clone, Queryable, QueryableByName, Selectable, Serialize)]
#[diesel(table_name = scheduled_report_schedules)]
pub struct ScheduledReport {
    pub id: Uuid,
    pub name: String,
    pub report_key: String,
    pub org_id: Option<Uuid>,
    pub cadence: Cadence,
    pub time_of_day: String,
    pub day_of_week: Option<i32>,
    pub day_of_month: Option<i32>,
    pub format: ReportFormat,
    pub recipients: JsonValue,
    pub enabled: bool,
    pub next_run_at: Option<NaiveDateTime>,
    pub last_run_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub created_by: Option<String>,
    pub updated_at: NaiveDateTime,
    pub updated_by: Option<String>,
}

impl ScheduledReport {
    /// Recipients as a plain list of addresses.
    ///
    /// The column is a JSON array of strings; anything else stored there is
    /// treated as an empty list rather than an error.
    pub fn recipient_list(&self) -> Vec<String> {
        self.recipients
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = scheduled_report_schedules)]
pub struct NewScheduledReport {
    pub id: Uuid,
    pub name: String,
    pub report_key: String,
    pub org_id: Option<Uuid>,
    pub cadence: Cadence,
    pub time_of_day: String,
    pub day_of_week: Option<i32>,
    pub day_of_month: Option<i32>,
    pub format: ReportFormat,
    pub recipients: JsonValue,
    pub enabled: bool,
    pub next_run_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub created_by: Option<String>,
    pub updated_at: NaiveDateTime,
    pub updated_by: Option<String>,
}

/// Changeset applied on schedule edits. `None` leaves a column untouched;
/// nullable columns use the inner Option to write NULL.
#[derive(Debug, Default, AsChangeset)]
#[diesel(table_name = scheduled_report_schedules)]
pub struct ScheduledReportChangeset {
    pub name: Option<String>,
    pub report_key: Option<String>,
    pub org_id: Option<Option<Uuid>>,
    pub cadence: Option<Cadence>,
    pub time_of_day: Option<String>,
    pub day_of_week: Option<Option<i32>>,
    pub day_of_month: Option<Option<i32>>,
    pub format: Option<ReportFormat>,
    pub recipients: Option<JsonValue>,
    pub enabled: Option<bool>,
    pub next_run_at: Option<Option<NaiveDateTime>>,
    pub updated_at: Option<NaiveDateTime>,
    pub updated_by: Option<Option<String>>,
}

/// A schedule joined to its most recent run, for dashboard listings.
#[derive(Debug, QueryableByName, Serialize)]
pub struct ScheduleWithLastRun {
    #[diesel(embed)]
    pub schedule: ScheduledReport,
    #[diesel(sql_type = diesel::sql_types::Nullable<crate::schema::sql_types::RunStatus>)]
    pub last_run_status: Option<RunStatus>,
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Timestamp>)]
    pub last_run_finished_at: Option<NaiveDateTime>,
}

// ============================================================================
// Run models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = scheduled_report_runs)]
pub struct ReportRun {
    pub id: Uuid,
    pub schedule_id: Uuid,
    pub status: RunStatus,
    pub started_at: Option<NaiveDateTime>,
    pub finished_at: Option<NaiveDateTime>,
    pub error: Option<String>,
    pub output_filename: Option<String>,
    pub output_content_type: Option<String>,
    pub output_encoding: Option<String>,
    #[serde(skip_serializing)]
    pub output_bytes: Option<Vec<u8>>,
    pub output_size_bytes: Option<i64>,
    #[serde(skip_serializing)]
    pub download_token_hash: Option<String>,
    pub download_expires_at: Option<NaiveDateTime>,
    pub delivered_to: JsonValue,
    pub created_at: NaiveDateTime,
}

impl ReportRun {
    /// Age of the run relative to `now`; the signal operators use to spot
    /// runs stuck in a transient state after a worker crash.
    pub fn age(&self, now: NaiveDateTime) -> chrono::Duration {
        now - self.created_at
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = scheduled_report_runs)]
pub struct NewReportRun {
    pub id: Uuid,
    pub schedule_id: Uuid,
    pub status: RunStatus,
    pub started_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

/// Terminal-state payload for finishing a run.
#[derive(Debug)]
pub struct RunCompletion {
    pub finished_at: NaiveDateTime,
    pub error: Option<String>,
    pub artifact: Option<ReportArtifact>,
    pub download_token_hash: Option<String>,
    pub download_expires_at: Option<NaiveDateTime>,
    pub delivered_to: Vec<String>,
}

/// Artifact and token material needed to serve a download request.
///
/// Only the token hash and expiry leave the store; the plaintext token is
/// never persisted anywhere.
#[derive(Debug, Queryable)]
pub struct RunDownload {
    pub output_filename: Option<String>,
    pub output_content_type: Option<String>,
    pub output_encoding: Option<String>,
    pub output_bytes: Option<Vec<u8>>,
    pub output_size_bytes: Option<i64>,
    pub download_token_hash: Option<String>,
    pub download_expires_at: Option<NaiveDateTime>,
}

impl RunDownload {
    /// Validate a caller-presented plaintext token against the stored hash
    /// and expiry. The hash comparison is constant-time.
    pub fn token_matches(&self, presented: &str, now: NaiveDateTime) -> bool {
        match (&self.download_token_hash, self.download_expires_at) {
            (Some(hash), Some(expires_at)) => {
                now < expires_at && token::verify_token(presented, hash)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn download_with(hash: Option<String>, expires_at: Option<NaiveDateTime>) -> RunDownload {
        RunDownload {
            output_filename: Some("report.csv".to_string()),
            output_content_type: Some("text/csv".to_string()),
            output_encoding: Some("utf-8".to_string()),
            output_bytes: Some(b"a,b\n1,2\n".to_vec()),
            output_size_bytes: Some(8),
            download_token_hash: hash,
            download_expires_at: expires_at,
        }
    }

    #[test]
    fn token_match_requires_hash_and_expiry() {
        let issued = token::DownloadToken::issue();
        assert!(!download_with(None, None).token_matches(&issued.plaintext, now()));
        assert!(
            !download_with(Some(issued.hash.clone()), None).token_matches(&issued.plaintext, now())
        );
    }

    #[test]
    fn token_match_honors_expiry() {
        let issued = token::DownloadToken::issue();
        let live = download_with(Some(issued.hash.clone()), Some(now() + Duration::hours(1)));
        assert!(live.token_matches(&issued.plaintext, now()));

        let expired = download_with(Some(issued.hash.clone()), Some(now() - Duration::hours(1)));
        assert!(!expired.token_matches(&issued.plaintext, now()));
    }

    #[test]
    fn token_match_rejects_wrong_token() {
        let issued = token::DownloadToken::issue();
        let live = download_with(Some(issued.hash), Some(now() + Duration::hours(1)));
        assert!(!live.token_matches("not-the-token", now()));
    }

    #[test]
    fn recipient_list_tolerates_malformed_json() {
        let mut schedule = sample_schedule();
        schedule.recipients = serde_json::json!(["ops@example.com", "dash@example.com"]);
        assert_eq!(
            schedule.recipient_list(),
            vec!["ops@example.com".to_string(), "dash@example.com".to_string()]
        );

        schedule.recipients = serde_json::json!({"not": "a list"});
        assert!(schedule.recipient_list().is_empty());

        schedule.recipients = serde_json::json!(["ok", 42, null]);
        assert_eq!(schedule.recipient_list(), vec!["ok".to_string()]);
    }

    fn sample_schedule() -> ScheduledReport {
        ScheduledReport {
            id: Uuid::new_v4(),
            name: "weekly usage".to_string(),
            report_key: "run_activity".to_string(),
            org_id: None,
            cadence: Cadence::Weekly,
            time_of_day: "08:00".to_string(),
            day_of_week: Some(1),
            day_of_month: None,
            format: ReportFormat::Csv,
            recipients: serde_json::json!([]),
            enabled: true,
            next_run_at: None,
            last_run_at: None,
            created_at: now(),
            created_by: None,
            updated_at: now(),
            updated_by: None,
        }
    }
}
