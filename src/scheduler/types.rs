use async_trait::async_trait;
use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::AsyncDbPool;
use crate::error::AppResult;

/// Recurrence pattern of a schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DbEnum)]
#[db_enum(existing_type_path = "crate::schema::sql_types::ReportCadence")]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Daily,
    Weekly,
    Monthly,
}

impl std::fmt::Display for Cadence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cadence::Daily => write!(f, "daily"),
            Cadence::Weekly => write!(f, "weekly"),
            Cadence::Monthly => write!(f, "monthly"),
        }
    }
}

/// Output format of a rendered report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DbEnum)]
#[db_enum(existing_type_path = "crate::schema::sql_types::ReportFormat")]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Csv,
    Json,
}

impl ReportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ReportFormat::Csv => "text/csv",
            ReportFormat::Json => "application/json",
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            ReportFormat::Csv => "csv",
            ReportFormat::Json => "json",
        }
    }
}

/// Run lifecycle status
///
/// `queued -> running -> {success | failure}`; the last two are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DbEnum)]
#[db_enum(existing_type_path = "crate::schema::sql_types::RunStatus")]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Success,
    Failure,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failure)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Queued => write!(f, "queued"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Success => write!(f, "success"),
            RunStatus::Failure => write!(f, "failure"),
        }
    }
}

/// Rendered report payload handed back by a generator
#[derive(Debug, Clone)]
pub struct ReportArtifact {
    pub filename: String,
    pub content_type: String,
    pub encoding: String,
    pub bytes: Vec<u8>,
}

impl ReportArtifact {
    pub fn size_bytes(&self) -> i64 {
        self.bytes.len() as i64
    }
}

/// Context passed to report generators
#[derive(Clone)]
pub struct GenerateContext {
    pub schedule_id: Uuid,
    pub report_key: String,
    /// Organizational scope to render for; `None` means all organizations.
    pub org_id: Option<Uuid>,
    pub format: ReportFormat,
    pub db_pool: AsyncDbPool,
}

/// Trait implemented by every report generator the scheduler can invoke
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    /// Unique identifier for this report type
    fn report_key() -> &'static str
    where
        Self: Sized;

    /// Render the report for the given scope and format
    async fn generate(&self, ctx: GenerateContext) -> AppResult<ReportArtifact>;

    /// Optional description
    fn description(&self) -> Option<String> {
        None
    }
}
