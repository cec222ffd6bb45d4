//! The recurring report scheduler core.
//!
//! `cadence` computes next occurrences, the repositories persist schedules
//! and runs, `claim` hands due schedules to exactly one worker fleet-wide,
//! `executor` walks a claimed schedule through its run lifecycle, and
//! `worker` is the polling driver tying it together.

pub mod cadence;
pub mod claim;
pub mod executor;
pub mod models;
pub mod registry;
pub mod reports;
pub mod types;
pub mod worker;

pub use cadence::compute_next_run_at;
pub use claim::{ClaimEngine, ClaimedSchedule};
pub use executor::RunExecutor;
pub use models::{ReportRun, RunCompletion, RunDownload, ScheduleWithLastRun, ScheduledReport};
pub use registry::ReportRegistry;
pub use types::{Cadence, GenerateContext, ReportArtifact, ReportFormat, ReportGenerator, RunStatus};
pub use worker::ScheduleWorker;
