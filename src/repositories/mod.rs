mod run_repo;
mod schedule_repo;

pub use run_repo::RunRepository;
pub use schedule_repo::{CreateScheduleParams, ScheduleRepository, UpdateScheduleParams};
