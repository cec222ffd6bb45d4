//! Integration tests against a live PostgreSQL instance.
//!
//! Ignored by default; point DATABASE_URL at a scratch database and run
//! `cargo test -- --ignored`. Migrations are applied on first use and every
//! test cleans up the schedules it creates (runs cascade away with them).

use chrono::{Duration, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use uuid::Uuid;

use reportflow::config::DatabaseConfig;
use reportflow::db::{establish_async_connection_pool, run_pending_migrations, AsyncDbPool};
use reportflow::repositories::{CreateScheduleParams, RunRepository, ScheduleRepository, UpdateScheduleParams};
use reportflow::scheduler::models::RunCompletion;
use reportflow::scheduler::types::{Cadence, ReportArtifact, ReportFormat, RunStatus};
use reportflow::scheduler::ClaimEngine;
use reportflow::schema::scheduled_report_schedules as schedules;
use reportflow::utils::token::DownloadToken;

async fn test_pool() -> AsyncDbPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a test database");
    run_pending_migrations(&url)
        .await
        .expect("migrations should apply");
    let config = DatabaseConfig {
        url,
        ..Default::default()
    };
    establish_async_connection_pool(&config)
        .await
        .expect("pool should build")
}

fn schedule_params(name: &str) -> CreateScheduleParams {
    CreateScheduleParams {
        name: format!("{}-{}", name, Uuid::new_v4()),
        report_key: "run_activity".to_string(),
        org_id: None,
        cadence: Cadence::Daily,
        time_of_day: Some("08:00".to_string()),
        day_of_week: None,
        day_of_month: None,
        format: ReportFormat::Csv,
        recipients: vec![],
        enabled: true,
    }
}

/// Force a schedule to be due immediately.
async fn make_due(pool: &AsyncDbPool, id: Uuid) {
    let mut conn = pool.get().await.unwrap();
    diesel::update(schedules::table.find(id))
        .set(schedules::next_run_at.eq(Some(Utc::now().naive_utc() - Duration::minutes(5))))
        .execute(&mut conn)
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "requires PostgreSQL at DATABASE_URL"]
async fn concurrent_claims_take_a_due_schedule_exactly_once() {
    let pool = test_pool().await;
    let repo = ScheduleRepository::new(pool.clone());

    let schedule = repo.create(schedule_params("contention"), None).await.unwrap();
    make_due(&pool, schedule.id).await;

    let engine_a = ClaimEngine::new(pool.clone());
    let engine_b = ClaimEngine::new(pool.clone());

    let (a, b) = tokio::join!(engine_a.claim_due(10), engine_b.claim_due(10));
    let a = a.unwrap();
    let b = b.unwrap();

    let occurrences = a
        .iter()
        .chain(b.iter())
        .filter(|c| c.schedule.id == schedule.id)
        .count();
    assert_eq!(occurrences, 1, "exactly one worker may claim the occurrence");

    // The claim advanced the schedule into the future; nothing is due now.
    let again = engine_a.claim_due(10).await.unwrap();
    assert!(!again.iter().any(|c| c.schedule.id == schedule.id));

    repo.delete(schedule.id).await.unwrap();
}

#[tokio::test]
#[ignore = "requires PostgreSQL at DATABASE_URL"]
async fn claim_returns_most_overdue_first_and_advances_bookkeeping() {
    let pool = test_pool().await;
    let repo = ScheduleRepository::new(pool.clone());
    let engine = ClaimEngine::new(pool.clone());

    let oldest = repo.create(schedule_params("oldest"), None).await.unwrap();
    let newer = repo.create(schedule_params("newer"), None).await.unwrap();

    let now = Utc::now().naive_utc();
    {
        let mut conn = pool.get().await.unwrap();
        diesel::update(schedules::table.find(oldest.id))
            .set(schedules::next_run_at.eq(Some(now - Duration::hours(2))))
            .execute(&mut conn)
            .await
            .unwrap();
        diesel::update(schedules::table.find(newer.id))
            .set(schedules::next_run_at.eq(Some(now - Duration::minutes(1))))
            .execute(&mut conn)
            .await
            .unwrap();
    }

    let claimed = engine.claim_due(10).await.unwrap();
    let ids: Vec<Uuid> = claimed.iter().map(|c| c.schedule.id).collect();
    let oldest_pos = ids.iter().position(|id| *id == oldest.id).unwrap();
    let newer_pos = ids.iter().position(|id| *id == newer.id).unwrap();
    assert!(oldest_pos < newer_pos, "most-overdue schedule comes first");

    // Bookkeeping advanced: next_run_at strictly future, last_run_at stamped.
    let reloaded = repo.get_by_id(oldest.id).await.unwrap();
    assert!(reloaded.next_run_at.unwrap() > now);
    assert!(reloaded.last_run_at.is_some());

    repo.delete(oldest.id).await.unwrap();
    repo.delete(newer.id).await.unwrap();
}

#[tokio::test]
#[ignore = "requires PostgreSQL at DATABASE_URL"]
async fn disable_clears_next_run_and_reenable_recomputes() {
    let pool = test_pool().await;
    let repo = ScheduleRepository::new(pool.clone());

    let schedule = repo.create(schedule_params("toggle"), None).await.unwrap();
    assert!(schedule.next_run_at.is_some());

    let disabled = repo
        .update(
            schedule.id,
            UpdateScheduleParams {
                enabled: Some(false),
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(disabled.next_run_at, None);

    // Disabling again is idempotent.
    let disabled_again = repo
        .update(
            schedule.id,
            UpdateScheduleParams {
                enabled: Some(false),
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(disabled_again.next_run_at, None);

    let before = Utc::now().naive_utc();
    let reenabled = repo
        .update(
            schedule.id,
            UpdateScheduleParams {
                enabled: Some(true),
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();
    assert!(reenabled.next_run_at.unwrap() > before);

    // A disabled schedule is never claimed, however overdue.
    repo.update(
        schedule.id,
        UpdateScheduleParams {
            enabled: Some(false),
            ..Default::default()
        },
        None,
    )
    .await
    .unwrap();
    let claimed = ClaimEngine::new(pool.clone()).claim_due(10).await.unwrap();
    assert!(!claimed.iter().any(|c| c.schedule.id == schedule.id));

    repo.delete(schedule.id).await.unwrap();
}

#[tokio::test]
#[ignore = "requires PostgreSQL at DATABASE_URL"]
async fn run_lifecycle_reaches_terminal_state_once() {
    let pool = test_pool().await;
    let schedule_repo = ScheduleRepository::new(pool.clone());
    let run_repo = RunRepository::new(pool.clone());

    let schedule = schedule_repo
        .create(schedule_params("lifecycle"), None)
        .await
        .unwrap();

    let run = run_repo.create(schedule.id, None).await.unwrap();
    assert_eq!(run.status, RunStatus::Queued);

    run_repo
        .mark_running(run.id, Utc::now().naive_utc())
        .await
        .unwrap();

    let token = DownloadToken::issue();
    let expires_at = Utc::now().naive_utc() + Duration::hours(72);
    run_repo
        .finish(
            run.id,
            RunStatus::Success,
            RunCompletion {
                finished_at: Utc::now().naive_utc(),
                error: None,
                artifact: Some(ReportArtifact {
                    filename: "report.csv".to_string(),
                    content_type: "text/csv".to_string(),
                    encoding: "utf-8".to_string(),
                    bytes: b"a,b\n1,2\n".to_vec(),
                }),
                download_token_hash: Some(token.hash.clone()),
                download_expires_at: Some(expires_at),
                delivered_to: vec![],
            },
        )
        .await
        .unwrap();

    // Refusing a non-terminal finish.
    let queued_again = run_repo
        .finish(
            run.id,
            RunStatus::Running,
            RunCompletion {
                finished_at: Utc::now().naive_utc(),
                error: None,
                artifact: None,
                download_token_hash: None,
                download_expires_at: None,
                delivered_to: vec![],
            },
        )
        .await;
    assert!(queued_again.is_err());

    // History lists most recent first and reports the terminal state.
    let second = run_repo.create(schedule.id, None).await.unwrap();
    let history = run_repo.list_by_schedule(schedule.id, 10).await.unwrap();
    assert_eq!(history[0].id, second.id);
    let finished = history.iter().find(|r| r.id == run.id).unwrap();
    assert_eq!(finished.status, RunStatus::Success);
    assert_eq!(finished.output_size_bytes, Some(8));

    // Download material round-trips through the hash, never the plaintext.
    let download = run_repo.read_for_download(run.id).await.unwrap();
    let now = Utc::now().naive_utc();
    assert!(download.token_matches(&token.plaintext, now));
    assert!(!download.token_matches("forged-token", now));
    assert_eq!(download.download_token_hash.as_ref().unwrap(), &token.hash);

    // Stuck-run detection sees the still-queued second run once it ages.
    let stuck = run_repo
        .stuck_runs(Duration::seconds(0), 100)
        .await
        .unwrap();
    assert!(stuck.iter().any(|r| r.id == second.id));
    assert!(stuck.iter().all(|r| r.id != run.id));

    schedule_repo.delete(schedule.id).await.unwrap();
}

#[tokio::test]
#[ignore = "requires PostgreSQL at DATABASE_URL"]
async fn listing_joins_each_schedule_to_its_latest_run() {
    let pool = test_pool().await;
    let schedule_repo = ScheduleRepository::new(pool.clone());
    let run_repo = RunRepository::new(pool.clone());

    let schedule = schedule_repo
        .create(schedule_params("listing"), None)
        .await
        .unwrap();

    let older = run_repo.create(schedule.id, None).await.unwrap();
    run_repo
        .finish(
            older.id,
            RunStatus::Failure,
            RunCompletion {
                finished_at: Utc::now().naive_utc(),
                error: Some("boom".to_string()),
                artifact: None,
                download_token_hash: None,
                download_expires_at: None,
                delivered_to: vec![],
            },
        )
        .await
        .unwrap();

    let latest = run_repo.create(schedule.id, None).await.unwrap();
    let finished_at = Utc::now().naive_utc();
    run_repo
        .finish(
            latest.id,
            RunStatus::Success,
            RunCompletion {
                finished_at,
                error: None,
                artifact: None,
                download_token_hash: None,
                download_expires_at: None,
                delivered_to: vec![],
            },
        )
        .await
        .unwrap();

    let listed = schedule_repo.list_with_last_run(1000, 0).await.unwrap();
    let entry = listed
        .iter()
        .find(|e| e.schedule.id == schedule.id)
        .expect("schedule should be listed");
    assert_eq!(entry.last_run_status, Some(RunStatus::Success));
    // Postgres stores microseconds; compare with a millisecond tolerance.
    let got = entry.last_run_finished_at.expect("latest run has finished");
    assert!((got - finished_at).num_milliseconds().abs() <= 1);

    schedule_repo.delete(schedule.id).await.unwrap();
}

#[tokio::test]
#[ignore = "requires PostgreSQL at DATABASE_URL"]
async fn deleting_a_schedule_cascades_to_its_runs() {
    let pool = test_pool().await;
    let schedule_repo = ScheduleRepository::new(pool.clone());
    let run_repo = RunRepository::new(pool.clone());

    let schedule = schedule_repo
        .create(schedule_params("cascade"), None)
        .await
        .unwrap();
    let run = run_repo.create(schedule.id, None).await.unwrap();

    schedule_repo.delete(schedule.id).await.unwrap();

    assert!(run_repo.read_for_download(run.id).await.is_err());
    assert!(schedule_repo.get_by_id(schedule.id).await.is_err());
}

mod end_to_end {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use reportflow::config::WorkerConfig;
    use reportflow::error::AppResult;
    use reportflow::scheduler::types::{GenerateContext, ReportGenerator};
    use reportflow::scheduler::RunExecutor;
    use reportflow::services::delivery::{DeliveryChannel, DeliveryNotice, DeliveryReceipt};
    use reportflow::scheduler::ReportRegistry;

    struct StubReport;

    #[async_trait]
    impl ReportGenerator for StubReport {
        fn report_key() -> &'static str {
            "stub_report"
        }

        async fn generate(&self, ctx: GenerateContext) -> AppResult<ReportArtifact> {
            Ok(ReportArtifact {
                filename: format!("stub.{}", ctx.format.file_extension()),
                content_type: ctx.format.content_type().to_string(),
                encoding: "utf-8".to_string(),
                bytes: b"col\nvalue\n".to_vec(),
            })
        }
    }

    /// Accepts every recipient without touching the network.
    struct AcceptAllDelivery;

    #[async_trait]
    impl DeliveryChannel for AcceptAllDelivery {
        async fn deliver(
            &self,
            recipients: &[String],
            _notice: &DeliveryNotice,
        ) -> Vec<DeliveryReceipt> {
            recipients
                .iter()
                .map(|r| DeliveryReceipt {
                    recipient: r.clone(),
                    success: true,
                    detail: None,
                    duration_ms: 0,
                })
                .collect()
        }

        fn name(&self) -> &'static str {
            "accept-all"
        }
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL at DATABASE_URL"]
    async fn run_now_claim_executes_a_full_run() {
        let pool = test_pool().await;
        let schedule_repo = ScheduleRepository::new(pool.clone());
        let run_repo = RunRepository::new(pool.clone());

        let mut params = schedule_params("end-to-end");
        params.report_key = "stub_report".to_string();
        params.recipients = vec!["ops@example.com".to_string()];
        let schedule = schedule_repo.create(params, Some("itest")).await.unwrap();

        let mut registry = ReportRegistry::new();
        registry.register(StubReport);
        let executor = RunExecutor::new(
            pool.clone(),
            Arc::new(registry),
            Arc::new(AcceptAllDelivery),
            WorkerConfig::default(),
        );

        let claimed = ClaimEngine::new(pool.clone())
            .run_now(schedule.id)
            .await
            .unwrap();
        assert_eq!(claimed.schedule.id, schedule.id);

        RunExecutor::execute(&executor, claimed).await.unwrap();

        let history = run_repo.list_by_schedule(schedule.id, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        let run = &history[0];
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.output_filename.as_deref(), Some("stub.csv"));
        assert_eq!(run.output_size_bytes, Some(10));
        assert!(run.download_token_hash.is_some());
        assert!(run.download_expires_at.unwrap() > run.finished_at.unwrap());
        assert_eq!(run.delivered_to, serde_json::json!(["ops@example.com"]));

        // Bookkeeping reconciled after the run: still strictly future.
        let reloaded = schedule_repo.get_by_id(schedule.id).await.unwrap();
        assert!(reloaded.next_run_at.unwrap() > Utc::now().naive_utc());
        assert!(reloaded.last_run_at.is_some());

        // A generator that is not registered fails the run but not the claim.
        let mut params = schedule_params("unknown-key");
        params.report_key = "no_such_report".to_string();
        let orphan = schedule_repo.create(params, None).await.unwrap();
        let claimed = ClaimEngine::new(pool.clone())
            .run_now(orphan.id)
            .await
            .unwrap();
        let registry = ReportRegistry::new();
        let executor = RunExecutor::new(
            pool.clone(),
            Arc::new(registry),
            Arc::new(AcceptAllDelivery),
            WorkerConfig::default(),
        );
        RunExecutor::execute(&executor, claimed).await.unwrap();

        let history = run_repo.list_by_schedule(orphan.id, 10).await.unwrap();
        assert_eq!(history[0].status, RunStatus::Failure);
        assert!(history[0].error.as_deref().unwrap().contains("no_such_report"));

        schedule_repo.delete(schedule.id).await.unwrap();
        schedule_repo.delete(orphan.id).await.unwrap();
    }
}
