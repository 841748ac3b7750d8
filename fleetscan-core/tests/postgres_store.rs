#![cfg(feature = "postgres-tests")]

use anyhow::Result;
use chrono::{Duration, Utc};
use fleetscan_core::store::{
    PostgresResultStore, ResultStore, RunCompletion, RunQuery,
};
use fleetscan_model::{
    RunId, RunStatus, ScanOptions, ScanRun, SeverityCounts, TargetId,
    TargetResult, TargetStatus, TenantId,
};
use sqlx::PgPool;

fn seed_run(tenant: TenantId, targets: &[TargetId], minutes_ago: i64) -> ScanRun {
    ScanRun {
        id: RunId::new(),
        tenant,
        name: format!("run-{minutes_ago}"),
        target_ids: targets.to_vec(),
        status: RunStatus::Running,
        total: targets.len() as u32,
        completed: 0,
        failed: 0,
        started_at: Utc::now() - Duration::minutes(minutes_ago),
        completed_at: None,
        options: ScanOptions::default().quick(true).named("nightly"),
        created_by: "ci".into(),
        error: None,
    }
}

#[sqlx::test(migrator = "fleetscan_core::store::postgres::MIGRATOR")]
async fn runs_round_trip_and_list_newest_first(pool: PgPool) -> Result<()> {
    let store = PostgresResultStore::new(pool);
    let tenant = TenantId::new();
    let targets = [TargetId::new(), TargetId::new()];

    let older = seed_run(tenant, &targets, 30);
    let newer = seed_run(tenant, &targets, 5);
    store.create_run(&older).await?;
    store.create_run(&newer).await?;
    store.create_run(&seed_run(TenantId::new(), &targets, 1)).await?;

    let fetched = store.get_run(tenant, older.id).await?.expect("run stored");
    assert_eq!(fetched.target_ids, older.target_ids);
    assert_eq!(fetched.options, older.options);
    assert!(store.get_run(TenantId::new(), older.id).await?.is_none());

    let listed = store.list_runs(tenant, RunQuery::default()).await?;
    let ids: Vec<RunId> = listed.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![newer.id, older.id]);

    let running = store
        .list_runs(tenant, RunQuery::default().with_status(RunStatus::Completed))
        .await?;
    assert!(running.is_empty());
    Ok(())
}

#[sqlx::test(migrator = "fleetscan_core::store::postgres::MIGRATOR")]
async fn cancellation_is_conditional_and_survives_finish(pool: PgPool) -> Result<()> {
    let store = PostgresResultStore::new(pool);
    let tenant = TenantId::new();
    let run = seed_run(tenant, &[TargetId::new(), TargetId::new()], 1);
    store.create_run(&run).await?;

    assert!(store.mark_run_cancelled(tenant, run.id, Utc::now()).await?);
    assert!(!store.mark_run_cancelled(tenant, run.id, Utc::now()).await?);

    store
        .finish_run(
            run.id,
            RunCompletion {
                status: RunStatus::Completed,
                completed: 1,
                failed: 0,
                completed_at: Utc::now(),
                error: None,
            },
        )
        .await?;

    let stored = store.get_run(tenant, run.id).await?.expect("run stored");
    assert_eq!(stored.status, RunStatus::Cancelled);
    assert_eq!((stored.completed, stored.failed), (1, 0));
    Ok(())
}

#[sqlx::test(migrator = "fleetscan_core::store::postgres::MIGRATOR")]
async fn result_status_only_moves_forward(pool: PgPool) -> Result<()> {
    let store = PostgresResultStore::new(pool);
    let tenant = TenantId::new();
    let target = TargetId::new();
    let run = seed_run(tenant, &[target], 1);
    store.create_run(&run).await?;

    let mut result = TargetResult::pending(run.id, target, tenant);
    store.insert_result(&result).await?;
    result.status = TargetStatus::Running;
    store.update_result(&result).await?;
    result.status = TargetStatus::Completed;
    result.severity = SeverityCounts::new(1, 2, 3, 4);
    result.duration_ms = Some(42);
    store.update_result(&result).await?;

    result.status = TargetStatus::Failed;
    let err = store.update_result(&result).await.unwrap_err();
    assert_eq!(err.kind(), "invalid_state");

    let rows = store.results_for_run(run.id).await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, TargetStatus::Completed);
    assert_eq!(rows[0].severity, SeverityCounts::new(1, 2, 3, 4));

    let history = store.results_for_target(tenant, target, 5).await?;
    assert_eq!(history.len(), 1);
    Ok(())
}

#[sqlx::test(migrator = "fleetscan_core::store::postgres::MIGRATOR")]
async fn unfinished_results_are_failed_in_bulk(pool: PgPool) -> Result<()> {
    let store = PostgresResultStore::new(pool);
    let tenant = TenantId::new();
    let targets = [TargetId::new(), TargetId::new()];
    let run = seed_run(tenant, &targets, 1);
    store.create_run(&run).await?;

    let mut done = TargetResult::pending(run.id, targets[0], tenant);
    store.insert_result(&done).await?;
    done.status = TargetStatus::Completed;
    store.update_result(&done).await?;
    store
        .insert_result(&TargetResult::pending(run.id, targets[1], tenant))
        .await?;

    let touched = store
        .fail_unfinished_results(run.id, "interrupted before completion", Utc::now())
        .await?;
    assert_eq!(touched, 1);
    assert_eq!(store.list_running_runs().await?.len(), 1);
    Ok(())
}

#[sqlx::test(migrator = "fleetscan_core::store::postgres::MIGRATOR")]
async fn nul_bytes_in_output_do_not_block_the_update(pool: PgPool) -> Result<()> {
    let store = PostgresResultStore::new(pool);
    let tenant = TenantId::new();
    let target = TargetId::new();
    let run = seed_run(tenant, &[target], 1);
    store.create_run(&run).await?;

    let mut result = TargetResult::pending(run.id, target, tenant);
    store.insert_result(&result).await?;
    result.status = TargetStatus::Running;
    store.update_result(&result).await?;
    result.status = TargetStatus::Failed;
    result.raw_output = Some("High: 1\n\0\0".into());
    result.error = Some("command exited with status 3: bad\0header".into());
    store.update_result(&result).await?;

    let rows = store.results_for_run(run.id).await?;
    assert_eq!(rows[0].status, TargetStatus::Failed);
    let raw = rows[0].raw_output.as_deref().unwrap_or_default();
    assert!(raw.starts_with("High: 1\n") && !raw.contains('\0'));
    let error = rows[0].error.as_deref().unwrap_or_default();
    assert!(error.contains("bad") && !error.contains('\0'));
    Ok(())
}
