use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetscan_model::{
    RunId, RunStatus, ScanOptions, ScanRun, SeverityCounts, TargetId,
    TargetResult, TargetResultId, TargetStatus, TenantId,
};
use sqlx::{PgPool, Row, postgres::PgRow, types::Json};
use tracing::info;
use uuid::Uuid;

use super::{ResultStore, RunCompletion, RunQuery};
use crate::error::{Result, ScanError};

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const RUN_COLUMNS: &str = r#"
    id, tenant_id, name, target_ids, status, total, completed, failed,
    started_at, completed_at, options, created_by, error
"#;

const RESULT_COLUMNS: &str = r#"
    id, run_id, target_id, tenant_id, status, started_at, completed_at,
    duration_ms, critical, high, medium, low, raw_output, error
"#;

/// Durable result store backed by Postgres.
#[derive(Clone)]
pub struct PostgresResultStore {
    pool: PgPool,
}

impl fmt::Debug for PostgresResultStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresResultStore")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .finish()
    }
}

impl PostgresResultStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect, run pending migrations, and return a ready store.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect(url)
            .await
            .map_err(|e| {
                ScanError::Persistence(format!("failed to connect to Postgres: {e}"))
            })?;
        MIGRATOR.run(&pool).await.map_err(|e| {
            ScanError::Persistence(format!("failed to apply migrations: {e}"))
        })?;
        info!(target: "scan::store", "result store connected to Postgres");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn map_run(row: &PgRow) -> Result<ScanRun> {
        let status: String = row.try_get("status")?;
        let target_ids: Vec<Uuid> = row.try_get("target_ids")?;
        let Json(options): Json<ScanOptions> = row.try_get("options")?;
        Ok(ScanRun {
            id: RunId(row.try_get("id")?),
            tenant: TenantId(row.try_get("tenant_id")?),
            name: row.try_get("name")?,
            target_ids: target_ids.into_iter().map(TargetId).collect(),
            status: status.parse::<RunStatus>().map_err(|e| {
                ScanError::Persistence(format!("corrupt run row: {e}"))
            })?,
            total: to_u32(row.try_get("total")?),
            completed: to_u32(row.try_get("completed")?),
            failed: to_u32(row.try_get("failed")?),
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            options,
            created_by: row.try_get("created_by")?,
            error: row.try_get("error")?,
        })
    }

    fn map_result(row: &PgRow) -> Result<TargetResult> {
        let status: String = row.try_get("status")?;
        let duration_ms: Option<i64> = row.try_get("duration_ms")?;
        Ok(TargetResult {
            id: TargetResultId(row.try_get("id")?),
            run_id: RunId(row.try_get("run_id")?),
            target_id: TargetId(row.try_get("target_id")?),
            tenant: TenantId(row.try_get("tenant_id")?),
            status: status.parse::<TargetStatus>().map_err(|e| {
                ScanError::Persistence(format!("corrupt result row: {e}"))
            })?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            duration_ms: duration_ms.map(|ms| ms.max(0) as u64),
            severity: SeverityCounts::new(
                to_u32(row.try_get("critical")?),
                to_u32(row.try_get("high")?),
                to_u32(row.try_get("medium")?),
                to_u32(row.try_get("low")?),
            ),
            raw_output: row.try_get("raw_output")?,
            error: row.try_get("error")?,
        })
    }
}

fn to_u32(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// Postgres `text` rejects NUL; remote output may carry it.
fn text_column(value: Option<&str>) -> Option<String> {
    value.map(|text| text.replace('\0', "\u{FFFD}"))
}

#[async_trait]
impl ResultStore for PostgresResultStore {
    async fn create_run(&self, run: &ScanRun) -> Result<()> {
        let target_ids: Vec<Uuid> =
            run.target_ids.iter().map(TargetId::to_uuid).collect();
        sqlx::query(
            r#"
            INSERT INTO scan_runs (
                id, tenant_id, name, target_ids, status, total, completed,
                failed, started_at, completed_at, options, created_by, error
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(run.id.0)
        .bind(run.tenant.0)
        .bind(&run.name)
        .bind(target_ids)
        .bind(run.status.as_str())
        .bind(to_i32(run.total))
        .bind(to_i32(run.completed))
        .bind(to_i32(run.failed))
        .bind(run.started_at)
        .bind(run.completed_at)
        .bind(Json(&run.options))
        .bind(&run.created_by)
        .bind(&run.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_run(&self, tenant: TenantId, id: RunId) -> Result<Option<ScanRun>> {
        let sql =
            format!("SELECT {RUN_COLUMNS} FROM scan_runs WHERE id = $1 AND tenant_id = $2");
        let row = sqlx::query(&sql)
            .bind(id.0)
            .bind(tenant.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_run).transpose()
    }

    async fn list_runs(
        &self,
        tenant: TenantId,
        query: RunQuery,
    ) -> Result<Vec<ScanRun>> {
        let query = query.normalized();
        let sql = format!(
            r#"
            SELECT {RUN_COLUMNS}
            FROM scan_runs
            WHERE tenant_id = $1
              AND ($2::text IS NULL OR status = $2)
            ORDER BY started_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(tenant.0)
            .bind(query.status.map(|s| s.as_str()))
            .bind(i64::from(query.limit))
            .bind(i64::from(query.offset))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::map_run).collect()
    }

    async fn list_running_runs(&self) -> Result<Vec<ScanRun>> {
        let sql =
            format!("SELECT {RUN_COLUMNS} FROM scan_runs WHERE status = 'running'");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(Self::map_run).collect()
    }

    async fn update_run_progress(
        &self,
        id: RunId,
        completed: u32,
        failed: u32,
    ) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE scan_runs SET completed = $2, failed = $3 WHERE id = $1",
        )
        .bind(id.0)
        .bind(to_i32(completed))
        .bind(to_i32(failed))
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(ScanError::NotFound(format!("run {id}")));
        }
        Ok(())
    }

    async fn mark_run_cancelled(
        &self,
        tenant: TenantId,
        id: RunId,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE scan_runs
            SET status = 'cancelled', completed_at = $3
            WHERE id = $1 AND tenant_id = $2 AND status = 'running'
            "#,
        )
        .bind(id.0)
        .bind(tenant.0)
        .bind(at)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 1 {
            return Ok(true);
        }
        match self.get_run(tenant, id).await? {
            Some(_) => Ok(false),
            None => Err(ScanError::NotFound(format!("run {id}"))),
        }
    }

    async fn finish_run(&self, id: RunId, completion: RunCompletion) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE scan_runs
            SET status = CASE WHEN status = 'cancelled' THEN status ELSE $2 END,
                completed_at = CASE WHEN status = 'cancelled' THEN completed_at ELSE $5 END,
                completed = $3,
                failed = $4,
                error = COALESCE($6, error)
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(completion.status.as_str())
        .bind(to_i32(completion.completed))
        .bind(to_i32(completion.failed))
        .bind(completion.completed_at)
        .bind(text_column(completion.error.as_deref()))
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(ScanError::NotFound(format!("run {id}")));
        }
        Ok(())
    }

    async fn insert_result(&self, result: &TargetResult) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scan_target_results (
                id, run_id, target_id, tenant_id, status, started_at,
                completed_at, duration_ms, critical, high, medium, low,
                raw_output, error
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(result.id.0)
        .bind(result.run_id.0)
        .bind(result.target_id.0)
        .bind(result.tenant.0)
        .bind(result.status.as_str())
        .bind(result.started_at)
        .bind(result.completed_at)
        .bind(result.duration_ms.map(|ms| ms.min(i64::MAX as u64) as i64))
        .bind(to_i32(result.severity.critical))
        .bind(to_i32(result.severity.high))
        .bind(to_i32(result.severity.medium))
        .bind(to_i32(result.severity.low))
        .bind(text_column(result.raw_output.as_deref()))
        .bind(text_column(result.error.as_deref()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_result(&self, result: &TargetResult) -> Result<()> {
        // Terminal rows are immutable; the status guard keeps transitions
        // monotonic without a read-modify-write.
        let updated = sqlx::query(
            r#"
            UPDATE scan_target_results
            SET status = $2,
                started_at = $3,
                completed_at = $4,
                duration_ms = $5,
                critical = $6,
                high = $7,
                medium = $8,
                low = $9,
                raw_output = $10,
                error = $11
            WHERE id = $1
              AND status NOT IN ('completed', 'failed')
              AND status <> $2
              AND NOT (status = 'running' AND $2 = 'pending')
            "#,
        )
        .bind(result.id.0)
        .bind(result.status.as_str())
        .bind(result.started_at)
        .bind(result.completed_at)
        .bind(result.duration_ms.map(|ms| ms.min(i64::MAX as u64) as i64))
        .bind(to_i32(result.severity.critical))
        .bind(to_i32(result.severity.high))
        .bind(to_i32(result.severity.medium))
        .bind(to_i32(result.severity.low))
        .bind(text_column(result.raw_output.as_deref()))
        .bind(text_column(result.error.as_deref()))
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(ScanError::InvalidState(format!(
                "result {} is missing or cannot move to {}",
                result.id, result.status
            )));
        }
        Ok(())
    }

    async fn results_for_run(&self, run_id: RunId) -> Result<Vec<TargetResult>> {
        let sql = format!(
            "SELECT {RESULT_COLUMNS} FROM scan_target_results WHERE run_id = $1 ORDER BY started_at, id"
        );
        let rows = sqlx::query(&sql)
            .bind(run_id.0)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::map_result).collect()
    }

    async fn results_for_target(
        &self,
        tenant: TenantId,
        target_id: TargetId,
        limit: u32,
    ) -> Result<Vec<TargetResult>> {
        let sql = format!(
            r#"
            SELECT {RESULT_COLUMNS}
            FROM scan_target_results
            WHERE tenant_id = $1 AND target_id = $2
            ORDER BY started_at DESC, id DESC
            LIMIT $3
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(tenant.0)
            .bind(target_id.0)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::map_result).collect()
    }

    async fn fail_unfinished_results(
        &self,
        run_id: RunId,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<u32> {
        let updated = sqlx::query(
            r#"
            UPDATE scan_target_results
            SET status = 'failed', completed_at = $3, error = $2
            WHERE run_id = $1 AND status IN ('pending', 'running')
            "#,
        )
        .bind(run_id.0)
        .bind(text_column(Some(error)))
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(u32::try_from(updated.rows_affected()).unwrap_or(u32::MAX))
    }
}
