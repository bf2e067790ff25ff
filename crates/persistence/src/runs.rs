//! Run rows
//!
//! Runs are created by the RPC surface and mutated only by the scheduler and
//! the callback sink. Status transitions are enforced in SQL guards so a
//! duplicate callback can never regress a terminal run.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use voiceci_core::{Run, RunAggregate, RunSource, RunStatus, TestSpec, TestStatus};

use crate::PersistenceError;

#[derive(Clone)]
pub struct RunStore {
    pool: PgPool,
}

impl RunStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a run, honoring the per-tenant idempotency key: if a run with
    /// the same key already exists, that run is returned and no row is
    /// created.
    pub async fn create_or_get(&self, run: &Run) -> Result<Run, PersistenceError> {
        if let Some(idempotency_key) = run.idempotency_key {
            if let Some(existing) = self
                .find_by_idempotency(run.tenant_id, idempotency_key)
                .await?
            {
                return Ok(existing);
            }
        }

        let (source_type, bundle_key, bundle_hash, lockfile_hash) = match &run.source {
            RunSource::Bundle {
                bundle_key,
                bundle_hash,
                lockfile_hash,
            } => (
                "bundle",
                Some(bundle_key.clone()),
                Some(bundle_hash.clone()),
                lockfile_hash.clone(),
            ),
            RunSource::Remote => ("remote", None, None, None),
        };

        let inserted = sqlx::query(
            r#"
            INSERT INTO runs (id, tenant_id, key_id, idempotency_key, source_type,
                              bundle_key, bundle_hash, lockfile_hash, status, test_spec, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (tenant_id, idempotency_key) WHERE idempotency_key IS NOT NULL
            DO NOTHING
            "#,
        )
        .bind(run.id)
        .bind(run.tenant_id)
        .bind(run.key_id)
        .bind(run.idempotency_key)
        .bind(source_type)
        .bind(bundle_key)
        .bind(bundle_hash)
        .bind(lockfile_hash)
        .bind(run.status.as_str())
        .bind(serde_json::to_value(&run.spec)?)
        .bind(run.created_at)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            // Lost the insert race; the winner's row is the run.
            if let Some(idempotency_key) = run.idempotency_key {
                if let Some(existing) = self
                    .find_by_idempotency(run.tenant_id, idempotency_key)
                    .await?
                {
                    return Ok(existing);
                }
            }
            return Err(PersistenceError::CorruptRow(
                "insert conflicted but no existing run found".into(),
            ));
        }

        Ok(run.clone())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Run>, PersistenceError> {
        let row = sqlx::query("SELECT * FROM runs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_run).transpose()
    }

    async fn find_by_idempotency(
        &self,
        tenant_id: Uuid,
        idempotency_key: Uuid,
    ) -> Result<Option<Run>, PersistenceError> {
        let row =
            sqlx::query("SELECT * FROM runs WHERE tenant_id = $1 AND idempotency_key = $2")
                .bind(tenant_id)
                .bind(idempotency_key)
                .fetch_optional(&self.pool)
                .await?;
        row.map(row_to_run).transpose()
    }

    /// queued → running, stamping started_at. No-op on any other state.
    pub async fn mark_running(&self, id: Uuid) -> Result<bool, PersistenceError> {
        let updated = sqlx::query(
            "UPDATE runs SET status = 'running', started_at = now()
             WHERE id = $1 AND status = 'queued'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(updated.rows_affected() == 1)
    }

    /// Terminal failure written by the worker on driver or provisioning
    /// errors. Valid from queued or running.
    pub async fn mark_failed(&self, id: Uuid, error_text: &str) -> Result<bool, PersistenceError> {
        let updated = sqlx::query(
            "UPDATE runs SET status = 'fail', error_text = $2,
                    finished_at = now(),
                    duration_ms = EXTRACT(EPOCH FROM (now() - created_at))::bigint * 1000
             WHERE id = $1 AND status IN ('queued', 'running')",
        )
        .bind(id)
        .bind(error_text)
        .execute(&self.pool)
        .await?;
        Ok(updated.rows_affected() == 1)
    }

    /// Terminal pass/fail written by the callback sink. Idempotent: a
    /// duplicate callback finds the run already terminal and changes
    /// nothing.
    pub async fn finish(
        &self,
        id: Uuid,
        status: TestStatus,
        aggregate: &RunAggregate,
        error_text: Option<&str>,
        duration_ms: u64,
    ) -> Result<bool, PersistenceError> {
        let status = match status {
            TestStatus::Pass => RunStatus::Pass,
            TestStatus::Fail => RunStatus::Fail,
        };
        let updated = sqlx::query(
            "UPDATE runs SET status = $2, aggregate = $3, error_text = $4,
                    finished_at = now(), duration_ms = $5
             WHERE id = $1 AND status IN ('queued', 'running')",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(serde_json::to_value(aggregate)?)
        .bind(error_text)
        .bind(duration_ms as i64)
        .execute(&self.pool)
        .await?;
        Ok(updated.rows_affected() == 1)
    }

    pub async fn list_for_tenant(
        &self,
        tenant_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Run>, PersistenceError> {
        let rows = sqlx::query(
            "SELECT * FROM runs WHERE tenant_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_run).collect()
    }
}

fn row_to_run(row: PgRow) -> Result<Run, PersistenceError> {
    let source_type: String = row.try_get("source_type")?;
    let source = match source_type.as_str() {
        "bundle" => RunSource::Bundle {
            bundle_key: row.try_get::<Option<String>, _>("bundle_key")?.unwrap_or_default(),
            bundle_hash: row
                .try_get::<Option<String>, _>("bundle_hash")?
                .unwrap_or_default(),
            lockfile_hash: row.try_get("lockfile_hash")?,
        },
        "remote" => RunSource::Remote,
        other => {
            return Err(PersistenceError::CorruptRow(format!(
                "unknown source_type {}",
                other
            )))
        }
    };

    let status_text: String = row.try_get("status")?;
    let status = RunStatus::parse(&status_text)
        .ok_or_else(|| PersistenceError::CorruptRow(format!("unknown status {}", status_text)))?;

    let spec: TestSpec = serde_json::from_value(row.try_get("test_spec")?)?;
    let aggregate = row
        .try_get::<Option<serde_json::Value>, _>("aggregate")?
        .map(serde_json::from_value)
        .transpose()?;

    Ok(Run {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        key_id: row.try_get("key_id")?,
        idempotency_key: row.try_get("idempotency_key")?,
        source,
        status,
        spec,
        aggregate,
        error_text: row.try_get("error_text")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        duration_ms: row.try_get("duration_ms")?,
    })
}
