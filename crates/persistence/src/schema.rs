//! Schema bootstrap
//!
//! Idempotent `CREATE TABLE IF NOT EXISTS` statements executed at startup.

use sqlx::PgPool;

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS api_keys (
        key_id      UUID PRIMARY KEY,
        tenant_id   UUID NOT NULL,
        token_hash  TEXT NOT NULL UNIQUE,
        label       TEXT,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS runs (
        id              UUID PRIMARY KEY,
        tenant_id       UUID NOT NULL,
        key_id          UUID NOT NULL,
        idempotency_key UUID,
        source_type     TEXT NOT NULL,
        bundle_key      TEXT,
        bundle_hash     TEXT,
        lockfile_hash   TEXT,
        status          TEXT NOT NULL,
        test_spec       JSONB NOT NULL,
        aggregate       JSONB,
        error_text      TEXT,
        created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
        started_at      TIMESTAMPTZ,
        finished_at     TIMESTAMPTZ,
        duration_ms     BIGINT
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS runs_tenant_idempotency
        ON runs (tenant_id, idempotency_key)
        WHERE idempotency_key IS NOT NULL
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS runs_tenant_created
        ON runs (tenant_id, created_at DESC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS scenario_results (
        id          UUID PRIMARY KEY,
        run_id      UUID NOT NULL,
        name        TEXT NOT NULL,
        status      TEXT NOT NULL,
        test_type   TEXT NOT NULL,
        metrics     JSONB NOT NULL DEFAULT '{}'::jsonb,
        trace       JSONB NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS scenario_results_run
        ON scenario_results (run_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS dep_images (
        lockfile_hash       TEXT PRIMARY KEY,
        image_ref           TEXT NOT NULL,
        base_image_ref      TEXT NOT NULL,
        status              TEXT NOT NULL,
        builder_machine_id  TEXT,
        error_text          TEXT,
        updated_at          TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
];

pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
