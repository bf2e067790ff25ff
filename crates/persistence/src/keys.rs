//! API key lookup
//!
//! The auth filter hashes the presented bearer token and resolves it to the
//! owning (tenant, key) pair. Key provisioning itself is out of scope; rows
//! are written by the dashboard's control plane.

use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::PersistenceError;

#[derive(Clone)]
pub struct ApiKeyStore {
    pool: PgPool,
}

impl ApiKeyStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Resolve a token hash to (tenant_id, key_id).
    pub async fn lookup(
        &self,
        token_hash: &str,
    ) -> Result<Option<(Uuid, Uuid)>, PersistenceError> {
        let row = sqlx::query("SELECT tenant_id, key_id FROM api_keys WHERE token_hash = $1")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| -> Result<(Uuid, Uuid), PersistenceError> {
            Ok((row.try_get("tenant_id")?, row.try_get("key_id")?))
        })
        .transpose()
    }

    /// Insert a key row (used by tests and local bootstrap).
    pub async fn insert(
        &self,
        key_id: Uuid,
        tenant_id: Uuid,
        token_hash: &str,
        label: Option<&str>,
    ) -> Result<(), PersistenceError> {
        sqlx::query(
            "INSERT INTO api_keys (key_id, tenant_id, token_hash, label)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (token_hash) DO NOTHING",
        )
        .bind(key_id)
        .bind(tenant_id)
        .bind(token_hash)
        .bind(label)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
