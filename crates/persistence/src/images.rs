//! Dependency-image cache rows
//!
//! The cache is shared across the worker fleet; the conditional insert on
//! `lockfile_hash` is what guarantees at most one builder per hash.

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::PersistenceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStatus {
    Building,
    Ready,
    Failed,
}

impl ImageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageStatus::Building => "building",
            ImageStatus::Ready => "ready",
            ImageStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "building" => Some(ImageStatus::Building),
            "ready" => Some(ImageStatus::Ready),
            "failed" => Some(ImageStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DependencyImage {
    pub lockfile_hash: String,
    pub image_ref: String,
    pub base_image_ref: String,
    pub status: ImageStatus,
    pub builder_machine_id: Option<String>,
    pub error_text: Option<String>,
}

#[derive(Clone)]
pub struct DepImageStore {
    pool: PgPool,
}

impl DepImageStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(
        &self,
        lockfile_hash: &str,
    ) -> Result<Option<DependencyImage>, PersistenceError> {
        let row = sqlx::query("SELECT * FROM dep_images WHERE lockfile_hash = $1")
            .bind(lockfile_hash)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_image).transpose()
    }

    /// Conditional insert: returns true iff this caller created the row and
    /// therefore owns the build. Losers fall back to polling.
    pub async fn try_claim_build(
        &self,
        lockfile_hash: &str,
        image_ref: &str,
        base_image_ref: &str,
    ) -> Result<bool, PersistenceError> {
        let inserted = sqlx::query(
            "INSERT INTO dep_images (lockfile_hash, image_ref, base_image_ref, status)
             VALUES ($1, $2, $3, 'building')
             ON CONFLICT (lockfile_hash) DO NOTHING",
        )
        .bind(lockfile_hash)
        .bind(image_ref)
        .bind(base_image_ref)
        .execute(&self.pool)
        .await?;
        Ok(inserted.rows_affected() == 1)
    }

    pub async fn set_builder_machine(
        &self,
        lockfile_hash: &str,
        machine_id: &str,
    ) -> Result<(), PersistenceError> {
        sqlx::query(
            "UPDATE dep_images SET builder_machine_id = $2, updated_at = now()
             WHERE lockfile_hash = $1",
        )
        .bind(lockfile_hash)
        .bind(machine_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_ready(
        &self,
        lockfile_hash: &str,
        image_ref: &str,
    ) -> Result<(), PersistenceError> {
        sqlx::query(
            "UPDATE dep_images SET status = 'ready', image_ref = $2, error_text = NULL,
                    updated_at = now()
             WHERE lockfile_hash = $1",
        )
        .bind(lockfile_hash)
        .bind(image_ref)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_failed(
        &self,
        lockfile_hash: &str,
        error_text: &str,
    ) -> Result<(), PersistenceError> {
        sqlx::query(
            "UPDATE dep_images SET status = 'failed', error_text = $2, updated_at = now()
             WHERE lockfile_hash = $1",
        )
        .bind(lockfile_hash)
        .bind(error_text)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Drop a stale record (base image changed under it).
    pub async fn delete(&self, lockfile_hash: &str) -> Result<(), PersistenceError> {
        sqlx::query("DELETE FROM dep_images WHERE lockfile_hash = $1")
            .bind(lockfile_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn row_to_image(row: PgRow) -> Result<DependencyImage, PersistenceError> {
    let status_text: String = row.try_get("status")?;
    let status = ImageStatus::parse(&status_text)
        .ok_or_else(|| PersistenceError::CorruptRow(format!("unknown status {}", status_text)))?;
    Ok(DependencyImage {
        lockfile_hash: row.try_get("lockfile_hash")?,
        image_ref: row.try_get("image_ref")?,
        base_image_ref: row.try_get("base_image_ref")?,
        status,
        builder_machine_id: row.try_get("builder_machine_id")?,
        error_text: row.try_get("error_text")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for status in [ImageStatus::Building, ImageStatus::Ready, ImageStatus::Failed] {
            assert_eq!(ImageStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ImageStatus::parse("queued"), None);
    }
}
