//! Persistence layer
//!
//! Postgres-backed stores for runs, per-test results, API keys, and the
//! dependency-image cache. Schema is ensured at startup; queries are plain
//! sqlx with explicit row mapping.

pub mod images;
pub mod keys;
pub mod results;
pub mod runs;
pub mod schema;

pub use images::{DepImageStore, DependencyImage, ImageStatus};
pub use keys::ApiKeyStore;
pub use results::ScenarioResultStore;
pub use runs::RunStore;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;

use voiceci_config::PersistenceConfig;

/// Persistence errors
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

impl From<PersistenceError> for voiceci_core::Error {
    fn from(err: PersistenceError) -> Self {
        voiceci_core::Error::Upstream(err.to_string())
    }
}

/// Shared pool with typed store handles.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Connect and ensure the schema exists.
    pub async fn connect(config: &PersistenceConfig) -> Result<Self, PersistenceError> {
        tracing::info!("connecting to database");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub async fn ensure_schema(&self) -> Result<(), PersistenceError> {
        schema::ensure_schema(&self.pool).await?;
        tracing::info!("schema ensured");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn runs(&self) -> RunStore {
        RunStore::new(self.pool.clone())
    }

    pub fn results(&self) -> ScenarioResultStore {
        ScenarioResultStore::new(self.pool.clone())
    }

    pub fn images(&self) -> DepImageStore {
        DepImageStore::new(self.pool.clone())
    }

    pub fn api_keys(&self) -> ApiKeyStore {
        ApiKeyStore::new(self.pool.clone())
    }
}
