//! Per-test result rows
//!
//! Sub-results accumulate per run; clients join by run_id, so duplicate
//! callback inserts are tolerated rather than deduplicated.

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use voiceci_core::{AudioTestResult, ConversationTestResult, ExecuteTestsResult, TestResult};

use crate::PersistenceError;

#[derive(Clone)]
pub struct ScenarioResultStore {
    pool: PgPool,
}

impl ScenarioResultStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert_one(
        &self,
        run_id: Uuid,
        result: &TestResult,
    ) -> Result<(), PersistenceError> {
        let (name, status, test_type, metrics, trace) = match result {
            TestResult::Audio(r) => (
                r.name.clone(),
                r.status,
                "audio",
                serde_json::to_value(&r.metrics)?,
                serde_json::to_value(r)?,
            ),
            TestResult::Conversation(r) => (
                r.caller_prompt.clone(),
                r.status,
                "conversation",
                serde_json::to_value(&r.metrics)?,
                serde_json::to_value(r)?,
            ),
        };

        sqlx::query(
            "INSERT INTO scenario_results (id, run_id, name, status, test_type, metrics, trace)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(Uuid::new_v4())
        .bind(run_id)
        .bind(name)
        .bind(match status {
            voiceci_core::TestStatus::Pass => "pass",
            voiceci_core::TestStatus::Fail => "fail",
        })
        .bind(test_type)
        .bind(metrics)
        .bind(trace)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persist every sub-result of a finished run.
    pub async fn insert_all(
        &self,
        result: &ExecuteTestsResult,
    ) -> Result<(), PersistenceError> {
        for audio in &result.audio_results {
            self.insert_one(result.run_id, &TestResult::Audio(audio.clone()))
                .await?;
        }
        for conversation in &result.conversation_results {
            self.insert_one(
                result.run_id,
                &TestResult::Conversation(conversation.clone()),
            )
            .await?;
        }
        Ok(())
    }

    /// Reload typed results for `get_status`. Duplicates from repeated
    /// callbacks are collapsed by (test_type, name), last write wins.
    pub async fn list_for_run(
        &self,
        run_id: Uuid,
    ) -> Result<(Vec<AudioTestResult>, Vec<ConversationTestResult>), PersistenceError> {
        let rows = sqlx::query(
            "SELECT DISTINCT ON (test_type, name) test_type, trace
             FROM scenario_results WHERE run_id = $1
             ORDER BY test_type, name, created_at DESC",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        let mut audio = Vec::new();
        let mut conversations = Vec::new();
        for row in rows {
            let (test_type, trace) = row_parts(row)?;
            match test_type.as_str() {
                "audio" => audio.push(serde_json::from_value(trace)?),
                "conversation" => conversations.push(serde_json::from_value(trace)?),
                other => {
                    return Err(PersistenceError::CorruptRow(format!(
                        "unknown test_type {}",
                        other
                    )))
                }
            }
        }
        Ok((audio, conversations))
    }
}

fn row_parts(row: PgRow) -> Result<(String, serde_json::Value), PersistenceError> {
    Ok((row.try_get("test_type")?, row.try_get("trace")?))
}
