//! Callback sink
//!
//! Remote runners POST their results here; image builders report build
//! completion the same way. The in-process execution path delivers through
//! the identical code via `LocalSink`, so both paths persist and push the
//! same way. Duplicate and unknown run callbacks are treated as success.

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use voiceci_core::{ExecuteTestsResult, TestResult};
use voiceci_scheduler::ResultSink;

use crate::auth::secrets_match;
use crate::sessions::PushEvent;
use crate::state::AppState;

pub const CALLBACK_SECRET_HEADER: &str = "x-runner-secret";

fn check_secret(state: &AppState, headers: &HeaderMap) -> bool {
    let presented = headers
        .get(CALLBACK_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    secrets_match(presented, &state.settings.server.callback_secret)
}

/// POST /internal/runner-callback
pub async fn runner_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(result): Json<ExecuteTestsResult>,
) -> Response {
    if !check_secret(&state, &headers) {
        return (StatusCode::UNAUTHORIZED, "bad callback secret").into_response();
    }

    let run_id = result.run_id;
    match process_run_completed(&state, result).await {
        Ok(applied) => {
            tracing::info!(%run_id, applied, "runner callback processed");
            Json(serde_json::json!({ "ok": true, "applied": applied })).into_response()
        }
        Err(e) => {
            tracing::error!(%run_id, "runner callback failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Persist sub-results, finish the run row, and push to the owning session.
/// Returns false (still success) when the run was already terminal or
/// unknown; sub-result inserts may accumulate, clients join by run_id.
pub async fn process_run_completed(
    state: &AppState,
    result: ExecuteTestsResult,
) -> Result<bool, crate::ServerError> {
    let run_id = result.run_id;

    if state.store.runs().get(run_id).await?.is_none() {
        tracing::warn!(%run_id, "callback for unknown run; acknowledged");
        return Ok(false);
    }

    state.store.results().insert_all(&result).await?;

    let aggregate = result.aggregate();
    let applied = state
        .store
        .runs()
        .finish(
            run_id,
            result.status,
            &aggregate,
            result.error_text.as_deref(),
            result.total_duration_ms,
        )
        .await?;

    state
        .sessions
        .emit_to_run(
            run_id,
            PushEvent::RunCompleted {
                run_id,
                status: result.status,
                aggregate,
            },
        )
        .await;

    metrics::counter!("voiceci_runs_completed_total").increment(1);
    Ok(applied)
}

#[derive(Deserialize)]
pub struct BuilderCallback {
    pub lockfile_hash: String,
    pub image_ref: String,
    pub status: String,
    #[serde(default)]
    pub error_text: Option<String>,
}

/// POST /internal/builder-callback: the builder VM proving its image is
/// pushed (or reporting why not).
pub async fn builder_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(callback): Json<BuilderCallback>,
) -> Response {
    if !check_secret(&state, &headers) {
        return (StatusCode::UNAUTHORIZED, "bad callback secret").into_response();
    }

    let images = state.store.images();
    let outcome = match callback.status.as_str() {
        "ready" => images
            .mark_ready(&callback.lockfile_hash, &callback.image_ref)
            .await,
        "failed" => {
            images
                .mark_failed(
                    &callback.lockfile_hash,
                    callback.error_text.as_deref().unwrap_or("builder failed"),
                )
                .await
        }
        other => {
            return (
                StatusCode::BAD_REQUEST,
                format!("unknown builder status {}", other),
            )
                .into_response()
        }
    };

    match outcome {
        Ok(()) => {
            tracing::info!(
                hash = %callback.lockfile_hash,
                status = %callback.status,
                "builder callback processed"
            );
            Json(serde_json::json!({ "ok": true })).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// In-process delivery path: the worker hands results to the same
/// machinery the HTTP callback uses, plus per-test streaming.
pub struct LocalSink {
    state: AppState,
}

impl LocalSink {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ResultSink for LocalSink {
    async fn test_completed(&self, run_id: Uuid, result: TestResult) {
        let message = format!("{} finished", result.name());
        self.state
            .sessions
            .emit_to_run(run_id, PushEvent::TestCompleted { run_id, result })
            .await;
        self.state.sessions.emit_test_progress(run_id, message).await;
    }

    async fn run_completed(&self, result: ExecuteTestsResult) {
        let run_id = result.run_id;
        if let Err(e) = process_run_completed(&self.state, result).await {
            tracing::error!(%run_id, "local result delivery failed: {}", e);
        }
    }
}
