//! HTTP router
//!
//! The RPC surface and the dashboard REST endpoints sit behind the bearer
//! auth filter; health, readiness, metrics, and the internal callbacks
//! (which authenticate with the shared secret instead) stay outside it.

use axum::extract::{Path, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::auth::{auth_middleware, AuthContext};
use crate::state::AppState;
use crate::{callback, metrics, push, rpc};

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let cors_layer = build_cors_layer(
        &state.settings.server.cors_origins,
        state.settings.server.cors_enabled,
    );

    let protected = Router::new()
        // Tool-call protocol + push stream
        .route("/rpc", post(rpc::handle_rpc))
        .route("/rpc", delete(rpc::handle_rpc_delete))
        .route("/rpc/stream", get(push::handle_stream))
        // Dashboard REST
        .route("/api/runs", get(list_runs))
        .route("/api/runs/:id", get(get_run))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let open = Router::new()
        // Worker and builder callbacks (shared-secret auth inside)
        .route("/internal/runner-callback", post(callback::runner_callback))
        .route(
            "/internal/builder-callback",
            post(callback::builder_callback),
        )
        // Health and observability
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics::metrics_handler));

    protected
        .merge(open)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
}

fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS is disabled - allowing all origins (NOT FOR PRODUCTION)");
        return CorsLayer::permissive();
    }

    let parsed_origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!("Invalid CORS origin: {}", origin);
                None
            })
        })
        .collect();

    if parsed_origins.is_empty() {
        tracing::info!("No CORS origins configured, defaulting to localhost:3000");
        return CorsLayer::new()
            .allow_origin("http://localhost:3000".parse::<HeaderValue>().unwrap())
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers(Any);
    }

    CorsLayer::new()
        .allow_origin(parsed_origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .allow_credentials(true)
}

/// Dashboard: recent runs for the tenant.
async fn list_runs(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let runs = state
        .store
        .runs()
        .list_for_tenant(auth.tenant_id, 50)
        .await
        .map_err(|e| {
            tracing::error!("run list failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(serde_json::json!({
        "runs": runs,
        "count": runs.len(),
    })))
}

/// Dashboard: one run with its results.
async fn get_run(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let run = state
        .store
        .runs()
        .get(id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .filter(|run| run.tenant_id == auth.tenant_id)
        .ok_or(StatusCode::NOT_FOUND)?;

    let (audio_results, conversation_results) = state
        .store
        .results()
        .list_for_run(run.id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(serde_json::json!({
        "run": run,
        "audio_results": audio_results,
        "conversation_results": conversation_results,
    })))
}

async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let mut checks = serde_json::Map::new();
    let mut all_healthy = true;

    let db_ok = sqlx_ping(&state).await;
    checks.insert(
        "database".to_string(),
        serde_json::json!({ "status": if db_ok { "ok" } else { "unreachable" } }),
    );
    if !db_ok {
        all_healthy = false;
    }

    checks.insert(
        "sessions".to_string(),
        serde_json::json!({ "status": "ok", "count": state.sessions.session_count() }),
    );
    checks.insert(
        "queues".to_string(),
        serde_json::json!({ "status": "ok", "active": state.queues.active_queue_count() }),
    );

    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status_code,
        Json(serde_json::json!({
            "status": if all_healthy { "healthy" } else { "degraded" },
            "version": env!("CARGO_PKG_VERSION"),
            "checks": checks,
        })),
    )
}

/// Readiness probes the judge-LLM endpoint as well; runs cannot make
/// progress without it.
async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let mut checks = serde_json::Map::new();
    let mut ready = sqlx_ping(&state).await;
    checks.insert(
        "database".to_string(),
        serde_json::json!({ "status": if ready { "ok" } else { "unreachable" } }),
    );

    let llm_url = &state.settings.providers.llm_endpoint;
    let llm_status = match tokio::time::timeout(
        std::time::Duration::from_secs(2),
        reqwest::get(llm_url.clone()),
    )
    .await
    {
        Ok(Ok(_)) => "ok",
        Ok(Err(_)) => {
            ready = false;
            "unreachable"
        }
        Err(_) => {
            ready = false;
            "timeout"
        }
    };
    checks.insert(
        "llm_endpoint".to_string(),
        serde_json::json!({ "status": llm_status, "url": llm_url }),
    );

    let status_code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status_code,
        Json(serde_json::json!({
            "status": if ready { "ready" } else { "not_ready" },
            "checks": checks,
        })),
    )
}

async fn sqlx_ping(state: &AppState) -> bool {
    sqlx::query("SELECT 1")
        .execute(state.store.pool())
        .await
        .is_ok()
}
