//! Server-push stream
//!
//! `GET /rpc/stream` opens the session's SSE channel. Events are JSON-RPC
//! notifications; order is the emitter's order. When the stream is gone,
//! emission elsewhere degrades to a no-op and results stay reachable via
//! get_status.

use std::convert::Infallible;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use futures::stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::rpc::SESSION_HEADER;
use crate::sessions::PushEvent;
use crate::state::AppState;

pub async fn handle_stream(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
) -> Response {
    let session_id = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok());

    let Some(session_id) = session_id else {
        return (
            axum::http::StatusCode::BAD_REQUEST,
            "missing session header",
        )
            .into_response();
    };

    if state.sessions.owner(session_id) != Some((auth.tenant_id, auth.key_id)) {
        return (axum::http::StatusCode::NOT_FOUND, "unknown session").into_response();
    }

    let Some(receiver) = state.sessions.attach_push(session_id) else {
        return (axum::http::StatusCode::NOT_FOUND, "unknown session").into_response();
    };

    tracing::info!(%session_id, "push stream attached");
    Sse::new(event_stream(receiver))
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn event_stream(
    receiver: tokio::sync::mpsc::Receiver<PushEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    ReceiverStream::new(receiver).map(|event| {
        let notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": event.method(),
            "params": event,
        });
        Ok(Event::default()
            .event("message")
            .data(notification.to_string()))
    })
}
