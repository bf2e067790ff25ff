//! Session-aware tool-call protocol
//!
//! JSON over HTTP: `POST /rpc` carries JSON-RPC requests, `GET /rpc/stream`
//! is the per-session server-push channel, `DELETE /rpc` closes a session.
//! Tools are a plain dispatch table; each entry pairs a JSON schema with
//! its handler and arguments are validated before the handler runs.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::state::AppState;
use crate::tools;

pub const SESSION_HEADER: &str = "Mcp-Session-Id";
const PROTOCOL_VERSION: &str = "2025-03-26";

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    #[allow(dead_code)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// One entry of the tool dispatch table: the schema is validated before the
/// handler sees the arguments.
pub struct ToolDef {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

pub fn tool_table() -> Vec<ToolDef> {
    vec![
        ToolDef {
            name: "configure_adapter",
            description: "Store the transport configuration for reaching a voice agent; \
                          returns an adapter_config_id scoped to this session.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "adapter": { "type": "string",
                        "enum": ["ws-voice", "sip", "webrtc", "vapi", "retell", "elevenlabs", "bland"] },
                    "agent_url": { "type": "string" },
                    "target_number": { "type": "string" },
                    "inbound": { "type": "boolean" },
                    "room": { "type": "string" },
                    "identity": { "type": "string" },
                    "assistant_id": { "type": "string" },
                    "agent_id": { "type": "string" },
                    "agent_number": { "type": "string" }
                },
                "required": ["adapter"]
            }),
        },
        ToolDef {
            name: "prepare_upload",
            description: "Mint a presigned bundle upload and the shell command that \
                          tars, hashes, and uploads the project.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "project_root": { "type": "string" }
                }
            }),
        },
        ToolDef {
            name: "run_suite",
            description: "Create a run from a test spec and enqueue it for execution.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "adapter_config_id": { "type": "string" },
                    "agent_url": { "type": "string" },
                    "audio_tests": { "type": "array", "items": { "type": "string" } },
                    "conversation_tests": { "type": "array", "items": { "type": "object" } },
                    "thresholds": { "type": "object" },
                    "idempotency_key": { "type": "string" },
                    "bundle_key": { "type": "string" },
                    "bundle_hash": { "type": "string" },
                    "lockfile_hash": { "type": "string" }
                }
            }),
        },
        ToolDef {
            name: "load_test",
            description: "Start an in-process load campaign against an agent and \
                          return immediately; progress streams to this session.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "adapter_config_id": { "type": "string" },
                    "agent_url": { "type": "string" },
                    "caller_prompt": { "type": "string" },
                    "concurrency": { "type": "integer", "minimum": 1, "maximum": 50 },
                    "waves": { "type": "integer", "minimum": 1, "maximum": 20 }
                },
                "required": ["caller_prompt"]
            }),
        },
        ToolDef {
            name: "get_status",
            description: "Status for a run; full results once the run is terminal.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "run_id": { "type": "string" }
                },
                "required": ["run_id"]
            }),
        },
        ToolDef {
            name: "get_testing_guide",
            description: "How to structure audio tests and conversation scenarios.",
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        ToolDef {
            name: "get_adapter_guide",
            description: "How to configure each transport adapter.",
            input_schema: json!({ "type": "object", "properties": {} }),
        },
    ]
}

/// POST /rpc
pub async fn handle_rpc(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
    Json(request): Json<RpcRequest>,
) -> Response {
    let session_id = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok());

    match request.method.as_str() {
        "initialize" => {
            let session_id = state.sessions.create(auth.tenant_id, auth.key_id);
            let body = rpc_result(
                request.id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "serverInfo": { "name": "voiceci", "version": env!("CARGO_PKG_VERSION") },
                    "capabilities": { "tools": { "listChanged": false } }
                }),
            );
            ([(SESSION_HEADER, session_id.to_string())], Json(body)).into_response()
        }

        // Everything else requires a live session.
        method => {
            let Some(session_id) = session_id.filter(|id| state.sessions.exists(*id)) else {
                return Json(rpc_error(
                    request.id,
                    -32000,
                    "no session; call initialize first",
                ))
                .into_response();
            };

            // The session must belong to the authenticated identity.
            if state.sessions.owner(session_id) != Some((auth.tenant_id, auth.key_id)) {
                return Json(rpc_error(request.id, -32001, "session belongs to another key"))
                    .into_response();
            }

            match method {
                "notifications/initialized" => {
                    state.sessions.mark_open(session_id);
                    StatusCode::ACCEPTED.into_response()
                }
                "ping" => Json(rpc_result(request.id, json!({}))).into_response(),
                "tools/list" => {
                    let tools: Vec<Value> = tool_table()
                        .into_iter()
                        .map(|tool| {
                            json!({
                                "name": tool.name,
                                "description": tool.description,
                                "inputSchema": tool.input_schema,
                            })
                        })
                        .collect();
                    Json(rpc_result(request.id, json!({ "tools": tools }))).into_response()
                }
                "tools/call" => {
                    handle_tool_call(state, auth, session_id, request).await
                }
                _ => Json(rpc_error(
                    request.id,
                    -32601,
                    &format!("unknown method {}", method),
                ))
                .into_response(),
            }
        }
    }
}

/// DELETE /rpc closes the session explicitly.
pub async fn handle_rpc_delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
) -> Response {
    let session_id = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok());

    if let Some(session_id) = session_id {
        if state.sessions.owner(session_id) == Some((auth.tenant_id, auth.key_id)) {
            state.sessions.close(session_id);
            return StatusCode::NO_CONTENT.into_response();
        }
    }
    StatusCode::NOT_FOUND.into_response()
}

#[derive(Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
    #[serde(default, rename = "_meta")]
    meta: Option<ToolCallMeta>,
}

#[derive(Deserialize)]
struct ToolCallMeta {
    #[serde(rename = "progressToken")]
    progress_token: Option<Value>,
}

async fn handle_tool_call(
    state: AppState,
    auth: AuthContext,
    session_id: Uuid,
    request: RpcRequest,
) -> Response {
    let params: ToolCallParams = match serde_json::from_value(request.params) {
        Ok(params) => params,
        Err(e) => {
            return Json(rpc_error(
                request.id,
                -32602,
                &format!("invalid tools/call params: {}", e),
            ))
            .into_response()
        }
    };

    // Schema validation from the dispatch table entry.
    let Some(tool) = tool_table().into_iter().find(|t| t.name == params.name) else {
        return Json(rpc_error(
            request.id,
            -32602,
            &format!("unknown tool {}", params.name),
        ))
        .into_response();
    };

    let arguments = if params.arguments.is_null() {
        json!({})
    } else {
        params.arguments
    };

    if let Err(message) = validate_arguments(&tool.input_schema, &arguments) {
        return Json(rpc_error(request.id, -32602, &message)).into_response();
    }

    let progress_token = params.meta.and_then(|m| m.progress_token);
    match tools::call_tool(&state, auth, session_id, &params.name, arguments, progress_token).await
    {
        Ok(output) => {
            let text = output.to_string();
            Json(rpc_result(
                request.id,
                json!({
                    "content": [{ "type": "text", "text": text }],
                    "isError": false
                }),
            ))
            .into_response()
        }
        Err(e) => {
            tracing::warn!(tool = %params.name, "tool call failed: {}", e);
            Json(rpc_error(request.id, e.rpc_code(), &e.to_string())).into_response()
        }
    }
}

fn validate_arguments(schema: &Value, arguments: &Value) -> Result<(), String> {
    let compiled = jsonschema::JSONSchema::compile(schema)
        .map_err(|e| format!("tool schema failed to compile: {}", e))?;
    if let Err(errors) = compiled.validate(arguments) {
        let details: Vec<String> = errors.map(|e| e.to_string()).collect();
        return Err(format!("invalid arguments: {}", details.join("; ")));
    }
    Ok(())
}

pub fn rpc_result(id: Option<Value>, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

pub fn rpc_error(id: Option<Value>, code: i64, message: &str) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_covers_the_contracted_tools() {
        let names: Vec<&str> = tool_table().iter().map(|t| t.name).collect();
        for expected in [
            "configure_adapter",
            "prepare_upload",
            "run_suite",
            "load_test",
            "get_status",
        ] {
            assert!(names.contains(&expected), "missing {}", expected);
        }
    }

    #[test]
    fn schema_validation_rejects_bad_arguments() {
        let table = tool_table();
        let get_status = table.iter().find(|t| t.name == "get_status").unwrap();

        assert!(validate_arguments(&get_status.input_schema, &json!({})).is_err());
        assert!(validate_arguments(
            &get_status.input_schema,
            &json!({ "run_id": "00000000-0000-0000-0000-000000000001" })
        )
        .is_ok());

        let configure = table.iter().find(|t| t.name == "configure_adapter").unwrap();
        assert!(
            validate_arguments(&configure.input_schema, &json!({ "adapter": "carrier-pigeon" }))
                .is_err()
        );
    }
}
