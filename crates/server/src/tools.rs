//! Tool handlers
//!
//! The handlers behind the dispatch table in `rpc.rs`. Validation errors,
//! missing platform config, and auth problems surface as typed
//! `ServerError`s that the RPC layer maps to distinct codes; none of them
//! are retried.

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use voiceci_core::{
    AdapterConfig, AudioTestName, ConversationScenario, Run, RunSource, RunStatus, TestSpec,
    ThresholdOverrides,
};
use voiceci_scheduler::Job;

use crate::auth::AuthContext;
use crate::state::AppState;
use crate::{docs, loadtest, upload, ServerError};

pub async fn call_tool(
    state: &AppState,
    auth: AuthContext,
    session_id: Uuid,
    name: &str,
    args: Value,
    progress_token: Option<Value>,
) -> Result<Value, ServerError> {
    match name {
        "configure_adapter" => configure_adapter(state, session_id, args),
        "prepare_upload" => prepare_upload(state, auth, args).await,
        "run_suite" => run_suite(state, auth, session_id, args, progress_token).await,
        "load_test" => load_test(state, auth, session_id, args),
        "get_status" => get_status(state, auth, args).await,
        "get_testing_guide" => Ok(json!({ "guide": docs::TESTING_GUIDE })),
        "get_adapter_guide" => Ok(json!({ "guide": docs::ADAPTER_GUIDE })),
        other => Err(ServerError::Validation(format!("unknown tool {}", other))),
    }
}

fn configure_adapter(
    state: &AppState,
    session_id: Uuid,
    args: Value,
) -> Result<Value, ServerError> {
    let config: AdapterConfig = serde_json::from_value(args)
        .map_err(|e| ServerError::Validation(format!("invalid adapter config: {}", e)))?;

    let adapter_config_id = state
        .sessions
        .store_adapter(session_id, config)
        .ok_or_else(|| ServerError::Session("session vanished".into()))?;

    Ok(json!({ "adapter_config_id": adapter_config_id }))
}

#[derive(Deserialize)]
struct PrepareUploadArgs {
    #[serde(default)]
    project_root: Option<String>,
}

async fn prepare_upload(
    state: &AppState,
    auth: AuthContext,
    args: Value,
) -> Result<Value, ServerError> {
    let args: PrepareUploadArgs = serde_json::from_value(args)
        .map_err(|e| ServerError::Validation(e.to_string()))?;

    let bundle_key = format!("bundles/{}/{}.tar.gz", auth.tenant_id, Uuid::new_v4());
    let upload_url = upload::presign_put(&state.settings, &bundle_key).await?;
    let upload_command =
        upload::upload_command(args.project_root.as_deref().unwrap_or("."), &upload_url);

    Ok(json!({
        "bundle_key": bundle_key,
        "upload_url": upload_url,
        "upload_command": upload_command,
    }))
}

#[derive(Deserialize)]
struct RunSuiteArgs {
    #[serde(default)]
    adapter_config_id: Option<Uuid>,
    #[serde(default)]
    agent_url: Option<String>,
    #[serde(default)]
    audio_tests: Vec<AudioTestName>,
    #[serde(default)]
    conversation_tests: Vec<ConversationScenario>,
    #[serde(default)]
    thresholds: Option<ThresholdOverrides>,
    #[serde(default)]
    idempotency_key: Option<Uuid>,
    #[serde(default)]
    bundle_key: Option<String>,
    #[serde(default)]
    bundle_hash: Option<String>,
    #[serde(default)]
    lockfile_hash: Option<String>,
}

async fn run_suite(
    state: &AppState,
    auth: AuthContext,
    session_id: Uuid,
    args: Value,
    progress_token: Option<Value>,
) -> Result<Value, ServerError> {
    let args: RunSuiteArgs =
        serde_json::from_value(args).map_err(|e| ServerError::Validation(e.to_string()))?;

    let spec = TestSpec {
        audio_tests: args.audio_tests,
        conversation_tests: args.conversation_tests,
        thresholds: args.thresholds,
    };
    spec.validate()?;

    // Resolve how we reach the agent: a stored adapter config, a bare
    // agent_url, or an uploaded bundle. Exactly one.
    let adapter = match (args.adapter_config_id, &args.agent_url) {
        (Some(adapter_config_id), _) => Some(
            state
                .sessions
                .get_adapter(session_id, adapter_config_id)
                .ok_or_else(|| {
                    ServerError::Validation(format!(
                        "unknown adapter_config_id {}",
                        adapter_config_id
                    ))
                })?,
        ),
        (None, Some(agent_url)) => Some(AdapterConfig::WsVoice {
            agent_url: agent_url.clone(),
        }),
        (None, None) => None,
    };

    let source = match (&args.bundle_key, &args.bundle_hash) {
        (Some(bundle_key), Some(bundle_hash)) => {
            if adapter.is_some() {
                return Err(ServerError::Validation(
                    "a run targets either a bundle or a reachable agent, not both".into(),
                ));
            }
            RunSource::Bundle {
                bundle_key: bundle_key.clone(),
                bundle_hash: bundle_hash.clone(),
                lockfile_hash: args.lockfile_hash.clone(),
            }
        }
        (Some(_), None) | (None, Some(_)) => {
            return Err(ServerError::Validation(
                "bundle_key and bundle_hash are required together".into(),
            ));
        }
        (None, None) => {
            if adapter.is_none() {
                return Err(ServerError::Validation(
                    "run_suite needs an adapter_config_id, an agent_url, or a bundle".into(),
                ));
            }
            RunSource::Remote
        }
    };

    if let Some(adapter) = &adapter {
        check_adapter_preconditions(state, adapter)?;
    }

    let run = Run {
        id: Uuid::new_v4(),
        tenant_id: auth.tenant_id,
        key_id: auth.key_id,
        idempotency_key: args.idempotency_key,
        source,
        status: RunStatus::Queued,
        spec: spec.clone(),
        aggregate: None,
        error_text: None,
        created_at: Utc::now(),
        started_at: None,
        finished_at: None,
        duration_ms: None,
    };

    let persisted = state.store.runs().create_or_get(&run).await?;
    if persisted.id != run.id {
        // Idempotency collision: hand back the prior run untouched.
        tracing::info!(run_id = %persisted.id, "idempotency key matched existing run");
        return Ok(json!({ "run_id": persisted.id }));
    }

    let bundle_url = match &persisted.source {
        RunSource::Bundle { bundle_key, .. } => {
            Some(upload::download_url(&state.settings, bundle_key))
        }
        RunSource::Remote => None,
    };

    // Bind before enqueue so the earliest streamed results find the session.
    state.sessions.bind_run(persisted.id, session_id, progress_token);

    state
        .queues
        .enqueue(Job {
            run_id: persisted.id,
            tenant_id: auth.tenant_id,
            key_id: auth.key_id,
            spec,
            adapter,
            bundle_url,
            lockfile_hash: args.lockfile_hash,
        })
        .await?;

    metrics::counter!("voiceci_runs_created_total").increment(1);

    Ok(json!({ "run_id": persisted.id }))
}

/// Transport and platform preconditions, checked before a run is accepted
/// so misconfiguration surfaces as config_missing instead of a failed run.
pub(crate) fn check_adapter_preconditions(
    state: &AppState,
    adapter: &AdapterConfig,
) -> Result<(), ServerError> {
    let settings = &state.settings;

    let require_env = |var: &str| -> Result<(), ServerError> {
        if std::env::var(var).is_err() {
            return Err(ServerError::ConfigMissing(format!(
                "{} is not set on the server",
                var
            )));
        }
        Ok(())
    };

    let require_telephony = || -> Result<(), ServerError> {
        if !settings.telephony.configured() {
            return Err(ServerError::ConfigMissing(
                "telephony.api_endpoint and telephony.from_number must be configured".into(),
            ));
        }
        require_env(&settings.telephony.api_key_var)
    };

    match adapter.tag() {
        "ws-voice" => Ok(()),
        "sip" => require_telephony(),
        "webrtc" => {
            if !settings.livekit.configured() {
                return Err(ServerError::ConfigMissing("livekit.url is not set".into()));
            }
            require_env(&settings.livekit.api_key_var)?;
            require_env(&settings.livekit.api_secret_var)
        }
        "vapi" => require_env(&settings.platforms.vapi_api_key_var),
        "elevenlabs" => require_env(&settings.platforms.elevenlabs_api_key_var),
        "retell" => {
            require_telephony()?;
            require_env(&settings.platforms.retell_api_key_var)
        }
        "bland" => {
            require_telephony()?;
            require_env(&settings.platforms.bland_api_key_var)
        }
        other => Err(ServerError::Validation(format!("unknown adapter {}", other))),
    }
}

fn load_test(
    state: &AppState,
    auth: AuthContext,
    session_id: Uuid,
    args: Value,
) -> Result<Value, ServerError> {
    let args: loadtest::LoadTestArgs =
        serde_json::from_value(args).map_err(|e| ServerError::Validation(e.to_string()))?;

    // Load campaigns run in-process and are not queued; the tool returns
    // as soon as the campaign is spawned.
    let campaign_id = loadtest::start(state.clone(), auth, session_id, args)?;
    Ok(json!({ "campaign_id": campaign_id, "started": true }))
}

#[derive(Deserialize)]
struct GetStatusArgs {
    run_id: Uuid,
}

async fn get_status(
    state: &AppState,
    auth: AuthContext,
    args: Value,
) -> Result<Value, ServerError> {
    let args: GetStatusArgs =
        serde_json::from_value(args).map_err(|e| ServerError::Validation(e.to_string()))?;

    let run = state
        .store
        .runs()
        .get(args.run_id)
        .await?
        .filter(|run| run.tenant_id == auth.tenant_id)
        .ok_or_else(|| ServerError::Validation(format!("unknown run_id {}", args.run_id)))?;

    if !run.status.is_terminal() {
        return Ok(json!({ "status": run.status }));
    }

    let (audio_results, conversation_results) =
        state.store.results().list_for_run(run.id).await?;

    Ok(json!({
        "status": run.status,
        "aggregate": run.aggregate,
        "audio_results": audio_results,
        "conversation_results": conversation_results,
        "error_text": run.error_text,
        "timings": {
            "created_at": run.created_at,
            "started_at": run.started_at,
            "finished_at": run.finished_at,
            "duration_ms": run.duration_ms,
        }
    }))
}
