//! Load campaigns
//!
//! A load test runs waves of concurrent conversation scenarios in-process,
//! without touching the run queue, and streams per-wave stats to the
//! session as progress events. The tool returns as soon as the campaign is
//! spawned.

use std::time::Instant;

use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use voiceci_core::{AdapterConfig, ConversationScenario, TestSpec};
use voiceci_executor::ExecuteTestsRequest;

use crate::auth::AuthContext;
use crate::state::AppState;
use crate::tools::check_adapter_preconditions;
use crate::ServerError;

fn default_concurrency() -> usize {
    5
}

fn default_waves() -> usize {
    3
}

#[derive(Debug, Deserialize)]
pub struct LoadTestArgs {
    #[serde(default)]
    pub adapter_config_id: Option<Uuid>,
    #[serde(default)]
    pub agent_url: Option<String>,
    pub caller_prompt: String,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_waves")]
    pub waves: usize,
}

/// Kick off a campaign; progress streams to the session afterwards.
pub fn start(
    state: AppState,
    _auth: AuthContext,
    session_id: Uuid,
    args: LoadTestArgs,
) -> Result<Uuid, ServerError> {
    let adapter = match (args.adapter_config_id, &args.agent_url) {
        (Some(adapter_config_id), _) => state
            .sessions
            .get_adapter(session_id, adapter_config_id)
            .ok_or_else(|| {
                ServerError::Validation(format!("unknown adapter_config_id {}", adapter_config_id))
            })?,
        (None, Some(agent_url)) => AdapterConfig::WsVoice {
            agent_url: agent_url.clone(),
        },
        (None, None) => {
            return Err(ServerError::Validation(
                "load_test needs an adapter_config_id or agent_url".into(),
            ))
        }
    };
    check_adapter_preconditions(&state, &adapter)?;

    let campaign_id = Uuid::new_v4();
    // Campaign progress rides the same push plumbing as run progress.
    state.sessions.bind_run(
        campaign_id,
        session_id,
        Some(json!(format!("load-test-{}", campaign_id))),
    );

    let scenario = ConversationScenario {
        caller_prompt: args.caller_prompt,
        max_turns: 4,
        initial_silence_threshold_ms: None,
        behavioral_evals: Vec::new(),
        tool_call_evals: Vec::new(),
    };
    let concurrency = args.concurrency.clamp(1, 50);
    let waves = args.waves.clamp(1, 20);

    tokio::spawn(run_campaign(
        state, campaign_id, adapter, scenario, concurrency, waves,
    ));

    Ok(campaign_id)
}

async fn run_campaign(
    state: AppState,
    campaign_id: Uuid,
    adapter: AdapterConfig,
    scenario: ConversationScenario,
    concurrency: usize,
    waves: usize,
) {
    tracing::info!(%campaign_id, concurrency, waves, "load campaign started");

    for wave in 1..=waves {
        let wave_start = Instant::now();

        let spec = TestSpec {
            audio_tests: Vec::new(),
            conversation_tests: vec![scenario.clone(); concurrency],
            thresholds: None,
        };
        let request = ExecuteTestsRequest {
            run_id: campaign_id,
            spec,
            adapter: adapter.clone(),
        };

        let result =
            voiceci_executor::execute_tests(&state.executor_deps, request, None).await;

        let passed = result
            .conversation_results
            .iter()
            .filter(|r| r.status.passed())
            .count();
        let wave_ms = wave_start.elapsed().as_millis() as u64;
        let avg_ttfb: Option<u64> = {
            let ttfbs: Vec<u64> = result
                .conversation_results
                .iter()
                .filter_map(|r| r.metrics.get("avg_ttfb_ms").and_then(|v| v.as_f64()))
                .map(|v| v as u64)
                .collect();
            if ttfbs.is_empty() {
                None
            } else {
                Some(ttfbs.iter().sum::<u64>() / ttfbs.len() as u64)
            }
        };

        let message = match avg_ttfb {
            Some(ttfb) => format!(
                "wave {}/{}: {}/{} passed in {}ms (avg ttfb {}ms)",
                wave, waves, passed, concurrency, wave_ms, ttfb
            ),
            None => format!(
                "wave {}/{}: {}/{} passed in {}ms",
                wave, waves, passed, concurrency, wave_ms
            ),
        };

        state
            .sessions
            .emit_progress(campaign_id, wave as u64, Some(waves as u64), message)
            .await;
    }

    state
        .sessions
        .emit_progress(
            campaign_id,
            waves as u64,
            Some(waves as u64),
            "load campaign complete".into(),
        )
        .await;
    tracing::info!(%campaign_id, "load campaign finished");
}
