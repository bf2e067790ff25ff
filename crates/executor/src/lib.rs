//! Test executor
//!
//! Fans a run's test spec out into one task per test under a concurrency
//! cap (lower for telephony-backed transports). Each task allocates its own
//! channel, connects, runs its probe or conversation, and releases the
//! channel on every exit path. Completed results stream over a buffered
//! completion channel to the caller as they finish, in completion order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Semaphore};
use uuid::Uuid;

use voiceci_channel::{AudioChannel, ChannelFactory};
use voiceci_config::ExecutorConfig;
use voiceci_conversation::ConversationEngine;
use voiceci_core::{
    AdapterConfig, AudioTestName, AudioTestResult, ConversationScenario, ConversationTestResult,
    ExecuteTestsResult, Metrics, TestResult, TestSpec, TestStatus,
};
use voiceci_llm::LlmClient;
use voiceci_pipeline::{SttClient, TtsClient};
use voiceci_probes::{ProbeContext, Thresholds};

/// Everything the executor needs besides the request itself.
#[derive(Clone)]
pub struct ExecutorDeps {
    pub factory: ChannelFactory,
    pub tts: TtsClient,
    pub stt: SttClient,
    pub llm: LlmClient,
    pub config: ExecutorConfig,
}

/// One run's worth of work.
#[derive(Clone)]
pub struct ExecuteTestsRequest {
    pub run_id: Uuid,
    pub spec: TestSpec,
    pub adapter: AdapterConfig,
}

enum TestTask {
    Audio(AudioTestName),
    Conversation(Box<ConversationScenario>),
}

/// Execute every test in the spec. Each completed result is forwarded on
/// `on_test_complete` the moment it lands; the aggregate comes back at the
/// end. A failing test never aborts the run.
pub async fn execute_tests(
    deps: &ExecutorDeps,
    request: ExecuteTestsRequest,
    on_test_complete: Option<mpsc::Sender<TestResult>>,
) -> ExecuteTestsResult {
    let started = Instant::now();
    let run_id = request.run_id;

    let cap = if request.adapter.is_sip_backed() {
        deps.config.max_concurrency_sip
    } else {
        deps.config.max_concurrency
    };
    let semaphore = Arc::new(Semaphore::new(cap.max(1)));
    let receive_timeout = Duration::from_millis(deps.config.receive_timeout_ms);

    let thresholds = Arc::new(Thresholds::new(request.spec.thresholds.clone()));
    let engine = Arc::new(ConversationEngine::new(
        deps.tts.clone(),
        deps.stt.clone(),
        deps.llm.clone(),
        receive_timeout,
    ));

    let mut tasks: Vec<TestTask> = Vec::new();
    for name in &request.spec.audio_tests {
        tasks.push(TestTask::Audio(*name));
    }
    for scenario in &request.spec.conversation_tests {
        tasks.push(TestTask::Conversation(Box::new(scenario.clone())));
    }

    tracing::info!(
        %run_id,
        tests = tasks.len(),
        concurrency = cap,
        adapter = request.adapter.tag(),
        "executing test spec"
    );

    // Completion channel: tasks write results, the collector below streams
    // them out and accumulates the aggregate.
    let (completed_tx, mut completed_rx) = mpsc::channel::<TestResult>(32);

    for task in tasks {
        let semaphore = semaphore.clone();
        let deps = deps.clone();
        let adapter = request.adapter.clone();
        let thresholds = thresholds.clone();
        let engine = engine.clone();
        let completed_tx = completed_tx.clone();

        tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let result = run_one_test(&deps, &adapter, task, &thresholds, &engine, receive_timeout)
                .await;
            let _ = completed_tx.send(result).await;
        });
    }
    drop(completed_tx);

    let mut audio_results: Vec<AudioTestResult> = Vec::new();
    let mut conversation_results: Vec<ConversationTestResult> = Vec::new();

    while let Some(result) = completed_rx.recv().await {
        if let Some(sink) = &on_test_complete {
            if sink.send(result.clone()).await.is_err() {
                tracing::debug!(%run_id, "result sink closed; continuing without streaming");
            }
        }
        match result {
            TestResult::Audio(r) => audio_results.push(r),
            TestResult::Conversation(r) => conversation_results.push(r),
        }
    }

    let all_passed = audio_results.iter().all(|r| r.status.passed())
        && conversation_results.iter().all(|r| r.status.passed());

    let result = ExecuteTestsResult {
        run_id,
        status: TestStatus::from_bool(all_passed),
        audio_results,
        conversation_results,
        total_duration_ms: started.elapsed().as_millis() as u64,
        error_text: None,
    };

    tracing::info!(
        %run_id,
        status = ?result.status,
        duration_ms = result.total_duration_ms,
        "run complete"
    );

    result
}

/// Allocate a channel, run one test, release the channel on all exit paths.
async fn run_one_test(
    deps: &ExecutorDeps,
    adapter: &AdapterConfig,
    task: TestTask,
    thresholds: &Thresholds,
    engine: &ConversationEngine,
    receive_timeout: Duration,
) -> TestResult {
    let mut channel = match deps.factory.build(adapter) {
        Ok(channel) => channel,
        Err(e) => return failed_result(&task, format!("channel build failed: {}", e)),
    };

    if let Err(e) = channel.connect().await {
        return failed_result(&task, format!("connect failed: {}", e));
    }

    let result = match &task {
        TestTask::Audio(name) => {
            let mut ctx = ProbeContext {
                channel: &mut channel,
                tts: &deps.tts,
                stt: &deps.stt,
                thresholds,
                receive_timeout,
            };
            TestResult::Audio(voiceci_probes::run_probe(*name, &mut ctx).await)
        }
        TestTask::Conversation(scenario) => {
            TestResult::Conversation(engine.execute(scenario, &mut channel).await)
        }
    };

    channel.disconnect().await;
    result
}

fn failed_result(task: &TestTask, error: String) -> TestResult {
    match task {
        TestTask::Audio(name) => TestResult::Audio(AudioTestResult::failed(
            name.as_str(),
            0,
            error,
        )),
        TestTask::Conversation(scenario) => TestResult::Conversation(ConversationTestResult {
            caller_prompt: scenario.caller_prompt.clone(),
            status: TestStatus::Fail,
            transcript: Vec::new(),
            eval_results: Vec::new(),
            tool_call_eval_results: None,
            observed_tool_calls: None,
            duration_ms: 0,
            metrics: Metrics::new(),
            error_text: Some(error),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use voiceci_config::Settings;

    fn deps() -> ExecutorDeps {
        let settings = Arc::new(Settings::default());
        ExecutorDeps {
            factory: ChannelFactory::new(settings.clone()),
            tts: TtsClient::new(voiceci_pipeline::tts::TtsConfig::new(
                "https://tts.invalid",
                "k",
            ))
            .unwrap(),
            stt: SttClient::new(voiceci_pipeline::stt::SttConfig::new(
                "https://stt.invalid",
                "k",
            ))
            .unwrap(),
            llm: LlmClient::new(voiceci_llm::LlmConfig::new(
                "https://llm.invalid",
                "k",
                "claude-sonnet-4-20250514",
            ))
            .unwrap(),
            config: ExecutorConfig::default(),
        }
    }

    #[tokio::test]
    async fn unreachable_agent_yields_failed_results_not_a_crash() {
        let request = ExecuteTestsRequest {
            run_id: Uuid::new_v4(),
            spec: TestSpec {
                audio_tests: vec![AudioTestName::Echo, AudioTestName::Ttfb],
                conversation_tests: vec![],
                thresholds: None,
            },
            adapter: AdapterConfig::WsVoice {
                // Nothing listens here; connects fail fast.
                agent_url: "ws://127.0.0.1:9".into(),
            },
        };

        let (tx, mut rx) = mpsc::channel(8);
        let result = execute_tests(&deps(), request, Some(tx)).await;

        assert_eq!(result.status, TestStatus::Fail);
        assert_eq!(result.audio_results.len(), 2);
        assert!(result
            .audio_results
            .iter()
            .all(|r| r.error.as_deref().unwrap_or("").contains("connect failed")));

        // Both results were streamed before the aggregate returned.
        let mut streamed = 0;
        while rx.try_recv().is_ok() {
            streamed += 1;
        }
        assert_eq!(streamed, 2);
    }

    #[tokio::test]
    async fn misconfigured_platform_fails_per_test() {
        let request = ExecuteTestsRequest {
            run_id: Uuid::new_v4(),
            spec: TestSpec {
                audio_tests: vec![AudioTestName::Echo],
                conversation_tests: vec![],
                thresholds: None,
            },
            // Default settings have no livekit URL configured.
            adapter: AdapterConfig::Webrtc {
                room: "qa".into(),
                identity: None,
            },
        };

        let result = execute_tests(&deps(), request, None).await;
        assert_eq!(result.status, TestStatus::Fail);
        assert!(result.audio_results[0]
            .error
            .as_deref()
            .unwrap()
            .contains("channel build failed"));
    }
}
