//! End-to-end executor test against an in-process mock agent.
//!
//! The mock agent answers every caller utterance with a short speech burst
//! followed by trailing silence, which is what lets the VAD call end of
//! turn quickly. TTS and STT are tiny axum servers speaking the provider
//! wire shapes.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::post;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use uuid::Uuid;

use voiceci_channel::ChannelFactory;
use voiceci_config::{ExecutorConfig, Settings};
use voiceci_core::{AdapterConfig, AudioTestName, TestResult, TestSpec, TestStatus};
use voiceci_executor::{execute_tests, ExecuteTestsRequest, ExecutorDeps};
use voiceci_llm::{LlmClient, LlmConfig};
use voiceci_pipeline::stt::SttConfig;
use voiceci_pipeline::tts::TtsConfig;
use voiceci_pipeline::{SttClient, TtsClient};

const RATE: u32 = 24_000;

fn sine_pcm(ms: u64, amplitude: f64) -> Vec<i16> {
    let n = (ms as usize * RATE as usize) / 1000;
    (0..n)
        .map(|i| {
            let t = i as f64 / RATE as f64;
            ((t * 320.0 * 2.0 * std::f64::consts::PI).sin() * amplitude) as i16
        })
        .collect()
}

fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Mock TTS: any request gets 300ms of tone as raw PCM.
async fn spawn_tts() -> SocketAddr {
    let app = Router::new().route(
        "/synthesize",
        post(|| async { pcm_bytes(&sine_pcm(300, 9000.0)) }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    addr
}

/// Mock STT: every transcription is a complete sentence.
async fn spawn_stt() -> SocketAddr {
    let app = Router::new().route(
        "/transcribe",
        post(|| async {
            axum::Json(serde_json::json!({
                "text": "Hello, I can help with bookings and questions.",
                "confidence": 0.93
            }))
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    addr
}

/// Mock agent: replies to each caller utterance with speech then silence.
async fn spawn_agent() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => break,
            };
            tokio::spawn(async move {
                let ws = match tokio_tungstenite::accept_async(stream).await {
                    Ok(ws) => ws,
                    Err(_) => return,
                };
                let (mut sink, mut source) = ws.split();
                while let Some(Ok(message)) = source.next().await {
                    use tokio_tungstenite::tungstenite::Message;
                    if let Message::Binary(_) = message {
                        let speech = pcm_bytes(&sine_pcm(600, 9000.0));
                        let silence = pcm_bytes(&vec![0i16; (1500 * RATE as usize) / 1000]);
                        if sink.send(Message::Binary(speech)).await.is_err() {
                            return;
                        }
                        if sink.send(Message::Binary(silence)).await.is_err() {
                            return;
                        }
                    }
                }
            });
        }
    });

    addr
}

fn deps(tts: SocketAddr, stt: SocketAddr) -> ExecutorDeps {
    let settings = Arc::new(Settings::default());
    ExecutorDeps {
        factory: ChannelFactory::new(settings),
        tts: TtsClient::new(TtsConfig::new(format!("http://{}/synthesize", tts), "test")).unwrap(),
        stt: SttClient::new(SttConfig::new(format!("http://{}/transcribe", stt), "test")).unwrap(),
        llm: LlmClient::new(LlmConfig::new(
            "http://127.0.0.1:1",
            "test",
            "claude-sonnet-4-20250514",
        ))
        .unwrap(),
        config: ExecutorConfig {
            max_concurrency: 4,
            max_concurrency_sip: 2,
            receive_timeout_ms: 5_000,
        },
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn probes_pass_against_cooperative_ws_agent() {
    let tts = spawn_tts().await;
    let stt = spawn_stt().await;
    let agent = spawn_agent().await;

    let request = ExecuteTestsRequest {
        run_id: Uuid::new_v4(),
        spec: TestSpec {
            audio_tests: vec![
                AudioTestName::ConnectionStability,
                AudioTestName::ResponseCompleteness,
            ],
            conversation_tests: vec![],
            thresholds: None,
        },
        adapter: AdapterConfig::WsVoice {
            agent_url: format!("ws://{}", agent),
        },
    };

    let (tx, mut rx) = mpsc::channel::<TestResult>(8);
    let result = execute_tests(&deps(tts, stt), request, Some(tx)).await;

    assert_eq!(result.status, TestStatus::Pass, "{:?}", result);
    assert_eq!(result.audio_results.len(), 2);

    let stability = result
        .audio_results
        .iter()
        .find(|r| r.name == "connection_stability")
        .unwrap();
    assert_eq!(stability.status, TestStatus::Pass);
    assert_eq!(
        stability.metrics.get("turns_completed").and_then(|v| v.as_f64()),
        Some(5.0)
    );

    let completeness = result
        .audio_results
        .iter()
        .find(|r| r.name == "response_completeness")
        .unwrap();
    assert_eq!(completeness.status, TestStatus::Pass);
    assert_eq!(
        completeness
            .metrics
            .get("ends_with_terminator")
            .and_then(|v| v.as_bool()),
        Some(true)
    );

    // Results were streamed as they completed, before the aggregate.
    let mut streamed = Vec::new();
    while let Ok(result) = rx.try_recv() {
        streamed.push(result);
    }
    assert_eq!(streamed.len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn ttfb_probe_measures_fast_agent() {
    let tts = spawn_tts().await;
    let stt = spawn_stt().await;
    let agent = spawn_agent().await;

    let request = ExecuteTestsRequest {
        run_id: Uuid::new_v4(),
        spec: TestSpec {
            audio_tests: vec![AudioTestName::Ttfb],
            conversation_tests: vec![],
            thresholds: None,
        },
        adapter: AdapterConfig::WsVoice {
            agent_url: format!("ws://{}", agent),
        },
    };

    let result = execute_tests(&deps(tts, stt), request, None).await;
    assert_eq!(result.status, TestStatus::Pass, "{:?}", result);

    let ttfb = &result.audio_results[0];
    let p95 = ttfb.metrics.get("p95_ms").and_then(|v| v.as_f64()).unwrap();
    // Loopback agent answers in well under a second.
    assert!(p95 < 1000.0, "p95 {}", p95);
    // Default threshold is not echoed into the metrics.
    assert!(ttfb.metrics.get("p95_threshold_ms").is_none());
}
