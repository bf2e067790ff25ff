//! Endpointing probe
//!
//! Speak a sentence with a deliberate mid-utterance pause. An agent that
//! endpoints too aggressively will jump in during the pause instead of
//! waiting for the rest of the sentence.

use std::time::{Duration, Instant};

use voiceci_channel::ChannelEvent;
use voiceci_core::{AudioTestResult, Metrics};
use voiceci_pipeline::signals;
use voiceci_pipeline::vad::{VadConfig, VadSession, VadState};

use crate::common::{drain_reply, finish, ProbeContext};

const PART_A: &str = "I'd like to book an appointment";
const PART_B: &str = "for next Tuesday afternoon, if you have anything open.";

const TRIALS: usize = 3;
const DEFAULT_PAUSE_MS: u64 = 1200;
const DEFAULT_MIN_PASS_RATIO: f64 = 0.67;
/// Silence slices sent while watching for a premature response.
const PAUSE_SLICE_MS: u64 = 100;

pub async fn run(ctx: &mut ProbeContext<'_>) -> AudioTestResult {
    let started = Instant::now();
    let pause_ms = ctx
        .thresholds
        .integer("endpointing", "pause_ms", DEFAULT_PAUSE_MS);
    let min_pass_ratio =
        ctx.thresholds
            .number("endpointing", "min_pass_ratio", DEFAULT_MIN_PASS_RATIO);

    let (part_a, part_b) = match (
        ctx.tts.synthesize(PART_A, None).await,
        ctx.tts.synthesize(PART_B, None).await,
    ) {
        (Ok(a), Ok(b)) => (a, b),
        (Err(e), _) | (_, Err(e)) => {
            return AudioTestResult::failed(
                "endpointing",
                started.elapsed().as_millis() as u64,
                e.to_string(),
            )
        }
    };

    let mut premature_count = 0u64;

    for trial in 0..TRIALS {
        if let Err(e) = ctx.channel.send_audio(&part_a).await {
            return AudioTestResult::failed(
                "endpointing",
                started.elapsed().as_millis() as u64,
                e.to_string(),
            );
        }

        // Stream the pause in slices, watching for the agent talking over it.
        let mut pause_vad = VadSession::new(VadConfig::default());
        let mut premature = false;
        let slice = signals::silence(PAUSE_SLICE_MS);
        let slices = pause_ms / PAUSE_SLICE_MS;

        for _ in 0..slices {
            if let Err(e) = ctx.channel.send_audio(&slice).await {
                return AudioTestResult::failed(
                    "endpointing",
                    started.elapsed().as_millis() as u64,
                    e.to_string(),
                );
            }

            let poll = tokio::time::timeout(
                Duration::from_millis(PAUSE_SLICE_MS),
                ctx.channel.recv(),
            )
            .await;
            if let Ok(Some(ChannelEvent::Audio(pcm))) = poll {
                if matches!(pause_vad.process(&pcm), Ok(VadState::Speech)) {
                    premature = true;
                }
            }
        }

        if premature {
            premature_count += 1;
            tracing::debug!(trial, "agent responded during the pause");
        }

        if let Err(e) = ctx.channel.send_audio(&part_b).await {
            return AudioTestResult::failed(
                "endpointing",
                started.elapsed().as_millis() as u64,
                e.to_string(),
            );
        }
        if let Err(e) = drain_reply(ctx.channel, 1000, ctx.receive_timeout).await {
            return AudioTestResult::failed(
                "endpointing",
                started.elapsed().as_millis() as u64,
                e.to_string(),
            );
        }
    }

    let clean_ratio = (TRIALS as u64 - premature_count) as f64 / TRIALS as f64;
    let passed = clean_ratio >= min_pass_ratio;

    let mut metrics = Metrics::new();
    metrics.insert("trials".into(), (TRIALS as u64).into());
    metrics.insert("premature_count".into(), premature_count.into());
    metrics.insert("pass_ratio".into(), clean_ratio.into());
    metrics.insert("pause_ms".into(), pause_ms.into());

    finish("endpointing", passed, metrics, started, None)
}
