//! Barge-in probe
//!
//! Elicit a long response, interrupt one second after the agent starts
//! talking, and measure how long it keeps talking before yielding to
//! sustained silence.

use std::time::{Duration, Instant};

use voiceci_channel::ChannelEvent;
use voiceci_core::{AudioTestResult, Metrics};
use voiceci_pipeline::vad::{VadConfig, VadSession, VadState};

use crate::common::{finish, say, ProbeContext};

const ELICIT_PROMPT: &str =
    "Please tell me everything about your services, in as much detail as you can.";
const INTERRUPT_PROMPT: &str = "Wait, sorry to interrupt. Can you give me the short version?";

const DEFAULT_MAX_LATENCY_MS: u64 = 2000;
/// This much silence after the interruption counts as having yielded.
const SUSTAINED_SILENCE_MS: u64 = 700;
/// Pause between agent speech onset and our interruption.
const INTERRUPT_AFTER: Duration = Duration::from_secs(1);

pub async fn run(ctx: &mut ProbeContext<'_>) -> AudioTestResult {
    let started = Instant::now();
    let max_latency_ms =
        ctx.thresholds
            .integer("barge_in", "max_latency_ms", DEFAULT_MAX_LATENCY_MS);

    if let Err(e) = say(ctx, ELICIT_PROMPT).await {
        return AudioTestResult::failed(
            "barge_in",
            started.elapsed().as_millis() as u64,
            e.to_string(),
        );
    }

    // Wait for the agent to get going.
    let mut vad = VadSession::new(VadConfig {
        silence_threshold_ms: SUSTAINED_SILENCE_MS,
        ..Default::default()
    });
    let wait_start = Instant::now();
    let mut speaking = false;

    while wait_start.elapsed() < ctx.receive_timeout {
        let remaining = ctx.receive_timeout - wait_start.elapsed();
        match tokio::time::timeout(remaining, ctx.channel.recv()).await {
            Ok(Some(ChannelEvent::Audio(pcm))) => {
                if matches!(vad.process(&pcm), Ok(VadState::Speech)) {
                    speaking = true;
                    break;
                }
            }
            Ok(Some(ChannelEvent::Disconnected)) | Ok(None) => {
                return AudioTestResult::failed(
                    "barge_in",
                    started.elapsed().as_millis() as u64,
                    "agent disconnected before speaking",
                );
            }
            Ok(Some(ChannelEvent::Error(e))) => {
                return AudioTestResult::failed(
                    "barge_in",
                    started.elapsed().as_millis() as u64,
                    e,
                );
            }
            Err(_) => break,
        }
    }

    if !speaking {
        return AudioTestResult::failed(
            "barge_in",
            started.elapsed().as_millis() as u64,
            "agent never started its long response",
        );
    }

    // Keep draining while we wait out the pre-interruption delay.
    let drain_until = Instant::now() + INTERRUPT_AFTER;
    while Instant::now() < drain_until {
        let remaining = drain_until - Instant::now();
        match tokio::time::timeout(remaining, ctx.channel.recv()).await {
            Ok(Some(ChannelEvent::Audio(pcm))) => {
                let _ = vad.process(&pcm);
            }
            _ => break,
        }
    }

    if let Err(e) = say(ctx, INTERRUPT_PROMPT).await {
        return AudioTestResult::failed(
            "barge_in",
            started.elapsed().as_millis() as u64,
            e.to_string(),
        );
    }
    let interrupted_at = Instant::now();

    // Watch for the transition into sustained silence.
    let mut yield_latency_ms: Option<u64> = None;
    let mut last_speech_at = interrupted_at;
    vad.reset();
    vad.set_silence_threshold_ms(SUSTAINED_SILENCE_MS);

    while interrupted_at.elapsed() < ctx.receive_timeout {
        let silent_for = last_speech_at.elapsed().as_millis() as u64;
        if silent_for >= SUSTAINED_SILENCE_MS {
            let total = last_speech_at.duration_since(interrupted_at).as_millis() as u64;
            yield_latency_ms = Some(total);
            break;
        }

        let poll = Duration::from_millis(SUSTAINED_SILENCE_MS - silent_for);
        match tokio::time::timeout(poll, ctx.channel.recv()).await {
            Ok(Some(ChannelEvent::Audio(pcm))) => {
                if matches!(vad.process(&pcm), Ok(VadState::Speech)) {
                    last_speech_at = Instant::now();
                }
            }
            Ok(Some(ChannelEvent::Disconnected)) | Ok(None) => break,
            Ok(Some(ChannelEvent::Error(_))) => break,
            Err(_) => {} // poll window elapsed with no audio
        }
    }

    let mut metrics = Metrics::new();
    let passed = match yield_latency_ms {
        Some(latency) => {
            metrics.insert("barge_in_latency_ms".into(), latency.into());
            latency <= max_latency_ms
        }
        None => {
            metrics.insert("yielded".into(), false.into());
            false
        }
    };

    finish("barge_in", passed, metrics, started, None)
}
