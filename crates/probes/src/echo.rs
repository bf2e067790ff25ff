//! Echo probe
//!
//! An agent with a feedback problem hears its own TTS and keeps answering
//! itself. After one normal exchange we go quiet and count unprompted
//! utterances in a fixed window.

use std::time::{Duration, Instant};

use voiceci_core::{AudioTestResult, Metrics};

use crate::common::{drain_reply, finish, observe_window, say, ProbeContext};

const GREETING: &str = "Hi there! How are you today?";
const DEFAULT_LOOP_THRESHOLD: u64 = 2;
const DEFAULT_WINDOW_MS: u64 = 6000;

pub async fn run(ctx: &mut ProbeContext<'_>) -> AudioTestResult {
    let started = Instant::now();
    let loop_threshold = ctx
        .thresholds
        .integer("echo", "loop_threshold", DEFAULT_LOOP_THRESHOLD);
    let window_ms = ctx.thresholds.integer("echo", "window_ms", DEFAULT_WINDOW_MS);

    if let Err(e) = say(ctx, GREETING).await {
        return AudioTestResult::failed("echo", started.elapsed().as_millis() as u64, e.to_string());
    }

    // Drain the legitimate reply first.
    if let Err(e) = drain_reply(ctx.channel, 1000, ctx.receive_timeout).await {
        return AudioTestResult::failed("echo", started.elapsed().as_millis() as u64, e.to_string());
    }

    // Then stay silent and listen.
    let observed = match observe_window(ctx.channel, Duration::from_millis(window_ms)).await {
        Ok(observed) => observed,
        Err(e) => {
            return AudioTestResult::failed(
                "echo",
                started.elapsed().as_millis() as u64,
                e.to_string(),
            )
        }
    };

    let unprompted_count = observed.stats.speech_segments as u64;
    let passed = unprompted_count <= loop_threshold;

    let mut metrics = Metrics::new();
    metrics.insert("unprompted_count".into(), unprompted_count.into());
    metrics.insert("window_ms".into(), window_ms.into());
    metrics.insert(
        "unprompted_speech_ms".into(),
        observed.stats.total_speech_ms.into(),
    );

    finish("echo", passed, metrics, started, None)
}
