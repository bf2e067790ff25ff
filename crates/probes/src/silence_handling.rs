//! Silence-handling probe
//!
//! After one normal exchange the caller goes dead silent for eight seconds.
//! A healthy agent stays on the line; a good one re-prompts.

use std::time::{Duration, Instant};

use voiceci_core::{AudioTestResult, Metrics};
use voiceci_pipeline::signals;

use crate::common::{drain_reply, finish, observe_window, say, ProbeContext};

const OPENER: &str = "Hello! I have a quick question.";
const SILENCE_MS: u64 = 8000;

pub async fn run(ctx: &mut ProbeContext<'_>) -> AudioTestResult {
    let started = Instant::now();

    if let Err(e) = say(ctx, OPENER).await {
        return AudioTestResult::failed(
            "silence_handling",
            started.elapsed().as_millis() as u64,
            e.to_string(),
        );
    }
    if let Err(e) = drain_reply(ctx.channel, 1000, ctx.receive_timeout).await {
        return AudioTestResult::failed(
            "silence_handling",
            started.elapsed().as_millis() as u64,
            e.to_string(),
        );
    }

    // Eight seconds of genuine silent PCM, not just absence of frames; some
    // transports drop the leg when nothing flows.
    if let Err(e) = ctx.channel.send_audio(&signals::silence(SILENCE_MS)).await {
        return AudioTestResult::failed(
            "silence_handling",
            started.elapsed().as_millis() as u64,
            e.to_string(),
        );
    }

    let observed = match observe_window(ctx.channel, Duration::from_millis(SILENCE_MS)).await {
        Ok(observed) => observed,
        Err(e) => {
            return AudioTestResult::failed(
                "silence_handling",
                started.elapsed().as_millis() as u64,
                e.to_string(),
            )
        }
    };

    let still_connected = !observed.disconnected && ctx.channel.is_connected();
    let reprompted = observed.stats.speech_segments > 0;

    let mut metrics = Metrics::new();
    metrics.insert("still_connected".into(), still_connected.into());
    metrics.insert("agent_reprompted".into(), reprompted.into());
    metrics.insert("silence_sent_ms".into(), SILENCE_MS.into());

    finish("silence_handling", still_connected, metrics, started, None)
}
