//! Audio-quality probe
//!
//! Accumulates agent audio over a couple of exchanges and checks it for
//! clipping, energy consistency, and a minimum amount of speech.

use std::time::Instant;

use voiceci_core::{AudioTestResult, Metrics};
use voiceci_pipeline::AudioAnalysis;

use crate::common::{drain_reply, finish, say, ProbeContext};

const PROMPTS: [&str; 2] = [
    "Hi! Could you introduce yourself?",
    "Great. What can you help me with today?",
];

const DEFAULT_MAX_CLIPPING_RATIO: f64 = 0.01;
const DEFAULT_MAX_ENERGY_VARIATION: f64 = 0.8;
const DEFAULT_MIN_DURATION_MS: u64 = 500;

pub async fn run(ctx: &mut ProbeContext<'_>) -> AudioTestResult {
    let started = Instant::now();
    let max_clipping = ctx.thresholds.number(
        "audio_quality",
        "max_clipping_ratio",
        DEFAULT_MAX_CLIPPING_RATIO,
    );
    let max_variation = ctx.thresholds.number(
        "audio_quality",
        "max_energy_variation",
        DEFAULT_MAX_ENERGY_VARIATION,
    );
    let min_duration_ms =
        ctx.thresholds
            .integer("audio_quality", "min_duration_ms", DEFAULT_MIN_DURATION_MS);

    let mut accumulated: Vec<i16> = Vec::new();

    for prompt in PROMPTS {
        if let Err(e) = say(ctx, prompt).await {
            return AudioTestResult::failed(
                "audio_quality",
                started.elapsed().as_millis() as u64,
                e.to_string(),
            );
        }
        match drain_reply(ctx.channel, 1000, ctx.receive_timeout).await {
            Ok(reply) => accumulated.extend_from_slice(&reply.audio),
            Err(e) => {
                return AudioTestResult::failed(
                    "audio_quality",
                    started.elapsed().as_millis() as u64,
                    e.to_string(),
                )
            }
        }
    }

    let analysis = AudioAnalysis::of(&accumulated);

    let clipping_ok = analysis.clipping_ratio <= max_clipping;
    let energy_ok = analysis.energy_consistency <= max_variation;
    let duration_ok = analysis.duration_ms >= min_duration_ms;
    let passed = clipping_ok && energy_ok && duration_ok;

    let mut metrics = Metrics::new();
    metrics.insert("clipping_ratio".into(), analysis.clipping_ratio.into());
    metrics.insert(
        "energy_consistency".into(),
        analysis.energy_consistency.into(),
    );
    metrics.insert("agent_audio_ms".into(), analysis.duration_ms.into());
    metrics.insert("clipping_ok".into(), clipping_ok.into());
    metrics.insert("energy_ok".into(), energy_ok.into());
    metrics.insert("duration_ok".into(), duration_ok.into());

    finish("audio_quality", passed, metrics, started, None)
}
