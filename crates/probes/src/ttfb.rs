//! Time-to-first-byte probe
//!
//! Latency from send-completion to the first VAD-detected agent speech,
//! across three prompt tiers (simple, complex, tool-triggering). Time to
//! first transcribed word rides along from the captured replies.

use std::time::Instant;

use voiceci_core::{AudioTestResult, Metrics};

use crate::common::{drain_reply, finish, p95, say, ProbeContext};

const DEFAULT_P95_THRESHOLD_MS: u64 = 3000;

const SIMPLE_PROMPTS: [&str; 2] = ["Hi.", "Hello, can you hear me?"];
const COMPLEX_PROMPTS: [&str; 2] = [
    "I'd like to change the shipping address on my last order, but only if it has not shipped yet.",
    "Could you compare your premium and basic plans for a team of five people?",
];
const TOOL_PROMPTS: [&str; 2] = [
    "What are your opening hours tomorrow?",
    "Can you look up the status of order eight eight two three one?",
];

pub async fn run(ctx: &mut ProbeContext<'_>) -> AudioTestResult {
    let started = Instant::now();
    let threshold_ms = ctx
        .thresholds
        .integer("ttfb", "p95_threshold_ms", DEFAULT_P95_THRESHOLD_MS);

    let tiers: [(&str, &[&str]); 3] = [
        ("simple", &SIMPLE_PROMPTS),
        ("complex", &COMPLEX_PROMPTS),
        ("tool", &TOOL_PROMPTS),
    ];

    let mut all_ttfb: Vec<u64> = Vec::new();
    let mut complex_ttfb: Vec<u64> = Vec::new();
    let mut ttfw: Vec<u64> = Vec::new();
    let mut unanswered = 0u64;

    for (tier, prompts) in tiers {
        for prompt in prompts {
            if let Err(e) = say(ctx, prompt).await {
                return AudioTestResult::failed(
                    "ttfb",
                    started.elapsed().as_millis() as u64,
                    e.to_string(),
                );
            }
            // drain_reply starts its clock at the awaited recv, which begins
            // right after send-completion.
            let reply = match drain_reply(ctx.channel, 1000, ctx.receive_timeout).await {
                Ok(reply) => reply,
                Err(e) => {
                    return AudioTestResult::failed(
                        "ttfb",
                        started.elapsed().as_millis() as u64,
                        e.to_string(),
                    )
                }
            };

            let Some(first_speech) = reply.first_speech_ms else {
                tracing::debug!(tier, prompt, "no agent speech within deadline");
                unanswered += 1;
                continue;
            };

            all_ttfb.push(first_speech);
            if tier == "complex" {
                complex_ttfb.push(first_speech);
            }

            // Time to first word: first speech plus the transcribe check
            // that a word was actually said.
            match ctx.stt.transcribe(&reply.audio).await {
                Ok(transcription) if !transcription.text.trim().is_empty() => {
                    ttfw.push(first_speech);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("ttfw transcription failed: {}", e),
            }
        }
    }

    let mut metrics = Metrics::new();
    metrics.insert("prompt_count".into(), ((all_ttfb.len() as u64) + unanswered).into());
    metrics.insert("unanswered_count".into(), unanswered.into());

    let overall_p95 = p95(&all_ttfb);
    let complex_p95 = p95(&complex_ttfb);

    if let Some(value) = overall_p95 {
        metrics.insert("p95_ms".into(), value.into());
    }
    if let Some(value) = complex_p95 {
        metrics.insert("complex_p95_ms".into(), value.into());
    }
    if let Some(value) = p95(&ttfw) {
        metrics.insert("ttfw_p95_ms".into(), value.into());
    }
    if ctx.thresholds.is_overridden("ttfb", "p95_threshold_ms") {
        metrics.insert("p95_threshold_ms".into(), threshold_ms.into());
    }

    let passed = match (overall_p95, complex_p95) {
        (Some(overall), Some(complex)) => {
            unanswered == 0 && overall <= threshold_ms && complex <= threshold_ms
        }
        (Some(overall), None) => unanswered == 0 && overall <= threshold_ms,
        _ => false,
    };

    finish("ttfb", passed, metrics, started, None)
}
