//! Response-completeness probe
//!
//! One prompt; the transcribed reply must be long enough and end like a
//! finished sentence rather than being cut off mid-thought.

use std::time::Instant;

use voiceci_core::{AudioTestResult, Metrics};

use crate::common::{drain_reply, finish, say, ProbeContext};

const PROMPT: &str = "Please give me a complete summary of what you can help me with.";
const DEFAULT_MIN_WORD_COUNT: u64 = 5;
const SENTENCE_TERMINATORS: [char; 3] = ['.', '!', '?'];

pub async fn run(ctx: &mut ProbeContext<'_>) -> AudioTestResult {
    let started = Instant::now();
    let min_words = ctx.thresholds.integer(
        "response_completeness",
        "min_word_count",
        DEFAULT_MIN_WORD_COUNT,
    );

    if let Err(e) = say(ctx, PROMPT).await {
        return AudioTestResult::failed(
            "response_completeness",
            started.elapsed().as_millis() as u64,
            e.to_string(),
        );
    }

    let reply = match drain_reply(ctx.channel, 1200, ctx.receive_timeout).await {
        Ok(reply) => reply,
        Err(e) => {
            return AudioTestResult::failed(
                "response_completeness",
                started.elapsed().as_millis() as u64,
                e.to_string(),
            )
        }
    };

    let transcription = match ctx.stt.transcribe(&reply.audio).await {
        Ok(transcription) => transcription,
        Err(e) => {
            return AudioTestResult::failed(
                "response_completeness",
                started.elapsed().as_millis() as u64,
                e.to_string(),
            )
        }
    };

    let text = transcription.text.trim();
    let word_count = text.split_whitespace().count() as u64;
    let ends_terminated = text
        .chars()
        .last()
        .map(|c| SENTENCE_TERMINATORS.contains(&c))
        .unwrap_or(false);

    let passed = word_count >= min_words && ends_terminated;

    let mut metrics = Metrics::new();
    metrics.insert("word_count".into(), word_count.into());
    metrics.insert("ends_with_terminator".into(), ends_terminated.into());
    metrics.insert("min_word_count".into(), min_words.into());

    finish("response_completeness", passed, metrics, started, None)
}
