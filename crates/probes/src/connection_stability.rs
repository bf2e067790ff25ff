//! Connection-stability probe
//!
//! Five canned turns; the transport must survive all of them.

use std::time::Instant;

use voiceci_core::{AudioTestResult, Metrics};

use crate::common::{drain_reply, finish, say, ProbeContext};

const TURNS: [&str; 5] = [
    "Hi there!",
    "What services do you offer?",
    "What are your hours?",
    "Where are you located?",
    "Thanks, that is all I needed.",
];

pub async fn run(ctx: &mut ProbeContext<'_>) -> AudioTestResult {
    let started = Instant::now();
    let mut turns_completed = 0u64;
    let mut disconnected = false;
    let mut error: Option<String> = None;

    for turn in TURNS {
        if !ctx.channel.is_connected() {
            disconnected = true;
            break;
        }

        if let Err(e) = say(ctx, turn).await {
            error = Some(e.to_string());
            break;
        }

        match drain_reply(ctx.channel, 1000, ctx.receive_timeout).await {
            Ok(reply) if reply.disconnected => {
                disconnected = true;
                break;
            }
            Ok(_) => turns_completed += 1,
            Err(e) => {
                error = Some(e.to_string());
                break;
            }
        }
    }

    let passed = turns_completed == TURNS.len() as u64 && !disconnected && error.is_none();

    let mut metrics = Metrics::new();
    metrics.insert("turns_completed".into(), turns_completed.into());
    metrics.insert("turns_total".into(), (TURNS.len() as u64).into());
    metrics.insert("disconnected".into(), disconnected.into());

    finish("connection_stability", passed, metrics, started, error)
}
