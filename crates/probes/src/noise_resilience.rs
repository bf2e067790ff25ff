//! Noise-resilience probe
//!
//! A clean baseline, then nine trials: {white, babble, pink} noise beds at
//! {20, 10, 5} dB SNR under the same utterance. Passing requires a response
//! on every trial at or above the pass SNR; 5 dB results are informational.

use std::time::{Duration, Instant};

use voiceci_core::{AudioTestResult, Metrics};
use voiceci_pipeline::signals;

use crate::common::{drain_reply, finish, ProbeContext};

const TRIAL_PROMPT: &str = "Can you hear me clearly? Please say yes or no.";
const DEFAULT_MIN_PASS_SNR_DB: f64 = 10.0;
const SNR_STEPS_DB: [f64; 3] = [20.0, 10.0, 5.0];
const NOISE_RMS: f64 = 3000.0;
/// Settle time between trials.
const INTER_TRIAL_PAUSE: Duration = Duration::from_millis(750);

pub async fn run(ctx: &mut ProbeContext<'_>) -> AudioTestResult {
    let started = Instant::now();
    let min_pass_snr = ctx.thresholds.number(
        "noise_resilience",
        "min_pass_snr_db",
        DEFAULT_MIN_PASS_SNR_DB,
    );

    let clean = match ctx.tts.synthesize(TRIAL_PROMPT, None).await {
        Ok(clean) => clean,
        Err(e) => {
            return AudioTestResult::failed(
                "noise_resilience",
                started.elapsed().as_millis() as u64,
                e.to_string(),
            )
        }
    };

    let mut metrics = Metrics::new();

    // Clean baseline first; a dead agent fails here, not in the noise grid.
    if let Err(e) = ctx.channel.send_audio(&clean).await {
        return AudioTestResult::failed(
            "noise_resilience",
            started.elapsed().as_millis() as u64,
            e.to_string(),
        );
    }
    match drain_reply(ctx.channel, 1000, ctx.receive_timeout).await {
        Ok(baseline) => {
            let responded = baseline.heard_speech();
            metrics.insert("baseline_responded".into(), responded.into());
            if let Some(ttfb) = baseline.first_speech_ms {
                metrics.insert("baseline_ttfb_ms".into(), ttfb.into());
            }
            if !responded {
                metrics.insert("passed_trials".into(), 0u64.into());
                return finish(
                    "noise_resilience",
                    false,
                    metrics,
                    started,
                    Some("agent did not respond to the clean baseline".into()),
                );
            }
        }
        Err(e) => {
            return AudioTestResult::failed(
                "noise_resilience",
                started.elapsed().as_millis() as u64,
                e.to_string(),
            )
        }
    }

    let clean_ms = voiceci_core::audio::duration_ms(
        clean.len(),
        voiceci_core::audio::CANONICAL_RATE_HZ,
    );
    let noise_beds: [(&str, Vec<i16>); 3] = [
        ("white", signals::white_noise(clean_ms, NOISE_RMS)),
        ("babble", signals::babble_noise(clean_ms, NOISE_RMS)),
        ("pink", signals::pink_noise(clean_ms, NOISE_RMS)),
    ];

    let mut all_required_passed = true;
    let mut passed_trials = 0u64;

    for (noise_name, noise) in &noise_beds {
        for snr_db in SNR_STEPS_DB {
            tokio::time::sleep(INTER_TRIAL_PAUSE).await;

            let mixed = signals::mix_audio(&clean, noise, snr_db);
            if let Err(e) = ctx.channel.send_audio(&mixed).await {
                return AudioTestResult::failed(
                    "noise_resilience",
                    started.elapsed().as_millis() as u64,
                    e.to_string(),
                );
            }

            let responded = match drain_reply(ctx.channel, 1000, ctx.receive_timeout).await {
                Ok(reply) => reply.heard_speech(),
                Err(e) => {
                    return AudioTestResult::failed(
                        "noise_resilience",
                        started.elapsed().as_millis() as u64,
                        e.to_string(),
                    )
                }
            };

            let key = format!("{}_{}db_responded", noise_name, snr_db as i64);
            metrics.insert(key, responded.into());

            if responded {
                passed_trials += 1;
            } else if snr_db >= min_pass_snr {
                all_required_passed = false;
            }
        }
    }

    metrics.insert("passed_trials".into(), passed_trials.into());
    metrics.insert("min_pass_snr_db".into(), min_pass_snr.into());

    finish("noise_resilience", all_required_passed, metrics, started, None)
}
