//! Audio probes
//!
//! Nine black-box tests of a voice agent's audio behavior. Each probe gets a
//! fresh connected channel, runs for a bounded duration, and returns an
//! `AudioTestResult`; a probe failure never aborts the surrounding run.

pub mod common;
pub mod thresholds;

mod audio_quality;
mod barge_in;
mod connection_stability;
mod echo;
mod endpointing;
mod noise_resilience;
mod response_completeness;
mod silence_handling;
mod ttfb;

pub use common::ProbeContext;
pub use thresholds::Thresholds;

use voiceci_core::{AudioTestName, AudioTestResult};

/// Run one probe by name. The channel in `ctx` must already be connected.
pub async fn run_probe(name: AudioTestName, ctx: &mut ProbeContext<'_>) -> AudioTestResult {
    tracing::info!(probe = %name, "running audio probe");
    match name {
        AudioTestName::Echo => echo::run(ctx).await,
        AudioTestName::Ttfb => ttfb::run(ctx).await,
        AudioTestName::BargeIn => barge_in::run(ctx).await,
        AudioTestName::SilenceHandling => silence_handling::run(ctx).await,
        AudioTestName::ConnectionStability => connection_stability::run(ctx).await,
        AudioTestName::ResponseCompleteness => response_completeness::run(ctx).await,
        AudioTestName::NoiseResilience => noise_resilience::run(ctx).await,
        AudioTestName::Endpointing => endpointing::run(ctx).await,
        AudioTestName::AudioQuality => audio_quality::run(ctx).await,
    }
}
