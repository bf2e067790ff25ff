//! Shared probe plumbing
//!
//! Every probe follows the same rhythm: synthesize an utterance, push it
//! down the channel, then drain the agent's reply under a VAD until end of
//! turn or a deadline. The helpers here keep the per-probe code about the
//! probe, not the plumbing.

use std::time::{Duration, Instant};

use voiceci_channel::{AudioChannel, ChannelEvent};
use voiceci_core::{AudioTestResult, Error, Metrics, TestStatus};
use voiceci_pipeline::vad::{VadConfig, VadSession, VadState, VadStats};
use voiceci_pipeline::{SttClient, TtsClient};

use crate::thresholds::Thresholds;

/// Everything a probe needs for one bounded run.
pub struct ProbeContext<'a> {
    pub channel: &'a mut AudioChannel,
    pub tts: &'a TtsClient,
    pub stt: &'a SttClient,
    pub thresholds: &'a Thresholds,
    /// Deadline for any single reply drain.
    pub receive_timeout: Duration,
}

/// What came back from the agent for one exchange.
#[derive(Debug, Default)]
pub struct ReplyCapture {
    /// Accumulated 24 kHz agent audio.
    pub audio: Vec<i16>,
    /// Wall ms from wait start to the first audio chunk.
    pub first_chunk_ms: Option<u64>,
    /// Wall ms from wait start to the first VAD-confirmed speech.
    pub first_speech_ms: Option<u64>,
    /// The VAD declared end of turn (as opposed to running out the clock).
    pub ended_by_vad: bool,
    pub disconnected: bool,
    pub stats: VadStats,
}

impl ReplyCapture {
    pub fn heard_speech(&self) -> bool {
        self.first_speech_ms.is_some()
    }
}

/// Synthesize and send one caller utterance; returns the synthesized PCM.
pub async fn say(ctx: &mut ProbeContext<'_>, text: &str) -> Result<Vec<i16>, Error> {
    let pcm = ctx.tts.synthesize(text, None).await?;
    ctx.channel.send_audio(&pcm).await?;
    Ok(pcm)
}

/// Drain the agent's reply until the VAD calls end of turn, the channel
/// drops, or the deadline passes.
pub async fn drain_reply(
    channel: &mut AudioChannel,
    silence_threshold_ms: u64,
    deadline: Duration,
) -> Result<ReplyCapture, Error> {
    let mut vad = VadSession::new(VadConfig {
        silence_threshold_ms,
        ..Default::default()
    });
    let mut capture = ReplyCapture::default();
    let start = Instant::now();

    loop {
        let remaining = deadline.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            break;
        }

        match tokio::time::timeout(remaining, channel.recv()).await {
            Err(_) => break,
            Ok(None) => {
                capture.disconnected = true;
                break;
            }
            Ok(Some(ChannelEvent::Audio(pcm))) => {
                if capture.first_chunk_ms.is_none() {
                    capture.first_chunk_ms = Some(start.elapsed().as_millis() as u64);
                }
                capture.audio.extend_from_slice(&pcm);

                let state = vad.process(&pcm).map_err(Error::from)?;
                if capture.first_speech_ms.is_none() && vad.stats().first_speech_at_ms.is_some() {
                    capture.first_speech_ms = Some(start.elapsed().as_millis() as u64);
                }
                if state == VadState::EndOfTurn {
                    capture.ended_by_vad = true;
                    break;
                }
            }
            Ok(Some(ChannelEvent::Disconnected)) => {
                capture.disconnected = true;
                break;
            }
            Ok(Some(ChannelEvent::Error(e))) => {
                return Err(Error::Transport(e));
            }
        }
    }

    capture.stats = vad.stats();
    Ok(capture)
}

/// Listen for a fixed window and report what the VAD saw. Used where the
/// interesting signal is unprompted agent speech rather than a reply.
pub async fn observe_window(
    channel: &mut AudioChannel,
    window: Duration,
) -> Result<ReplyCapture, Error> {
    // A threshold longer than the window disables end-of-turn exits.
    drain_reply(channel, window.as_millis() as u64 + 1000, window).await
}

/// Wrap a metric map and elapsed time into a result.
pub fn finish(
    name: &str,
    passed: bool,
    metrics: Metrics,
    started: Instant,
    error: Option<String>,
) -> AudioTestResult {
    AudioTestResult {
        name: name.to_string(),
        status: TestStatus::from_bool(passed),
        metrics,
        duration_ms: started.elapsed().as_millis() as u64,
        error,
    }
}

/// p95 over a latency sample (nearest-rank).
pub fn p95(samples: &[u64]) -> Option<u64> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    let rank = ((sorted.len() as f64) * 0.95).ceil() as usize;
    Some(sorted[rank.saturating_sub(1).min(sorted.len() - 1)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p95_nearest_rank() {
        assert_eq!(p95(&[]), None);
        assert_eq!(p95(&[100]), Some(100));

        let samples: Vec<u64> = (1..=100).collect();
        assert_eq!(p95(&samples), Some(95));

        let small = [400, 300, 900, 500];
        assert_eq!(p95(&small), Some(900));
    }
}
