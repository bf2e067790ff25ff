//! The turn-taking loop

use std::time::{Duration, Instant};

use voiceci_channel::{AudioChannel, ChannelEvent};
use voiceci_core::{
    audio, ConversationScenario, ConversationTestResult, Metrics, TestStatus, Turn, TurnRole,
};
use voiceci_llm::{CallerScript, Judge, LlmClient};
use voiceci_pipeline::vad::{VadConfig, VadSession, VadState};
use voiceci_pipeline::{SttClient, TtsClient};
use voiceci_probes::common::drain_reply;

use crate::evals;

pub const SILENCE_THRESHOLD_FLOOR_MS: u64 = 600;
pub const SILENCE_THRESHOLD_CEILING_MS: u64 = 5000;
const DEFAULT_SILENCE_THRESHOLD_MS: u64 = 1000;

/// Threshold grows when the agent's longest pause crowds it this closely.
const THRESHOLD_CROWDING_MS: u64 = 200;
const THRESHOLD_GROW_STEP_MS: u64 = 500;
const THRESHOLD_DRIFT_STEP_MS: u64 = 250;
/// How long to listen for a resumed response after end-of-turn fires.
const CONTINUATION_PROBE_MS: u64 = 1000;

pub struct ConversationEngine {
    tts: TtsClient,
    stt: SttClient,
    llm: LlmClient,
    judge: Judge,
    receive_timeout: Duration,
}

impl ConversationEngine {
    pub fn new(
        tts: TtsClient,
        stt: SttClient,
        llm: LlmClient,
        receive_timeout: Duration,
    ) -> Self {
        let judge = Judge::new(llm.clone());
        Self {
            tts,
            stt,
            llm,
            judge,
            receive_timeout,
        }
    }

    /// Run one scenario over a connected channel and return the judged
    /// result. Turn-level provider failures fail this test only; the caller
    /// keeps running its other tests.
    pub async fn execute(
        &self,
        scenario: &ConversationScenario,
        channel: &mut AudioChannel,
    ) -> ConversationTestResult {
        let started = Instant::now();

        let (transcript, final_threshold_ms, error_text) =
            self.run_dialog(scenario, channel).await;

        let observed_calls = channel.call_data().await;
        let observed_calls = if observed_calls.is_empty() {
            None
        } else {
            Some(observed_calls)
        };

        if let Some(error_text) = error_text {
            return ConversationTestResult {
                caller_prompt: scenario.caller_prompt.clone(),
                status: TestStatus::Fail,
                transcript,
                eval_results: Vec::new(),
                tool_call_eval_results: None,
                observed_tool_calls: observed_calls,
                duration_ms: started.elapsed().as_millis() as u64,
                metrics: Metrics::new(),
                error_text: Some(error_text),
            };
        }

        let judged = evals::judge_scenario(
            &self.judge,
            scenario,
            &transcript,
            observed_calls.as_deref().unwrap_or(&[]),
        )
        .await;

        let (eval_results, tool_call_eval_results, passed, error_text) = match judged {
            Ok(outcome) => (
                outcome.eval_results,
                outcome.tool_call_eval_results,
                outcome.passed,
                None,
            ),
            Err(e) => (Vec::new(), None, false, Some(e.to_string())),
        };

        let mut metrics = Metrics::new();
        metrics.insert("turns".into(), (transcript.len() as u64).into());
        metrics.insert(
            "agent_turns".into(),
            (transcript
                .iter()
                .filter(|t| t.role == TurnRole::Agent)
                .count() as u64)
                .into(),
        );
        metrics.insert("final_silence_threshold_ms".into(), final_threshold_ms.into());
        let ttfbs: Vec<u64> = transcript.iter().filter_map(|t| t.ttfb_ms).collect();
        if !ttfbs.is_empty() {
            metrics.insert(
                "avg_ttfb_ms".into(),
                (ttfbs.iter().sum::<u64>() / ttfbs.len() as u64).into(),
            );
        }

        ConversationTestResult {
            caller_prompt: scenario.caller_prompt.clone(),
            status: TestStatus::from_bool(passed),
            transcript,
            eval_results,
            tool_call_eval_results,
            observed_tool_calls: observed_calls,
            duration_ms: started.elapsed().as_millis() as u64,
            metrics,
            error_text,
        }
    }

    /// The dialog proper. Returns the transcript, the final silence
    /// threshold, and an error if a turn died.
    async fn run_dialog(
        &self,
        scenario: &ConversationScenario,
        channel: &mut AudioChannel,
    ) -> (Vec<Turn>, u64, Option<String>) {
        let caller = CallerScript::new(self.llm.clone(), &scenario.caller_prompt);
        let conversation_start = Instant::now();

        let initial_threshold_ms = scenario
            .initial_silence_threshold_ms
            .unwrap_or(DEFAULT_SILENCE_THRESHOLD_MS)
            .clamp(SILENCE_THRESHOLD_FLOOR_MS, SILENCE_THRESHOLD_CEILING_MS);
        let mut threshold_ms = initial_threshold_ms;

        let mut transcript: Vec<Turn> = Vec::new();

        for turn_index in 0..scenario.max_turns {
            // 1. Caller text from the persona + transcript so far.
            let caller_turn = match caller.next_utterance(&transcript).await {
                Ok(turn) => turn,
                Err(e) => {
                    return (
                        transcript,
                        threshold_ms,
                        Some(format!("caller generation failed: {}", e)),
                    )
                }
            };

            if caller_turn.end_call && caller_turn.utterance.trim().is_empty() {
                break;
            }

            // 2. Synthesize and send, recording TTS wall time.
            let tts_start = Instant::now();
            let caller_pcm = match self.tts.synthesize(&caller_turn.utterance, None).await {
                Ok(pcm) => pcm,
                Err(e) => {
                    return (
                        transcript,
                        threshold_ms,
                        Some(format!("tts failed: {}", e)),
                    )
                }
            };
            let tts_ms = tts_start.elapsed().as_millis() as u64;

            if let Err(e) = channel.send_audio(&caller_pcm).await {
                return (
                    transcript,
                    threshold_ms,
                    Some(format!("send failed: {}", e)),
                );
            }

            transcript.push(Turn {
                role: TurnRole::Caller,
                text: caller_turn.utterance.clone(),
                timestamp_ms: conversation_start.elapsed().as_millis() as u64,
                audio_duration_ms: Some(audio::duration_ms(
                    caller_pcm.len(),
                    audio::CANONICAL_RATE_HZ,
                )),
                ttfb_ms: None,
                stt_confidence: None,
                tts_ms: Some(tts_ms),
                stt_ms: None,
            });

            if caller_turn.end_call {
                break;
            }

            // 3. Drain the agent's reply under the adaptive threshold.
            let mut reply = match drain_reply(channel, threshold_ms, self.receive_timeout).await {
                Ok(reply) => reply,
                Err(e) => {
                    return (
                        transcript,
                        threshold_ms,
                        Some(format!("agent audio wait failed: {}", e)),
                    )
                }
            };

            if reply.disconnected {
                tracing::info!(turn = turn_index, "agent disconnected mid-conversation");
                break;
            }

            // An agent pause longer than the threshold looks like end of
            // turn until the agent keeps talking. Peek briefly before
            // trusting the cut; a continuation marks the turn truncated.
            let mut truncated = false;
            if reply.ended_by_vad {
                match self.check_continuation(channel).await {
                    Ok(Some(continuation)) => {
                        truncated = true;
                        tracing::debug!(turn = turn_index, "agent resumed after end-of-turn");
                        reply.audio.extend_from_slice(&continuation);
                        match drain_reply(channel, threshold_ms, self.receive_timeout).await {
                            Ok(rest) => reply.audio.extend_from_slice(&rest.audio),
                            Err(e) => {
                                return (
                                    transcript,
                                    threshold_ms,
                                    Some(format!("agent audio wait failed: {}", e)),
                                )
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        return (
                            transcript,
                            threshold_ms,
                            Some(format!("agent audio wait failed: {}", e)),
                        )
                    }
                }
            }

            // 4. Transcribe and append the agent turn.
            if !reply.audio.is_empty() {
                let stt_start = Instant::now();
                match self.stt.transcribe(&reply.audio).await {
                    Ok(transcription) => {
                        transcript.push(Turn {
                            role: TurnRole::Agent,
                            text: transcription.text,
                            timestamp_ms: conversation_start.elapsed().as_millis() as u64,
                            audio_duration_ms: Some(audio::duration_ms(
                                reply.audio.len(),
                                audio::CANONICAL_RATE_HZ,
                            )),
                            ttfb_ms: reply.first_chunk_ms,
                            stt_confidence: Some(transcription.confidence),
                            tts_ms: None,
                            stt_ms: Some(stt_start.elapsed().as_millis() as u64),
                        });
                    }
                    Err(e) => {
                        return (
                            transcript,
                            threshold_ms,
                            Some(format!("stt failed: {}", e)),
                        )
                    }
                }
            }

            // 5. Adaptive threshold update. A truncated turn means the
            // agent's pause ran at least as long as the threshold.
            let observed_max_silence = if truncated {
                threshold_ms
            } else {
                reply.stats.max_internal_silence_ms
            };
            threshold_ms = next_threshold(threshold_ms, initial_threshold_ms, observed_max_silence);

            // 6. Judge-driven end condition.
            match self.judge.conversation_should_end(&transcript).await {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("end-condition check failed, continuing: {}", e);
                }
            }
        }

        (transcript, threshold_ms, None)
    }

    /// Short post-end-of-turn peek. Returns captured audio iff the agent
    /// starts speaking again inside the probe window.
    async fn check_continuation(
        &self,
        channel: &mut AudioChannel,
    ) -> Result<Option<Vec<i16>>, voiceci_core::Error> {
        let probe = Duration::from_millis(CONTINUATION_PROBE_MS);
        let mut vad = VadSession::new(VadConfig::default());
        let mut buffered: Vec<i16> = Vec::new();
        let start = Instant::now();

        while start.elapsed() < probe {
            let remaining = probe - start.elapsed();
            match tokio::time::timeout(remaining, channel.recv()).await {
                Ok(Some(ChannelEvent::Audio(pcm))) => {
                    buffered.extend_from_slice(&pcm);
                    if vad.process(&pcm)? == VadState::Speech {
                        return Ok(Some(buffered));
                    }
                }
                Ok(Some(ChannelEvent::Disconnected)) | Ok(None) => return Ok(None),
                Ok(Some(ChannelEvent::Error(e))) => {
                    return Err(voiceci_core::Error::Transport(e))
                }
                Err(_) => break,
            }
        }
        Ok(None)
    }
}

/// Clip-to-[600, 5000] adaptive update: grow when the agent's pauses crowd
/// the threshold, otherwise drift back toward the configured initial.
fn next_threshold(current_ms: u64, initial_ms: u64, observed_max_silence_ms: u64) -> u64 {
    let crowded = current_ms.saturating_sub(observed_max_silence_ms) <= THRESHOLD_CROWDING_MS
        && observed_max_silence_ms > 0;

    let next = if crowded {
        current_ms + THRESHOLD_GROW_STEP_MS
    } else if current_ms > initial_ms {
        current_ms.saturating_sub(THRESHOLD_DRIFT_STEP_MS).max(initial_ms)
    } else if current_ms < initial_ms {
        (current_ms + THRESHOLD_DRIFT_STEP_MS).min(initial_ms)
    } else {
        current_ms
    };

    next.clamp(SILENCE_THRESHOLD_FLOOR_MS, SILENCE_THRESHOLD_CEILING_MS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_grows_when_crowded() {
        // Agent pause ran right up against a 1000ms threshold.
        assert_eq!(next_threshold(1000, 1000, 1000), 1500);
        assert_eq!(next_threshold(1000, 1000, 850), 1500);
    }

    #[test]
    fn threshold_drifts_back_when_roomy() {
        // Longest pause nowhere near the grown threshold.
        assert_eq!(next_threshold(2000, 1000, 300), 1750);
        // Drift stops at the initial value.
        assert_eq!(next_threshold(1100, 1000, 300), 1000);
        assert_eq!(next_threshold(1000, 1000, 300), 1000);
    }

    #[test]
    fn threshold_stays_clamped() {
        assert_eq!(next_threshold(4800, 1000, 4700), 5000);
        assert_eq!(next_threshold(600, 600, 0), 600);
    }

    #[test]
    fn repeated_growth_reaches_ceiling_not_beyond() {
        let mut threshold = 1000;
        for _ in 0..12 {
            threshold = next_threshold(threshold, 1000, threshold);
        }
        assert_eq!(threshold, 5000);
    }
}
