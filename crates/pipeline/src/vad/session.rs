//! VAD state machine

use voiceci_core::audio;

use crate::PipelineError;

/// Internal processing rate. 24 kHz input is downsampled to this.
const VAD_RATE_HZ: u32 = 16_000;
/// Frame length in milliseconds.
const FRAME_MS: u64 = 30;
/// Samples per frame at the input (24 kHz) and processing (16 kHz) rates.
const FRAME_SAMPLES_24K: usize = 720;
const FRAME_SAMPLES_16K: usize = 480;

/// VAD configuration
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Speech probability threshold (0.0 - 1.0)
    pub threshold: f32,
    /// Energy floor in dBFS below which a frame is silence outright
    pub energy_floor_db: f32,
    /// Consecutive voiced frames required to confirm speech
    pub min_speech_frames: usize,
    /// Cumulative silence after speech that ends the turn
    pub silence_threshold_ms: u64,
    /// Silence run that closes a segment in batch detection
    pub segment_gap_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            energy_floor_db: -50.0,
            min_speech_frames: 3,
            silence_threshold_ms: 1000,
            segment_gap_ms: 300,
        }
    }
}

/// States of the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    Silence,
    Speech,
    /// Speech has occurred and cumulative silence reached the threshold.
    /// Latched until `reset()`.
    EndOfTurn,
}

/// Accumulated turn statistics, consumed by the conversation engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct VadStats {
    pub speech_segments: u32,
    pub total_speech_ms: u64,
    /// Longest silence gap that was followed by more speech.
    pub max_internal_silence_ms: u64,
    pub first_speech_at_ms: Option<u64>,
}

/// A contiguous stretch of speech in a batch buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechSegment {
    pub start_ms: u64,
    pub end_ms: u64,
}

/// Streaming VAD over 24 kHz PCM chunks of arbitrary length.
pub struct VadSession {
    config: VadConfig,
    leftover: Vec<i16>,
    state: VadState,
    pending_speech_frames: usize,
    speech_seen: bool,
    silence_run_ms: u64,
    processed_ms: u64,
    stats: VadStats,
}

impl VadSession {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            leftover: Vec::with_capacity(FRAME_SAMPLES_24K * 4),
            state: VadState::Silence,
            pending_speech_frames: 0,
            speech_seen: false,
            silence_run_ms: 0,
            processed_ms: 0,
            stats: VadStats::default(),
        }
    }

    /// Adjust the end-of-turn threshold mid-stream (adaptive endpointing).
    pub fn set_silence_threshold_ms(&mut self, threshold_ms: u64) {
        self.config.silence_threshold_ms = threshold_ms;
    }

    pub fn silence_threshold_ms(&self) -> u64 {
        self.config.silence_threshold_ms
    }

    /// Feed a 24 kHz chunk; returns the state after consuming whole frames.
    /// Leftover samples are buffered for the next call.
    pub fn process(&mut self, chunk: &[i16]) -> Result<VadState, PipelineError> {
        self.leftover.extend_from_slice(chunk);

        while self.leftover.len() >= FRAME_SAMPLES_24K {
            let frame: Vec<i16> = self.leftover.drain(..FRAME_SAMPLES_24K).collect();
            let frame = audio::resample(&frame, audio::CANONICAL_RATE_HZ, VAD_RATE_HZ);
            let voiced = classify_frame(&frame, &self.config)?;
            self.advance(voiced);
        }

        Ok(self.state)
    }

    pub fn state(&self) -> VadState {
        self.state
    }

    pub fn stats(&self) -> VadStats {
        self.stats
    }

    /// Milliseconds of audio consumed so far (whole frames).
    pub fn processed_ms(&self) -> u64 {
        self.processed_ms
    }

    pub fn reset(&mut self) {
        self.leftover.clear();
        self.state = VadState::Silence;
        self.pending_speech_frames = 0;
        self.speech_seen = false;
        self.silence_run_ms = 0;
        self.processed_ms = 0;
        self.stats = VadStats::default();
    }

    fn advance(&mut self, voiced: bool) {
        self.processed_ms += FRAME_MS;

        if self.state == VadState::EndOfTurn {
            return;
        }

        if voiced {
            self.pending_speech_frames += 1;

            if self.state != VadState::Speech
                && self.pending_speech_frames >= self.config.min_speech_frames
            {
                // Speech confirmed: a preceding silence run was internal.
                if self.speech_seen && self.silence_run_ms > 0 {
                    self.stats.max_internal_silence_ms =
                        self.stats.max_internal_silence_ms.max(self.silence_run_ms);
                }
                self.silence_run_ms = 0;
                self.state = VadState::Speech;
                self.speech_seen = true;
                self.stats.speech_segments += 1;
                let onset = self.pending_speech_frames as u64 * FRAME_MS;
                if self.stats.first_speech_at_ms.is_none() {
                    self.stats.first_speech_at_ms = Some(self.processed_ms.saturating_sub(onset));
                }
                self.stats.total_speech_ms += onset;
            } else if self.state == VadState::Speech {
                self.stats.total_speech_ms += FRAME_MS;
            }
        } else {
            self.pending_speech_frames = 0;
            if self.state == VadState::Speech {
                self.state = VadState::Silence;
            }
            if self.speech_seen {
                self.silence_run_ms += FRAME_MS;
                if self.silence_run_ms >= self.config.silence_threshold_ms {
                    self.state = VadState::EndOfTurn;
                }
            }
        }
    }
}

/// Per-frame voice probability from the energy envelope, thresholded.
fn classify_frame(frame_16k: &[i16], config: &VadConfig) -> Result<bool, PipelineError> {
    if frame_16k.is_empty() {
        return Err(PipelineError::Vad("empty frame".into()));
    }

    let rms = audio::rms(frame_16k);
    let energy_db = if rms > 0.0 {
        20.0 * (rms / 32_768.0).log10() as f32
    } else {
        -96.0
    };

    if energy_db < config.energy_floor_db {
        return Ok(false);
    }

    let probability = ((energy_db - config.energy_floor_db) / 30.0).clamp(0.0, 1.0);
    Ok(probability >= config.threshold)
}

/// Batch form: ordered speech segments across a whole 16 kHz buffer.
pub fn detect_segments(
    samples_16k: &[i16],
    config: &VadConfig,
) -> Result<Vec<SpeechSegment>, PipelineError> {
    let mut segments = Vec::new();
    let mut current: Option<SpeechSegment> = None;
    let mut pending = 0usize;
    let mut silence_run_ms = 0u64;
    let mut t_ms = 0u64;

    for frame in samples_16k.chunks(FRAME_SAMPLES_16K) {
        if frame.len() < FRAME_SAMPLES_16K {
            break;
        }
        let voiced = classify_frame(frame, config)?;

        if voiced {
            pending += 1;
            silence_run_ms = 0;
            if current.is_none() && pending >= config.min_speech_frames {
                current = Some(SpeechSegment {
                    start_ms: t_ms.saturating_sub((pending as u64 - 1) * FRAME_MS),
                    end_ms: t_ms + FRAME_MS,
                });
            } else if let Some(seg) = current.as_mut() {
                seg.end_ms = t_ms + FRAME_MS;
            }
        } else {
            pending = 0;
            if current.is_some() {
                silence_run_ms += FRAME_MS;
                if silence_run_ms >= config.segment_gap_ms {
                    if let Some(segment) = current.take() {
                        segments.push(segment);
                    }
                    silence_run_ms = 0;
                }
            }
        }

        t_ms += FRAME_MS;
    }

    if let Some(seg) = current {
        segments.push(seg);
    }

    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 24 kHz sine burst at speech-like amplitude.
    fn speech_24k(ms: u64) -> Vec<i16> {
        let n = audio::samples_for_ms(ms, audio::CANONICAL_RATE_HZ);
        (0..n)
            .map(|i| {
                let t = i as f64 / audio::CANONICAL_RATE_HZ as f64;
                ((t * 300.0 * 2.0 * std::f64::consts::PI).sin() * 12_000.0) as i16
            })
            .collect()
    }

    fn silence_24k(ms: u64) -> Vec<i16> {
        vec![0i16; audio::samples_for_ms(ms, audio::CANONICAL_RATE_HZ)]
    }

    #[test]
    fn silence_never_leaves_silence() {
        let mut vad = VadSession::new(VadConfig::default());
        let state = vad.process(&silence_24k(2000)).unwrap();
        assert_eq!(state, VadState::Silence);
        assert!(vad.stats().first_speech_at_ms.is_none());
    }

    #[test]
    fn speech_is_detected() {
        let mut vad = VadSession::new(VadConfig::default());
        let state = vad.process(&speech_24k(300)).unwrap();
        assert_eq!(state, VadState::Speech);
        assert_eq!(vad.stats().speech_segments, 1);
        assert!(vad.stats().total_speech_ms >= 200);
    }

    #[test]
    fn end_of_turn_hysteresis() {
        let threshold = 600u64;
        let config = VadConfig {
            silence_threshold_ms: threshold,
            ..Default::default()
        };

        // Silence strictly below the threshold must not end the turn.
        let mut vad = VadSession::new(config.clone());
        vad.process(&speech_24k(600)).unwrap();
        let state = vad.process(&silence_24k(threshold - 60)).unwrap();
        assert_ne!(state, VadState::EndOfTurn);

        // Silence at/above the threshold must.
        let mut vad = VadSession::new(config);
        vad.process(&speech_24k(600)).unwrap();
        let state = vad.process(&silence_24k(threshold + 60)).unwrap();
        assert_eq!(state, VadState::EndOfTurn);
    }

    #[test]
    fn end_of_turn_requires_prior_speech() {
        let mut vad = VadSession::new(VadConfig {
            silence_threshold_ms: 600,
            ..Default::default()
        });
        let state = vad.process(&silence_24k(5000)).unwrap();
        assert_eq!(state, VadState::Silence);
    }

    #[test]
    fn internal_silence_is_tracked() {
        let mut vad = VadSession::new(VadConfig {
            silence_threshold_ms: 2000,
            ..Default::default()
        });
        vad.process(&speech_24k(300)).unwrap();
        vad.process(&silence_24k(900)).unwrap();
        vad.process(&speech_24k(300)).unwrap();

        let stats = vad.stats();
        assert_eq!(stats.speech_segments, 2);
        assert!(stats.max_internal_silence_ms >= 870);
        assert!(stats.max_internal_silence_ms <= 930);
    }

    #[test]
    fn frame_boundaries_survive_chunking() {
        // Feed the same audio in awkward chunk sizes; result must match.
        let audio_in: Vec<i16> = [speech_24k(600), silence_24k(700), speech_24k(300)].concat();

        let mut whole = VadSession::new(VadConfig::default());
        whole.process(&audio_in).unwrap();

        let mut chunked = VadSession::new(VadConfig::default());
        for chunk in audio_in.chunks(331) {
            chunked.process(chunk).unwrap();
        }

        assert_eq!(whole.state(), chunked.state());
        assert_eq!(
            whole.stats().speech_segments,
            chunked.stats().speech_segments
        );
    }

    #[test]
    fn adaptive_threshold_takes_effect() {
        let mut vad = VadSession::new(VadConfig {
            silence_threshold_ms: 600,
            ..Default::default()
        });
        vad.set_silence_threshold_ms(1500);
        vad.process(&speech_24k(300)).unwrap();
        let state = vad.process(&silence_24k(900)).unwrap();
        assert_ne!(state, VadState::EndOfTurn);
        let state = vad.process(&silence_24k(700)).unwrap();
        assert_eq!(state, VadState::EndOfTurn);
    }

    #[test]
    fn batch_segments_ordered() {
        let speech_16k = |ms: u64| -> Vec<i16> {
            let n = audio::samples_for_ms(ms, 16_000);
            (0..n)
                .map(|i| {
                    let t = i as f64 / 16_000.0;
                    ((t * 300.0 * 2.0 * std::f64::consts::PI).sin() * 12_000.0) as i16
                })
                .collect()
        };
        let silence_16k = |ms: u64| vec![0i16; audio::samples_for_ms(ms, 16_000)];

        let buf = [
            silence_16k(300),
            speech_16k(600),
            silence_16k(600),
            speech_16k(450),
        ]
        .concat();

        let segments = detect_segments(&buf, &VadConfig::default()).unwrap();
        assert_eq!(segments.len(), 2);
        assert!(segments[0].start_ms >= 240 && segments[0].start_ms <= 360);
        assert!(segments[0].end_ms <= 960);
        assert!(segments[1].start_ms >= segments[0].end_ms);
    }
}
