//! Audio pipeline: voice activity detection, voice I/O, and signal tooling
//!
//! Everything the probes and the conversation engine consume that is not a
//! transport: the VAD state machine, HTTP TTS/STT providers, deterministic
//! noise generators, and post-hoc audio analysis.

pub mod analysis;
pub mod signals;
pub mod stt;
pub mod tts;
pub mod vad;

pub use analysis::AudioAnalysis;
pub use stt::{SttClient, Transcription};
pub use tts::TtsClient;
pub use vad::{SpeechSegment, VadConfig, VadSession, VadState, VadStats};

use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("VAD error: {0}")]
    Vad(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("STT error: {0}")]
    Stt(String),

    #[error("Provider returned invalid response: {0}")]
    InvalidResponse(String),

    #[error("Provider request timed out")]
    Timeout,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PipelineError::Timeout
        } else {
            PipelineError::InvalidResponse(err.to_string())
        }
    }
}

impl From<PipelineError> for voiceci_core::Error {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Timeout => voiceci_core::Error::Timeout("voice provider".into()),
            other => voiceci_core::Error::Upstream(other.to_string()),
        }
    }
}
