//! LLM integration
//!
//! Two consumers share one Messages-API client: the scripted caller that
//! drives conversation scenarios, and the judge that evaluates transcripts
//! and observed tool calls after the call ends.

pub mod caller;
pub mod client;
pub mod judge;

pub use caller::{CallerScript, CallerTurn};
pub use client::{LlmClient, LlmConfig, Message, Role};
pub use judge::Judge;

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout")]
    Timeout,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for voiceci_core::Error {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Timeout => voiceci_core::Error::Timeout("judge LLM".into()),
            other => voiceci_core::Error::Upstream(other.to_string()),
        }
    }
}
