//! Shared error type
//!
//! Crate-local errors (pipeline, channel, llm, ...) convert into this type at
//! crate seams. `ErrorKind` is the propagation-policy classification the RPC
//! surface and the executor key their handling off.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Classification used by the propagation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or mutually incompatible inputs.
    Validation,
    /// Bad or missing bearer token, unknown key.
    Auth,
    /// Platform config required but absent; provider/adapter mismatch;
    /// required env var not set on the server.
    ConfigMissing,
    /// TTS/STT/judge/LLM/control-plane/object-store failure.
    UpstreamUnavailable,
    /// Health wait, VAD wait, machine wait, builder wait.
    Timeout,
    /// Agent WS/WebRTC/SIP disconnect or refusal.
    Transport,
    /// Bug-class unexpected failures.
    Internal,
}

/// Top-level error for the orchestrator.
#[derive(Error, Debug)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("configuration missing: {0}")]
    ConfigMissing(String),

    #[error("upstream unavailable: {0}")]
    Upstream(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Auth(_) => ErrorKind::Auth,
            Error::ConfigMissing(_) => ErrorKind::ConfigMissing,
            Error::Upstream(_) => ErrorKind::UpstreamUnavailable,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Transport(_) => ErrorKind::Transport,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(Error::Validation("x".into()).kind(), ErrorKind::Validation);
        assert_eq!(Error::Timeout("x".into()).kind(), ErrorKind::Timeout);
    }
}
