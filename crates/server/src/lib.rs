//! VoiceCI server
//!
//! The RPC surface (session-aware tool-call protocol over JSON-RPC with a
//! server-push SSE stream), the dashboard REST endpoints, and the internal
//! callback sink that remote runners and image builders report to.

pub mod auth;
pub mod callback;
pub mod docs;
pub mod http;
pub mod loadtest;
pub mod metrics;
pub mod push;
pub mod rpc;
pub mod sessions;
pub mod state;
pub mod tools;
pub mod upload;

pub use http::create_router;
pub use metrics::init_metrics;
pub use sessions::{PushEvent, SessionRegistry};
pub use state::AppState;

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("configuration missing: {0}")]
    ConfigMissing(String),

    #[error("session error: {0}")]
    Session(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("scheduler error: {0}")]
    Scheduler(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// JSON-RPC error code for the structured error surface.
    pub fn rpc_code(&self) -> i64 {
        match self {
            ServerError::Validation(_) => -32602,
            ServerError::Auth(_) => -32001,
            ServerError::ConfigMissing(_) => -32002,
            ServerError::Session(_) => -32000,
            ServerError::Persistence(_) | ServerError::Scheduler(_) | ServerError::Internal(_) => {
                -32603
            }
        }
    }
}

impl From<voiceci_persistence::PersistenceError> for ServerError {
    fn from(err: voiceci_persistence::PersistenceError) -> Self {
        ServerError::Persistence(err.to_string())
    }
}

impl From<voiceci_scheduler::SchedulerError> for ServerError {
    fn from(err: voiceci_scheduler::SchedulerError) -> Self {
        ServerError::Scheduler(err.to_string())
    }
}

impl From<voiceci_core::Error> for ServerError {
    fn from(err: voiceci_core::Error) -> Self {
        use voiceci_core::ErrorKind;
        match err.kind() {
            ErrorKind::Validation => ServerError::Validation(err.to_string()),
            ErrorKind::Auth => ServerError::Auth(err.to_string()),
            ErrorKind::ConfigMissing => ServerError::ConfigMissing(err.to_string()),
            _ => ServerError::Internal(err.to_string()),
        }
    }
}
