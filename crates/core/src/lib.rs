//! Core types for the VoiceCI test orchestrator
//!
//! This crate provides the foundational types used across all other crates:
//! - Audio codec utilities (PCM ↔ μ-law, resampling)
//! - Run and test-spec data model
//! - Test results, transcripts, and observed tool calls
//! - Adapter configuration variants
//! - Error types

pub mod adapter;
pub mod audio;
pub mod error;
pub mod result;
pub mod run;
pub mod spec;

pub use adapter::AdapterConfig;
pub use error::{Error, ErrorKind, Result};
pub use result::{
    AudioTestResult, ConversationTestResult, EvalResult, MetricValue, Metrics, ObservedToolCall,
    TestResult, TestStatus, Turn, TurnRole,
};
pub use run::{ExecuteTestsResult, Run, RunAggregate, RunSource, RunStatus};
pub use spec::{AudioTestName, ConversationScenario, TestSpec, ThresholdOverrides};
