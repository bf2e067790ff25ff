//! Run records: one accepted test request and its lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::result::{AudioTestResult, ConversationTestResult, TestStatus};
use crate::spec::TestSpec;

/// Where the agent under test comes from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "source_type", rename_all = "lowercase")]
pub enum RunSource {
    /// An uploaded project bundle executed on an ephemeral machine.
    Bundle {
        bundle_key: String,
        bundle_hash: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        lockfile_hash: Option<String>,
    },
    /// An agent already reachable over some transport.
    Remote,
}

/// queued → running → {pass, fail}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Pass,
    Fail,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Pass | RunStatus::Fail)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Pass => "pass",
            RunStatus::Fail => "fail",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(RunStatus::Queued),
            "running" => Some(RunStatus::Running),
            "pass" => Some(RunStatus::Pass),
            "fail" => Some(RunStatus::Fail),
            _ => None,
        }
    }

    /// Legal transitions: queued→running, running→pass/fail.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Queued, RunStatus::Running)
                | (RunStatus::Running, RunStatus::Pass)
                | (RunStatus::Running, RunStatus::Fail)
                | (RunStatus::Queued, RunStatus::Fail)
        )
    }
}

/// Aggregate counts for a finished run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunAggregate {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
}

/// One accepted test request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub key_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<Uuid>,
    pub source: RunSource,
    pub status: RunStatus,
    pub spec: TestSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<RunAggregate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

/// The executor's aggregate output; also the runner-callback body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteTestsResult {
    pub run_id: Uuid,
    pub status: TestStatus,
    pub audio_results: Vec<AudioTestResult>,
    pub conversation_results: Vec<ConversationTestResult>,
    pub total_duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
}

impl ExecuteTestsResult {
    pub fn aggregate(&self) -> RunAggregate {
        let audio_pass = self
            .audio_results
            .iter()
            .filter(|r| r.status.passed())
            .count() as u32;
        let conv_pass = self
            .conversation_results
            .iter()
            .filter(|r| r.status.passed())
            .count() as u32;
        let total = (self.audio_results.len() + self.conversation_results.len()) as u32;
        let passed = audio_pass + conv_pass;
        RunAggregate {
            total,
            passed,
            failed: total - passed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions() {
        assert!(RunStatus::Queued.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Pass));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Fail));
        assert!(!RunStatus::Pass.can_transition_to(RunStatus::Running));
        assert!(!RunStatus::Queued.can_transition_to(RunStatus::Pass));
    }

    #[test]
    fn status_round_trips_text() {
        for status in [
            RunStatus::Queued,
            RunStatus::Running,
            RunStatus::Pass,
            RunStatus::Fail,
        ] {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RunStatus::parse("cancelled"), None);
    }

    #[test]
    fn aggregate_counts() {
        let result = ExecuteTestsResult {
            run_id: Uuid::new_v4(),
            status: TestStatus::Fail,
            audio_results: vec![
                AudioTestResult {
                    name: "echo".into(),
                    status: TestStatus::Pass,
                    metrics: Default::default(),
                    duration_ms: 10,
                    error: None,
                },
                AudioTestResult::failed("ttfb", 12, "slow"),
            ],
            conversation_results: vec![],
            total_duration_ms: 22,
            error_text: None,
        };

        let agg = result.aggregate();
        assert_eq!(agg.total, 2);
        assert_eq!(agg.passed, 1);
        assert_eq!(agg.failed, 1);
    }
}
