//! Test results, transcripts, and observed tool calls

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Outcome of a single test or of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pass,
    Fail,
}

impl TestStatus {
    pub fn passed(self) -> bool {
        matches!(self, TestStatus::Pass)
    }

    pub fn from_bool(passed: bool) -> Self {
        if passed {
            TestStatus::Pass
        } else {
            TestStatus::Fail
        }
    }
}

/// Metric values are numbers or flags, keyed by probe-specific names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Bool(bool),
    Number(f64),
}

impl From<bool> for MetricValue {
    fn from(v: bool) -> Self {
        MetricValue::Bool(v)
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Number(v)
    }
}

impl From<u64> for MetricValue {
    fn from(v: u64) -> Self {
        MetricValue::Number(v as f64)
    }
}

impl MetricValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Number(n) => Some(*n),
            MetricValue::Bool(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetricValue::Bool(b) => Some(*b),
            MetricValue::Number(_) => None,
        }
    }
}

pub type Metrics = BTreeMap<String, MetricValue>;

/// Who spoke a transcript turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    Caller,
    Agent,
}

/// One transcript turn with its latency breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
    /// Milliseconds since the conversation started.
    pub timestamp_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_duration_ms: Option<u64>,
    /// Send-completion to first agent audio byte.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttfb_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stt_confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stt_ms: Option<u64>,
}

/// A tool invocation the agent surfaced during a call, in observation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservedToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub successful: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

/// Judge verdict for one yes/no eval question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalResult {
    pub question: String,
    /// Whether the question applied to this conversation at all.
    pub relevant: bool,
    /// Verdict; absent when the question was not relevant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passed: Option<bool>,
    pub reasoning: String,
}

impl EvalResult {
    /// A relevant eval fails the test iff its verdict is negative.
    pub fn failed(&self) -> bool {
        self.relevant && self.passed == Some(false)
    }
}

/// Result of one audio-infrastructure probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioTestResult {
    pub name: String,
    pub status: TestStatus,
    pub metrics: Metrics,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AudioTestResult {
    pub fn failed(name: impl Into<String>, duration_ms: u64, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: TestStatus::Fail,
            metrics: Metrics::new(),
            duration_ms,
            error: Some(error.into()),
        }
    }
}

/// Result of one LLM-judged conversation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTestResult {
    pub caller_prompt: String,
    pub status: TestStatus,
    pub transcript: Vec<Turn>,
    pub eval_results: Vec<EvalResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_eval_results: Option<Vec<EvalResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_tool_calls: Option<Vec<ObservedToolCall>>,
    pub duration_ms: u64,
    pub metrics: Metrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
}

/// A completed sub-test, streamed to the caller as it finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "test_type", rename_all = "snake_case")]
pub enum TestResult {
    Audio(AudioTestResult),
    Conversation(ConversationTestResult),
}

impl TestResult {
    pub fn status(&self) -> TestStatus {
        match self {
            TestResult::Audio(r) => r.status,
            TestResult::Conversation(r) => r.status,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TestResult::Audio(r) => &r.name,
            TestResult::Conversation(r) => &r.caller_prompt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_value_serialises_untagged() {
        let mut m = Metrics::new();
        m.insert("p95_ms".into(), 812.0.into());
        m.insert("responded".into(), true.into());
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["p95_ms"], serde_json::json!(812.0));
        assert_eq!(json["responded"], serde_json::json!(true));
    }

    #[test]
    fn eval_failure_requires_relevance() {
        let irrelevant = EvalResult {
            question: "q".into(),
            relevant: false,
            passed: None,
            reasoning: "n/a".into(),
        };
        assert!(!irrelevant.failed());

        let failing = EvalResult {
            question: "q".into(),
            relevant: true,
            passed: Some(false),
            reasoning: "missed".into(),
        };
        assert!(failing.failed());
    }

    #[test]
    fn test_result_tags_by_type() {
        let result = TestResult::Audio(AudioTestResult {
            name: "echo".into(),
            status: TestStatus::Pass,
            metrics: Metrics::new(),
            duration_ms: 10,
            error: None,
        });
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["test_type"], "audio");
    }
}
