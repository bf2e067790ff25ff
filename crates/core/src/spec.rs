//! Test specification: which probes and scenarios a run executes

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The fixed set of audio-infrastructure probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioTestName {
    Echo,
    Ttfb,
    BargeIn,
    SilenceHandling,
    ConnectionStability,
    ResponseCompleteness,
    NoiseResilience,
    Endpointing,
    AudioQuality,
}

impl AudioTestName {
    pub const ALL: [AudioTestName; 9] = [
        AudioTestName::Echo,
        AudioTestName::Ttfb,
        AudioTestName::BargeIn,
        AudioTestName::SilenceHandling,
        AudioTestName::ConnectionStability,
        AudioTestName::ResponseCompleteness,
        AudioTestName::NoiseResilience,
        AudioTestName::Endpointing,
        AudioTestName::AudioQuality,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AudioTestName::Echo => "echo",
            AudioTestName::Ttfb => "ttfb",
            AudioTestName::BargeIn => "barge_in",
            AudioTestName::SilenceHandling => "silence_handling",
            AudioTestName::ConnectionStability => "connection_stability",
            AudioTestName::ResponseCompleteness => "response_completeness",
            AudioTestName::NoiseResilience => "noise_resilience",
            AudioTestName::Endpointing => "endpointing",
            AudioTestName::AudioQuality => "audio_quality",
        }
    }
}

impl std::fmt::Display for AudioTestName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-run probe threshold overrides: `{ test_name: { key: value } }`.
pub type ThresholdOverrides = BTreeMap<String, BTreeMap<String, serde_json::Value>>;

/// One LLM-judged conversation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationScenario {
    /// Persona prompt driving the scripted caller.
    pub caller_prompt: String,
    /// Hard cap on dialog turns, 1..=50.
    pub max_turns: u32,
    /// Starting end-of-turn silence threshold; the engine adapts from here.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_silence_threshold_ms: Option<u64>,
    /// Yes/no questions judged against the transcript.
    #[serde(default)]
    pub behavioral_evals: Vec<String>,
    /// Yes/no questions judged against observed tool calls.
    #[serde(default)]
    pub tool_call_evals: Vec<String>,
}

pub const MAX_TURNS_LIMIT: u32 = 50;

/// What a run executes: audio probes and/or conversation scenarios.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestSpec {
    #[serde(default)]
    pub audio_tests: Vec<AudioTestName>,
    #[serde(default)]
    pub conversation_tests: Vec<ConversationScenario>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thresholds: Option<ThresholdOverrides>,
}

impl TestSpec {
    pub fn test_count(&self) -> usize {
        self.audio_tests.len() + self.conversation_tests.len()
    }

    /// At least one test, and every scenario within turn bounds.
    pub fn validate(&self) -> Result<(), Error> {
        if self.audio_tests.is_empty() && self.conversation_tests.is_empty() {
            return Err(Error::Validation(
                "test spec requires at least one audio test or conversation test".into(),
            ));
        }
        for scenario in &self.conversation_tests {
            if scenario.max_turns == 0 || scenario.max_turns > MAX_TURNS_LIMIT {
                return Err(Error::Validation(format!(
                    "max_turns must be within 1..={}, got {}",
                    MAX_TURNS_LIMIT, scenario.max_turns
                )));
            }
            if scenario.caller_prompt.trim().is_empty() {
                return Err(Error::Validation("caller_prompt must not be empty".into()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario(max_turns: u32) -> ConversationScenario {
        ConversationScenario {
            caller_prompt: "You are Sarah booking a haircut".into(),
            max_turns,
            initial_silence_threshold_ms: None,
            behavioral_evals: vec!["Did the agent collect the caller's name?".into()],
            tool_call_evals: vec![],
        }
    }

    #[test]
    fn empty_spec_rejected() {
        assert!(TestSpec::default().validate().is_err());
    }

    #[test]
    fn max_turns_bounds_enforced() {
        let spec = TestSpec {
            conversation_tests: vec![scenario(0)],
            ..Default::default()
        };
        assert!(spec.validate().is_err());

        let spec = TestSpec {
            conversation_tests: vec![scenario(51)],
            ..Default::default()
        };
        assert!(spec.validate().is_err());

        let spec = TestSpec {
            conversation_tests: vec![scenario(8)],
            ..Default::default()
        };
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn audio_test_names_serialise_snake_case() {
        let json = serde_json::to_string(&AudioTestName::BargeIn).unwrap();
        assert_eq!(json, "\"barge_in\"");
        let parsed: AudioTestName = serde_json::from_str("\"noise_resilience\"").unwrap();
        assert_eq!(parsed, AudioTestName::NoiseResilience);
    }
}
