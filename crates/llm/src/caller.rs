//! Scripted caller
//!
//! Turns a persona prompt plus the transcript so far into the next caller
//! utterance, and decides when the scenario has run its course.

use serde::Deserialize;

use voiceci_core::{Turn, TurnRole};

use crate::client::{LlmClient, Message};
use crate::LlmError;

const CALLER_SYSTEM: &str = "You are role-playing a caller on a phone call with a voice agent. \
Stay in character per the persona below. Speak naturally and briefly, one or two sentences, \
the way a real caller talks. Do not narrate or break character. \
Respond ONLY with a JSON object: {\"utterance\": \"what you say next\", \"end_call\": bool}. \
Set end_call to true when the persona's goal is met or the conversation has clearly concluded.";

/// What the caller says next, and whether the scenario should stop.
#[derive(Debug, Clone, Deserialize)]
pub struct CallerTurn {
    pub utterance: String,
    #[serde(default)]
    pub end_call: bool,
}

/// Drives one persona through a conversation.
pub struct CallerScript {
    client: LlmClient,
    persona_prompt: String,
}

impl CallerScript {
    pub fn new(client: LlmClient, persona_prompt: impl Into<String>) -> Self {
        Self {
            client,
            persona_prompt: persona_prompt.into(),
        }
    }

    /// Produce the next caller utterance from the transcript so far.
    pub async fn next_utterance(&self, transcript: &[Turn]) -> Result<CallerTurn, LlmError> {
        let mut prompt = format!("Persona:\n{}\n\n", self.persona_prompt);

        if transcript.is_empty() {
            prompt.push_str("The call just connected. Open the conversation.");
        } else {
            prompt.push_str("Conversation so far:\n");
            prompt.push_str(&render_transcript(transcript));
            prompt.push_str("\nProduce the caller's next utterance.");
        }

        let turn: CallerTurn = self
            .client
            .complete_json(Some(CALLER_SYSTEM), &[Message::user(prompt)])
            .await?;

        if turn.utterance.trim().is_empty() && !turn.end_call {
            return Err(LlmError::InvalidResponse("empty caller utterance".into()));
        }

        Ok(turn)
    }
}

/// Render a transcript as `caller:`/`agent:` lines for prompting.
pub fn render_transcript(transcript: &[Turn]) -> String {
    let mut out = String::new();
    for turn in transcript {
        let speaker = match turn.role {
            TurnRole::Caller => "caller",
            TurnRole::Agent => "agent",
        };
        out.push_str(speaker);
        out.push_str(": ");
        out.push_str(&turn.text);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(role: TurnRole, text: &str) -> Turn {
        Turn {
            role,
            text: text.into(),
            timestamp_ms: 0,
            audio_duration_ms: None,
            ttfb_ms: None,
            stt_confidence: None,
            tts_ms: None,
            stt_ms: None,
        }
    }

    #[test]
    fn transcript_renders_speaker_lines() {
        let transcript = vec![
            turn(TurnRole::Caller, "Hi, I'd like a haircut."),
            turn(TurnRole::Agent, "Sure, what time works?"),
        ];
        let rendered = render_transcript(&transcript);
        assert_eq!(
            rendered,
            "caller: Hi, I'd like a haircut.\nagent: Sure, what time works?\n"
        );
    }

    #[test]
    fn caller_turn_parses_without_end_flag() {
        let turn: CallerTurn = serde_json::from_str("{\"utterance\": \"Hello\"}").unwrap();
        assert!(!turn.end_call);
    }
}
