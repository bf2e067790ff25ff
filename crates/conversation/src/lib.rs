//! Conversation engine
//!
//! Drives a scripted caller against a live agent over an audio channel: TTS
//! out, VAD-segmented capture in, STT back to text, with an adaptive
//! end-of-turn threshold. After the dialog, the judge evaluates the
//! transcript and the observed tool calls.

mod engine;
mod evals;

pub use engine::{ConversationEngine, SILENCE_THRESHOLD_CEILING_MS, SILENCE_THRESHOLD_FLOOR_MS};
