//! Tool-call side-channel
//!
//! Agents report tool invocations out-of-band: as text frames on the audio
//! socket, as data-channel packets in a room, or via the SIP listener's HTTP
//! endpoint. All of them funnel into one `CallLog` with timestamps relative
//! to connect.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Deserialize;

use voiceci_core::ObservedToolCall;

/// Wire shape of a tool-call event.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub successful: Option<bool>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

struct CallLogInner {
    calls: Vec<ObservedToolCall>,
    connected_at: Option<Instant>,
}

/// Shared, ordered log of observed tool calls for one channel.
#[derive(Clone)]
pub struct CallLog {
    inner: Arc<Mutex<CallLogInner>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(CallLogInner {
                calls: Vec::new(),
                connected_at: None,
            })),
        }
    }

    /// Anchor timestamps; called once when the transport comes up.
    pub fn mark_connected(&self) {
        let mut inner = self.inner.lock();
        if inner.connected_at.is_none() {
            inner.connected_at = Some(Instant::now());
        }
    }

    /// Milliseconds since connect; 0 before connect.
    pub fn elapsed_ms(&self) -> u64 {
        self.inner
            .lock()
            .connected_at
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0)
    }

    /// Record an event with a monotonic timestamp relative to connect.
    pub fn record(&self, event: ToolCallEvent) {
        let timestamp_ms = self.elapsed_ms();
        let mut inner = self.inner.lock();
        inner.calls.push(ObservedToolCall {
            name: event.name,
            arguments: event.arguments,
            result: event.result,
            successful: event.successful,
            timestamp_ms: Some(timestamp_ms),
            latency_ms: event.duration_ms,
        });
    }

    /// Record an already-normalised call (platform REST backfill).
    pub fn record_observed(&self, call: ObservedToolCall) {
        self.inner.lock().calls.push(call);
    }

    pub fn snapshot(&self) -> Vec<ObservedToolCall> {
        self.inner.lock().calls.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().calls.is_empty()
    }
}

impl Default for CallLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a text frame; records and returns true iff it is a tool-call event.
/// Non-JSON frames and other event types are ignored.
pub fn try_record_text_frame(text: &str, log: &CallLog) -> bool {
    match serde_json::from_str::<ToolCallEvent>(text) {
        Ok(event) if event.event_type == "tool_call" => {
            tracing::debug!(tool = %event.name, "observed tool call");
            log.record(event);
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_frames_are_recorded_in_order() {
        let log = CallLog::new();
        log.mark_connected();

        assert!(try_record_text_frame(
            r#"{"type":"tool_call","name":"book_appointment","arguments":{"time":"2pm"},"successful":true,"duration_ms":42}"#,
            &log
        ));
        assert!(try_record_text_frame(
            r#"{"type":"tool_call","name":"send_sms","arguments":{}}"#,
            &log
        ));

        let calls = log.snapshot();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "book_appointment");
        assert_eq!(calls[0].latency_ms, Some(42));
        assert_eq!(calls[1].name, "send_sms");
        assert!(calls[0].timestamp_ms.unwrap() <= calls[1].timestamp_ms.unwrap());
    }

    #[test]
    fn non_tool_frames_are_ignored() {
        let log = CallLog::new();
        assert!(!try_record_text_frame(r#"{"type":"transcript","text":"hi"}"#, &log));
        assert!(!try_record_text_frame("not json", &log));
        assert!(log.is_empty());
    }
}
