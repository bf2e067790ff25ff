//! Vapi bridge
//!
//! Creates a websocket-transport call against the assistant, then speaks
//! 16 kHz PCM in-band on the returned socket. Tool calls arrive as typed
//! JSON messages on the same socket.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

use voiceci_core::audio;
use voiceci_core::ObservedToolCall;

use crate::socket::SocketCore;
use crate::toolcalls::{try_record_text_frame, CallLog, ToolCallEvent};
use crate::{ChannelError, ChannelEvent};

const VAPI_API: &str = "https://api.vapi.ai";
/// Vapi's websocket transport runs 16 kHz mono PCM.
const VAPI_RATE_HZ: u32 = 16_000;

pub struct VapiChannel {
    assistant_id: String,
    api_key: String,
    call_log: CallLog,
    core: Option<SocketCore>,
    connected_once: bool,
}

#[derive(Deserialize)]
struct VapiCallResponse {
    #[allow(dead_code)]
    id: String,
    transport: VapiTransport,
}

#[derive(Deserialize)]
struct VapiTransport {
    #[serde(rename = "websocketCallUrl")]
    websocket_call_url: String,
}

impl VapiChannel {
    pub fn new(assistant_id: impl Into<String>, api_key: String) -> Self {
        Self {
            assistant_id: assistant_id.into(),
            api_key,
            call_log: CallLog::new(),
            core: None,
            connected_once: false,
        }
    }

    /// Create the call and get the in-band socket URL.
    async fn create_websocket_call(&self) -> Result<String, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| ChannelError::Configuration(e.to_string()))?;

        let response = client
            .post(format!("{}/call", VAPI_API))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "assistantId": self.assistant_id,
                "transport": {
                    "provider": "vapi.websocket",
                    "audioFormat": {
                        "format": "pcm_s16le",
                        "container": "raw",
                        "sampleRate": VAPI_RATE_HZ,
                    }
                }
            }))
            .send()
            .await
            .map_err(|e| ChannelError::Platform(format!("vapi call create: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Platform(format!(
                "vapi call create HTTP {}: {}",
                status, body
            )));
        }

        let call: VapiCallResponse = response
            .json()
            .await
            .map_err(|e| ChannelError::Platform(format!("vapi call response: {}", e)))?;
        Ok(call.transport.websocket_call_url)
    }

    pub async fn connect(&mut self) -> Result<(), ChannelError> {
        if self.connected_once {
            return Err(ChannelError::AlreadyConnected);
        }
        self.connected_once = true;

        let socket_url = self.create_websocket_call().await?;
        let request = socket_url
            .as_str()
            .into_client_request()
            .map_err(|e| ChannelError::Connect(e.to_string()))?;

        let decoder = Arc::new(|message: &Message, log: &CallLog| match message {
            Message::Binary(bytes) => {
                let pcm_16k = audio::pcm_bytes_to_samples(bytes);
                vec![ChannelEvent::Audio(audio::resample(
                    &pcm_16k,
                    VAPI_RATE_HZ,
                    audio::CANONICAL_RATE_HZ,
                ))]
            }
            Message::Text(text) => {
                if !try_record_text_frame(text, log) {
                    record_vapi_tool_calls(text, log);
                }
                Vec::new()
            }
            _ => Vec::new(),
        });

        let core = SocketCore::connect(request, self.call_log.clone(), decoder).await?;
        tracing::info!(assistant = %self.assistant_id, "vapi channel connected");
        self.core = Some(core);
        Ok(())
    }

    pub async fn send_audio(&mut self, pcm: &[i16]) -> Result<(), ChannelError> {
        let core = self.core.as_ref().ok_or(ChannelError::NotConnected)?;
        let pcm_16k = audio::resample(pcm, audio::CANONICAL_RATE_HZ, VAPI_RATE_HZ);
        core.send(Message::Binary(audio::samples_to_pcm_bytes(&pcm_16k)))
            .await
    }

    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.core.as_mut()?.recv().await
    }

    pub fn is_connected(&self) -> bool {
        self.core.as_ref().map(|c| c.is_connected()).unwrap_or(false)
    }

    pub async fn disconnect(&mut self) {
        if let Some(core) = &self.core {
            core.close().await;
        }
    }

    pub fn call_data(&self) -> Vec<ObservedToolCall> {
        self.call_log.snapshot()
    }
}

/// Vapi's own message schema: `{"type":"tool-calls","toolCalls":[...]}`
/// with OpenAI-style function entries.
fn record_vapi_tool_calls(text: &str, log: &CallLog) {
    #[derive(Deserialize)]
    struct VapiToolCalls {
        #[serde(rename = "type")]
        message_type: String,
        #[serde(rename = "toolCalls", default)]
        tool_calls: Vec<VapiToolCall>,
    }

    #[derive(Deserialize)]
    struct VapiToolCall {
        function: VapiFunction,
    }

    #[derive(Deserialize)]
    struct VapiFunction {
        name: String,
        #[serde(default)]
        arguments: serde_json::Value,
    }

    let Ok(message) = serde_json::from_str::<VapiToolCalls>(text) else {
        return;
    };
    if message.message_type != "tool-calls" {
        return;
    }

    for call in message.tool_calls {
        // Arguments may arrive as an encoded string.
        let arguments = match call.function.arguments {
            serde_json::Value::Object(map) => map,
            serde_json::Value::String(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            _ => Default::default(),
        };
        log.record(ToolCallEvent {
            event_type: "tool_call".into(),
            name: call.function.name,
            arguments,
            result: None,
            successful: None,
            duration_ms: None,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vapi_tool_call_schema_normalised() {
        let log = CallLog::new();
        log.mark_connected();
        record_vapi_tool_calls(
            r#"{"type":"tool-calls","toolCalls":[{"id":"t1","function":{"name":"check_availability","arguments":"{\"date\":\"tomorrow\"}"}}]}"#,
            &log,
        );

        let calls = log.snapshot();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "check_availability");
        assert_eq!(
            calls[0].arguments.get("date").and_then(|v| v.as_str()),
            Some("tomorrow")
        );
    }

    #[test]
    fn other_message_types_ignored() {
        let log = CallLog::new();
        record_vapi_tool_calls(r#"{"type":"speech-update","status":"started"}"#, &log);
        assert!(log.is_empty());
    }
}
