//! ElevenLabs bridge
//!
//! Conversational-AI agent socket. Audio is 16 kHz PCM, base64-wrapped in
//! JSON both directions. Client tool calls arrive as `client_tool_call`
//! events.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

use voiceci_core::audio;
use voiceci_core::ObservedToolCall;

use crate::socket::SocketCore;
use crate::toolcalls::{CallLog, ToolCallEvent};
use crate::{ChannelError, ChannelEvent};

const ELEVENLABS_WS: &str = "wss://api.elevenlabs.io/v1/convai/conversation";
const ELEVENLABS_RATE_HZ: u32 = 16_000;

pub struct ElevenlabsChannel {
    agent_id: String,
    api_key: String,
    call_log: CallLog,
    core: Option<SocketCore>,
    connected_once: bool,
}

impl ElevenlabsChannel {
    pub fn new(agent_id: impl Into<String>, api_key: String) -> Self {
        Self {
            agent_id: agent_id.into(),
            api_key,
            call_log: CallLog::new(),
            core: None,
            connected_once: false,
        }
    }

    pub async fn connect(&mut self) -> Result<(), ChannelError> {
        if self.connected_once {
            return Err(ChannelError::AlreadyConnected);
        }
        self.connected_once = true;

        let url = format!("{}?agent_id={}", ELEVENLABS_WS, self.agent_id);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ChannelError::Connect(e.to_string()))?;
        request.headers_mut().insert(
            "xi-api-key",
            self.api_key
                .parse()
                .map_err(|_| ChannelError::Configuration("invalid elevenlabs key".into()))?,
        );

        let decoder = Arc::new(|message: &Message, log: &CallLog| match message {
            Message::Text(text) => decode_event(text, log),
            _ => Vec::new(),
        });

        let core = SocketCore::connect(request, self.call_log.clone(), decoder).await?;
        tracing::info!(agent = %self.agent_id, "elevenlabs channel connected");
        self.core = Some(core);
        Ok(())
    }

    pub async fn send_audio(&mut self, pcm: &[i16]) -> Result<(), ChannelError> {
        let core = self.core.as_ref().ok_or(ChannelError::NotConnected)?;
        let pcm_16k = audio::resample(pcm, audio::CANONICAL_RATE_HZ, ELEVENLABS_RATE_HZ);
        let chunk = BASE64.encode(audio::samples_to_pcm_bytes(&pcm_16k));
        let frame = serde_json::json!({ "user_audio_chunk": chunk });
        core.send(Message::Text(frame.to_string())).await
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

#[derive(Deserialize)]
struct ElevenlabsEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    audio_event: Option<AudioEvent>,
    #[serde(default)]
    client_tool_call: Option<ClientToolCall>,
}

#[derive(Deserialize)]
struct AudioEvent {
    audio_base_64: String,
}

#[derive(Deserialize)]
struct ClientToolCall {
    tool_name: String,
    #[serde(default)]
    parameters: serde_json::Map<String, serde_json::Value>,
}

fn decode_event(text: &str, log: &CallLog) -> Vec<ChannelEvent> {
    let Ok(event) = serde_json::from_str::<ElevenlabsEvent>(text) else {
        return Vec::new();
    };

    match event.event_type.as_str() {
        "audio" => {
            let Some(audio_event) = event.audio_event else {
                return Vec::new();
            };
            let Ok(bytes) = BASE64.decode(audio_event.audio_base_64) else {
                return vec![ChannelEvent::Error("undecodable audio payload".into())];
            };
            let pcm_16k = audio::pcm_bytes_to_samples(&bytes);
            vec![ChannelEvent::Audio(audio::resample(
                &pcm_16k,
                ELEVENLABS_RATE_HZ,
                audio::CANONICAL_RATE_HZ,
            ))]
        }
        "client_tool_call" => {
            if let Some(call) = event.client_tool_call {
                log.record(ToolCallEvent {
                    event_type: "tool_call".into(),
                    name: call.tool_name,
                    arguments: call.parameters,
                    result: None,
                    successful: None,
                    duration_ms: None,
                });
            }
            Vec::new()
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_events_decode_to_pcm() {
        let log = CallLog::new();
        let pcm_16k = vec![100i16; 160];
        let payload = BASE64.encode(audio::samples_to_pcm_bytes(&pcm_16k));
        let text = format!(
            r#"{{"type":"audio","audio_event":{{"audio_base_64":"{}"}}}}"#,
            payload
        );

        let events = decode_event(&text, &log);
        assert_eq!(events.len(), 1);
        match &events[0] {
            ChannelEvent::Audio(samples) => {
                // 160 samples at 16k become ~240 at 24k.
                assert!((samples.len() as i64 - 240).abs() <= 1);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn client_tool_calls_recorded() {
        let log = CallLog::new();
        log.mark_connected();
        decode_event(
            r#"{"type":"client_tool_call","client_tool_call":{"tool_name":"end_call","parameters":{}}}"#,
            &log,
        );
        assert_eq!(log.snapshot()[0].name, "end_call");
    }
}
