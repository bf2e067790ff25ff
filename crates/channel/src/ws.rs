//! Raw WebSocket channel
//!
//! The simplest transport: binary frames are 24 kHz PCM in both directions,
//! text frames are JSON events. Used for agents exposing a `ws://` voice
//! endpoint directly.

use std::sync::Arc;

use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

use voiceci_core::{audio, ObservedToolCall};

use crate::socket::SocketCore;
use crate::toolcalls::{try_record_text_frame, CallLog};
use crate::{ChannelError, ChannelEvent};

pub struct WsVoiceChannel {
    agent_url: String,
    call_log: CallLog,
    core: Option<SocketCore>,
    connected_once: bool,
}

impl WsVoiceChannel {
    pub fn new(agent_url: impl Into<String>) -> Self {
        Self {
            agent_url: agent_url.into(),
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

        let decoder = Arc::new(|message: &Message, log: &CallLog| match message {
            Message::Binary(bytes) => {
                vec![ChannelEvent::Audio(audio::pcm_bytes_to_samples(bytes))]
            }
            Message::Text(text) => {
                try_record_text_frame(text, log);
                Vec::new()
            }
            _ => Vec::new(),
        });

        let request = self
            .agent_url
            .as_str()
            .into_client_request()
            .map_err(|e| ChannelError::Connect(format!("{}: {}", self.agent_url, e)))?;
        let core = SocketCore::connect(request, self.call_log.clone(), decoder).await?;
        tracing::info!(url = %self.agent_url, "ws-voice channel connected");
        self.core = Some(core);
        Ok(())
    }

    pub async fn send_audio(&mut self, pcm: &[i16]) -> Result<(), ChannelError> {
        let core = self.core.as_ref().ok_or(ChannelError::NotConnected)?;
        core.send(Message::Binary(audio::samples_to_pcm_bytes(pcm)))
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

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_before_connect_fails_fast() {
        let mut channel = WsVoiceChannel::new("ws://127.0.0.1:1");
        let err = channel.send_audio(&[0i16; 480]).await.err().unwrap();
        assert!(matches!(err, ChannelError::NotConnected));
    }

    #[tokio::test]
    async fn second_connect_rejected() {
        let mut channel = WsVoiceChannel::new("ws://127.0.0.1:1");
        // First connect fails (nothing listening) but still consumes the
        // one connect the channel is allowed.
        assert!(channel.connect().await.is_err());
        let err = channel.connect().await.err().unwrap();
        assert!(matches!(err, ChannelError::AlreadyConnected));
    }
}
