//! Audio channels
//!
//! A uniform bidirectional PCM stream over heterogeneous transports, plus a
//! side-channel for tool-call events. One capability set, seven variants:
//! raw WebSocket, LiveKit/WebRTC, SIP telephony, and four hosted-platform
//! bridges. Operations are functions over the sum type; shared behavior
//! lives in helper modules, not a class hierarchy.
//!
//! Invariants every variant upholds:
//! - a channel connects exactly once
//! - `disconnect()` is idempotent
//! - no events are emitted after disconnect
//! - `send_audio` fails fast when not connected
//!
//! All audio crossing the channel boundary is 24 kHz mono int16; each
//! transport converts to its wire rate internally.

pub mod sip;
pub mod socket;
pub mod toolcalls;
pub mod webrtc;
pub mod ws;

pub mod platforms;

pub use sip::SipChannel;
pub use toolcalls::{CallLog, ToolCallEvent};
pub use webrtc::WebrtcChannel;
pub use ws::WsVoiceChannel;

pub use platforms::bland::BlandChannel;
pub use platforms::elevenlabs::ElevenlabsChannel;
pub use platforms::retell::RetellChannel;
pub use platforms::vapi::VapiChannel;

use std::sync::Arc;

use thiserror::Error;

use voiceci_config::Settings;
use voiceci_core::{AdapterConfig, ObservedToolCall};

/// Channel errors
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("channel is not connected")]
    NotConnected,

    #[error("channel already connected")]
    AlreadyConnected,

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("platform API error: {0}")]
    Platform(String),
}

impl From<ChannelError> for voiceci_core::Error {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Configuration(m) => voiceci_core::Error::ConfigMissing(m),
            ChannelError::Timeout(m) => voiceci_core::Error::Timeout(m),
            ChannelError::Platform(m) => voiceci_core::Error::Upstream(m),
            other => voiceci_core::Error::Transport(other.to_string()),
        }
    }
}

/// What a channel emits while connected.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// Agent audio, already converted to 24 kHz mono PCM.
    Audio(Vec<i16>),
    /// The transport closed from the far side.
    Disconnected,
    /// A transport-level fault; the channel is unusable afterwards.
    Error(String),
}

/// The audio-channel capability variant. All operations dispatch by `match`;
/// no variant adds operations beyond this set.
pub enum AudioChannel {
    WsVoice(WsVoiceChannel),
    Sip(SipChannel),
    Webrtc(WebrtcChannel),
    Vapi(VapiChannel),
    Retell(RetellChannel),
    Elevenlabs(ElevenlabsChannel),
    Bland(BlandChannel),
}

impl AudioChannel {
    /// Establish the transport. Errors on a second call.
    pub async fn connect(&mut self) -> Result<(), ChannelError> {
        match self {
            AudioChannel::WsVoice(c) => c.connect().await,
            AudioChannel::Sip(c) => c.connect().await,
            AudioChannel::Webrtc(c) => c.connect().await,
            AudioChannel::Vapi(c) => c.connect().await,
            AudioChannel::Retell(c) => c.connect().await,
            AudioChannel::Elevenlabs(c) => c.connect().await,
            AudioChannel::Bland(c) => c.connect().await,
        }
    }

    /// Send caller audio (24 kHz mono PCM). Fails fast when not connected.
    pub async fn send_audio(&mut self, pcm: &[i16]) -> Result<(), ChannelError> {
        match self {
            AudioChannel::WsVoice(c) => c.send_audio(pcm).await,
            AudioChannel::Sip(c) => c.send_audio(pcm).await,
            AudioChannel::Webrtc(c) => c.send_audio(pcm).await,
            AudioChannel::Vapi(c) => c.send_audio(pcm).await,
            AudioChannel::Retell(c) => c.send_audio(pcm).await,
            AudioChannel::Elevenlabs(c) => c.send_audio(pcm).await,
            AudioChannel::Bland(c) => c.send_audio(pcm).await,
        }
    }

    /// Next event from the agent side; `None` once the stream has drained
    /// after disconnect.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        match self {
            AudioChannel::WsVoice(c) => c.recv().await,
            AudioChannel::Sip(c) => c.recv().await,
            AudioChannel::Webrtc(c) => c.recv().await,
            AudioChannel::Vapi(c) => c.recv().await,
            AudioChannel::Retell(c) => c.recv().await,
            AudioChannel::Elevenlabs(c) => c.recv().await,
            AudioChannel::Bland(c) => c.recv().await,
        }
    }

    pub fn is_connected(&self) -> bool {
        match self {
            AudioChannel::WsVoice(c) => c.is_connected(),
            AudioChannel::Sip(c) => c.is_connected(),
            AudioChannel::Webrtc(c) => c.is_connected(),
            AudioChannel::Vapi(c) => c.is_connected(),
            AudioChannel::Retell(c) => c.is_connected(),
            AudioChannel::Elevenlabs(c) => c.is_connected(),
            AudioChannel::Bland(c) => c.is_connected(),
        }
    }

    /// Tear the transport down. Safe to call more than once.
    pub async fn disconnect(&mut self) {
        match self {
            AudioChannel::WsVoice(c) => c.disconnect().await,
            AudioChannel::Sip(c) => c.disconnect().await,
            AudioChannel::Webrtc(c) => c.disconnect().await,
            AudioChannel::Vapi(c) => c.disconnect().await,
            AudioChannel::Retell(c) => c.disconnect().await,
            AudioChannel::Elevenlabs(c) => c.disconnect().await,
            AudioChannel::Bland(c) => c.disconnect().await,
        }
    }

    /// Tool calls observed during the call, in observation order. Platform
    /// bridges supplement this from their REST APIs after the call ends.
    pub async fn call_data(&mut self) -> Vec<ObservedToolCall> {
        match self {
            AudioChannel::WsVoice(c) => c.call_data(),
            AudioChannel::Sip(c) => c.call_data(),
            AudioChannel::Webrtc(c) => c.call_data(),
            AudioChannel::Vapi(c) => c.call_data(),
            AudioChannel::Retell(c) => c.call_data().await,
            AudioChannel::Elevenlabs(c) => c.call_data(),
            AudioChannel::Bland(c) => c.call_data().await,
        }
    }

    /// HTTP fallback endpoint for agents that cannot reach the audio socket.
    pub fn tool_call_endpoint_url(&self) -> Option<String> {
        match self {
            AudioChannel::Sip(c) => c.tool_call_endpoint_url(),
            AudioChannel::Retell(c) => c.tool_call_endpoint_url(),
            AudioChannel::Bland(c) => c.tool_call_endpoint_url(),
            _ => None,
        }
    }

    pub fn adapter_tag(&self) -> &'static str {
        match self {
            AudioChannel::WsVoice(_) => "ws-voice",
            AudioChannel::Sip(_) => "sip",
            AudioChannel::Webrtc(_) => "webrtc",
            AudioChannel::Vapi(_) => "vapi",
            AudioChannel::Retell(_) => "retell",
            AudioChannel::Elevenlabs(_) => "elevenlabs",
            AudioChannel::Bland(_) => "bland",
        }
    }
}

/// Builds unconnected channels from adapter configs and server settings.
///
/// Credential env vars are resolved at build time so a missing platform key
/// surfaces as a `config_missing` error before any dialing happens.
#[derive(Clone)]
pub struct ChannelFactory {
    settings: Arc<Settings>,
}

impl ChannelFactory {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }

    fn env_key(&self, var: &str) -> Result<String, ChannelError> {
        std::env::var(var).map_err(|_| ChannelError::Configuration(format!("{} is not set", var)))
    }

    pub fn build(&self, adapter: &AdapterConfig) -> Result<AudioChannel, ChannelError> {
        match adapter {
            AdapterConfig::WsVoice { agent_url } => {
                Ok(AudioChannel::WsVoice(WsVoiceChannel::new(agent_url)))
            }
            AdapterConfig::Sip {
                target_number,
                inbound,
            } => {
                let telephony = self.telephony_client()?;
                Ok(AudioChannel::Sip(SipChannel::new(
                    telephony,
                    sip::SipDirection::from_config(target_number.clone(), *inbound)?,
                    self.settings.server.public_host.clone(),
                    self.settings.telephony.listener_port,
                )))
            }
            AdapterConfig::Webrtc { room, identity } => {
                let lk = &self.settings.livekit;
                if !lk.configured() {
                    return Err(ChannelError::Configuration("livekit.url is not set".into()));
                }
                let api_key = self.env_key(&lk.api_key_var)?;
                let api_secret = self.env_key(&lk.api_secret_var)?;
                Ok(AudioChannel::Webrtc(WebrtcChannel::new(
                    lk.url.clone(),
                    api_key,
                    api_secret,
                    room.clone(),
                    identity.clone().unwrap_or_else(|| "voiceci-caller".into()),
                )))
            }
            AdapterConfig::Vapi { assistant_id } => {
                let api_key = self.env_key(&self.settings.platforms.vapi_api_key_var)?;
                Ok(AudioChannel::Vapi(VapiChannel::new(assistant_id, api_key)))
            }
            AdapterConfig::Elevenlabs { agent_id } => {
                let api_key = self.env_key(&self.settings.platforms.elevenlabs_api_key_var)?;
                Ok(AudioChannel::Elevenlabs(ElevenlabsChannel::new(
                    agent_id, api_key,
                )))
            }
            AdapterConfig::Retell { agent_number } => {
                let api_key = self.env_key(&self.settings.platforms.retell_api_key_var)?;
                let telephony = self.telephony_client()?;
                Ok(AudioChannel::Retell(RetellChannel::new(
                    SipChannel::new(
                        telephony,
                        sip::SipDirection::Outbound {
                            target_number: agent_number.clone(),
                        },
                        self.settings.server.public_host.clone(),
                        self.settings.telephony.listener_port,
                    ),
                    api_key,
                    self.settings.telephony.from_number.clone(),
                    agent_number.clone(),
                )))
            }
            AdapterConfig::Bland { agent_number } => {
                let api_key = self.env_key(&self.settings.platforms.bland_api_key_var)?;
                let telephony = self.telephony_client()?;
                Ok(AudioChannel::Bland(BlandChannel::new(
                    SipChannel::new(
                        telephony,
                        sip::SipDirection::Outbound {
                            target_number: agent_number.clone(),
                        },
                        self.settings.server.public_host.clone(),
                        self.settings.telephony.listener_port,
                    ),
                    api_key,
                    self.settings.telephony.from_number.clone(),
                    agent_number.clone(),
                )))
            }
        }
    }

    fn telephony_client(&self) -> Result<sip::TelephonyClient, ChannelError> {
        let t = &self.settings.telephony;
        if !t.configured() {
            return Err(ChannelError::Configuration(
                "telephony.api_endpoint and telephony.from_number must be set".into(),
            ));
        }
        let api_key = self.env_key(&t.api_key_var)?;
        sip::TelephonyClient::new(t.api_endpoint.clone(), api_key, t.from_number.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_rejects_unconfigured_platforms() {
        let factory = ChannelFactory::new(Arc::new(Settings::default()));

        // Default settings carry no livekit URL.
        let err = factory
            .build(&AdapterConfig::Webrtc {
                room: "qa".into(),
                identity: None,
            })
            .err()
            .unwrap();
        assert!(matches!(err, ChannelError::Configuration(_)));

        // No telephony endpoint either.
        let err = factory
            .build(&AdapterConfig::Sip {
                target_number: Some("+15550100".into()),
                inbound: false,
            })
            .err()
            .unwrap();
        assert!(matches!(err, ChannelError::Configuration(_)));
    }

    #[test]
    fn ws_voice_builds_without_credentials() {
        let factory = ChannelFactory::new(Arc::new(Settings::default()));
        let channel = factory
            .build(&AdapterConfig::WsVoice {
                agent_url: "ws://127.0.0.1:3001".into(),
            })
            .unwrap();
        assert_eq!(channel.adapter_tag(), "ws-voice");
        assert!(!channel.is_connected());
    }
}
