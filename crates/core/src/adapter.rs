//! Adapter configuration: everything needed to dial one voice agent

use serde::{Deserialize, Serialize};

/// Transport-tagged configuration for reaching an agent.
///
/// Stored per session under an opaque id by the RPC surface; the channel
/// layer turns it into a connected audio channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "adapter", rename_all = "snake_case")]
pub enum AdapterConfig {
    /// Raw WebSocket agent speaking 24 kHz PCM frames.
    #[serde(rename = "ws-voice")]
    WsVoice {
        agent_url: String,
    },
    /// Outbound (or inbound) telephony leg through the carrier API.
    Sip {
        #[serde(skip_serializing_if = "Option::is_none")]
        target_number: Option<String>,
        #[serde(default)]
        inbound: bool,
    },
    /// LiveKit room the agent has joined or will join.
    Webrtc {
        room: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        identity: Option<String>,
    },
    /// Vapi hosted agent, audio in-band over the platform socket.
    Vapi {
        assistant_id: String,
    },
    /// Retell hosted agent, audio out-of-band over telephony.
    Retell {
        agent_number: String,
    },
    /// ElevenLabs conversational agent, audio in-band over the platform socket.
    Elevenlabs {
        agent_id: String,
    },
    /// Bland hosted agent, audio out-of-band over telephony.
    Bland {
        agent_number: String,
    },
}

impl AdapterConfig {
    /// Wire tag, mirrored verbatim in the RPC surface.
    pub fn tag(&self) -> &'static str {
        match self {
            AdapterConfig::WsVoice { .. } => "ws-voice",
            AdapterConfig::Sip { .. } => "sip",
            AdapterConfig::Webrtc { .. } => "webrtc",
            AdapterConfig::Vapi { .. } => "vapi",
            AdapterConfig::Retell { .. } => "retell",
            AdapterConfig::Elevenlabs { .. } => "elevenlabs",
            AdapterConfig::Bland { .. } => "bland",
        }
    }

    /// Channels that ride a telephony leg get the lower executor cap.
    pub fn is_sip_backed(&self) -> bool {
        matches!(
            self,
            AdapterConfig::Sip { .. } | AdapterConfig::Retell { .. } | AdapterConfig::Bland { .. }
        )
    }

    /// Directly reachable agents run on the in-process scheduler path.
    pub fn agent_url(&self) -> Option<&str> {
        match self {
            AdapterConfig::WsVoice { agent_url } => Some(agent_url),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_voice_tag_round_trip() {
        let config = AdapterConfig::WsVoice {
            agent_url: "ws://localhost:3001".into(),
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["adapter"], "ws-voice");

        let parsed: AdapterConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.tag(), "ws-voice");
    }

    #[test]
    fn sip_backed_adapters() {
        assert!(AdapterConfig::Sip {
            target_number: Some("+15550100".into()),
            inbound: false
        }
        .is_sip_backed());
        assert!(AdapterConfig::Bland {
            agent_number: "+15550101".into()
        }
        .is_sip_backed());
        assert!(!AdapterConfig::Vapi {
            assistant_id: "a".into()
        }
        .is_sip_backed());
    }
}
