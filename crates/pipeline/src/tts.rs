//! HTTP TTS provider client
//!
//! Synthesizes caller utterances through an external provider. Nothing is
//! cached; every probe and conversation turn pays the synth cost so measured
//! latencies stay honest.

use std::time::Duration;

use serde::Serialize;

use voiceci_core::audio;

use crate::PipelineError;

/// TTS client configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub endpoint: String,
    pub api_key: String,
    pub default_voice: Option<String>,
    pub timeout: Duration,
}

impl TtsConfig {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            default_voice: None,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.default_voice = Some(voice.into());
        self
    }
}

#[derive(Serialize)]
struct TtsRequest<'a> {
    input: &'a str,
    voice: &'a str,
    response_format: &'static str,
    sample_rate: u32,
}

/// External TTS provider client.
#[derive(Clone)]
pub struct TtsClient {
    config: TtsConfig,
    client: reqwest::Client,
}

impl TtsClient {
    pub fn new(config: TtsConfig) -> Result<Self, PipelineError> {
        if config.endpoint.is_empty() {
            return Err(PipelineError::Configuration("TTS endpoint not set".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PipelineError::Configuration(e.to_string()))?;
        Ok(Self { config, client })
    }

    /// Synthesize text to 24 kHz mono PCM.
    pub async fn synthesize(
        &self,
        text: &str,
        voice: Option<&str>,
    ) -> Result<Vec<i16>, PipelineError> {
        let voice = voice
            .or(self.config.default_voice.as_deref())
            .unwrap_or("alloy");

        let request = TtsRequest {
            input: text,
            voice,
            response_format: "pcm",
            sample_rate: audio::CANONICAL_RATE_HZ,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Tts(format!("HTTP {}: {}", status, body)));
        }

        let bytes = response.bytes().await?;
        let samples = audio::pcm_bytes_to_samples(&bytes);
        if samples.is_empty() {
            return Err(PipelineError::Tts("provider returned empty audio".into()));
        }

        tracing::debug!(
            chars = text.len(),
            voice,
            audio_ms = audio::duration_ms(samples.len(), audio::CANONICAL_RATE_HZ),
            "synthesized utterance"
        );

        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_endpoint_rejected() {
        assert!(TtsClient::new(TtsConfig::new("", "key")).is_err());
    }

    #[test]
    fn voice_override_defaults() {
        let config = TtsConfig::new("https://tts.example", "key").with_voice("nova");
        assert_eq!(config.default_voice.as_deref(), Some("nova"));
    }
}
