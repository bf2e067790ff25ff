//! HTTP STT provider client

use std::time::Duration;

use serde::Deserialize;

use voiceci_core::audio;

use crate::PipelineError;

/// STT client configuration
#[derive(Debug, Clone)]
pub struct SttConfig {
    pub endpoint: String,
    pub api_key: String,
    pub timeout: Duration,
    /// Audio shorter than this transcribes as empty rather than erroring.
    pub min_audio_ms: u64,
}

impl SttConfig {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(30),
            min_audio_ms: 100,
        }
    }
}

/// Transcription with the provider's confidence estimate.
#[derive(Debug, Clone, Deserialize)]
pub struct Transcription {
    pub text: String,
    #[serde(default)]
    pub confidence: f32,
}

/// External STT provider client. Sends linear16 at 24 kHz.
#[derive(Clone)]
pub struct SttClient {
    config: SttConfig,
    client: reqwest::Client,
}

impl SttClient {
    pub fn new(config: SttConfig) -> Result<Self, PipelineError> {
        if config.endpoint.is_empty() {
            return Err(PipelineError::Configuration("STT endpoint not set".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PipelineError::Configuration(e.to_string()))?;
        Ok(Self { config, client })
    }

    /// Transcribe 24 kHz mono PCM.
    pub async fn transcribe(&self, samples: &[i16]) -> Result<Transcription, PipelineError> {
        if audio::duration_ms(samples.len(), audio::CANONICAL_RATE_HZ) < self.config.min_audio_ms {
            return Ok(Transcription {
                text: String::new(),
                confidence: 0.0,
            });
        }

        let body = audio::samples_to_pcm_bytes(samples);

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .header("Content-Type", "audio/pcm")
            .query(&[
                ("encoding", "linear16"),
                ("sample_rate", "24000"),
                ("channels", "1"),
            ])
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Stt(format!("HTTP {}: {}", status, body)));
        }

        let transcription: Transcription = response
            .json()
            .await
            .map_err(|e| PipelineError::InvalidResponse(e.to_string()))?;

        tracing::debug!(
            chars = transcription.text.len(),
            confidence = transcription.confidence,
            "transcribed audio"
        );

        Ok(transcription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_endpoint_rejected() {
        assert!(SttClient::new(SttConfig::new("", "key")).is_err());
    }

    #[tokio::test]
    async fn short_audio_short_circuits() {
        let client = SttClient::new(SttConfig::new("https://stt.invalid", "key")).unwrap();
        // 50ms at 24kHz is below the floor; no request is made.
        let result = client.transcribe(&vec![0i16; 1200]).await.unwrap();
        assert!(result.text.is_empty());
    }
}
