//! Bland bridge
//!
//! Same composition as Retell: the audio leg is a phone call through the
//! SIP channel, and tool activity comes from Bland's REST API afterwards.

use std::time::Duration;

use serde::Deserialize;

use voiceci_core::ObservedToolCall;

use crate::platforms::{resolve_with_retries, RESOLVE_ATTEMPTS, TRANSCRIPT_FETCH_DELAY};
use crate::sip::SipChannel;
use crate::{ChannelError, ChannelEvent};

const BLAND_API: &str = "https://api.bland.ai";

pub struct BlandChannel {
    sip: SipChannel,
    api_key: String,
    from_number: String,
    to_number: String,
    client: reqwest::Client,
    platform_calls: Option<Vec<ObservedToolCall>>,
}

impl BlandChannel {
    pub fn new(sip: SipChannel, api_key: String, from_number: String, to_number: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            sip,
            api_key,
            from_number,
            to_number,
            client,
            platform_calls: None,
        }
    }

    pub async fn connect(&mut self) -> Result<(), ChannelError> {
        self.sip.connect().await
    }

    pub async fn send_audio(&mut self, pcm: &[i16]) -> Result<(), ChannelError> {
        self.sip.send_audio(pcm).await
    }

    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.sip.recv().await
    }

    pub fn is_connected(&self) -> bool {
        self.sip.is_connected()
    }

    pub async fn disconnect(&mut self) {
        self.sip.disconnect().await
    }

    pub fn tool_call_endpoint_url(&self) -> Option<String> {
        self.sip.tool_call_endpoint_url()
    }

    pub async fn call_data(&mut self) -> Vec<ObservedToolCall> {
        let mut calls = self.sip.call_data();

        if self.platform_calls.is_none() {
            match self.fetch_platform_calls().await {
                Ok(platform) => self.platform_calls = Some(platform),
                Err(e) => {
                    tracing::warn!("bland call log fetch failed: {}", e);
                    self.platform_calls = Some(Vec::new());
                }
            }
        }

        calls.extend(self.platform_calls.clone().unwrap_or_default());
        calls
    }

    async fn fetch_platform_calls(&self) -> Result<Vec<ObservedToolCall>, ChannelError> {
        let (_, dialed_at) = self.sip.dial_facts();
        let dialed_at =
            dialed_at.ok_or_else(|| ChannelError::Platform("call never dialed".into()))?;
        let created_after = (dialed_at - chrono::Duration::seconds(5)).to_rfc3339();
        let created_after = created_after.as_str();

        let call_id = resolve_with_retries("bland call", RESOLVE_ATTEMPTS, move || async move {
            self.find_call_id(created_after).await
        })
        .await?;

        tokio::time::sleep(TRANSCRIPT_FETCH_DELAY).await;
        self.fetch_call_log(&call_id).await
    }

    async fn find_call_id(&self, created_after: &str) -> Result<Option<String>, ChannelError> {
        #[derive(Deserialize)]
        struct ListResponse {
            #[serde(default)]
            calls: Vec<ListedCall>,
        }

        #[derive(Deserialize)]
        struct ListedCall {
            #[serde(alias = "c_id")]
            call_id: String,
        }

        let response = self
            .client
            .get(format!("{}/v1/calls", BLAND_API))
            .header("authorization", &self.api_key)
            .query(&[
                ("to_number", self.to_number.as_str()),
                ("from_number", self.from_number.as_str()),
                ("created_at_gte", created_after),
                ("limit", "5"),
            ])
            .send()
            .await
            .map_err(|e| ChannelError::Platform(format!("bland list calls: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Platform(format!(
                "bland list calls HTTP {}: {}",
                status, body
            )));
        }

        let list: ListResponse = response
            .json()
            .await
            .map_err(|e| ChannelError::Platform(e.to_string()))?;
        Ok(list.calls.into_iter().next().map(|c| c.call_id))
    }

    async fn fetch_call_log(&self, call_id: &str) -> Result<Vec<ObservedToolCall>, ChannelError> {
        let response = self
            .client
            .get(format!("{}/v1/calls/{}", BLAND_API, call_id))
            .header("authorization", &self.api_key)
            .send()
            .await
            .map_err(|e| ChannelError::Platform(format!("bland get call: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Platform(format!(
                "bland get call HTTP {}: {}",
                status, body
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ChannelError::Platform(e.to_string()))?;
        Ok(normalise_call_log(&body))
    }
}

/// Bland reports tool usage as a flat `tool_calls` array on the call record.
fn normalise_call_log(body: &serde_json::Value) -> Vec<ObservedToolCall> {
    let Some(entries) = body.get("tool_calls").and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let name = entry
                .get("name")
                .or_else(|| entry.get("tool_name"))
                .and_then(|n| n.as_str())?
                .to_string();
            let arguments = entry
                .get("arguments")
                .or_else(|| entry.get("input"))
                .and_then(|a| a.as_object())
                .cloned()
                .unwrap_or_default();
            Some(ObservedToolCall {
                name,
                arguments,
                result: entry
                    .get("result")
                    .or_else(|| entry.get("response"))
                    .cloned(),
                successful: entry.get("success").and_then(|s| s.as_bool()),
                timestamp_ms: entry.get("timestamp_ms").and_then(|t| t.as_u64()),
                latency_ms: entry.get("latency_ms").and_then(|t| t.as_u64()),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_log_normalised_across_field_aliases() {
        let body = serde_json::json!({
            "call_id": "abc",
            "tool_calls": [
                {"name": "transfer_call", "input": {"to": "+15550123"}, "success": true},
                {"tool_name": "lookup", "arguments": {"q": "hours"}, "response": "9-5"},
                {"no_name": true}
            ]
        });

        let calls = normalise_call_log(&body);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "transfer_call");
        assert_eq!(calls[0].successful, Some(true));
        assert_eq!(calls[1].name, "lookup");
        assert_eq!(calls[1].result, Some(serde_json::json!("9-5")));
    }
}
