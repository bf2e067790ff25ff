//! Retell bridge
//!
//! Audio rides the SIP channel; Retell only sees a phone call. After the
//! call the platform call id is resolved via list-calls filtered by the
//! from/to pair and the dial timestamp, and the tool-call transcript is
//! fetched over REST and normalised.

use std::time::Duration;

use serde::Deserialize;

use voiceci_core::ObservedToolCall;

use crate::platforms::{resolve_with_retries, RESOLVE_ATTEMPTS, TRANSCRIPT_FETCH_DELAY};
use crate::sip::SipChannel;
use crate::{ChannelError, ChannelEvent};

const RETELL_API: &str = "https://api.retellai.com";

pub struct RetellChannel {
    sip: SipChannel,
    api_key: String,
    from_number: String,
    to_number: String,
    client: reqwest::Client,
    /// Platform tool calls, fetched once after the call.
    platform_calls: Option<Vec<ObservedToolCall>>,
}

impl RetellChannel {
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

    /// SIP-side observations plus the platform's transcript, fetched lazily.
    pub async fn call_data(&mut self) -> Vec<ObservedToolCall> {
        let mut calls = self.sip.call_data();

        if self.platform_calls.is_none() {
            match self.fetch_platform_calls().await {
                Ok(platform) => self.platform_calls = Some(platform),
                Err(e) => {
                    tracing::warn!("retell transcript fetch failed: {}", e);
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
        let after_ms = dialed_at.timestamp_millis() - 5_000;

        let call_id = resolve_with_retries("retell call", RESOLVE_ATTEMPTS, move || async move {
            self.find_call_id(after_ms).await
        })
        .await?;

        tokio::time::sleep(TRANSCRIPT_FETCH_DELAY).await;
        self.fetch_tool_calls(&call_id).await
    }

    async fn find_call_id(&self, after_ms: i64) -> Result<Option<String>, ChannelError> {
        #[derive(Deserialize)]
        struct ListedCall {
            call_id: String,
            #[serde(default)]
            start_timestamp: Option<i64>,
        }

        let response = self
            .client
            .post(format!("{}/v2/list-calls", RETELL_API))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "filter_criteria": {
                    "from_number": [self.from_number],
                    "to_number": [self.to_number],
                },
                "sort_order": "descending",
                "limit": 5,
            }))
            .send()
            .await
            .map_err(|e| ChannelError::Platform(format!("retell list-calls: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Platform(format!(
                "retell list-calls HTTP {}: {}",
                status, body
            )));
        }

        let calls: Vec<ListedCall> = response
            .json()
            .await
            .map_err(|e| ChannelError::Platform(e.to_string()))?;

        Ok(calls
            .into_iter()
            .find(|c| c.start_timestamp.map(|ts| ts >= after_ms).unwrap_or(false))
            .map(|c| c.call_id))
    }

    async fn fetch_tool_calls(&self, call_id: &str) -> Result<Vec<ObservedToolCall>, ChannelError> {
        let response = self
            .client
            .get(format!("{}/v2/get-call/{}", RETELL_API, call_id))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| ChannelError::Platform(format!("retell get-call: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Platform(format!(
                "retell get-call HTTP {}: {}",
                status, body
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ChannelError::Platform(e.to_string()))?;
        Ok(normalise_transcript(&body))
    }
}

/// Pair `tool_call_invocation` entries with their `tool_call_result` by id.
fn normalise_transcript(body: &serde_json::Value) -> Vec<ObservedToolCall> {
    let Some(entries) = body
        .get("transcript_with_tool_calls")
        .and_then(|v| v.as_array())
    else {
        return Vec::new();
    };

    let mut calls: Vec<(Option<String>, ObservedToolCall)> = Vec::new();

    for entry in entries {
        match entry.get("role").and_then(|r| r.as_str()) {
            Some("tool_call_invocation") => {
                let name = entry
                    .get("name")
                    .and_then(|n| n.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                let arguments = entry
                    .get("arguments")
                    .map(|a| match a {
                        serde_json::Value::Object(map) => map.clone(),
                        serde_json::Value::String(raw) => {
                            serde_json::from_str(raw).unwrap_or_default()
                        }
                        _ => Default::default(),
                    })
                    .unwrap_or_default();
                let id = entry
                    .get("tool_call_id")
                    .and_then(|i| i.as_str())
                    .map(String::from);
                calls.push((
                    id,
                    ObservedToolCall {
                        name,
                        arguments,
                        result: None,
                        successful: None,
                        timestamp_ms: entry.get("time_offset_ms").and_then(|t| t.as_u64()),
                        latency_ms: None,
                    },
                ));
            }
            Some("tool_call_result") => {
                let id = entry.get("tool_call_id").and_then(|i| i.as_str());
                if let Some((_, call)) = calls
                    .iter_mut()
                    .rev()
                    .find(|(call_id, _)| call_id.as_deref() == id)
                {
                    call.result = entry.get("content").cloned();
                    call.successful = Some(true);
                }
            }
            _ => {}
        }
    }

    calls.into_iter().map(|(_, call)| call).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_pairs_invocations_with_results() {
        let body = serde_json::json!({
            "transcript_with_tool_calls": [
                {"role": "agent", "content": "let me check"},
                {"role": "tool_call_invocation", "tool_call_id": "t1",
                 "name": "check_calendar", "arguments": "{\"day\":\"friday\"}"},
                {"role": "tool_call_result", "tool_call_id": "t1", "content": "3pm free"},
                {"role": "tool_call_invocation", "tool_call_id": "t2", "name": "book_slot"}
            ]
        });

        let calls = normalise_transcript(&body);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "check_calendar");
        assert_eq!(calls[0].successful, Some(true));
        assert_eq!(calls[0].result, Some(serde_json::json!("3pm free")));
        assert_eq!(calls[1].name, "book_slot");
        assert!(calls[1].result.is_none());
    }

    #[test]
    fn missing_transcript_yields_empty() {
        assert!(normalise_transcript(&serde_json::json!({})).is_empty());
    }
}
