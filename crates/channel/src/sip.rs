//! SIP (telephony) channel
//!
//! Dials a phone number through the carrier's outbound-call API and serves
//! the carrier a stream-instruction document pointing back at a short-lived
//! listener on this host. The carrier then opens a bidirectional WebSocket
//! speaking μ-law at 8 kHz; we convert to and from 24 kHz PCM at the edge.
//!
//! The listener also exposes `POST /tool-calls` for agents that cannot reach
//! the audio socket, and stays up for a short grace period after the audio
//! leg drops to catch late events.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{DefaultBodyLimit, Json, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};

use voiceci_core::audio;
use voiceci_core::ObservedToolCall;

use crate::toolcalls::{try_record_text_frame, CallLog, ToolCallEvent};
use crate::{ChannelError, ChannelEvent};

/// μ-law bytes per 20 ms carrier frame.
const MULAW_FRAME_BYTES: usize = 160;
/// Cap on `POST /tool-calls` bodies.
const TOOL_CALL_BODY_LIMIT: usize = 1024 * 1024;
/// Listener stays up this long after the audio leg drops.
const LATE_EVENT_GRACE: Duration = Duration::from_secs(5);
/// How long we wait for the carrier to open the audio socket.
const OUTBOUND_ANSWER_TIMEOUT: Duration = Duration::from_secs(30);
const INBOUND_ANSWER_TIMEOUT: Duration = Duration::from_secs(60);

/// Whether we dial out or wait for the agent to dial our rented number.
#[derive(Debug, Clone)]
pub enum SipDirection {
    Outbound { target_number: String },
    Inbound,
}

impl SipDirection {
    pub fn from_config(
        target_number: Option<String>,
        inbound: bool,
    ) -> Result<Self, ChannelError> {
        if inbound {
            return Ok(SipDirection::Inbound);
        }
        target_number
            .map(|target_number| SipDirection::Outbound { target_number })
            .ok_or_else(|| {
                ChannelError::Configuration(
                    "sip adapter requires target_number unless inbound".into(),
                )
            })
    }
}

/// Thin client for the carrier's call API.
#[derive(Clone)]
pub struct TelephonyClient {
    endpoint: String,
    from_number: String,
    client: reqwest::Client,
    api_key: String,
}

#[derive(Deserialize)]
struct CreateCallResponse {
    call_id: String,
}

#[derive(Deserialize)]
struct CreateApplicationResponse {
    id: String,
}

impl TelephonyClient {
    pub fn new(
        endpoint: String,
        api_key: String,
        from_number: String,
    ) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| ChannelError::Configuration(e.to_string()))?;
        Ok(Self {
            endpoint,
            from_number,
            client,
            api_key,
        })
    }

    pub fn from_number(&self) -> &str {
        &self.from_number
    }

    /// Place an outbound call that fetches its stream instructions from
    /// `answer_url` when answered.
    async fn create_call(&self, to: &str, answer_url: &str) -> Result<String, ChannelError> {
        let response = self
            .client
            .post(format!("{}/calls", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "to": to,
                "from": self.from_number,
                "answer_url": answer_url,
            }))
            .send()
            .await
            .map_err(|e| ChannelError::Platform(format!("carrier call create: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Platform(format!(
                "carrier call create HTTP {}: {}",
                status, body
            )));
        }

        let parsed: CreateCallResponse = response
            .json()
            .await
            .map_err(|e| ChannelError::Platform(e.to_string()))?;
        Ok(parsed.call_id)
    }

    /// Attach a temporary application to the rented number so an inbound
    /// call lands on our listener.
    async fn attach_inbound_application(&self, answer_url: &str) -> Result<String, ChannelError> {
        let response = self
            .client
            .post(format!("{}/applications", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "answer_url": answer_url,
                "number": self.from_number,
            }))
            .send()
            .await
            .map_err(|e| ChannelError::Platform(format!("carrier application: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Platform(format!(
                "carrier application HTTP {}: {}",
                status, body
            )));
        }

        let parsed: CreateApplicationResponse = response
            .json()
            .await
            .map_err(|e| ChannelError::Platform(e.to_string()))?;
        Ok(parsed.id)
    }

    async fn hangup(&self, call_id: &str) {
        let result = self
            .client
            .delete(format!("{}/calls/{}", self.endpoint, call_id))
            .bearer_auth(&self.api_key)
            .send()
            .await;
        if let Err(e) = result {
            tracing::debug!(call_id, "hangup request failed: {}", e);
        }
    }

    async fn detach_application(&self, application_id: &str) {
        let result = self
            .client
            .delete(format!("{}/applications/{}", self.endpoint, application_id))
            .bearer_auth(&self.api_key)
            .send()
            .await;
        if let Err(e) = result {
            tracing::debug!(application_id, "application detach failed: {}", e);
        }
    }
}

/// State shared with the listener's handlers.
struct ListenerShared {
    events_tx: mpsc::Sender<ChannelEvent>,
    call_log: CallLog,
    connected: Arc<AtomicBool>,
    stream_up_tx: watch::Sender<bool>,
    /// Taken by the first carrier socket; later connections are refused.
    outbound_rx: parking_lot::Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    hangup_rx: watch::Receiver<bool>,
    shutdown_tx: watch::Sender<bool>,
    stream_url: String,
}

pub struct SipChannel {
    telephony: TelephonyClient,
    direction: SipDirection,
    public_host: String,
    listener_port: u16,
    call_log: CallLog,
    connected: Arc<AtomicBool>,
    events: Option<mpsc::Receiver<ChannelEvent>>,
    outbound_tx: Option<mpsc::Sender<Vec<u8>>>,
    hangup_tx: Option<watch::Sender<bool>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    endpoint_url: Option<String>,
    call_id: Option<String>,
    application_id: Option<String>,
    dialed_at: Option<DateTime<Utc>>,
    connected_once: bool,
}

impl SipChannel {
    pub fn new(
        telephony: TelephonyClient,
        direction: SipDirection,
        public_host: String,
        listener_port: u16,
    ) -> Self {
        Self {
            telephony,
            direction,
            public_host,
            listener_port,
            call_log: CallLog::new(),
            connected: Arc::new(AtomicBool::new(false)),
            events: None,
            outbound_tx: None,
            hangup_tx: None,
            shutdown_tx: None,
            endpoint_url: None,
            call_id: None,
            application_id: None,
            dialed_at: None,
            connected_once: false,
        }
    }

    /// Numbers and dial timestamp, used by platform bridges to resolve the
    /// platform-side call id afterwards.
    pub fn dial_facts(&self) -> (String, Option<DateTime<Utc>>) {
        (self.telephony.from_number().to_string(), self.dialed_at)
    }

    pub async fn connect(&mut self) -> Result<(), ChannelError> {
        if self.connected_once {
            return Err(ChannelError::AlreadyConnected);
        }
        self.connected_once = true;

        let listener =
            tokio::net::TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], self.listener_port)))
                .await
                .map_err(|e| ChannelError::Connect(format!("listener bind: {}", e)))?;
        let port = listener
            .local_addr()
            .map_err(|e| ChannelError::Connect(e.to_string()))?
            .port();

        let (events_tx, events_rx) = mpsc::channel::<ChannelEvent>(256);
        let (outbound_tx, outbound_rx) = mpsc::channel::<Vec<u8>>(64);
        let (stream_up_tx, mut stream_up_rx) = watch::channel(false);
        let (hangup_tx, hangup_rx) = watch::channel(false);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let stream_url = format!("wss://{}:{}/stream", self.public_host, port);
        let shared = Arc::new(ListenerShared {
            events_tx,
            call_log: self.call_log.clone(),
            connected: self.connected.clone(),
            stream_up_tx,
            outbound_rx: parking_lot::Mutex::new(Some(outbound_rx)),
            hangup_rx,
            shutdown_tx: shutdown_tx.clone(),
            stream_url,
        });

        let router = Router::new()
            .route("/answer", get(answer_document).post(answer_document))
            .route("/stream", get(carrier_stream))
            .route(
                "/tool-calls",
                post(post_tool_calls).layer(DefaultBodyLimit::max(TOOL_CALL_BODY_LIMIT)),
            )
            .with_state(shared);

        let mut server_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
                let _ = server_shutdown.changed().await;
            });
            if let Err(e) = serve.await {
                tracing::warn!("sip listener exited with error: {}", e);
            }
        });

        self.events = Some(events_rx);
        self.outbound_tx = Some(outbound_tx);
        self.hangup_tx = Some(hangup_tx);
        self.shutdown_tx = Some(shutdown_tx);
        self.endpoint_url = Some(format!(
            "https://{}:{}/tool-calls",
            self.public_host, port
        ));

        let answer_url = format!("https://{}:{}/answer", self.public_host, port);
        self.dialed_at = Some(Utc::now());

        let answer_timeout = match &self.direction {
            SipDirection::Outbound { target_number } => {
                let call_id = self.telephony.create_call(target_number, &answer_url).await?;
                tracing::info!(call_id = %call_id, to = %target_number, "outbound call placed");
                self.call_id = Some(call_id);
                OUTBOUND_ANSWER_TIMEOUT
            }
            SipDirection::Inbound => {
                let app_id = self.telephony.attach_inbound_application(&answer_url).await?;
                tracing::info!(application_id = %app_id, "inbound application attached, waiting for dial-in");
                self.application_id = Some(app_id);
                INBOUND_ANSWER_TIMEOUT
            }
        };

        // Wait for the carrier to open the audio socket.
        let answered = tokio::time::timeout(answer_timeout, async {
            loop {
                if *stream_up_rx.borrow() {
                    return;
                }
                if stream_up_rx.changed().await.is_err() {
                    return;
                }
            }
        })
        .await;

        if answered.is_err() || !self.connected.load(Ordering::SeqCst) {
            self.teardown().await;
            return Err(ChannelError::Timeout("carrier audio stream".into()));
        }

        tracing::info!("sip audio stream established");
        Ok(())
    }

    pub async fn send_audio(&mut self, pcm: &[i16]) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }
        let outbound = self.outbound_tx.as_ref().ok_or(ChannelError::NotConnected)?;

        let pcm_8k = audio::resample(pcm, audio::CANONICAL_RATE_HZ, audio::TELEPHONY_RATE_HZ);
        outbound
            .send(audio::pcm_to_mulaw(&pcm_8k))
            .await
            .map_err(|_| ChannelError::Send("carrier socket has closed".into()))
    }

    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.events.as_mut()?.recv().await
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub async fn disconnect(&mut self) {
        if let Some(hangup) = self.hangup_tx.take() {
            let _ = hangup.send(true);
        }
        if let Some(call_id) = self.call_id.take() {
            self.telephony.hangup(&call_id).await;
        }
        if let Some(app_id) = self.application_id.take() {
            self.telephony.detach_application(&app_id).await;
        }
        // If the carrier never connected there is no handler to run the
        // grace period; close the listener directly.
        if !self.connected.load(Ordering::SeqCst) {
            if let Some(shutdown) = self.shutdown_tx.take() {
                let _ = shutdown.send(true);
            }
        }
    }

    async fn teardown(&mut self) {
        if let Some(shutdown) = self.shutdown_tx.take() {
            let _ = shutdown.send(true);
        }
        self.disconnect().await;
    }

    pub fn call_data(&self) -> Vec<ObservedToolCall> {
        self.call_log.snapshot()
    }

    pub fn tool_call_endpoint_url(&self) -> Option<String> {
        self.endpoint_url.clone()
    }
}

/// XML stream instruction the carrier fetches when the call is answered.
async fn answer_document(State(shared): State<Arc<ListenerShared>>) -> Response {
    let body = format!(
        "<Response><Stream bidirectional=\"true\" keepCallAlive=\"true\" \
         contentType=\"audio/x-mulaw;rate=8000\">{}</Stream></Response>",
        shared.stream_url
    );
    ([("content-type", "application/xml")], body).into_response()
}

async fn carrier_stream(
    ws: WebSocketUpgrade,
    State(shared): State<Arc<ListenerShared>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_carrier_socket(socket, shared))
}

async fn handle_carrier_socket(mut socket: WebSocket, shared: Arc<ListenerShared>) {
    // Only one audio leg per listener; refuse stragglers.
    let Some(mut outbound) = shared.outbound_rx.lock().take() else {
        tracing::warn!("second carrier stream refused");
        return;
    };

    shared.call_log.mark_connected();
    shared.connected.store(true, Ordering::SeqCst);
    let _ = shared.stream_up_tx.send(true);

    let mut hangup = shared.hangup_rx.clone();
    let mut outbound_open = true;

    loop {
        tokio::select! {
            message = socket.recv() => match message {
                Some(Ok(WsMessage::Binary(mulaw))) => {
                    if !shared.connected.load(Ordering::SeqCst) {
                        break;
                    }
                    let pcm_8k = audio::mulaw_to_pcm(&mulaw);
                    let pcm_24k =
                        audio::resample(&pcm_8k, audio::TELEPHONY_RATE_HZ, audio::CANONICAL_RATE_HZ);
                    if shared.events_tx.send(ChannelEvent::Audio(pcm_24k)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(WsMessage::Text(text))) => {
                    try_record_text_frame(&text, &shared.call_log);
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Err(e)) => {
                    let _ = shared
                        .events_tx
                        .send(ChannelEvent::Error(e.to_string()))
                        .await;
                    break;
                }
                Some(Ok(_)) => {}
            },
            chunk = outbound.recv(), if outbound_open => match chunk {
                Some(mulaw) => {
                    // 160 bytes per 20 ms playAudio frame.
                    let mut failed = false;
                    for frame in mulaw.chunks(MULAW_FRAME_BYTES) {
                        let event = serde_json::json!({
                            "event": "playAudio",
                            "media": {
                                "contentType": "audio/x-mulaw",
                                "rate": audio::TELEPHONY_RATE_HZ,
                                "payload": BASE64.encode(frame),
                            }
                        });
                        if socket.send(WsMessage::Text(event.to_string())).await.is_err() {
                            failed = true;
                            break;
                        }
                    }
                    if failed {
                        break;
                    }
                }
                None => outbound_open = false,
            },
            _ = hangup.changed() => {
                let _ = socket.send(WsMessage::Close(None)).await;
                break;
            }
        }
    }

    if shared.connected.swap(false, Ordering::SeqCst) {
        let _ = shared.events_tx.send(ChannelEvent::Disconnected).await;
    }

    // Grace window for late tool-call posts, then drop the listener.
    tokio::time::sleep(LATE_EVENT_GRACE).await;
    let _ = shared.shutdown_tx.send(true);
}

/// Accepts one event or an array of events, bounded at 1 MiB.
async fn post_tool_calls(
    State(shared): State<Arc<ListenerShared>>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let events = match body {
        serde_json::Value::Array(items) => items,
        other => vec![other],
    };

    let mut received = 0usize;
    for item in events {
        if let Some(event) = lenient_tool_call(item) {
            shared.call_log.record(event);
            received += 1;
        }
    }

    Json(serde_json::json!({ "received": received })).into_response()
}

/// The HTTP fallback accepts events with or without the `type` tag.
fn lenient_tool_call(value: serde_json::Value) -> Option<ToolCallEvent> {
    let mut object = value;
    if let Some(map) = object.as_object_mut() {
        map.entry("type")
            .or_insert_with(|| serde_json::Value::String("tool_call".into()));
    }
    match serde_json::from_value::<ToolCallEvent>(object) {
        Ok(event) if event.event_type == "tool_call" => Some(event),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_requires_target_unless_inbound() {
        assert!(SipDirection::from_config(None, false).is_err());
        assert!(matches!(
            SipDirection::from_config(None, true).unwrap(),
            SipDirection::Inbound
        ));
        assert!(matches!(
            SipDirection::from_config(Some("+15550100".into()), false).unwrap(),
            SipDirection::Outbound { .. }
        ));
    }

    #[test]
    fn lenient_tool_call_defaults_type() {
        let event = lenient_tool_call(serde_json::json!({
            "name": "lookup_order",
            "arguments": {"order_id": "A1"},
        }))
        .unwrap();
        assert_eq!(event.name, "lookup_order");
        assert_eq!(event.event_type, "tool_call");

        assert!(lenient_tool_call(serde_json::json!({"type": "transcript"})).is_none());
        assert!(lenient_tool_call(serde_json::json!("not an object")).is_none());
    }

    #[test]
    fn answer_document_shape() {
        // The carrier XML contract is fixed; keep the literal pinned.
        let url = "wss://host:1234/stream";
        let body = format!(
            "<Response><Stream bidirectional=\"true\" keepCallAlive=\"true\" \
             contentType=\"audio/x-mulaw;rate=8000\">{}</Stream></Response>",
            url
        );
        assert!(body.contains("bidirectional=\"true\""));
        assert!(body.contains("audio/x-mulaw;rate=8000"));
        assert!(body.contains(url));
    }
}
