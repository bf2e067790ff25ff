//! WebRTC (LiveKit) channel
//!
//! Joins a room with a server-minted JWT, publishes a local audio track fed
//! from a 48 kHz source, and subscribes to remote participants' audio. Tool
//! calls arrive as data packets on a dedicated topic and are parsed exactly
//! like text frames on the raw socket.

use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;

use livekit::options::TrackPublishOptions;
use livekit::track::{LocalAudioTrack, LocalTrack, RemoteTrack, TrackSource};
use livekit::webrtc::audio_frame::AudioFrame;
use livekit::webrtc::audio_source::native::NativeAudioSource;
use livekit::webrtc::audio_source::{AudioSourceOptions, RtcAudioSource};
use livekit::webrtc::audio_stream::native::NativeAudioStream;
use livekit::webrtc::prelude::RtcAudioTrack;
use livekit::{Room, RoomEvent, RoomOptions};
use livekit_api::access_token::{AccessToken, VideoGrants};

use voiceci_core::audio;
use voiceci_core::ObservedToolCall;

use crate::toolcalls::{try_record_text_frame, CallLog};
use crate::{ChannelError, ChannelEvent};

/// Data-channel topic carrying tool-call events.
const TOOL_CALL_TOPIC: &str = "tool_calls";
/// Samples per 10 ms capture frame at the room rate.
const CAPTURE_FRAME_SAMPLES: usize = 480;

pub struct WebrtcChannel {
    url: String,
    api_key: String,
    api_secret: String,
    room_name: String,
    identity: String,
    call_log: CallLog,
    connected: Arc<AtomicBool>,
    room: Option<Room>,
    source: Option<NativeAudioSource>,
    events: Option<mpsc::Receiver<ChannelEvent>>,
    connected_once: bool,
}

impl WebrtcChannel {
    pub fn new(
        url: String,
        api_key: String,
        api_secret: String,
        room_name: String,
        identity: String,
    ) -> Self {
        Self {
            url,
            api_key,
            api_secret,
            room_name,
            identity,
            call_log: CallLog::new(),
            connected: Arc::new(AtomicBool::new(false)),
            room: None,
            source: None,
            events: None,
            connected_once: false,
        }
    }

    fn mint_token(&self) -> Result<String, ChannelError> {
        AccessToken::with_api_key(&self.api_key, &self.api_secret)
            .with_identity(&self.identity)
            .with_name(&self.identity)
            .with_grants(VideoGrants {
                room_join: true,
                room: self.room_name.clone(),
                ..Default::default()
            })
            .to_jwt()
            .map_err(|e| ChannelError::Configuration(format!("livekit token: {}", e)))
    }

    pub async fn connect(&mut self) -> Result<(), ChannelError> {
        if self.connected_once {
            return Err(ChannelError::AlreadyConnected);
        }
        self.connected_once = true;

        let token = self.mint_token()?;
        let (room, mut room_events) = Room::connect(&self.url, &token, RoomOptions::default())
            .await
            .map_err(|e| ChannelError::Connect(format!("livekit room: {}", e)))?;

        // Publish the caller track at the room rate; send-side resampling
        // happens in send_audio.
        let source = NativeAudioSource::new(
            AudioSourceOptions::default(),
            audio::WEBRTC_RATE_HZ,
            1,
            200,
        );
        let track = LocalAudioTrack::create_audio_track(
            "voiceci-caller",
            RtcAudioSource::Native(source.clone()),
        );
        room.local_participant()
            .publish_track(
                LocalTrack::Audio(track),
                TrackPublishOptions {
                    source: TrackSource::Microphone,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| ChannelError::Connect(format!("publish track: {}", e)))?;

        self.call_log.mark_connected();
        self.connected.store(true, Ordering::SeqCst);

        let (events_tx, events_rx) = mpsc::channel::<ChannelEvent>(256);
        let connected = self.connected.clone();
        let call_log = self.call_log.clone();

        tokio::spawn(async move {
            while let Some(event) = room_events.recv().await {
                if !connected.load(Ordering::SeqCst) {
                    break;
                }
                match event {
                    RoomEvent::TrackSubscribed { track, .. } => {
                        if let RemoteTrack::Audio(audio_track) = track {
                            tracing::debug!("subscribed to remote audio track");
                            spawn_remote_audio_pump(
                                audio_track.rtc_track(),
                                events_tx.clone(),
                                connected.clone(),
                            );
                        }
                    }
                    RoomEvent::DataReceived { payload, topic, .. } => {
                        if topic.as_deref() == Some(TOOL_CALL_TOPIC) {
                            // Both the packet and text-stream forms end up as
                            // UTF-8 JSON on this topic.
                            if let Ok(text) = std::str::from_utf8(&payload) {
                                try_record_text_frame(text, &call_log);
                            }
                        }
                    }
                    RoomEvent::Disconnected { reason } => {
                        tracing::info!(?reason, "livekit room disconnected");
                        if connected.swap(false, Ordering::SeqCst) {
                            let _ = events_tx.send(ChannelEvent::Disconnected).await;
                        }
                        break;
                    }
                    _ => {}
                }
            }
        });

        tracing::info!(room = %self.room_name, "webrtc channel connected");
        self.room = Some(room);
        self.source = Some(source);
        self.events = Some(events_rx);
        Ok(())
    }

    pub async fn send_audio(&mut self, pcm: &[i16]) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }
        let source = self.source.as_ref().ok_or(ChannelError::NotConnected)?;

        let pcm_48k = audio::resample(pcm, audio::CANONICAL_RATE_HZ, audio::WEBRTC_RATE_HZ);
        for chunk in pcm_48k.chunks(CAPTURE_FRAME_SAMPLES) {
            let frame = AudioFrame {
                data: Cow::Owned(chunk.to_vec()),
                sample_rate: audio::WEBRTC_RATE_HZ,
                num_channels: 1,
                samples_per_channel: chunk.len() as u32,
            };
            source
                .capture_frame(&frame)
                .await
                .map_err(|e| ChannelError::Send(format!("capture frame: {}", e)))?;
        }
        Ok(())
    }

    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.events.as_mut()?.recv().await
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub async fn disconnect(&mut self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            if let Some(room) = self.room.take() {
                if let Err(e) = room.close().await {
                    tracing::debug!("room close: {}", e);
                }
            }
        }
    }

    pub fn call_data(&self) -> Vec<ObservedToolCall> {
        self.call_log.snapshot()
    }
}

/// Drain a remote track into channel events, resampling to 24 kHz.
fn spawn_remote_audio_pump(
    rtc_track: RtcAudioTrack,
    events_tx: mpsc::Sender<ChannelEvent>,
    connected: Arc<AtomicBool>,
) {
    tokio::spawn(async move {
        let mut stream =
            NativeAudioStream::new(rtc_track, audio::WEBRTC_RATE_HZ as i32, 1);
        while let Some(frame) = stream.next().await {
            if !connected.load(Ordering::SeqCst) {
                break;
            }
            let pcm_24k = audio::resample(
                frame.data.as_ref(),
                frame.sample_rate,
                audio::CANONICAL_RATE_HZ,
            );
            if events_tx.send(ChannelEvent::Audio(pcm_24k)).await.is_err() {
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_before_connect_fails_fast() {
        let mut channel = WebrtcChannel::new(
            "wss://rooms.example".into(),
            "key".into(),
            "secret".into(),
            "qa-room".into(),
            "caller".into(),
        );
        let err = channel.send_audio(&[0i16; 480]).await.err().unwrap();
        assert!(matches!(err, ChannelError::NotConnected));
        assert!(channel.call_data().is_empty());
    }
}
