//! Shared WebSocket plumbing
//!
//! The raw agent socket and both in-band platform bridges are the same
//! machine: a client WebSocket with a reader task decoding frames into
//! channel events and a writer task draining an outbound queue. Variants
//! differ only in how frames encode audio and control JSON, so that decoding
//! is injected as a function.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::Message;

use crate::toolcalls::CallLog;
use crate::{ChannelError, ChannelEvent};

/// Decodes one inbound frame into zero or more channel events. The decoder
/// records tool calls on the log as a side effect.
pub(crate) type FrameDecoder =
    Arc<dyn Fn(&Message, &CallLog) -> Vec<ChannelEvent> + Send + Sync>;

/// Live socket state shared by the WS-backed variants.
pub(crate) struct SocketCore {
    events: mpsc::Receiver<ChannelEvent>,
    outgoing: mpsc::Sender<Message>,
    connected: Arc<AtomicBool>,
}

impl SocketCore {
    /// Dial and start the reader/writer tasks. Takes a full handshake
    /// request so platform sockets can attach auth headers.
    pub(crate) async fn connect(
        request: Request,
        call_log: CallLog,
        decoder: FrameDecoder,
    ) -> Result<Self, ChannelError> {
        let uri = request.uri().to_string();
        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| ChannelError::Connect(format!("{}: {}", uri, e)))?;

        call_log.mark_connected();
        let (mut sink, mut source) = stream.split();

        let connected = Arc::new(AtomicBool::new(true));
        let (events_tx, events_rx) = mpsc::channel::<ChannelEvent>(256);
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(256);

        // Writer: drain the outbound queue; a close message ends the task.
        let writer_connected = connected.clone();
        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    tracing::debug!("socket write failed: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            writer_connected.store(false, Ordering::SeqCst);
        });

        // Reader: decode frames into events until close or error. Emissions
        // stop the moment the connected flag drops.
        let reader_connected = connected.clone();
        let reader_log = call_log.clone();
        tokio::spawn(async move {
            while let Some(message) = source.next().await {
                if !reader_connected.load(Ordering::SeqCst) {
                    break;
                }
                match message {
                    Ok(Message::Close(_)) => {
                        reader_connected.store(false, Ordering::SeqCst);
                        let _ = events_tx.send(ChannelEvent::Disconnected).await;
                        break;
                    }
                    Ok(message) => {
                        for event in decoder(&message, &reader_log) {
                            if events_tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        reader_connected.store(false, Ordering::SeqCst);
                        let _ = events_tx.send(ChannelEvent::Error(e.to_string())).await;
                        break;
                    }
                }
            }
            if reader_connected.swap(false, Ordering::SeqCst) {
                let _ = events_tx.send(ChannelEvent::Disconnected).await;
            }
        });

        Ok(Self {
            events: events_rx,
            outgoing: out_tx,
            connected,
        })
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub(crate) async fn send(&self, message: Message) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }
        self.outgoing
            .send(message)
            .await
            .map_err(|_| ChannelError::Send("socket writer has exited".into()))
    }

    pub(crate) async fn recv(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    pub(crate) async fn close(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self.outgoing.send(Message::Close(None)).await;
        }
    }
}
