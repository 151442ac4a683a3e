//! WebSocket transport session
//!
//! One socket per session, owned by a writer task and a reader task. The
//! uplink handle is fire-and-forget: `send_audio` pushes into an unbounded
//! channel and returns immediately, so the capture path never waits on the
//! network. The reader maps socket messages to [`TransportEvent`]s and ends
//! the stream on close or failure; neither is retried here.

use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::config::SessionConfig;
use crate::error::TransportError;
use crate::transport::message::{ClientMessage, ServerEvent};
use crate::transport::{TransportEvent, TransportLink};

/// Connected WebSocket uplink handle.
pub struct WsTransport {
    out_tx: mpsc::UnboundedSender<Message>,
    streaming: Arc<AtomicBool>,
    dropped_frames: AtomicU64,
    mime_type: String,
}

/// Perform the handshake and spawn the socket tasks.
///
/// Returns the uplink handle and the downlink event stream. A handshake
/// failure is `ConnectFailed`; the caller may retry with a fresh `connect`.
pub async fn connect(
    config: &SessionConfig,
) -> Result<(WsTransport, mpsc::UnboundedReceiver<TransportEvent>), TransportError> {
    let (socket, _response) = connect_async(config.endpoint.as_str())
        .await
        .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

    tracing::debug!(endpoint = %config.endpoint, "Transport connected");

    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<TransportEvent>();
    let streaming = Arc::new(AtomicBool::new(true));

    // Writer: drains the uplink queue into the socket.
    tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() {
                break;
            }
            if closing {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // Reader: maps socket messages to transport events.
    let reader_streaming = streaming.clone();
    tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(ServerEvent::Audio { data }) => {
                        let _ = event_tx.send(TransportEvent::Audio(data));
                    }
                    Ok(ServerEvent::Interrupted) => {
                        let _ = event_tx.send(TransportEvent::Interrupted);
                    }
                    Ok(ServerEvent::Closed) => {
                        let _ = event_tx.send(TransportEvent::Closed);
                        break;
                    }
                    Ok(ServerEvent::Error { message }) => {
                        let reason = message.unwrap_or_else(|| "unspecified".to_string());
                        let _ = event_tx.send(TransportEvent::Error(TransportError::Remote(
                            reason,
                        )));
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Skipping unparseable downlink message: {}", e);
                    }
                },
                Ok(Message::Close(_)) => {
                    let _ = event_tx.send(TransportEvent::Closed);
                    break;
                }
                // Pings are answered by the protocol layer
                Ok(_) => {}
                Err(e) => {
                    let _ = event_tx.send(TransportEvent::Error(
                        TransportError::ConnectionLost(e.to_string()),
                    ));
                    break;
                }
            }
        }
        reader_streaming.store(false, Ordering::SeqCst);
    });

    let transport = WsTransport {
        out_tx,
        streaming,
        dropped_frames: AtomicU64::new(0),
        mime_type: config.uplink_mime_type(),
    };

    Ok((transport, event_rx))
}

impl TransportLink for WsTransport {
    fn send_audio(&self, payload: String) {
        if !self.streaming.load(Ordering::SeqCst) {
            self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let msg = ClientMessage::Audio {
            mime_type: self.mime_type.clone(),
            data: payload,
        };
        // Serializing a two-field struct cannot fail
        let json = serde_json::to_string(&msg).unwrap_or_default();

        if self.out_tx.send(Message::Text(json)).is_err() {
            self.dropped_frames.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn close(&self) {
        if self.streaming.swap(false, Ordering::SeqCst) {
            let _ = self.out_tx.send(Message::Close(None));
            tracing::debug!("Transport close requested");
        }
    }

    fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }
}
