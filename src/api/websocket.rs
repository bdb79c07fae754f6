//! WebSocket signal stream from the background context to the foreground UI.
//!
//! Clients connect to `/ws` and receive:
//! - tap progress while a gesture is being entered
//! - detected events routed to the foreground for handling

use axum::{
    extract::{State, WebSocketUpgrade, ws::{Message, WebSocket}},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, debug, warn};

use super::BridgeState;
use crate::dispatch::ForegroundChannel;
use crate::types::DetectedEvent;

/// Signals pushed to WebSocket clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SignalMessage {
    #[serde(rename = "tap_progress")]
    TapProgress {
        count: usize,
    },
    #[serde(rename = "detected")]
    Detected {
        event: DetectedEvent,
    },
}

/// Fan-out of signals to every connected foreground client
#[derive(Clone)]
pub struct SignalBroadcaster {
    sender: broadcast::Sender<SignalMessage>,
}

impl SignalBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Returns how many clients the signal reached
    pub fn broadcast(&self, signal: SignalMessage) -> usize {
        self.sender.send(signal).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SignalMessage> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl ForegroundChannel for SignalBroadcaster {
    fn forward(&self, event: &DetectedEvent) -> bool {
        self.broadcast(SignalMessage::Detected { event: event.clone() }) > 0
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<BridgeState>,
) -> impl IntoResponse {
    let broadcaster = state.signals.clone();
    info!("🔌 Foreground client connecting (total: {})", broadcaster.subscriber_count() + 1);

    ws.on_upgrade(move |socket| handle_ws_connection(socket, broadcaster))
}

async fn handle_ws_connection(socket: WebSocket, broadcaster: SignalBroadcaster) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let mut rx = broadcaster.subscribe();

    let send_task = tokio::spawn(async move {
        loop {
            let signal = match rx.recv().await {
                Ok(signal) => signal,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Foreground client lagging, {} signals skipped", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            match serde_json::to_string(&signal) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Failed to serialize signal: {}", e),
            }
        }
    });

    // The stream is one-way; only watch for close
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Close(_) => break,
                Message::Ping(_) => debug!("WS ping received"),
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!("🔌 Foreground client disconnected (remaining: {})",
        broadcaster.subscriber_count().saturating_sub(1));
}
