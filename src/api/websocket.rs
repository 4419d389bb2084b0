//! WebSocket feed of audit events
//!
//! [`WsBroadcaster`] is also an [`AuditSink`], so every event the engine
//! records is pushed to connected clients.

use crate::audit::AuditEvent;
use crate::external::{AuditSink, ExternalError};
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Maximum number of events to buffer per subscriber
const BROADCAST_CAPACITY: usize = 256;

/// WebSocket events that can be broadcast to clients
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum WsEvent {
    /// Connection established
    Connected { message: String },
    /// An audit event was appended to the trail
    Audit { event: AuditEvent },
    /// Heartbeat to keep connection alive
    Ping,
}

/// Broadcaster for WebSocket events
#[derive(Debug)]
pub struct WsBroadcaster {
    sender: broadcast::Sender<WsEvent>,
}

impl WsBroadcaster {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { sender }
    }

    /// Broadcast an event to all connected clients
    pub fn broadcast(&self, event: WsEvent) {
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WsEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for WsBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditSink for WsBroadcaster {
    async fn emit(&self, event: &AuditEvent) -> Result<(), ExternalError> {
        self.broadcast(WsEvent::Audit {
            event: event.clone(),
        });
        Ok(())
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<crate::api::handlers::ApiState>,
) -> impl IntoResponse {
    let broadcaster = state.ws_broadcaster.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, broadcaster))
}

async fn handle_socket(socket: WebSocket, broadcaster: Arc<WsBroadcaster>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = broadcaster.subscribe();

    let welcome = WsEvent::Connected {
        message: "Connected to custody audit feed".to_string(),
    };
    if let Ok(json) = serde_json::to_string(&welcome) {
        let _ = sender.send(Message::Text(json.into())).await;
    }

    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Ok(json) = serde_json::to_string(&event) {
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("WebSocket client lagged, {} audit events dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(Message::Text(text)) => {
                    log::debug!("Ignoring client message: {}", text);
                }
                Err(e) => {
                    log::warn!("WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
    }

    log::info!("WebSocket connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditDraft, AuditTrail, Category};
    use chrono::Utc;

    #[test]
    fn test_broadcast_with_no_subscribers() {
        let broadcaster = WsBroadcaster::new();
        assert_eq!(broadcaster.subscriber_count(), 0);
        broadcaster.broadcast(WsEvent::Ping);
    }

    #[tokio::test]
    async fn test_sink_forwards_audit_events() {
        let broadcaster = WsBroadcaster::new();
        let mut rx = broadcaster.subscribe();

        let mut trail = AuditTrail::default();
        let event = trail
            .append(
                AuditDraft::info(Category::Emergency, "wallet_frozen", "carol"),
                Utc::now(),
            )
            .clone();
        broadcaster.emit(&event).await.unwrap();

        match rx.recv().await.unwrap() {
            WsEvent::Audit { event: received } => assert_eq!(received.hash, event.hash),
            other => panic!("unexpected event: {:?}", other),
        }

        let json = serde_json::to_string(&WsEvent::Audit { event }).unwrap();
        assert!(json.contains(r#""type":"Audit""#));
        assert!(json.contains("wallet_frozen"));
    }
}
