//! Real-time subscription endpoint.
//!
//! On connect the client immediately receives the broadcast topic.
//! Per-photo topics are joined and left with small JSON commands:
//! `{"action":"subscribe","photoId":"..."}` and the matching
//! `unsubscribe`. One task per topic forwards notifications into the
//! connection's queue; a single writer drains it to the socket.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::AppState;
use crate::notify::{photo_topic, NotificationHub, StatusNotification, BROADCAST_TOPIC};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientCommand {
    action: String,
    photo_id: Option<Uuid>,
}

pub async fn subscribe(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: Arc<NotificationHub>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<StatusNotification>(NotificationHub::DEFAULT_CAPACITY);

    let mut forwarders: HashMap<String, JoinHandle<()>> = HashMap::new();
    forwarders.insert(
        BROADCAST_TOPIC.to_string(),
        forward_topic(&hub, BROADCAST_TOPIC, tx.clone()).await,
    );

    loop {
        tokio::select! {
            notification = rx.recv() => {
                let Some(notification) = notification else { break };
                let Ok(json) = serde_json::to_string(&notification) else { continue };
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_command(&hub, &tx, &mut forwarders, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // pings and binary frames are ignored
                    Some(Err(e)) => {
                        debug!("Subscriber socket error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    for (_, handle) in forwarders {
        handle.abort();
    }
}

async fn handle_command(
    hub: &Arc<NotificationHub>,
    tx: &mpsc::Sender<StatusNotification>,
    forwarders: &mut HashMap<String, JoinHandle<()>>,
    text: &str,
) {
    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(e) => {
            warn!("Ignoring malformed subscriber command: {}", e);
            return;
        }
    };
    let Some(photo_id) = command.photo_id else {
        return;
    };
    let topic = photo_topic(photo_id);

    match command.action.as_str() {
        "subscribe" => {
            if !forwarders.contains_key(&topic) {
                let handle = forward_topic(hub, &topic, tx.clone()).await;
                forwarders.insert(topic, handle);
            }
        }
        "unsubscribe" => {
            if let Some(handle) = forwarders.remove(&topic) {
                handle.abort();
            }
        }
        other => warn!("Ignoring unknown subscriber action {:?}", other),
    }
}

/// Pump one topic into the connection queue. A lagged receiver skips
/// the dropped messages and keeps going; the client recovers missed
/// transitions through polling.
async fn forward_topic(
    hub: &Arc<NotificationHub>,
    topic: &str,
    tx: mpsc::Sender<StatusNotification>,
) -> JoinHandle<()> {
    let mut rx = hub.subscribe(topic).await;
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(notification) => {
                    if tx.send(notification).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Subscriber lagged, dropped {} notifications", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
