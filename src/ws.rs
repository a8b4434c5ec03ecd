use crate::db::MessageRecord;
use crate::jobs::RunStatus;
use axum::extract::ws::{Message, WebSocket};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::sync::broadcast;

pub const EVENT_MESSAGE: &str = "message";
pub const EVENT_BULK_PROGRESS: &str = "bulk.progress";
pub const EVENT_BULK_FINISHED: &str = "bulk.finished";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsEvent {
    pub event: String,
    pub payload: serde_json::Value,
}

impl WsEvent {
    pub fn new(event: &str, payload: serde_json::Value) -> Self {
        Self {
            event: event.to_string(),
            payload,
        }
    }

    pub fn message(record: &MessageRecord) -> Self {
        Self::new(
            EVENT_MESSAGE,
            serde_json::to_value(record).unwrap_or_default(),
        )
    }

    pub fn bulk_finished(status: &RunStatus) -> Self {
        Self::new(
            EVENT_BULK_FINISHED,
            serde_json::to_value(status).unwrap_or_default(),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsCommand {
    Connect { token: Option<String> },
    Subscribe { events: Option<Vec<String>> },
    Ping,
}

/// Whether a client with `subscriptions` should receive `event`. No filter means all.
pub fn wants(subscriptions: Option<&HashSet<String>>, event: &str) -> bool {
    subscriptions.map_or(true, |subs| subs.contains(event))
}

async fn send_event(socket: &mut WebSocket, event: &WsEvent) -> bool {
    let text = serde_json::to_string(event).unwrap_or_default();
    socket.send(Message::Text(text)).await.is_ok()
}

pub async fn handle_ws(
    mut socket: WebSocket,
    mut rx: broadcast::Receiver<WsEvent>,
    auth_token: Option<String>,
) {
    let mut authorized = auth_token.is_none();
    let mut subscriptions: Option<HashSet<String>> = None;

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let text = match msg {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(_)) => continue,
                };
                let Ok(cmd) = serde_json::from_str::<WsCommand>(&text) else {
                    continue;
                };
                match cmd {
                    WsCommand::Connect { token } => {
                        if let Some(expected) = auth_token.as_ref() {
                            if token.as_deref() != Some(expected.as_str()) {
                                let _ = socket.send(Message::Close(None)).await;
                                break;
                            }
                        }
                        authorized = true;
                        let ack = WsEvent::new("presence", serde_json::json!({"status": "connected"}));
                        if !send_event(&mut socket, &ack).await {
                            break;
                        }
                    }
                    WsCommand::Subscribe { events } => {
                        subscriptions = events.map(|items| items.into_iter().collect());
                    }
                    WsCommand::Ping => {
                        let health = WsEvent::new("health", serde_json::json!({"status": "ok"}));
                        if !send_event(&mut socket, &health).await {
                            break;
                        }
                    }
                }
            }
            evt = rx.recv() => {
                match evt {
                    Ok(evt) => {
                        if !authorized || !wants(subscriptions.as_ref(), &evt.event) {
                            continue;
                        }
                        if !send_event(&mut socket, &evt).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}
