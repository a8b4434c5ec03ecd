//! Cloud API webhook: subscription handshake and inbound message extraction.

use crate::types::InboundMessage;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

pub const MESSAGE_TYPE_TEXT: &str = "text";
pub const MESSAGE_TYPE_BUTTON: &str = "button";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified(String),
    Forbidden,
    BadRequest,
}

pub fn verify(query: &VerifyQuery, expected_token: Option<&str>) -> VerifyOutcome {
    let (Some(mode), Some(token)) = (query.mode.as_deref(), query.verify_token.as_deref()) else {
        return VerifyOutcome::BadRequest;
    };
    match expected_token {
        Some(expected) if mode == "subscribe" && token == expected => {
            VerifyOutcome::Verified(query.challenge.clone().unwrap_or_default())
        }
        _ => VerifyOutcome::Forbidden,
    }
}

fn contact_names(value: &Value) -> HashMap<String, String> {
    value
        .get("contacts")
        .and_then(|v| v.as_array())
        .map(|contacts| {
            contacts
                .iter()
                .filter_map(|c| {
                    let wa_id = c.get("wa_id")?.as_str()?;
                    let name = c.pointer("/profile/name")?.as_str()?;
                    Some((wa_id.to_string(), name.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn message_text(message: &Value) -> Option<(String, &'static str)> {
    if let Some(text) = message.get("text") {
        let body = text.get("body").and_then(|v| v.as_str()).unwrap_or_default();
        return Some((body.to_string(), MESSAGE_TYPE_TEXT));
    }
    if let Some(button) = message.get("button") {
        let body = button.get("text").and_then(|v| v.as_str()).unwrap_or_default();
        return Some((body.to_string(), MESSAGE_TYPE_BUTTON));
    }
    None
}

/// Walks `entry[].changes[].value.messages[]`, keeping text and button replies.
pub fn parse_inbound(payload: &Value) -> Vec<InboundMessage> {
    let mut inbound = Vec::new();
    let entries = payload.get("entry").and_then(|v| v.as_array());
    for entry in entries.into_iter().flatten() {
        let changes = entry.get("changes").and_then(|v| v.as_array());
        for change in changes.into_iter().flatten() {
            let Some(value) = change.get("value") else {
                continue;
            };
            let recipient = value
                .pointer("/metadata/display_phone_number")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let names = contact_names(value);
            let messages = value.get("messages").and_then(|v| v.as_array());
            for message in messages.into_iter().flatten() {
                let Some(sender) = message.get("from").and_then(|v| v.as_str()) else {
                    continue;
                };
                let Some((text, message_type)) = message_text(message) else {
                    continue;
                };
                if text.is_empty() {
                    continue;
                }
                let whatsapp_id = message
                    .get("id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                inbound.push(InboundMessage {
                    whatsapp_id,
                    sender: sender.to_string(),
                    recipient: recipient.clone(),
                    text,
                    message_type: message_type.to_string(),
                    sender_name: names.get(sender).cloned(),
                    timestamp: message
                        .get("timestamp")
                        .and_then(|v| v.as_str())
                        .map(str::to_string),
                });
            }
        }
    }
    inbound
}

/// Reply configured for a quick-reply button, if any.
pub fn auto_reply_for<'a>(message: &InboundMessage, replies: &'a HashMap<String, String>) -> Option<&'a str> {
    if message.message_type != MESSAGE_TYPE_BUTTON {
        return None;
    }
    replies.get(message.text.trim()).map(String::as_str)
}
