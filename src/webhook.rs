//! HTTP intake for WhatsApp gateway webhooks.

use crate::dispatcher::Dispatcher;
use crate::message::{AttachmentKind, Message};
use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// The subset of the gateway's webhook payload the core cares about.
#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub message_id: String,
    pub chat_jid: String,
    pub sender_jid: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attachments: Vec<AttachmentKind>,
}

impl WebhookPayload {
    /// Payloads missing identifiers are malformed and dropped; missing text
    /// is fine (the router classifies those as unhandled).
    pub fn into_message(self) -> Result<Message, String> {
        if self.message_id.trim().is_empty() {
            return Err("missing message_id".to_string());
        }
        if self.chat_jid.trim().is_empty() {
            return Err("missing chat_jid".to_string());
        }
        if self.sender_jid.trim().is_empty() {
            return Err("missing sender_jid".to_string());
        }

        Ok(Message {
            id: self.message_id,
            group_id: self.chat_jid,
            sender_id: self.sender_jid,
            text: self.text.unwrap_or_default(),
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            attachments: self.attachments,
        })
    }
}

pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route("/webhook", post(receive_webhook))
        .route("/health", get(health))
        .with_state(dispatcher)
}

async fn receive_webhook(
    State(dispatcher): State<Arc<Dispatcher>>,
    Json(payload): Json<WebhookPayload>,
) -> (StatusCode, Json<serde_json::Value>) {
    match payload.into_message() {
        Ok(message) => {
            debug!("Webhook accepted message {}", message.id);
            dispatcher.spawn(message);
            (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({ "status": "accepted" })),
            )
        }
        Err(reason) => {
            warn!("Dropping malformed webhook payload: {}", reason);
            (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": reason })),
            )
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
