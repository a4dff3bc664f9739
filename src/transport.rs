//! Outbound delivery to the WhatsApp gateway.
//!
//! The gateway (a whatsapp-web-multidevice style sidecar) owns all session
//! state; this client only pushes text at it.

use crate::config::Config;
use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_message(
        &self,
        group_id: &str,
        text: &str,
        in_reply_to: Option<&str>,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    phone: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_message_id: Option<&'a str>,
}

pub struct WhatsAppClient {
    http: reqwest::Client,
    host: String,
    basic_auth: Option<(String, Option<String>)>,
}

impl WhatsAppClient {
    pub fn new(http: reqwest::Client, config: &Config) -> Self {
        let basic_auth = config
            .whatsapp_basic_auth_user
            .clone()
            .map(|user| (user, config.whatsapp_basic_auth_password.clone()));

        Self {
            http,
            host: config.whatsapp_host.trim_end_matches('/').to_string(),
            basic_auth,
        }
    }
}

#[async_trait]
impl Transport for WhatsAppClient {
    async fn send_message(
        &self,
        group_id: &str,
        text: &str,
        in_reply_to: Option<&str>,
    ) -> anyhow::Result<()> {
        let url = format!("{}/send/message", self.host);
        let body = SendMessageRequest {
            phone: group_id,
            message: text,
            reply_message_id: in_reply_to,
        };

        let mut request = self.http.post(&url).json(&body);
        if let Some((user, password)) = &self.basic_auth {
            request = request.basic_auth(user, password.as_deref());
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            anyhow::bail!(
                "gateway rejected send to {}: {}",
                group_id,
                response.status()
            );
        }
        debug!("Delivered message to group {}", group_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_request_shape() {
        let body = SendMessageRequest {
            phone: "12345@g.us",
            message: "hello",
            reply_message_id: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["phone"], "12345@g.us");
        assert_eq!(json["message"], "hello");
        assert!(json.get("reply_message_id").is_none());

        let body = SendMessageRequest {
            phone: "12345@g.us",
            message: "hello",
            reply_message_id: Some("m1"),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["reply_message_id"], "m1");
    }

    #[test]
    fn test_host_trailing_slash_is_trimmed() {
        let mut config = crate::test_support::test_config();
        config.whatsapp_host = "http://localhost:3000/".to_string();
        let client = WhatsAppClient::new(reqwest::Client::new(), &config);
        assert_eq!(client.host, "http://localhost:3000");
    }
}
