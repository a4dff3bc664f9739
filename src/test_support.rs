//! Shared fixtures and gateway stubs for unit tests.

use crate::config::Config;
use crate::error::CoreError;
use crate::llm::{ChatGateway, EmbeddingGateway};
use crate::message::Message;
use crate::rag::Topic;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn test_config() -> Config {
    Config {
        whatsapp_host: "http://localhost:3000".to_string(),
        whatsapp_basic_auth_user: None,
        whatsapp_basic_auth_password: None,
        bot_sender_id: Some("bot".to_string()),
        chat_url: "http://localhost:8080/v1".to_string(),
        chat_model: "test-chat".to_string(),
        chat_api_key: None,
        embedding_url: "http://localhost:8080/v1".to_string(),
        embedding_model: "test-embedding".to_string(),
        embedding_api_key: None,
        embedding_dimension: 3,
        database_url: ":memory:".to_string(),
        webhook_bind: "127.0.0.1:0".to_string(),
        retrieval_top_k: 5,
        min_relevance: 0.75,
        duplicate_threshold: 0.9,
        spam_flag_threshold: 0.5,
        spam_remove_threshold: 0.8,
        spam_mention_limit: 8,
        spam_repeat_cache_size: 16,
        spam_domains: vec!["bad.example.com".to_string()],
        summary_window_hours: 24,
        summary_max_messages: 200,
        gateway_max_retries: 2,
        gateway_backoff_ms: 10,
        chat_timeout_secs: 1,
        embedding_timeout_secs: 1,
        ingest_enabled: false,
        ingest_interval_secs: 86400,
    }
}

pub fn test_message(id: &str, text: &str) -> Message {
    Message {
        id: id.to_string(),
        group_id: "group-1".to_string(),
        sender_id: "sender-1".to_string(),
        text: text.to_string(),
        timestamp: Utc::now(),
        attachments: Vec::new(),
    }
}

pub fn test_topic(id: &str, embedding: Vec<f32>) -> Topic {
    Topic {
        id: id.to_string(),
        text: format!("topic {}", id),
        embedding,
        source_message_id: format!("msg-{}", id),
        created_at: Utc::now(),
    }
}

/// Embedding stub keyed by exact input text, with an optional fallback.
/// Unknown text with no fallback behaves like an exhausted gateway.
#[derive(Default)]
pub struct StubEmbedding {
    pub by_text: HashMap<String, Vec<f32>>,
    pub fallback: Option<Vec<f32>>,
    pub calls: AtomicUsize,
}

impl StubEmbedding {
    pub fn always(vector: Vec<f32>) -> Self {
        Self {
            by_text: HashMap::new(),
            fallback: Some(vector),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.by_text.insert(text.to_string(), vector);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl EmbeddingGateway for StubEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.by_text
            .get(text)
            .cloned()
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| CoreError::EmbeddingUnavailable("stub: retries exhausted".to_string()))
    }
}

/// Transport stub that records outbound messages instead of sending them.
#[derive(Default)]
pub struct RecordingTransport {
    pub sent: std::sync::Mutex<Vec<(String, String)>>,
}

impl RecordingTransport {
    pub fn sent_messages(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl crate::transport::Transport for RecordingTransport {
    async fn send_message(
        &self,
        group_id: &str,
        text: &str,
        _in_reply_to: Option<&str>,
    ) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((group_id.to_string(), text.to_string()));
        Ok(())
    }
}

/// Chat stub: a canned reply, or `GenerationFailed` when unavailable.
pub struct StubChat {
    pub reply: Option<String>,
    pub calls: AtomicUsize,
}

impl StubChat {
    pub fn replies(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            reply: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ChatGateway for StubChat {
    async fn complete(&self, _prompt: &str, _context: &[String]) -> Result<String, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply
            .clone()
            .ok_or_else(|| CoreError::GenerationFailed("stub: retries exhausted".to_string()))
    }
}
