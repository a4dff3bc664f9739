pub mod client;

pub use client::LlmClient;

use crate::error::CoreError;
use async_trait::async_trait;

/// Turns text into a fixed-dimension vector. Implementations carry their own
/// timeout and retry budget; by the time an error surfaces here it is final.
#[async_trait]
pub trait EmbeddingGateway: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError>;
}

/// Produces a completion for a prompt, optionally grounded in context
/// snippets that are presented to the model ahead of the prompt.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    async fn complete(&self, prompt: &str, context: &[String]) -> Result<String, CoreError>;
}
