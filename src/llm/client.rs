use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
        CreateEmbeddingRequestArgs,
    },
    Client,
};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::warn;

use crate::config::Config;
use crate::error::CoreError;
use crate::llm::{ChatGateway, EmbeddingGateway};

pub struct LlmClient {
    chat_client: Client<OpenAIConfig>,
    embedding_client: Client<OpenAIConfig>,
    chat_model: String,
    embedding_model: String,
    chat_timeout: Duration,
    embedding_timeout: Duration,
    max_retries: u32,
    backoff_base: Duration,
}

impl LlmClient {
    pub fn new(config: &Config) -> Self {
        let mut chat_config = OpenAIConfig::new().with_api_base(&config.chat_url);

        if let Some(key) = &config.chat_api_key {
            chat_config = chat_config.with_api_key(key);
        } else {
            chat_config = chat_config.with_api_key("unused");
        }

        let mut embedding_config = OpenAIConfig::new().with_api_base(&config.embedding_url);

        if let Some(key) = &config.embedding_api_key {
            embedding_config = embedding_config.with_api_key(key);
        } else {
            embedding_config = embedding_config.with_api_key("unused");
        }

        Self {
            chat_client: Client::with_config(chat_config),
            embedding_client: Client::with_config(embedding_config),
            chat_model: config.chat_model.clone(),
            embedding_model: config.embedding_model.clone(),
            chat_timeout: Duration::from_secs(config.chat_timeout_secs),
            embedding_timeout: Duration::from_secs(config.embedding_timeout_secs),
            max_retries: config.gateway_max_retries,
            backoff_base: Duration::from_millis(config.gateway_backoff_ms),
        }
    }

    async fn try_chat(&self, messages: Vec<ChatCompletionRequestMessage>) -> anyhow::Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.chat_model)
            .messages(messages)
            .build()?;

        let response = self.chat_client.chat().create(request).await?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| anyhow::anyhow!("empty completion from chat gateway"))?;

        Ok(content)
    }

    async fn try_embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.embedding_model)
            .input(text)
            .build()?;

        let response = self.embedding_client.embeddings().create(request).await?;
        let embedding = response
            .data
            .first()
            .ok_or_else(|| anyhow::anyhow!("no embedding returned"))?
            .embedding
            .clone();

        Ok(embedding)
    }

    /// Exponential backoff after each failed attempt. The first call is not a
    /// retry, so a budget of N allows N+1 attempts total.
    fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff_base * 2u32.saturating_pow(attempt)
    }
}

#[async_trait::async_trait]
impl ChatGateway for LlmClient {
    async fn complete(&self, prompt: &str, context: &[String]) -> Result<String, CoreError> {
        let mut messages: Vec<ChatCompletionRequestMessage> = Vec::new();
        if !context.is_empty() {
            let system = ChatCompletionRequestSystemMessageArgs::default()
                .content(context.join("\n\n"))
                .build()
                .map_err(|e| CoreError::GenerationFailed(e.to_string()))?;
            messages.push(system.into());
        }
        let user = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt.to_string())
            .build()
            .map_err(|e| CoreError::GenerationFailed(e.to_string()))?;
        messages.push(user.into());

        let mut last_error = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                sleep(self.backoff_for_attempt(attempt - 1)).await;
            }
            match timeout(self.chat_timeout, self.try_chat(messages.clone())).await {
                Ok(Ok(content)) => return Ok(content),
                Ok(Err(e)) => {
                    warn!("Chat gateway attempt {} failed: {}", attempt + 1, e);
                    last_error = e.to_string();
                }
                Err(_) => {
                    warn!("Chat gateway attempt {} timed out", attempt + 1);
                    last_error = format!("timed out after {:?}", self.chat_timeout);
                }
            }
        }

        Err(CoreError::GenerationFailed(last_error))
    }
}

#[async_trait::async_trait]
impl EmbeddingGateway for LlmClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError> {
        let mut last_error = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                sleep(self.backoff_for_attempt(attempt - 1)).await;
            }
            match timeout(self.embedding_timeout, self.try_embed(text)).await {
                Ok(Ok(embedding)) => return Ok(embedding),
                Ok(Err(e)) => {
                    warn!("Embedding gateway attempt {} failed: {}", attempt + 1, e);
                    last_error = e.to_string();
                }
                Err(_) => {
                    warn!("Embedding gateway attempt {} timed out", attempt + 1);
                    last_error = format!("timed out after {:?}", self.embedding_timeout);
                }
            }
        }

        Err(CoreError::EmbeddingUnavailable(last_error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_config;

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let client = LlmClient::new(&test_config());
        let base = client.backoff_for_attempt(0);
        assert_eq!(client.backoff_for_attempt(1), base * 2);
        assert_eq!(client.backoff_for_attempt(2), base * 4);
    }
}
