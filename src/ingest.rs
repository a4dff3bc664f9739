//! Knowledge-base ingestion: direct topic submissions and the background
//! conversation sweep that distills group chatter into stored topics.

use crate::config::Config;
use crate::db::Database;
use crate::error::CoreError;
use crate::llm::{ChatGateway, EmbeddingGateway};
use crate::rag::Topic;
use crate::summarize::{render_transcript, restore_speaker_tags, speaker_mapping};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::time;
use tracing::{debug, error, info, warn};

/// Outcome of one ingestion attempt. Skipping a near-duplicate is a normal
/// outcome, not an error.
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    Stored(Topic),
    Skipped {
        existing_topic_id: String,
        similarity: f32,
    },
}

pub struct TopicIngestor {
    embedding: Arc<dyn EmbeddingGateway>,
    db: Database,
    duplicate_threshold: f32,
    embedding_dimension: usize,
}

impl TopicIngestor {
    pub fn new(embedding: Arc<dyn EmbeddingGateway>, db: Database, config: &Config) -> Self {
        Self {
            embedding,
            db,
            duplicate_threshold: config.duplicate_threshold,
            embedding_dimension: config.embedding_dimension,
        }
    }

    pub async fn ingest(
        &self,
        text: &str,
        source_message_id: &str,
    ) -> Result<IngestOutcome, CoreError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CoreError::Validation("empty topic text".to_string()));
        }

        // Nothing is written until the embedding exists; a gateway failure
        // here leaves the store untouched.
        let embedding = self.embedding.embed(text).await?;
        if embedding.len() != self.embedding_dimension {
            return Err(CoreError::Validation(format!(
                "embedding dimension {} does not match configured {}",
                embedding.len(),
                self.embedding_dimension
            )));
        }

        if let Some(nearest) = self.db.nearest_topics(&embedding, 1)?.into_iter().next() {
            if nearest.score >= self.duplicate_threshold {
                debug!(
                    "Skipping near-duplicate of topic {} (similarity {:.3})",
                    nearest.topic.id, nearest.score
                );
                return Ok(IngestOutcome::Skipped {
                    existing_topic_id: nearest.topic.id,
                    similarity: nearest.score,
                });
            }
        }

        // The topic is fully constructed before the single INSERT publishes
        // it; concurrent retrieval never sees a partial row.
        let topic = Topic {
            id: format!("t-{}", source_message_id),
            text: text.to_string(),
            embedding,
            source_message_id: source_message_id.to_string(),
            created_at: Utc::now(),
        };
        self.db.insert_topic(&topic)?;
        info!("Stored topic {} from message {}", topic.id, source_message_id);
        Ok(IngestOutcome::Stored(topic))
    }
}

const SPLIT_PROMPT: &str = "Below is an uninterrupted stretch of group chat. \
Break it into the distinct topics that were discussed. For each topic output \
exactly one line formatted as `subject | summary`, crediting notable insights \
to their speaker tags (e.g. @user_1). Output only those lines.";

/// Periodic sweep that distills each group's recent conversation into topics
/// and feeds them through the ingestor. The per-group watermark advances only
/// after the batch stored successfully.
pub struct IngestScheduler {
    db: Database,
    chat: Arc<dyn ChatGateway>,
    ingestor: Arc<TopicIngestor>,
    interval: time::Duration,
    bot_sender_id: Option<String>,
    batch_limit: usize,
}

impl IngestScheduler {
    pub fn new(
        db: Database,
        chat: Arc<dyn ChatGateway>,
        ingestor: Arc<TopicIngestor>,
        config: &Config,
    ) -> Self {
        Self {
            db,
            chat,
            ingestor,
            interval: time::Duration::from_secs(config.ingest_interval_secs),
            bot_sender_id: config.bot_sender_id.clone(),
            batch_limit: config.summary_max_messages,
        }
    }

    pub async fn run(self) {
        let mut ticker = time::interval(self.interval);
        // The first tick fires immediately; skip it so a fresh boot doesn't
        // re-ingest right away.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match self.sweep_all_groups().await {
                Ok(0) => debug!("Ingest sweep: nothing new to ingest"),
                Ok(n) => info!("Ingest sweep: stored {} topics", n),
                Err(e) => error!("Ingest sweep failed: {}", e),
            }
        }
    }

    pub async fn sweep_all_groups(&self) -> anyhow::Result<usize> {
        let mut stored = 0usize;
        for group_id in self.db.list_groups()? {
            match self.sweep_group(&group_id).await {
                Ok(n) => stored += n,
                Err(e) => warn!("Ingest sweep for group {} failed: {}", group_id, e),
            }
        }
        Ok(stored)
    }

    async fn sweep_group(&self, group_id: &str) -> anyhow::Result<usize> {
        let now = Utc::now();
        let since = match self.db.last_ingest(group_id)? {
            Some(mark) => mark,
            None => now - Duration::seconds(self.interval.as_secs() as i64),
        };

        let messages = self.db.messages_in_window(
            group_id,
            since,
            now,
            self.batch_limit,
            self.bot_sender_id.as_deref(),
        )?;
        if messages.is_empty() {
            return Ok(0);
        }

        let mapping = speaker_mapping(&messages);
        let transcript = render_transcript(&messages, &mapping);
        let reply = self
            .chat
            .complete(&transcript, &[SPLIT_PROMPT.to_string()])
            .await?;

        let last_message_id = messages.last().map(|m| m.id.clone()).unwrap_or_default();
        let mut stored = 0usize;
        for (index, (subject, summary)) in parse_topic_lines(&reply).into_iter().enumerate() {
            let summary = restore_speaker_tags(&summary, &mapping);
            let document = format!("# {}\n{}", subject, summary);
            let source = format!("{}-k{}", last_message_id, index);
            match self.ingestor.ingest(&document, &source).await {
                Ok(IngestOutcome::Stored(_)) => stored += 1,
                Ok(IngestOutcome::Skipped {
                    existing_topic_id, ..
                }) => {
                    debug!(
                        "Sweep topic '{}' skipped as near-duplicate of {}",
                        subject, existing_topic_id
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        // Watermark moves only after the whole batch landed.
        self.db.set_last_ingest(group_id, now)?;
        Ok(stored)
    }
}

fn parse_topic_lines(reply: &str) -> Vec<(String, String)> {
    reply
        .lines()
        .filter_map(|line| {
            let (subject, summary) = line.split_once('|')?;
            let subject = subject.trim();
            let summary = summary.trim();
            if subject.is_empty() || summary.is_empty() {
                return None;
            }
            Some((subject.to_string(), summary.to_string()))
        })
        .collect()
}
