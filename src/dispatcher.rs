//! Per-message processing: route, handle, deliver, record.
//!
//! Each inbound message runs the `received -> classified -> handled ->
//! terminal` pipeline on its own task; one message's failure never touches
//! another's.

use crate::config::Config;
use crate::db::Database;
use crate::error::CoreError;
use crate::ingest::{IngestOutcome, TopicIngestor};
use crate::kb::KnowledgeBase;
use crate::message::Message;
use crate::router::{Intent, Router};
use crate::spam::{Decision, SpamClassifier};
use crate::summarize::Summarizer;
use crate::transport::Transport;
use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const GATEWAY_FALLBACK_TEXT: &str =
    "I couldn't work on that right now, please try again in a bit.";
const TOPIC_STORED_TEXT: &str = "Got it, I'll remember that.";
const TOPIC_KNOWN_TEXT: &str = "I already know about that one.";
const SPAM_REMOVED_TEXT: &str =
    "That message looks like spam and has been reported to the group admins.";

/// Terminal processing states, recorded per message id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Delivered,
    Skipped,
    Failed,
}

impl ProcessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Delivered => "delivered",
            ProcessState::Skipped => "skipped",
            ProcessState::Failed => "failed",
        }
    }
}

pub struct Dispatcher {
    router: Router,
    kb: KnowledgeBase,
    spam: SpamClassifier,
    summarizer: Summarizer,
    ingestor: Arc<TopicIngestor>,
    transport: Arc<dyn Transport>,
    db: Database,
    summary_window_hours: i64,
    bot_sender_id: Option<String>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        router: Router,
        kb: KnowledgeBase,
        spam: SpamClassifier,
        summarizer: Summarizer,
        ingestor: Arc<TopicIngestor>,
        transport: Arc<dyn Transport>,
        db: Database,
        config: &Config,
    ) -> Self {
        Self {
            router,
            kb,
            spam,
            summarizer,
            ingestor,
            transport,
            db,
            summary_window_hours: config.summary_window_hours,
            bot_sender_id: config.bot_sender_id.clone(),
        }
    }

    /// Fire-and-forget entry point for the webhook intake.
    pub fn spawn(self: Arc<Self>, message: Message) {
        tokio::spawn(async move {
            if let Err(e) = self.dispatch(message).await {
                error!("Dispatch failed: {}", e);
            }
        });
    }

    pub async fn dispatch(&self, message: Message) -> anyhow::Result<()> {
        // Idempotence: a message that already reached a terminal state is
        // never reprocessed.
        if let Some(state) = self.db.processed_state(&message.id)? {
            debug!(
                "Message {} already processed (state {}), skipping",
                message.id, state
            );
            return Ok(());
        }

        if self.bot_sender_id.as_deref() == Some(message.sender_id.as_str()) {
            return Ok(());
        }

        self.db.save_message(&message)?;
        self.spam.observe(&message);

        let intent = self.router.route(&message).await;
        info!("Message {} classified as {:?}", message.id, intent);

        let state = match intent {
            Intent::KnowledgeQuery => self.handle_knowledge_query(&message).await,
            Intent::SpamCandidate => self.handle_spam_candidate(&message).await,
            Intent::SummarizeRequest => self.handle_summarize_request(&message).await,
            Intent::TopicSubmission => self.handle_topic_submission(&message).await,
            Intent::Unhandled => {
                debug!("Message {} unhandled, no reply", message.id);
                Ok(ProcessState::Skipped)
            }
        };

        let state = match state {
            Ok(state) => state,
            Err(e) => {
                warn!("Handler for {} failed: {}", message.id, e);
                if e.is_gateway_unavailable() {
                    let _ = self.reply(&message, GATEWAY_FALLBACK_TEXT).await;
                }
                ProcessState::Failed
            }
        };

        self.db.mark_processed(&message.id, state.as_str())?;
        Ok(())
    }

    async fn handle_knowledge_query(&self, message: &Message) -> Result<ProcessState, CoreError> {
        let result = self.kb.answer(message).await?;
        // Low confidence is a legitimate outcome; the canned refusal is still
        // a useful reply.
        self.reply(message, &result.text).await?;
        Ok(ProcessState::Delivered)
    }

    async fn handle_spam_candidate(&self, message: &Message) -> Result<ProcessState, CoreError> {
        let verdict = self.spam.classify(message).await;
        self.db.record_spam_verdict(&verdict)?;
        info!(
            "Spam verdict for {}: {} ({:.2}) - {}",
            message.id,
            verdict.decision.as_str(),
            verdict.score,
            verdict.rationale
        );

        match verdict.decision {
            Decision::Remove => {
                self.reply(message, SPAM_REMOVED_TEXT).await?;
                Ok(ProcessState::Delivered)
            }
            // Flagged content is recorded for review and excluded from
            // summaries; no reply in the group.
            Decision::Flag => Ok(ProcessState::Delivered),
            Decision::Allow => Ok(ProcessState::Skipped),
        }
    }

    async fn handle_summarize_request(&self, message: &Message) -> Result<ProcessState, CoreError> {
        // Window ends at the request itself, which keeps the command message
        // out of its own digest.
        let window_end = message.timestamp;
        let window_start = window_end - Duration::hours(self.summary_window_hours);
        let digest = self
            .summarizer
            .summarize(&message.group_id, window_start, window_end)
            .await?;

        self.reply(message, &digest.summary_text).await?;
        Ok(ProcessState::Delivered)
    }

    async fn handle_topic_submission(&self, message: &Message) -> Result<ProcessState, CoreError> {
        let text = message
            .text
            .trim()
            .strip_prefix("!learn")
            .unwrap_or(message.text.trim())
            .trim();

        match self.ingestor.ingest(text, &message.id).await? {
            IngestOutcome::Stored(topic) => {
                debug!("Stored topic {} from submission {}", topic.id, message.id);
                self.reply(message, TOPIC_STORED_TEXT).await?;
                Ok(ProcessState::Delivered)
            }
            IngestOutcome::Skipped {
                existing_topic_id, ..
            } => {
                debug!(
                    "Submission {} skipped, near-duplicate of {}",
                    message.id, existing_topic_id
                );
                self.reply(message, TOPIC_KNOWN_TEXT).await?;
                Ok(ProcessState::Skipped)
            }
        }
    }

    async fn reply(&self, message: &Message, text: &str) -> Result<(), CoreError> {
        self.transport
            .send_message(&message.group_id, text, Some(&message.id))
            .await
            .map_err(|e| CoreError::Storage(format!("delivery failed: {}", e)))
    }
}
