//! Time-windowed digests of group activity.

use crate::config::Config;
use crate::db::Database;
use crate::error::CoreError;
use crate::llm::ChatGateway;
use crate::message::Message;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

const DIGEST_INSTRUCTIONS: &str = "Write a quick summary of what happened in the \
group chat below. Respond in the dominant language of the messages; never \
translate them. Keep it short and conversational, and keep the speaker tags \
(e.g. @user_1) exactly as written when crediting someone.";

/// Result of summarizing one group's window. Handed to the transport for
/// delivery; never persisted.
#[derive(Debug, Clone)]
pub struct Digest {
    pub group_id: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub summary_text: String,
    pub message_count: usize,
}

pub struct Summarizer {
    chat: Arc<dyn ChatGateway>,
    db: Database,
    max_messages: usize,
    bot_sender_id: Option<String>,
}

impl Summarizer {
    pub fn new(chat: Arc<dyn ChatGateway>, db: Database, config: &Config) -> Self {
        Self {
            chat,
            db,
            max_messages: config.summary_max_messages,
            bot_sender_id: config.bot_sender_id.clone(),
        }
    }

    /// Digest of `[window_start, window_end)` for one group. Messages already
    /// filtered as spam and the bot's own messages are excluded. An empty
    /// window is a normal outcome, not an error.
    pub async fn summarize(
        &self,
        group_id: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Digest, CoreError> {
        let messages = self.db.messages_in_window(
            group_id,
            window_start,
            window_end,
            self.max_messages,
            self.bot_sender_id.as_deref(),
        )?;

        if messages.is_empty() {
            info!("No messages to summarize for group {}", group_id);
            return Ok(Digest {
                group_id: group_id.to_string(),
                window_start,
                window_end,
                summary_text: "no activity".to_string(),
                message_count: 0,
            });
        }

        // Senders become @user_N before the transcript reaches the model;
        // real ids are restored in the digest afterwards.
        let mapping = speaker_mapping(&messages);
        let transcript = render_transcript(&messages, &mapping);

        let summary = self
            .chat
            .complete(&transcript, &[DIGEST_INSTRUCTIONS.to_string()])
            .await?;
        let summary = restore_speaker_tags(&summary, &mapping);

        info!(
            "Summarized {} messages for group {}",
            messages.len(),
            group_id
        );
        Ok(Digest {
            group_id: group_id.to_string(),
            window_start,
            window_end,
            summary_text: summary,
            message_count: messages.len(),
        })
    }
}

/// Sender id -> anonymous tag, in order of first appearance.
pub(crate) fn speaker_mapping(messages: &[Message]) -> HashMap<String, String> {
    let mut mapping = HashMap::new();
    for message in messages {
        let next = mapping.len() + 1;
        mapping
            .entry(message.sender_id.clone())
            .or_insert_with(|| format!("@user_{}", next));
    }
    mapping
}

pub(crate) fn render_transcript(messages: &[Message], mapping: &HashMap<String, String>) -> String {
    messages
        .iter()
        .map(|message| {
            let speaker = mapping
                .get(&message.sender_id)
                .map(String::as_str)
                .unwrap_or("@user_unknown");
            let mut text = message.text.clone();
            // In-text mentions get the same anonymization as the speakers
            for (sender, tag) in mapping {
                text = text.replace(&format!("@{}", sender), tag);
            }
            format!(
                "{}: {}: {}",
                message.timestamp.format("%Y-%m-%d %H:%M"),
                speaker,
                text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn restore_speaker_tags(summary: &str, mapping: &HashMap<String, String>) -> String {
    let mut restored = summary.to_string();
    for (sender, tag) in mapping {
        restored = restored.replace(tag.as_str(), &format!("@{}", sender));
    }
    restored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spam::{Decision, SpamVerdict};
    use crate::test_support::{test_config, test_message, StubChat};
    use chrono::Duration;

    fn summarizer(chat: StubChat) -> (Summarizer, Database, Arc<StubChat>) {
        let config = test_config();
        let db = Database::new(&config).unwrap();
        db.execute_init().unwrap();
        let chat = Arc::new(chat);
        (
            Summarizer::new(chat.clone(), db.clone(), &config),
            db,
            chat,
        )
    }

    #[tokio::test]
    async fn test_empty_window_yields_no_activity() {
        let (summarizer, _, chat) = summarizer(StubChat::replies("unused"));
        let now = Utc::now();

        let digest = summarizer
            .summarize("group-1", now - Duration::hours(24), now)
            .await
            .unwrap();

        assert_eq!(digest.summary_text, "no activity");
        assert_eq!(digest.message_count, 0);
        assert_eq!(chat.call_count(), 0);
    }

    #[tokio::test]
    async fn test_digest_restores_real_speaker_tags() {
        let (summarizer, db, chat) =
            summarizer(StubChat::replies("@user_1 organized lunch; @user_2 joined."));
        let now = Utc::now();

        let mut first = test_message("m1", "lunch at noon anyone?");
        first.sender_id = "alice".to_string();
        first.timestamp = now - Duration::minutes(10);
        db.save_message(&first).unwrap();

        let mut second = test_message("m2", "count me in @alice");
        second.sender_id = "bob".to_string();
        second.timestamp = now - Duration::minutes(5);
        db.save_message(&second).unwrap();

        let digest = summarizer
            .summarize("group-1", now - Duration::hours(1), now + Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(digest.message_count, 2);
        assert_eq!(digest.summary_text, "@alice organized lunch; @bob joined.");
        assert_eq!(chat.call_count(), 1);
    }

    #[tokio::test]
    async fn test_spam_and_bot_messages_are_excluded() {
        let (summarizer, db, _) = summarizer(StubChat::replies("summary"));
        let now = Utc::now();

        let mut legit = test_message("m1", "meeting moved to 3pm");
        legit.sender_id = "alice".to_string();
        db.save_message(&legit).unwrap();

        let mut spammy = test_message("m2", "click https://bad.example.com");
        spammy.sender_id = "mallory".to_string();
        db.save_message(&spammy).unwrap();
        db.record_spam_verdict(&SpamVerdict {
            message_id: "m2".to_string(),
            score: 1.0,
            decision: Decision::Remove,
            rationale: "known-bad domain".to_string(),
        })
        .unwrap();

        let mut bot_reply = test_message("m3", "here is your summary");
        bot_reply.sender_id = "bot".to_string();
        db.save_message(&bot_reply).unwrap();

        let digest = summarizer
            .summarize("group-1", now - Duration::hours(1), now + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(digest.message_count, 1);
    }

    #[tokio::test]
    async fn test_generation_failure_propagates() {
        let (summarizer, db, _) = summarizer(StubChat::unavailable());
        let now = Utc::now();
        db.save_message(&test_message("m1", "hello")).unwrap();

        let err = summarizer
            .summarize("group-1", now - Duration::hours(1), now + Duration::hours(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::GenerationFailed(_)));
    }
}
