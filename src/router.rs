//! Inbound message classification.
//!
//! Cheap deterministic rules first; the chat model only breaks ties the rules
//! cannot, and its absence degrades to rule-only classification.

use crate::config::Config;
use crate::llm::ChatGateway;
use crate::message::Message;
use crate::spam;
use std::sync::Arc;
use tracing::{debug, warn};

/// Closed set of capabilities a message can route to. Derived per message,
/// never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    KnowledgeQuery,
    SpamCandidate,
    SummarizeRequest,
    TopicSubmission,
    Unhandled,
}

const CLASSIFY_PROMPT: &str = "Classify the intent of this group chat message. \
Reply with exactly one of: knowledge_query, summarize_request, topic_submission, unhandled.\n\
- knowledge_query: asking a question or trying to learn from the group's collective knowledge\n\
- summarize_request: asking to catch up on or summarize recent chat activity\n\
- topic_submission: sharing knowledge that should be remembered for later\n\
- unhandled: anything else";

pub struct Router {
    chat: Arc<dyn ChatGateway>,
    spam_domains: Vec<String>,
}

impl Router {
    pub fn new(chat: Arc<dyn ChatGateway>, config: &Config) -> Self {
        Self {
            chat,
            spam_domains: config.spam_domains.clone(),
        }
    }

    /// Pure classification; no side effects. Rule priority on ties:
    /// spam-signal > explicit command > knowledge-query heuristic.
    pub async fn route(&self, message: &Message) -> Intent {
        if !message.has_routable_content() {
            return Intent::Unhandled;
        }

        let text = message.text.trim();
        let lowered = text.to_lowercase();

        if spam::contains_group_invite(&lowered)
            || spam::known_bad_domain(&lowered, &self.spam_domains).is_some()
        {
            return Intent::SpamCandidate;
        }

        if let Some(intent) = command_intent(&lowered) {
            return intent;
        }

        if looks_like_question(&lowered) {
            return Intent::KnowledgeQuery;
        }

        // Plain links with no other signal still go through spam screening.
        if spam::contains_url(&lowered) {
            return Intent::SpamCandidate;
        }

        self.model_fallback(text).await
    }

    /// Rules were inconclusive; ask the model for a label. Any failure
    /// degrades to rule-only classification instead of failing the message.
    async fn model_fallback(&self, text: &str) -> Intent {
        match self.chat.complete(text, &[CLASSIFY_PROMPT.to_string()]).await {
            Ok(reply) => {
                let intent = parse_intent_label(&reply);
                debug!("Model classified message as {:?}", intent);
                intent
            }
            Err(e) => {
                warn!("Intent classifier unavailable, degrading to rules: {}", e);
                Intent::Unhandled
            }
        }
    }
}

fn command_intent(lowered: &str) -> Option<Intent> {
    if lowered.starts_with("!summarize") || lowered.starts_with("!catchup") {
        Some(Intent::SummarizeRequest)
    } else if lowered.starts_with("!learn") {
        Some(Intent::TopicSubmission)
    } else if lowered.starts_with("!ask") {
        Some(Intent::KnowledgeQuery)
    } else {
        None
    }
}

fn looks_like_question(lowered: &str) -> bool {
    if lowered.ends_with('?') {
        return true;
    }
    let first_word = lowered.split_whitespace().next().unwrap_or("");
    matches!(
        first_word,
        "what" | "when" | "where" | "who" | "why" | "how" | "does" | "is" | "are" | "can"
    )
}

fn parse_intent_label(reply: &str) -> Intent {
    match reply.trim().to_lowercase().as_str() {
        "knowledge_query" => Intent::KnowledgeQuery,
        "summarize_request" => Intent::SummarizeRequest,
        "topic_submission" => Intent::TopicSubmission,
        "unhandled" => Intent::Unhandled,
        other => {
            warn!("Unrecognized intent label from model: {}", other);
            Intent::Unhandled
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::AttachmentKind;
    use crate::test_support::{test_config, test_message, StubChat};

    fn make_router(chat: StubChat) -> (Router, Arc<StubChat>) {
        let chat = Arc::new(chat);
        (Router::new(chat.clone(), &test_config()), chat)
    }

    #[tokio::test]
    async fn test_empty_message_is_unhandled_without_gateway() {
        let (router, chat) = make_router(StubChat::replies("knowledge_query"));

        let verdict = router.route(&test_message("m1", "   ")).await;
        assert_eq!(verdict, Intent::Unhandled);
        assert_eq!(chat.call_count(), 0);

        let mut with_attachment = test_message("m2", "");
        with_attachment.attachments.push(AttachmentKind::Image);
        // Recognized attachment with no text is routable but inconclusive
        let verdict = router.route(&with_attachment).await;
        assert_eq!(verdict, Intent::KnowledgeQuery);
    }

    #[tokio::test]
    async fn test_spam_signal_beats_command() {
        let (router, chat) = make_router(StubChat::replies("summarize_request"));

        let verdict = router
            .route(&test_message(
                "m1",
                "!summarize https://chat.whatsapp.com/AbCdEf",
            ))
            .await;
        assert_eq!(verdict, Intent::SpamCandidate);
        assert_eq!(chat.call_count(), 0);

        let verdict = router
            .route(&test_message("m2", "!ask visit bad.example.com now"))
            .await;
        assert_eq!(verdict, Intent::SpamCandidate);
    }

    #[tokio::test]
    async fn test_explicit_commands() {
        let (router, _) = make_router(StubChat::unavailable());

        assert_eq!(
            router.route(&test_message("m1", "!summarize")).await,
            Intent::SummarizeRequest
        );
        assert_eq!(
            router
                .route(&test_message("m2", "!learn refunds take 14 days"))
                .await,
            Intent::TopicSubmission
        );
        assert_eq!(
            router.route(&test_message("m3", "!ask about refunds")).await,
            Intent::KnowledgeQuery
        );
    }

    #[tokio::test]
    async fn test_question_heuristic() {
        let (router, chat) = make_router(StubChat::unavailable());

        assert_eq!(
            router
                .route(&test_message("m1", "what is our refund policy?"))
                .await,
            Intent::KnowledgeQuery
        );
        assert_eq!(
            router
                .route(&test_message("m2", "how do I join the beta"))
                .await,
            Intent::KnowledgeQuery
        );
        assert_eq!(chat.call_count(), 0);
    }

    #[tokio::test]
    async fn test_model_fallback_and_degradation() {
        let (router, chat) = make_router(StubChat::replies("topic_submission"));
        let verdict = router
            .route(&test_message("m1", "fyi the office moved to building 7"))
            .await;
        assert_eq!(verdict, Intent::TopicSubmission);
        assert_eq!(chat.call_count(), 1);

        // Gateway down: degrade to rule-only classification, not an error
        let (router, _) = router_unavailable();
        let verdict = router
            .route(&test_message("m2", "fyi the office moved to building 7"))
            .await;
        assert_eq!(verdict, Intent::Unhandled);

        // Garbage labels also degrade
        let (router, _) = make_router(StubChat::replies("purple"));
        let verdict = router.route(&test_message("m3", "hello there friend")).await;
        assert_eq!(verdict, Intent::Unhandled);
    }

    fn router_unavailable() -> (Router, Arc<StubChat>) {
        make_router(StubChat::unavailable())
    }
}
