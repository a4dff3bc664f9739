//! Retrieval-augmented answering over the stored knowledge base.

use crate::config::Config;
use crate::db::Database;
use crate::error::CoreError;
use crate::llm::{ChatGateway, EmbeddingGateway};
use crate::message::Message;
use std::sync::Arc;
use tracing::{debug, info};

/// Reply used when retrieval cannot clear the relevance bar. Refusing beats
/// hallucinating: this text never claims knowledge.
const NO_ANSWER_TEXT: &str =
    "I don't have enough group knowledge to answer that confidently.";

#[derive(Debug, Clone)]
pub struct AnswerResult {
    pub text: String,
    pub supporting_topic_ids: Vec<String>,
    pub confidence: f32,
}

impl AnswerResult {
    fn no_confident_answer() -> Self {
        Self {
            text: NO_ANSWER_TEXT.to_string(),
            supporting_topic_ids: Vec::new(),
            confidence: 0.0,
        }
    }
}

pub struct KnowledgeBase {
    embedding: Arc<dyn EmbeddingGateway>,
    chat: Arc<dyn ChatGateway>,
    db: Database,
    top_k: usize,
    min_relevance: f32,
}

impl KnowledgeBase {
    pub fn new(
        embedding: Arc<dyn EmbeddingGateway>,
        chat: Arc<dyn ChatGateway>,
        db: Database,
        config: &Config,
    ) -> Self {
        Self {
            embedding,
            chat,
            db,
            top_k: config.retrieval_top_k,
            min_relevance: config.min_relevance,
        }
    }

    pub async fn answer(&self, query: &Message) -> Result<AnswerResult, CoreError> {
        let text = query.text.trim();
        if text.is_empty() {
            return Err(CoreError::Validation("empty query text".to_string()));
        }

        let query_embedding = self.embedding.embed(text).await?;
        let hits = self.db.nearest_topics(&query_embedding, self.top_k)?;

        let best = hits.first().map(|hit| hit.score).unwrap_or(0.0);
        if best < self.min_relevance {
            // Hard invariant: below the relevance bar we refuse rather than
            // generate.
            info!(
                "No confident answer for {}: best similarity {:.3} < {:.3}",
                query.id, best, self.min_relevance
            );
            return Ok(AnswerResult::no_confident_answer());
        }

        // Only topics that cleared the bar become grounding; weaker tail hits
        // stay out of the prompt.
        let grounding: Vec<_> = hits
            .into_iter()
            .filter(|hit| hit.score >= self.min_relevance)
            .collect();

        let context: Vec<String> = grounding
            .iter()
            .map(|hit| hit.topic.text.clone())
            .collect();
        let prompt = format!(
            "Answer the question using ONLY the group knowledge provided above. \
             If the knowledge does not cover the question, say you don't know. \
             Keep the answer short and conversational, in the language of the question.\n\n\
             Question: {}",
            text
        );

        let answer = self.chat.complete(&prompt, &context).await?;
        let confidence = self.confidence_for(best);
        debug!(
            "Answered {} from {} topics with confidence {:.2}",
            query.id,
            grounding.len(),
            confidence
        );

        Ok(AnswerResult {
            text: answer,
            supporting_topic_ids: grounding.into_iter().map(|hit| hit.topic.id).collect(),
            confidence,
        })
    }

    /// Confidence is the best score's margin over the relevance bar,
    /// normalized to (0, 1]. Anything that cleared retrieval is > 0.
    fn confidence_for(&self, best: f32) -> f32 {
        let headroom = 1.0 - self.min_relevance;
        if headroom <= f32::EPSILON {
            return 1.0;
        }
        ((best - self.min_relevance) / headroom).clamp(0.05, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_config, test_message, test_topic, StubChat, StubEmbedding};

    fn kb_with(
        embedding: StubEmbedding,
        chat: StubChat,
    ) -> (KnowledgeBase, Database, Arc<StubEmbedding>, Arc<StubChat>) {
        let config = test_config();
        let db = Database::new(&config).unwrap();
        db.execute_init().unwrap();
        let embedding = Arc::new(embedding);
        let chat = Arc::new(chat);
        let kb = KnowledgeBase::new(embedding.clone(), chat.clone(), db.clone(), &config);
        (kb, db, embedding, chat)
    }

    #[tokio::test]
    async fn test_low_relevance_short_circuits() {
        let (kb, db, _, chat) = kb_with(
            StubEmbedding::always(vec![1.0, 0.0, 0.0]),
            StubChat::replies("should never be used"),
        );
        // Orthogonal topic: similarity 0, far below the bar
        db.insert_topic(&test_topic("t1", vec![0.0, 1.0, 0.0]))
            .unwrap();

        let result = kb
            .answer(&test_message("m1", "what is our refund policy?"))
            .await
            .unwrap();

        assert_eq!(result.confidence, 0.0);
        assert!(result.supporting_topic_ids.is_empty());
        assert_eq!(result.text, NO_ANSWER_TEXT);
        assert_eq!(chat.call_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_store_short_circuits() {
        let (kb, _, _, chat) = kb_with(
            StubEmbedding::always(vec![1.0, 0.0, 0.0]),
            StubChat::replies("unused"),
        );

        let result = kb
            .answer(&test_message("m1", "anything stored?"))
            .await
            .unwrap();
        assert_eq!(result.confidence, 0.0);
        assert_eq!(chat.call_count(), 0);
    }

    #[tokio::test]
    async fn test_grounded_answer_from_matching_topic() {
        // Query embedding at cosine ~0.91 against the stored topic
        let (kb, db, _, chat) = kb_with(
            StubEmbedding::always(vec![0.91, 0.4146, 0.0]),
            StubChat::replies("Refunds take up to 14 days."),
        );

        let mut topic = test_topic("refund-topic", vec![1.0, 0.0, 0.0]);
        topic.text = "Refunds are processed within 14 days".to_string();
        db.insert_topic(&topic).unwrap();

        let result = kb
            .answer(&test_message("m1", "What is our refund policy?"))
            .await
            .unwrap();

        assert_eq!(result.text, "Refunds take up to 14 days.");
        assert_eq!(result.supporting_topic_ids, vec!["refund-topic".to_string()]);
        assert!(result.confidence > 0.0);
        assert_eq!(chat.call_count(), 1);
    }

    #[tokio::test]
    async fn test_weak_tail_hits_stay_out_of_grounding() {
        let (kb, db, _, _) = kb_with(
            StubEmbedding::always(vec![1.0, 0.0, 0.0]),
            StubChat::replies("grounded answer"),
        );

        db.insert_topic(&test_topic("strong", vec![1.0, 0.0, 0.0]))
            .unwrap();
        db.insert_topic(&test_topic("weak", vec![0.3, 0.9539, 0.0]))
            .unwrap();

        let result = kb
            .answer(&test_message("m1", "what do we know?"))
            .await
            .unwrap();
        assert_eq!(result.supporting_topic_ids, vec!["strong".to_string()]);
    }

    #[tokio::test]
    async fn test_embedding_failure_propagates() {
        let (kb, _, _, _) = kb_with(StubEmbedding::unavailable(), StubChat::replies("unused"));

        let err = kb
            .answer(&test_message("m1", "what is the wifi password?"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::EmbeddingUnavailable(_)));
    }

    #[tokio::test]
    async fn test_generation_failure_propagates() {
        let (kb, db, _, _) = kb_with(
            StubEmbedding::always(vec![1.0, 0.0, 0.0]),
            StubChat::unavailable(),
        );
        db.insert_topic(&test_topic("t1", vec![1.0, 0.0, 0.0]))
            .unwrap();

        let err = kb
            .answer(&test_message("m1", "what is stored?"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::GenerationFailed(_)));
    }

    #[tokio::test]
    async fn test_empty_query_is_validation_error() {
        let (kb, _, _, _) = kb_with(StubEmbedding::unavailable(), StubChat::unavailable());
        let err = kb.answer(&test_message("m1", "  ")).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }
}
