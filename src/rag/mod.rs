//! Retrieval primitives: stored topics, cosine similarity and top-K ranking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A knowledge-base entry with its embedding. Created by the ingestor, read
/// by the answerer; never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub source_message_id: String,
    pub created_at: DateTime<Utc>,
}

/// One retrieval hit. Produced per query, never stored.
#[derive(Debug, Clone)]
pub struct ScoredTopic {
    pub topic: Topic,
    pub score: f32,
}

/// Cosine similarity between two vectors. Mismatched lengths and zero-norm
/// vectors score 0 rather than erroring, so a single bad row cannot poison
/// a whole retrieval pass.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Rank candidates against a query embedding and keep the best `k`.
///
/// Results are descending by score; equal scores break toward the most
/// recently created topic.
pub fn top_k(query: &[f32], candidates: Vec<Topic>, k: usize) -> Vec<ScoredTopic> {
    let mut scored: Vec<ScoredTopic> = candidates
        .into_iter()
        .map(|topic| {
            let score = cosine_similarity(query, &topic.embedding);
            ScoredTopic { topic, score }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.topic.created_at.cmp(&a.topic.created_at))
    });

    scored.truncate(k);
    scored
}
