//! Spam scoring: a deterministic rule layer with a model-refined middle band.

use crate::cache::RecentContentCache;
use crate::config::Config;
use crate::llm::ChatGateway;
use crate::message::Message;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Flag,
    Remove,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Flag => "flag",
            Decision::Remove => "remove",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpamVerdict {
    pub message_id: String,
    pub score: f32,
    pub decision: Decision,
    pub rationale: String,
}

/// Minimum repeats of the same content within the window before the rule
/// layer counts it against the sender.
const REPEAT_TRIGGER: u32 = 3;

pub struct SpamClassifier {
    chat: Arc<dyn ChatGateway>,
    recent: RecentContentCache,
    domains: Vec<String>,
    flag_threshold: f32,
    remove_threshold: f32,
    mention_limit: usize,
}

impl SpamClassifier {
    pub fn new(chat: Arc<dyn ChatGateway>, config: &Config) -> Self {
        Self {
            chat,
            recent: RecentContentCache::new(config.spam_repeat_cache_size),
            domains: config.spam_domains.clone(),
            flag_threshold: config.spam_flag_threshold,
            remove_threshold: config.spam_remove_threshold,
            mention_limit: config.spam_mention_limit,
        }
    }

    /// Feed one inbound message into the repeated-content window. The
    /// dispatcher calls this for every message so floods are visible even
    /// before any single copy trips a spam signal.
    pub fn observe(&self, message: &Message) {
        self.recent.note(&message.group_id, &message.text);
    }

    pub async fn classify(&self, message: &Message) -> SpamVerdict {
        let (baseline, rationale) = self.baseline(message);

        // Short-circuit paths stay deterministic; only the inconclusive
        // middle band consults the model.
        let (score, rationale) = if baseline >= self.remove_threshold
            || baseline < self.flag_threshold
        {
            (baseline, rationale)
        } else {
            match self.model_judgment(message).await {
                Some(model_score) => {
                    let refined = model_score.clamp(self.flag_threshold, self.remove_threshold);
                    debug!(
                        "Spam model refinement for {}: baseline {:.2} -> {:.2}",
                        message.id, baseline, refined
                    );
                    (refined, format!("{}; model-refined", rationale))
                }
                None => (baseline, rationale),
            }
        };

        let decision = if score >= self.remove_threshold {
            Decision::Remove
        } else if score >= self.flag_threshold {
            Decision::Flag
        } else {
            Decision::Allow
        };

        SpamVerdict {
            message_id: message.id.clone(),
            score,
            decision,
            rationale,
        }
    }

    /// Deterministic baseline in [0, 1]. Read-only against the window: same
    /// message, same window state and same thresholds give the same score.
    fn baseline(&self, message: &Message) -> (f32, String) {
        let text = message.text.to_lowercase();
        let mut score = 0.0f32;
        let mut reasons: Vec<String> = Vec::new();

        if let Some(domain) = known_bad_domain(&text, &self.domains) {
            return (1.0, format!("link to known-bad domain {}", domain));
        }

        if contains_group_invite(&text) {
            score += 0.85;
            reasons.push("group invite link".to_string());
        } else if contains_url(&text) {
            score += 0.3;
            reasons.push("unrecognized link".to_string());
        }

        let mentions = mention_count(&message.text);
        if mentions > self.mention_limit {
            score += 0.3;
            reasons.push(format!("{} mentions", mentions));
        }

        let repeats = self.recent.seen_count(&message.group_id, &message.text);
        if repeats >= REPEAT_TRIGGER {
            score += 0.3;
            reasons.push(format!("repeated {} times in window", repeats));
        }

        let rationale = if reasons.is_empty() {
            "no spam signals".to_string()
        } else {
            reasons.join("; ")
        };
        (score.min(1.0), rationale)
    }

    async fn model_judgment(&self, message: &Message) -> Option<f32> {
        let prompt = format!(
            "Rate the following group chat message as spam on a scale from 0.0 \
             (clearly legitimate) to 1.0 (clearly spam). Reply with the number only.\n\n\
             Message:\n{}",
            message.text
        );

        match self.chat.complete(&prompt, &[]).await {
            Ok(reply) => match reply.trim().parse::<f32>() {
                Ok(value) if (0.0..=1.0).contains(&value) => Some(value),
                _ => {
                    warn!(
                        "Spam model returned unparseable score for {}: {}",
                        message.id,
                        reply.trim()
                    );
                    None
                }
            },
            Err(e) => {
                warn!(
                    "Spam model unavailable for {}, keeping baseline: {}",
                    message.id, e
                );
                None
            }
        }
    }
}

pub(crate) fn contains_url(text: &str) -> bool {
    text.contains("http://") || text.contains("https://") || text.contains("www.")
}

pub(crate) fn contains_group_invite(text: &str) -> bool {
    text.contains("chat.whatsapp.com/")
}

pub(crate) fn known_bad_domain<'a>(text: &str, domains: &'a [String]) -> Option<&'a str> {
    domains
        .iter()
        .find(|domain| text.contains(domain.as_str()))
        .map(|domain| domain.as_str())
}

fn mention_count(text: &str) -> usize {
    text.split_whitespace()
        .filter(|token| token.len() > 1 && token.starts_with('@'))
        .count()
}
