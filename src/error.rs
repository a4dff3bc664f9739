use thiserror::Error;

/// Failure taxonomy for the routing/retrieval core.
///
/// Low-confidence answers and duplicate ingestions are NOT errors; they are
/// ordinary outcomes (`AnswerResult` with confidence 0, `IngestOutcome::Skipped`).
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed inbound message. Dropped with no retry.
    #[error("invalid message: {0}")]
    Validation(String),

    /// The embedding gateway kept failing after the retry budget was spent.
    #[error("embedding gateway unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The chat gateway kept failing after the retry budget was spent.
    #[error("chat generation failed: {0}")]
    GenerationFailed(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<anyhow::Error> for CoreError {
    fn from(e: anyhow::Error) -> Self {
        CoreError::Storage(e.to_string())
    }
}

impl CoreError {
    /// Transient upstream failures; the caller may show a "try again later"
    /// style fallback instead of surfacing the raw error text.
    pub fn is_gateway_unavailable(&self) -> bool {
        matches!(
            self,
            CoreError::EmbeddingUnavailable(_) | CoreError::GenerationFailed(_)
        )
    }
}
