use thiserror::Error;

/// Errors surfaced by the matching pipeline.
///
/// Soft outcomes are deliberately not here: identification against an empty
/// candidate set and training on an empty example set are successful results
/// (`IdentifyStatus::NoCandidates`, `TrainOutcome::NoData`), not failures.
#[derive(Debug, Error)]
pub enum VoiceError {
    /// Malformed, truncated, or empty audio payload.
    #[error("failed to decode audio: {0}")]
    Decode(String),

    /// Audio too short to produce a single analysis frame.
    #[error("audio too short to extract any features")]
    EmptyFeatureSet,

    /// Embeddings of different lengths were compared. Embeddings are pooled
    /// to a fixed dimension, so observing this indicates a regression in the
    /// embedding builder rather than bad input.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// No voice print exists for the requested identity and phrase.
    #[error("no enrollment found for identity {identity:?} and phrase {phrase:?}")]
    NotEnrolled { identity: String, phrase: String },

    /// The persistence collaborator failed.
    #[error("voice print store failure: {0}")]
    Store(String),
}

impl From<hound::Error> for VoiceError {
    fn from(err: hound::Error) -> Self {
        VoiceError::Decode(err.to_string())
    }
}
