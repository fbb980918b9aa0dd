mod engine;

mod embedding;
mod error;
mod features;
mod model;
mod store;
mod wav;

pub use embedding::{build_embedding, cosine_similarity, Embedding, EMBEDDING_DIM};
pub use engine::{
    Candidate, IdentifyResult, IdentifyStatus, MatchResult, SpeakerEngine, MATCH_THRESHOLD,
};
pub use error::VoiceError;
pub use features::{
    frame_count, frames, FeatureExtractor, FeatureVector, FRAME_SIZE, HOP_SIZE, NUM_COEFFS,
};
pub use model::{ModelSnapshot, TrainOutcome, ERROR_THRESHOLD, MAX_ITERATIONS};
pub use store::{MemoryStore, VoicePrint, VoicePrintStore};
pub use wav::{decode_audio, SampleSequence, SAMPLE_RATE};
