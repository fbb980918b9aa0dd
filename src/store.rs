use std::collections::HashMap;
use std::sync::RwLock;
use std::time::SystemTime;

use crate::embedding::Embedding;
use crate::error::VoiceError;

/// A stored embedding bound to one (identity, phrase) pair.
///
/// Immutable once created; re-enrolling the same pair supersedes the prior
/// print rather than mutating it.
#[derive(Debug, Clone)]
pub struct VoicePrint {
    pub identity: String,
    pub phrase: String,
    pub embedding: Embedding,
    pub created_at: SystemTime,
    /// Duration of the source utterance in seconds.
    pub audio_seconds: f32,
}

/// Persistence collaborator for voice prints and model snapshots.
///
/// The engine is agnostic to what sits behind this: a relational store, a
/// file, or the bundled in-memory map.
pub trait VoicePrintStore: Send + Sync {
    /// Save a print, superseding any existing print for the same
    /// (identity, phrase).
    fn save_voice_print(&self, print: VoicePrint) -> Result<(), VoiceError>;

    fn load_voice_print(
        &self,
        identity: &str,
        phrase: &str,
    ) -> Result<Option<VoicePrint>, VoiceError>;

    /// Every print enrolled for `phrase`.
    fn list_voice_prints(&self, phrase: &str) -> Result<Vec<VoicePrint>, VoiceError>;

    /// Every enrollment across all phrases, as classifier training examples.
    fn training_examples(&self) -> Result<Vec<(Embedding, String)>, VoiceError>;

    fn save_model_snapshot(&self, bytes: &[u8]) -> Result<(), VoiceError>;

    fn load_model_snapshot(&self) -> Result<Option<Vec<u8>>, VoiceError>;
}

/// In-memory store, suitable for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryStore {
    prints: RwLock<HashMap<(String, String), VoicePrint>>,
    snapshot: RwLock<Option<Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VoicePrintStore for MemoryStore {
    fn save_voice_print(&self, print: VoicePrint) -> Result<(), VoiceError> {
        let key = (print.identity.clone(), print.phrase.clone());
        let mut prints = self
            .prints
            .write()
            .map_err(|e| VoiceError::Store(e.to_string()))?;
        prints.insert(key, print);
        Ok(())
    }

    fn load_voice_print(
        &self,
        identity: &str,
        phrase: &str,
    ) -> Result<Option<VoicePrint>, VoiceError> {
        let prints = self
            .prints
            .read()
            .map_err(|e| VoiceError::Store(e.to_string()))?;
        Ok(prints
            .get(&(identity.to_string(), phrase.to_string()))
            .cloned())
    }

    fn list_voice_prints(&self, phrase: &str) -> Result<Vec<VoicePrint>, VoiceError> {
        let prints = self
            .prints
            .read()
            .map_err(|e| VoiceError::Store(e.to_string()))?;
        let mut matches: Vec<VoicePrint> = prints
            .values()
            .filter(|p| p.phrase == phrase)
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.identity.cmp(&b.identity));
        Ok(matches)
    }

    fn training_examples(&self) -> Result<Vec<(Embedding, String)>, VoiceError> {
        let prints = self
            .prints
            .read()
            .map_err(|e| VoiceError::Store(e.to_string()))?;
        Ok(prints
            .values()
            .map(|p| (p.embedding.clone(), p.identity.clone()))
            .collect())
    }

    fn save_model_snapshot(&self, bytes: &[u8]) -> Result<(), VoiceError> {
        let mut snapshot = self
            .snapshot
            .write()
            .map_err(|e| VoiceError::Store(e.to_string()))?;
        *snapshot = Some(bytes.to_vec());
        Ok(())
    }

    fn load_model_snapshot(&self) -> Result<Option<Vec<u8>>, VoiceError> {
        let snapshot = self
            .snapshot
            .read()
            .map_err(|e| VoiceError::Store(e.to_string()))?;
        Ok(snapshot.clone())
    }
}
