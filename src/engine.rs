use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread;
use std::time::SystemTime;

use tracing::{debug, info, warn};

use crate::embedding::{build_embedding, cosine_similarity, Embedding};
use crate::error::VoiceError;
use crate::features::FeatureExtractor;
use crate::model::{self, ModelSnapshot, TrainOutcome};
use crate::store::{VoicePrint, VoicePrintStore};
use crate::wav;

/// A confidence must strictly exceed this to count as a match.
pub const MATCH_THRESHOLD: f32 = 0.7;

/// Outcome of a verification or the top identification candidate.
/// Ephemeral; the engine never persists it.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub identity: Option<String>,
    /// Combined confidence in [0, 1].
    pub confidence: f32,
    pub is_match: bool,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub identity: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifyStatus {
    Ranked,
    /// Nothing is enrolled for the phrase; an empty result, not an error.
    NoCandidates,
}

/// Identification result: every candidate for the phrase, ranked by
/// descending confidence, plus the top candidate as a match decision.
#[derive(Debug, Clone)]
pub struct IdentifyResult {
    pub status: IdentifyStatus,
    pub candidates: Vec<Candidate>,
    pub best: Option<MatchResult>,
}

/// Orchestrates enrollment, verification, and identification over a
/// [`VoicePrintStore`].
///
/// Feature extraction is pure and per-request; the only shared mutable state
/// is the published classifier snapshot, swapped atomically after each
/// training run. Clones share the same engine.
#[derive(Clone)]
pub struct SpeakerEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    store: Arc<dyn VoicePrintStore>,
    extractor: FeatureExtractor,
    /// Currently published model. Readers clone the `Arc` once per call and
    /// keep using that snapshot even while a newer one is being trained.
    published: RwLock<Arc<ModelSnapshot>>,
    /// Serializes training runs; at most one executes at a time.
    train_lock: Mutex<()>,
    /// Set while a background retrain is requested; a request arriving while
    /// one is pending is coalesced rather than queued.
    retrain_pending: AtomicBool,
}

impl SpeakerEngine {
    /// Build an engine over `store`, restoring a persisted model snapshot
    /// when one exists.
    pub fn new(store: Arc<dyn VoicePrintStore>) -> Self {
        let snapshot = match store.load_model_snapshot() {
            Ok(Some(bytes)) => match ModelSnapshot::from_bytes(&bytes) {
                Ok(snapshot) => {
                    info!(version = snapshot.version(), "restored model snapshot");
                    snapshot
                }
                Err(err) => {
                    warn!(%err, "persisted model snapshot unreadable, starting untrained");
                    ModelSnapshot::untrained()
                }
            },
            Ok(None) => ModelSnapshot::untrained(),
            Err(err) => {
                warn!(%err, "could not load model snapshot, starting untrained");
                ModelSnapshot::untrained()
            }
        };

        Self {
            inner: Arc::new(EngineInner {
                store,
                extractor: FeatureExtractor::new(),
                published: RwLock::new(Arc::new(snapshot)),
                train_lock: Mutex::new(()),
                retrain_pending: AtomicBool::new(false),
            }),
        }
    }

    /// Enroll an utterance as the voice print for (identity, phrase).
    ///
    /// Fails with `EmptyFeatureSet` when the audio is too short to yield a
    /// single analysis frame. On success a classifier retrain is scheduled in
    /// the background; the enrollment itself never waits for it.
    pub fn enroll(
        &self,
        identity: &str,
        phrase: &str,
        audio: &[u8],
    ) -> Result<VoicePrint, VoiceError> {
        let analysis = self.inner.analyze(audio)?;
        if analysis.frame_count == 0 {
            return Err(VoiceError::EmptyFeatureSet);
        }

        let print = VoicePrint {
            identity: identity.to_string(),
            phrase: phrase.to_string(),
            embedding: analysis.embedding,
            created_at: SystemTime::now(),
            audio_seconds: analysis.audio_seconds,
        };
        self.inner.store.save_voice_print(print.clone())?;
        info!(
            identity,
            phrase,
            audio_seconds = print.audio_seconds,
            "enrolled voice print"
        );

        self.schedule_retrain();
        Ok(print)
    }

    /// Verify an utterance against the enrolled print for (identity, phrase).
    pub fn verify(
        &self,
        identity: &str,
        phrase: &str,
        audio: &[u8],
    ) -> Result<MatchResult, VoiceError> {
        let stored = self
            .inner
            .store
            .load_voice_print(identity, phrase)?
            .ok_or_else(|| VoiceError::NotEnrolled {
                identity: identity.to_string(),
                phrase: phrase.to_string(),
            })?;

        let analysis = self.inner.analyze(audio)?;
        let snapshot = self.inner.snapshot_for_inference()?;
        let classifier = snapshot
            .infer(&analysis.embedding)
            .get(identity)
            .copied()
            .unwrap_or(0.0);
        let confidence = combine(
            classifier,
            cosine_similarity(&analysis.embedding, &stored.embedding)?,
        );
        let is_match = exceeds_threshold(confidence);
        debug!(identity, phrase, confidence, is_match, "verification scored");

        Ok(MatchResult {
            identity: Some(identity.to_string()),
            confidence,
            is_match,
            reason: if is_match {
                "voice verified successfully".to_string()
            } else {
                "voice verification failed".to_string()
            },
        })
    }

    /// Rank every identity enrolled for `phrase` against an utterance.
    pub fn identify(&self, phrase: &str, audio: &[u8]) -> Result<IdentifyResult, VoiceError> {
        let enrolled = self.inner.store.list_voice_prints(phrase)?;
        if enrolled.is_empty() {
            debug!(phrase, "identification with no enrolled candidates");
            return Ok(IdentifyResult {
                status: IdentifyStatus::NoCandidates,
                candidates: Vec::new(),
                best: None,
            });
        }

        let analysis = self.inner.analyze(audio)?;
        let snapshot = self.inner.snapshot_for_inference()?;
        let classifier = snapshot.infer(&analysis.embedding);

        let mut candidates = Vec::with_capacity(enrolled.len());
        for print in &enrolled {
            let confidence = combine(
                classifier.get(&print.identity).copied().unwrap_or(0.0),
                cosine_similarity(&analysis.embedding, &print.embedding)?,
            );
            candidates.push(Candidate {
                identity: print.identity.clone(),
                confidence,
            });
        }
        candidates.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(CmpOrdering::Equal)
        });

        let top = &candidates[0];
        let is_match = exceeds_threshold(top.confidence);
        debug!(
            phrase,
            best = top.identity.as_str(),
            confidence = top.confidence,
            "identification ranked"
        );

        Ok(IdentifyResult {
            status: IdentifyStatus::Ranked,
            best: Some(MatchResult {
                identity: Some(top.identity.clone()),
                confidence: top.confidence,
                is_match,
                reason: if is_match {
                    "speaker identified".to_string()
                } else {
                    "no candidate above match threshold".to_string()
                },
            }),
            candidates,
        })
    }

    /// Train a new snapshot from the current enrollments, blocking until done.
    ///
    /// Returns `NoData` and leaves the published snapshot untouched when no
    /// enrollments exist. Callers needing bounded inference latency can use
    /// this to pre-warm the model.
    pub fn train_now(&self) -> Result<TrainOutcome, VoiceError> {
        let _guard = self
            .inner
            .train_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.inner.retrain_locked()
    }

    /// Version of the currently published snapshot (0 while untrained).
    pub fn model_version(&self) -> u64 {
        self.inner.current_snapshot().version()
    }

    /// Request a retrain without blocking the caller. Requests arriving while
    /// one is already pending are coalesced.
    fn schedule_retrain(&self) {
        if self.inner.retrain_pending.swap(true, Ordering::SeqCst) {
            debug!("retrain already pending, coalescing request");
            return;
        }
        let inner = Arc::clone(&self.inner);
        thread::spawn(move || {
            let _guard = inner
                .train_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            while inner.retrain_pending.swap(false, Ordering::SeqCst) {
                if let Err(err) = inner.retrain_locked() {
                    warn!(%err, "background retrain failed");
                }
            }
        });
    }
}

struct Analysis {
    embedding: Embedding,
    frame_count: usize,
    audio_seconds: f32,
}

impl EngineInner {
    fn analyze(&self, audio: &[u8]) -> Result<Analysis, VoiceError> {
        let sequence = wav::decode_audio(audio)?;
        let features = self.extractor.extract_all(&sequence.samples);
        Ok(Analysis {
            frame_count: features.len(),
            embedding: build_embedding(&features),
            audio_seconds: sequence.duration_seconds(),
        })
    }

    fn current_snapshot(&self) -> Arc<ModelSnapshot> {
        Arc::clone(
            &self
                .published
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Snapshot to score against. The first inference against an untrained
    /// model trains synchronously when enrollments exist; this is the one
    /// documented blocking exception to keeping training off the request
    /// path, avoidable by pre-warming with `train_now`.
    fn snapshot_for_inference(&self) -> Result<Arc<ModelSnapshot>, VoiceError> {
        let snapshot = self.current_snapshot();
        if snapshot.is_trained() {
            return Ok(snapshot);
        }

        let _guard = self
            .train_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // A concurrent caller may have trained while we waited on the lock.
        let snapshot = self.current_snapshot();
        if snapshot.is_trained() {
            return Ok(snapshot);
        }
        self.retrain_locked()?;
        Ok(self.current_snapshot())
    }

    /// Run one training pass and publish the result. Caller must hold
    /// `train_lock`.
    fn retrain_locked(&self) -> Result<TrainOutcome, VoiceError> {
        let examples = self.store.training_examples()?;
        let prev_version = self.current_snapshot().version();

        let Some(run) = model::train(&examples, prev_version) else {
            info!("no training data available, keeping current snapshot");
            return Ok(TrainOutcome::NoData);
        };

        let outcome = TrainOutcome::Trained {
            version: run.snapshot.version(),
            iterations: run.iterations,
            error: run.error,
        };

        match run.snapshot.to_bytes() {
            Ok(bytes) => {
                if let Err(err) = self.store.save_model_snapshot(&bytes) {
                    warn!(%err, "failed to persist model snapshot");
                }
            }
            Err(err) => warn!(%err, "failed to serialize model snapshot"),
        }

        let mut published = self
            .published
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *published = Arc::new(run.snapshot);

        Ok(outcome)
    }
}

/// Combine the classifier signal with a cosine similarity rescaled from
/// [-1, 1] to [0, 1]. The maximum of the two is used rather than requiring
/// agreement: the classifier is uninformative while undertrained and the
/// cosine path carries phrase-specific pooling artifacts, so either signal
/// alone may be degraded.
fn combine(classifier_confidence: f32, cosine: f32) -> f32 {
    classifier_confidence.max((cosine + 1.0) / 2.0)
}

fn exceeds_threshold(confidence: f32) -> bool {
    confidence > MATCH_THRESHOLD
}
