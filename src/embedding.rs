use crate::error::VoiceError;
use crate::features::{FeatureVector, NUM_COEFFS};

/// Number of scalar fields pooled per frame: 13 coefficients, spectral
/// centroid, RMS, zero-crossing rate.
const FIELDS: usize = NUM_COEFFS + 3;

/// Fixed embedding length: mean and standard deviation per field.
pub const EMBEDDING_DIM: usize = 2 * FIELDS;

/// Fixed-dimension fingerprint of one utterance.
pub type Embedding = Vec<f32>;

/// Pool a variable-length feature sequence into one fixed-dimension
/// embedding.
///
/// Per-field statistics over the frame axis keep the dimension independent of
/// utterance duration: first the mean of every field in declared order
/// (coefficients 0..13, centroid, RMS, ZCR), then the population standard
/// deviation of every field in the same order. Zero frames yields the
/// all-zero vector so downstream comparisons stay well-defined.
pub fn build_embedding(features: &[FeatureVector]) -> Embedding {
    let mut embedding = vec![0.0f32; EMBEDDING_DIM];
    if features.is_empty() {
        return embedding;
    }

    let n = features.len() as f32;
    let rows: Vec<[f32; FIELDS]> = features.iter().map(field_values).collect();

    for field in 0..FIELDS {
        let mean = rows.iter().map(|r| r[field]).sum::<f32>() / n;
        let variance = rows
            .iter()
            .map(|r| {
                let d = r[field] - mean;
                d * d
            })
            .sum::<f32>()
            / n;
        embedding[field] = mean;
        embedding[FIELDS + field] = variance.sqrt();
    }

    embedding
}

fn field_values(fv: &FeatureVector) -> [f32; FIELDS] {
    let mut row = [0.0f32; FIELDS];
    row[..NUM_COEFFS].copy_from_slice(&fv.mfcc);
    row[NUM_COEFFS] = fv.spectral_centroid;
    row[NUM_COEFFS + 1] = fv.rms;
    row[NUM_COEFFS + 2] = fv.zcr;
    row
}

/// Cosine similarity between two embeddings, in [-1, 1].
///
/// Returns 0 when either vector has zero norm. A length mismatch is a
/// `DimensionMismatch` error; embeddings are pooled to a fixed dimension, so
/// hitting it means the builder regressed, not that the input was bad.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, VoiceError> {
    if a.len() != b.len() {
        return Err(VoiceError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (&x, &y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let norm_a = norm_a.sqrt();
    let norm_b = norm_b.sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok(dot / (norm_a * norm_b))
}
