use std::collections::{BTreeMap, BTreeSet};

use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::embedding::EMBEDDING_DIM;
use crate::error::VoiceError;

/// Upper bound on training iterations.
pub const MAX_ITERATIONS: usize = 2000;
/// Mean-squared-error stopping criterion.
pub const ERROR_THRESHOLD: f32 = 0.005;

const LEARNING_RATE: f32 = 0.3;
const HIDDEN_LAYERS: [usize; 2] = [128, 64];
const INIT_RANGE: f32 = 0.2;
const LOG_PERIOD: usize = 100;

/// Result of a training request.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainOutcome {
    /// A new snapshot was produced.
    Trained {
        version: u64,
        iterations: usize,
        error: f32,
    },
    /// No examples were available; the previous snapshot stays published.
    NoData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Layer {
    weights: Array2<f32>,
    bias: Array1<f32>,
}

impl Layer {
    fn forward(&self, input: &Array1<f32>) -> Array1<f32> {
        let mut z = self.weights.dot(input);
        z += &self.bias;
        z.mapv_inplace(sigmoid);
        z
    }
}

/// Immutable, versioned classifier state.
///
/// A sigmoid multi-layer perceptron mapping an embedding to one independent
/// regression output per enrolled identity (one-vs-rest targets, so outputs
/// do not sum to 1). Version 0 with no layers is the untrained state.
/// Retraining builds a fresh snapshot; published snapshots are never mutated,
/// so inference against an older version stays valid while a new one trains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSnapshot {
    version: u64,
    /// Identity -> output slot, assigned in sorted identity order so slot
    /// layout is reproducible across snapshots.
    slots: BTreeMap<String, usize>,
    layers: Vec<Layer>,
}

impl ModelSnapshot {
    pub fn untrained() -> Self {
        Self {
            version: 0,
            slots: BTreeMap::new(),
            layers: Vec::new(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_trained(&self) -> bool {
        !self.layers.is_empty()
    }

    pub fn identity_count(&self) -> usize {
        self.slots.len()
    }

    /// Per-identity confidence for one embedding.
    ///
    /// The untrained snapshot knows no identities and returns an empty map;
    /// callers read a missing identity as zero confidence, never as an error.
    pub fn infer(&self, embedding: &[f32]) -> BTreeMap<String, f32> {
        if !self.is_trained() {
            return BTreeMap::new();
        }
        if embedding.len() != EMBEDDING_DIM {
            warn!(
                len = embedding.len(),
                "refusing inference on malformed embedding"
            );
            return BTreeMap::new();
        }

        let mut activation = Array1::from_iter(embedding.iter().copied());
        for layer in &self.layers {
            activation = layer.forward(&activation);
        }

        self.slots
            .iter()
            .map(|(identity, &slot)| (identity.clone(), activation[slot]))
            .collect()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, VoiceError> {
        serde_json::to_vec(self).map_err(|e| VoiceError::Store(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VoiceError> {
        serde_json::from_slice(bytes).map_err(|e| VoiceError::Store(e.to_string()))
    }
}

/// A completed training run, ready to publish.
#[derive(Debug)]
pub struct TrainingRun {
    pub snapshot: ModelSnapshot,
    pub iterations: usize,
    pub error: f32,
}

/// Train a new snapshot from enrollment examples.
///
/// Returns `None` when `examples` is empty. Per-example gradient descent over
/// a 32 -> 128 -> 64 -> K sigmoid network, stopped by whichever of the
/// iteration cap and the error threshold triggers first.
pub fn train(examples: &[(Vec<f32>, String)], prev_version: u64) -> Option<TrainingRun> {
    let usable: Vec<&(Vec<f32>, String)> = examples
        .iter()
        .filter(|(embedding, identity)| {
            if embedding.len() == EMBEDDING_DIM {
                true
            } else {
                warn!(
                    identity = identity.as_str(),
                    len = embedding.len(),
                    "skipping training example with malformed embedding"
                );
                false
            }
        })
        .collect();
    if usable.is_empty() {
        return None;
    }

    let identities: BTreeSet<&str> = usable.iter().map(|(_, id)| id.as_str()).collect();
    let slots: BTreeMap<String, usize> = identities
        .iter()
        .enumerate()
        .map(|(slot, id)| (id.to_string(), slot))
        .collect();
    let num_outputs = slots.len();

    let patterns: Vec<(Array1<f32>, Array1<f32>)> = usable
        .iter()
        .map(|(embedding, identity)| {
            let input = Array1::from_iter(embedding.iter().copied());
            let mut target = Array1::zeros(num_outputs);
            target[slots[identity.as_str()]] = 1.0;
            (input, target)
        })
        .collect();

    info!(
        identities = num_outputs,
        examples = patterns.len(),
        "training classifier"
    );

    let mut layers = init_layers(num_outputs);
    let mut iterations = 0;
    let mut mse = f32::MAX;

    for iteration in 1..=MAX_ITERATIONS {
        let mut total_error = 0.0f32;
        for (input, target) in &patterns {
            total_error += train_pattern(&mut layers, input, target);
        }
        mse = total_error / patterns.len() as f32;
        iterations = iteration;
        if iteration % LOG_PERIOD == 0 {
            debug!(iteration, mse, "training progress");
        }
        if mse < ERROR_THRESHOLD {
            break;
        }
    }

    info!(iterations, error = mse, "training complete");

    Some(TrainingRun {
        snapshot: ModelSnapshot {
            version: prev_version + 1,
            slots,
            layers,
        },
        iterations,
        error: mse,
    })
}

fn init_layers(num_outputs: usize) -> Vec<Layer> {
    let mut rng = rand::rng();
    let dims = [
        EMBEDDING_DIM,
        HIDDEN_LAYERS[0],
        HIDDEN_LAYERS[1],
        num_outputs,
    ];
    dims.windows(2)
        .map(|pair| Layer {
            weights: Array2::from_shape_fn((pair[1], pair[0]), |_| {
                rng.random_range(-INIT_RANGE..INIT_RANGE)
            }),
            bias: Array1::from_shape_fn(pair[1], |_| rng.random_range(-INIT_RANGE..INIT_RANGE)),
        })
        .collect()
}

/// One forward/backward pass for a single pattern. Returns the pattern's
/// mean squared output error before the update.
fn train_pattern(layers: &mut [Layer], input: &Array1<f32>, target: &Array1<f32>) -> f32 {
    // Forward, keeping every activation for the backward pass.
    let mut activations = Vec::with_capacity(layers.len() + 1);
    activations.push(input.clone());
    for layer in layers.iter() {
        let next = layer.forward(activations.last().unwrap_or(input));
        activations.push(next);
    }

    let output = &activations[layers.len()];
    let error = (target - output).mapv(|e| e * e).sum() / output.len() as f32;

    // Deltas for every layer, computed against the pre-update weights.
    let mut deltas: Vec<Array1<f32>> = Vec::with_capacity(layers.len());
    let output_delta = (output - target) * &output.mapv(|a| a * (1.0 - a));
    deltas.push(output_delta);
    for l in (0..layers.len() - 1).rev() {
        let downstream = deltas.last().unwrap_or(&activations[0]);
        let activation = &activations[l + 1];
        let delta = layers[l + 1].weights.t().dot(downstream)
            * &activation.mapv(|a| a * (1.0 - a));
        deltas.push(delta);
    }
    deltas.reverse();

    for (l, layer) in layers.iter_mut().enumerate() {
        let delta = &deltas[l];
        let grad = delta
            .view()
            .insert_axis(Axis(1))
            .dot(&activations[l].view().insert_axis(Axis(0)));
        layer.weights.scaled_add(-LEARNING_RATE, &grad);
        layer.bias.scaled_add(-LEARNING_RATE, delta);
    }

    error
}

fn sigmoid(z: f32) -> f32 {
    1.0 / (1.0 + (-z).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example(identity: &str, lead: f32) -> (Vec<f32>, String) {
        let mut embedding = vec![0.1f32; EMBEDDING_DIM];
        for value in embedding.iter_mut().take(EMBEDDING_DIM / 2) {
            *value = lead;
        }
        (embedding, identity.to_string())
    }

    #[test]
    fn empty_training_set_yields_nothing() {
        assert!(train(&[], 0).is_none());
    }

    #[test]
    fn untrained_snapshot_infers_zero_for_everyone() {
        let snapshot = ModelSnapshot::untrained();
        assert_eq!(snapshot.version(), 0);
        assert!(!snapshot.is_trained());
        let out = snapshot.infer(&vec![0.5; EMBEDDING_DIM]);
        assert!(out.is_empty());
        assert_eq!(out.get("alice").copied().unwrap_or(0.0), 0.0);
    }

    #[test]
    fn slots_follow_sorted_identity_order() {
        let examples = vec![
            example("carol", 0.9),
            example("alice", 0.2),
            example("bob", 0.6),
        ];
        let run = train(&examples, 0).unwrap();
        assert_eq!(run.snapshot.slots["alice"], 0);
        assert_eq!(run.snapshot.slots["bob"], 1);
        assert_eq!(run.snapshot.slots["carol"], 2);
    }

    #[test]
    fn training_separates_two_identities() {
        let examples = vec![example("alice", 0.9), example("bob", 0.2)];
        let run = train(&examples, 0).unwrap();
        assert!(run.iterations <= MAX_ITERATIONS);

        let out = run.snapshot.infer(&example("alice", 0.9).0);
        let alice = out["alice"];
        let bob = out["bob"];
        assert!(alice > bob, "own-slot confidence {alice} <= other {bob}");
        assert!(alice > 0.5);
    }

    #[test]
    fn version_increments_from_previous_snapshot() {
        let run = train(&[example("alice", 0.9)], 41).unwrap();
        assert_eq!(run.snapshot.version(), 42);
        assert!(run.snapshot.is_trained());
        assert_eq!(run.snapshot.identity_count(), 1);
    }

    #[test]
    fn trained_snapshot_ignores_malformed_embedding() {
        let run = train(&[example("alice", 0.9), example("bob", 0.2)], 0).unwrap();
        let out = run.snapshot.infer(&[0.5; 3]);
        assert!(out.is_empty());
        assert_eq!(out.get("alice").copied().unwrap_or(0.0), 0.0);
    }

    #[test]
    fn malformed_embeddings_are_skipped() {
        let examples = vec![(vec![0.5f32; 3], "alice".to_string())];
        assert!(train(&examples, 0).is_none());
    }

    #[test]
    fn snapshot_bytes_round_trip() {
        let run = train(&[example("alice", 0.9), example("bob", 0.2)], 6).unwrap();
        let bytes = run.snapshot.to_bytes().unwrap();
        let restored = ModelSnapshot::from_bytes(&bytes).unwrap();
        assert_eq!(restored.version(), run.snapshot.version());

        let probe = example("alice", 0.9).0;
        assert_eq!(restored.infer(&probe), run.snapshot.infer(&probe));
    }

    #[test]
    fn garbage_snapshot_bytes_are_an_error() {
        assert!(ModelSnapshot::from_bytes(b"not json").is_err());
    }
}
