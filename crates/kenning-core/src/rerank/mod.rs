//! Online Re-ranker
//!
//! A logistic ranker over the flattened feature space, trained online from
//! user feedback with clipped SGD and L2 regularization. Disabled, it is an
//! exact pass-through. Given identical state and inputs it produces
//! identical outputs.

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Mutex;

use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::config::RerankConfig;
use crate::error::{EngineError, Result};
use crate::features::FeatureVector;
use crate::model::SearchResultItem;

/// Feature rows remembered for feedback association
const FEEDBACK_MEMORY: usize = 1000;

/// Gradient L2-norm clip
const GRADIENT_CLIP: f64 = 1.0;

/// Checkpoint schema version
const CHECKPOINT_MODEL_VERSION: u32 = 1;

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

// ============================================================================
// CHECKPOINT
// ============================================================================

/// Serialized ranker state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankerCheckpoint {
    pub model_version: u32,
    pub algorithm: String,
    pub weights: Vec<f64>,
    pub bias: f64,
    pub updates: u64,
}

// ============================================================================
// STATE
// ============================================================================

struct RankerState {
    weights: Vec<f64>,
    bias: f64,
    /// (row, label) pairs awaiting the batch flush
    pending: Vec<(Vec<f64>, f64)>,
    /// Feature rows keyed by (query id, result id)
    remembered: LruCache<(String, String), Vec<f64>>,
    updates: u64,
}

/// Online-learning logistic re-ranker
pub struct LogisticReranker {
    config: RerankConfig,
    state: Mutex<RankerState>,
}

impl LogisticReranker {
    pub fn new(config: RerankConfig) -> Self {
        Self {
            config,
            state: Mutex::new(RankerState {
                weights: vec![0.0; FeatureVector::FLAT_DIM],
                bias: 0.0,
                pending: Vec::new(),
                remembered: LruCache::new(
                    NonZeroUsize::new(FEEDBACK_MEMORY).expect("nonzero capacity"),
                ),
                updates: 0,
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Re-rank results by model score. Disabled → the input comes back
    /// unchanged. `features` must parallel `results`.
    pub fn rerank(
        &self,
        query_id: &str,
        mut results: Vec<SearchResultItem>,
        features: &[FeatureVector],
    ) -> Vec<SearchResultItem> {
        if !self.config.enabled || results.is_empty() {
            return results;
        }

        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => return results,
        };

        let mut scored: Vec<(f64, usize)> = results
            .iter()
            .enumerate()
            .map(|(i, _)| {
                let row = features
                    .get(i)
                    .map(FeatureVector::flatten)
                    .unwrap_or_else(|| vec![0.0; FeatureVector::FLAT_DIM]);
                let dot: f64 = state
                    .weights
                    .iter()
                    .zip(row.iter())
                    .map(|(w, x)| w * x)
                    .sum();
                let score = sigmoid(dot + state.bias);
                state.remembered.put(
                    (query_id.to_string(), results[i].entry.id.clone()),
                    row,
                );
                (score, i)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| results[a.1].entry.id.cmp(&results[b.1].entry.id))
        });
        drop(state);

        let mut reordered: Vec<SearchResultItem> = Vec::with_capacity(results.len());
        for (rank, (score, idx)) in scored.iter().enumerate() {
            let mut item = std::mem::take(&mut results[*idx]);
            item.score = *score;
            item.rank = rank + 1;
            reordered.push(item);
        }
        reordered
    }

    /// Record binary relevance feedback for a previously reranked result.
    /// Online mode performs one clipped SGD step immediately and an
    /// L2-regularized averaged step every `batch_size` observations.
    pub fn observe_feedback(&self, query_id: &str, result_id: &str, label: u8) -> Result<()> {
        if label > 1 {
            return Err(EngineError::InvalidArgument(format!(
                "relevance label must be 0 or 1, got {label}"
            )));
        }
        if !self.config.enabled || !self.config.online_learning {
            return Ok(());
        }

        let mut state = self
            .state
            .lock()
            .map_err(|_| EngineError::Init("Ranker lock poisoned".into()))?;

        let key = (query_id.to_string(), result_id.to_string());
        let Some(row) = state.remembered.get(&key).cloned() else {
            tracing::warn!("No remembered features for feedback on {result_id}");
            return Ok(());
        };

        let y = f64::from(label);
        Self::sgd_step(
            &mut state,
            &row,
            y,
            self.config.learning_rate,
            self.config.regularization,
        );

        state.pending.push((row, y));
        state.updates += 1;
        if state.pending.len() >= self.config.batch_size.max(1) {
            Self::flush_batch(
                &mut state,
                self.config.learning_rate,
                self.config.regularization,
            );
        }
        Ok(())
    }

    fn sgd_step(state: &mut RankerState, row: &[f64], y: f64, lr: f64, reg: f64) {
        let dot: f64 = state
            .weights
            .iter()
            .zip(row.iter())
            .map(|(w, x)| w * x)
            .sum();
        let error = sigmoid(dot + state.bias) - y;

        let mut grad: Vec<f64> = row.iter().map(|x| error * x).collect();
        let norm: f64 = grad.iter().map(|g| g * g).sum::<f64>().sqrt();
        if norm > GRADIENT_CLIP {
            for g in &mut grad {
                *g *= GRADIENT_CLIP / norm;
            }
        }

        for (w, g) in state.weights.iter_mut().zip(grad.iter()) {
            *w -= lr * (g + reg * *w);
        }
        state.bias -= lr * error.clamp(-GRADIENT_CLIP, GRADIENT_CLIP);
    }

    /// Average-gradient step over the accumulated batch
    fn flush_batch(state: &mut RankerState, lr: f64, reg: f64) {
        let n = state.pending.len();
        if n == 0 {
            return;
        }
        let mut grad = vec![0.0; state.weights.len()];
        let mut bias_grad = 0.0;
        for (row, y) in &state.pending {
            let dot: f64 = state
                .weights
                .iter()
                .zip(row.iter())
                .map(|(w, x)| w * x)
                .sum();
            let error = sigmoid(dot + state.bias) - y;
            for (g, x) in grad.iter_mut().zip(row.iter()) {
                *g += error * x / n as f64;
            }
            bias_grad += error / n as f64;
        }
        for (w, g) in state.weights.iter_mut().zip(grad.iter()) {
            *w -= lr * (g + reg * *w);
        }
        state.bias -= lr * bias_grad;
        state.pending.clear();
        tracing::debug!("Re-ranker batch flush over {n} observations");
    }

    // ========================================================================
    // CHECKPOINTS
    // ========================================================================

    pub fn export_checkpoint(&self) -> Result<RankerCheckpoint> {
        let state = self
            .state
            .lock()
            .map_err(|_| EngineError::Init("Ranker lock poisoned".into()))?;
        Ok(RankerCheckpoint {
            model_version: CHECKPOINT_MODEL_VERSION,
            algorithm: "logistic".into(),
            weights: state.weights.clone(),
            bias: state.bias,
            updates: state.updates,
        })
    }

    pub fn import_checkpoint(&self, checkpoint: &RankerCheckpoint) -> Result<()> {
        if checkpoint.algorithm != "logistic" {
            return Err(EngineError::ModelIncompatible(format!(
                "expected logistic ranker, got {}",
                checkpoint.algorithm
            )));
        }
        if checkpoint.weights.len() != FeatureVector::FLAT_DIM {
            return Err(EngineError::ModelIncompatible(format!(
                "expected {} weights, got {}",
                FeatureVector::FLAT_DIM,
                checkpoint.weights.len()
            )));
        }
        let mut state = self
            .state
            .lock()
            .map_err(|_| EngineError::Init("Ranker lock poisoned".into()))?;
        state.weights = checkpoint.weights.clone();
        state.bias = checkpoint.bias;
        state.updates = checkpoint.updates;
        state.pending.clear();
        Ok(())
    }

    /// Write the checkpoint to the sidecar directory
    pub fn save_checkpoint(&self, dir: &Path) -> Result<std::path::PathBuf> {
        let checkpoint = self.export_checkpoint()?;
        let path = dir.join("ranker-checkpoint.json");
        std::fs::write(&path, serde_json::to_vec_pretty(&checkpoint).unwrap_or_default())?;
        Ok(path)
    }

    /// Load a checkpoint from the sidecar directory, if one exists
    pub fn load_checkpoint(&self, dir: &Path) -> Result<bool> {
        let path = dir.join("ranker-checkpoint.json");
        if !path.exists() {
            return Ok(false);
        }
        let text = std::fs::read_to_string(&path)?;
        let checkpoint: RankerCheckpoint = serde_json::from_str(&text)
            .map_err(|e| EngineError::ModelIncompatible(format!("unreadable checkpoint: {e}")))?;
        self.import_checkpoint(&checkpoint)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Entry;

    fn enabled_config() -> RerankConfig {
        RerankConfig {
            enabled: true,
            learning_rate: 0.5,
            batch_size: 4,
            ..Default::default()
        }
    }

    fn item(id: &str, score: f64) -> SearchResultItem {
        SearchResultItem {
            entry: Entry::new(id, format!("Title {id}"), "content"),
            score,
            ..Default::default()
        }
    }

    fn feature_with_title(score: f64) -> FeatureVector {
        let mut fv = FeatureVector::default();
        fv.basic.title_match_score = score;
        fv
    }

    #[test]
    fn test_disabled_is_exact_passthrough() {
        let reranker = LogisticReranker::new(RerankConfig::default());
        assert!(!reranker.is_enabled());
        let results = vec![item("a", 0.9), item("b", 0.5)];
        let out = reranker.rerank("q1", results.clone(), &[]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].entry.id, "a");
        assert_eq!(out[0].score, 0.9);
    }

    #[test]
    fn test_rerank_is_deterministic() {
        let a = LogisticReranker::new(enabled_config());
        let b = LogisticReranker::new(enabled_config());
        let results = vec![item("a", 0.9), item("b", 0.5), item("c", 0.1)];
        let features = vec![
            feature_with_title(0.1),
            feature_with_title(0.9),
            feature_with_title(0.5),
        ];
        let out_a = a.rerank("q1", results.clone(), &features);
        let out_b = b.rerank("q1", results, &features);
        let ids_a: Vec<&str> = out_a.iter().map(|i| i.entry.id.as_str()).collect();
        let ids_b: Vec<&str> = out_b.iter().map(|i| i.entry.id.as_str()).collect();
        assert_eq!(ids_a, ids_b);
        for (x, y) in out_a.iter().zip(out_b.iter()) {
            assert_eq!(x.score, y.score);
        }
    }

    #[test]
    fn test_ranks_rewritten() {
        let reranker = LogisticReranker::new(enabled_config());
        let out = reranker.rerank(
            "q1",
            vec![item("a", 0.9), item("b", 0.5)],
            &[feature_with_title(0.0), feature_with_title(1.0)],
        );
        assert_eq!(out[0].rank, 1);
        assert_eq!(out[1].rank, 2);
    }

    #[test]
    fn test_feedback_moves_weights_toward_label() {
        let reranker = LogisticReranker::new(enabled_config());
        let results = vec![item("good", 0.5), item("bad", 0.5)];
        let features = vec![feature_with_title(1.0), feature_with_title(0.0)];

        // Train: title matches are relevant
        for _ in 0..50 {
            reranker.rerank("q", results.clone(), &features);
            reranker.observe_feedback("q", "good", 1).unwrap();
            reranker.observe_feedback("q", "bad", 0).unwrap();
        }

        let out = reranker.rerank("q", results, &features);
        assert_eq!(out[0].entry.id, "good");
        assert!(out[0].score > out[1].score);
    }

    #[test]
    fn test_invalid_label_rejected() {
        let reranker = LogisticReranker::new(enabled_config());
        let err = reranker.observe_feedback("q", "r", 2).unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }

    #[test]
    fn test_feedback_without_memory_is_harmless() {
        let reranker = LogisticReranker::new(enabled_config());
        reranker.observe_feedback("q", "never-seen", 1).unwrap();
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let reranker = LogisticReranker::new(enabled_config());
        reranker.rerank("q", vec![item("a", 0.5)], &[feature_with_title(1.0)]);
        reranker.observe_feedback("q", "a", 1).unwrap();

        let checkpoint = reranker.export_checkpoint().unwrap();
        assert_eq!(checkpoint.algorithm, "logistic");
        assert_eq!(checkpoint.updates, 1);

        let restored = LogisticReranker::new(enabled_config());
        restored.import_checkpoint(&checkpoint).unwrap();
        assert_eq!(
            restored.export_checkpoint().unwrap().weights,
            checkpoint.weights
        );
    }

    #[test]
    fn test_import_rejects_wrong_shape() {
        let reranker = LogisticReranker::new(enabled_config());
        let bad = RankerCheckpoint {
            model_version: 1,
            algorithm: "logistic".into(),
            weights: vec![0.0; 3],
            bias: 0.0,
            updates: 0,
        };
        assert!(matches!(
            reranker.import_checkpoint(&bad),
            Err(EngineError::ModelIncompatible(_))
        ));

        let wrong_algo = RankerCheckpoint {
            model_version: 1,
            algorithm: "lambdarank".into(),
            weights: vec![0.0; FeatureVector::FLAT_DIM],
            bias: 0.0,
            updates: 0,
        };
        assert!(matches!(
            reranker.import_checkpoint(&wrong_algo),
            Err(EngineError::ModelIncompatible(_))
        ));
    }

    #[test]
    fn test_save_and_load_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let reranker = LogisticReranker::new(enabled_config());
        reranker.save_checkpoint(dir.path()).unwrap();

        let other = LogisticReranker::new(enabled_config());
        assert!(other.load_checkpoint(dir.path()).unwrap());
        assert!(!other
            .load_checkpoint(tempfile::tempdir().unwrap().path())
            .unwrap());
    }
}
