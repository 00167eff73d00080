//! Engine Configuration
//!
//! One struct per concern, all serde round-trippable so deployments can keep
//! a single JSON config document. Defaults match the tuned production values.

use std::path::PathBuf;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

// ============================================================================
// INDEX
// ============================================================================

/// FTS tokenizer selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tokenizer {
    /// Porter stemmer over unicode61 (better recall via stemming)
    #[default]
    Porter,
    /// Plain unicode61, no stemming
    Simple,
}

/// SQLite synchronous mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Synchronous {
    Off,
    #[default]
    Normal,
    Full,
}

/// SQLite journal mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    Delete,
    #[default]
    Wal,
}

/// Index store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IndexConfig {
    /// Database file path; `None` resolves the platform data directory
    pub database_path: Option<PathBuf>,
    /// Soft cap on database size in bytes (0 = unlimited)
    pub max_database_size: u64,
    /// FTS tokenizer
    pub tokenizer: Tokenizer,
    /// Fold diacritics during tokenization
    pub remove_accents: bool,
    /// Case-sensitive matching (FTS5 is case-insensitive; this only affects
    /// the relevance-factor substring checks)
    pub case_sensitive: bool,
    /// SQLite page-cache size in KiB
    pub cache_size: i64,
    /// PRAGMA synchronous
    pub synchronous: Synchronous,
    /// PRAGMA journal_mode
    pub journal_mode: JournalMode,
    /// Write batch size for the index manager
    pub batch_size: usize,
    /// Maximum entry content length in bytes
    pub max_content_length: usize,
    /// Trigger vacuum automatically at the deletion threshold
    pub auto_vacuum: bool,
    /// Percentage of deleted rows that triggers a vacuum
    pub vacuum_threshold: u8,
    /// Days to retain query-analytics records
    pub retention_days: u32,
    /// Default page size for searches
    pub default_limit: usize,
    /// Hard cap on `limit`
    pub max_limit: usize,
    /// Snippet window length in characters
    pub snippet_length: usize,
    /// Maximum content snippets per result
    pub max_snippets: usize,
    /// Content-change debounce window in milliseconds
    pub debounce_ms: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            max_database_size: 0,
            tokenizer: Tokenizer::Porter,
            remove_accents: true,
            case_sensitive: false,
            cache_size: 64_000,
            synchronous: Synchronous::Normal,
            journal_mode: JournalMode::Wal,
            batch_size: 100,
            max_content_length: 1024 * 1024,
            auto_vacuum: true,
            vacuum_threshold: 20,
            retention_days: 30,
            default_limit: 20,
            max_limit: 1000,
            snippet_length: 150,
            max_snippets: 5,
            debounce_ms: 500,
        }
    }
}

// ============================================================================
// BANDIT
// ============================================================================

/// Bandit arm-selection algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BanditAlgorithm {
    #[default]
    EpsilonGreedy,
    Ucb,
    /// Declared but unimplemented; construction rejects it
    ThompsonSampling,
}

impl BanditAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            BanditAlgorithm::EpsilonGreedy => "epsilon-greedy",
            BanditAlgorithm::Ucb => "ucb",
            BanditAlgorithm::ThompsonSampling => "thompson-sampling",
        }
    }
}

/// Bandit learner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BanditConfig {
    pub algorithm: BanditAlgorithm,
    /// Starting exploration rate for epsilon-greedy
    pub initial_epsilon: f64,
    /// Multiplicative epsilon decay applied per reward update
    pub epsilon_decay: f64,
    /// Exploration floor
    pub min_epsilon: f64,
    /// UCB exploration constant (c)
    pub confidence_level: f64,
    /// Global sliding-window size; context windows use a tenth of this
    pub window_size: usize,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            algorithm: BanditAlgorithm::EpsilonGreedy,
            initial_epsilon: 0.1,
            epsilon_decay: 0.995,
            min_epsilon: 0.01,
            confidence_level: 2.0,
            window_size: 1000,
        }
    }
}

// ============================================================================
// FEATURES
// ============================================================================

/// Batch scaling method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScalingMethod {
    #[default]
    MinMax,
    ZScore,
}

/// Per-category weights used for the derived overall-relevance score
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureWeights {
    pub title: f64,
    pub content: f64,
    pub proximity: f64,
    pub recency: f64,
    pub affinity: f64,
    pub semantic: f64,
    pub context: f64,
}

impl Default for FeatureWeights {
    fn default() -> Self {
        Self {
            title: 3.0,
            content: 1.0,
            proximity: 1.5,
            recency: 1.0,
            affinity: 1.2,
            semantic: 0.8,
            context: 1.0,
        }
    }
}

/// Feature extractor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureConfig {
    pub enable_basic_features: bool,
    pub enable_recency_features: bool,
    pub enable_proximity_features: bool,
    pub enable_affinity_features: bool,
    pub enable_semantic_features: bool,
    pub enable_context_features: bool,
    pub enable_derived_features: bool,
    pub feature_weights: FeatureWeights,
    pub normalize_features: bool,
    pub scaling_method: ScalingMethod,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            enable_basic_features: true,
            enable_recency_features: true,
            enable_proximity_features: true,
            enable_affinity_features: true,
            enable_semantic_features: true,
            enable_context_features: true,
            enable_derived_features: true,
            feature_weights: FeatureWeights::default(),
            normalize_features: true,
            scaling_method: ScalingMethod::MinMax,
        }
    }
}

// ============================================================================
// RERANKING
// ============================================================================

/// Re-ranker algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RerankAlgorithm {
    #[default]
    Logistic,
}

/// Online re-ranker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RerankConfig {
    pub enabled: bool,
    pub algorithm: RerankAlgorithm,
    pub learning_rate: f64,
    /// L2 regularization strength
    pub regularization: f64,
    /// Feedback accumulation batch size
    pub batch_size: usize,
    pub online_learning: bool,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            algorithm: RerankAlgorithm::Logistic,
            learning_rate: 0.01,
            regularization: 0.0001,
            batch_size: 32,
            online_learning: true,
        }
    }
}

// ============================================================================
// HYBRID RETRIEVAL
// ============================================================================

/// Retrieval execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    /// One bandit-selected strategy per query
    #[default]
    Single,
    /// Several strategies in parallel, fused
    Parallel,
    /// Single, escalating to parallel on low confidence
    Adaptive,
}

/// Fusion algorithm for parallel retrieval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FusionAlgorithm {
    #[default]
    Rrf,
    Borda,
    Weighted,
    Ltr,
}

/// Hybrid retriever configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HybridConfig {
    pub default_mode: RetrievalMode,
    /// Hard deadline for the parallel fan-out, in milliseconds
    pub parallel_timeout_ms: u64,
    pub fusion_algorithm: FusionAlgorithm,
    /// Accepted for forward compatibility; with no embedding backend the
    /// vector-heavy strategy runs as a tag/category-boosted FTS plan
    pub enable_vector_search: bool,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            default_mode: RetrievalMode::Single,
            parallel_timeout_ms: 2000,
            fusion_algorithm: FusionAlgorithm::Rrf,
            enable_vector_search: false,
        }
    }
}

// ============================================================================
// PERFORMANCE
// ============================================================================

/// Performance guards
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PerformanceConfig {
    /// Budget for batch feature extraction, in milliseconds
    pub max_feature_extraction_time_ms: u64,
    /// Skip reranking above this candidate count
    pub max_reranking_candidates: usize,
    pub cache_enabled: bool,
    /// Result-cache entry time-to-live, in milliseconds
    pub cache_ttl_ms: u64,
    /// Result-cache capacity in entries
    pub max_cache_size: usize,
    /// Soft memory cap in bytes (0 = unlimited)
    pub max_memory_usage: u64,
    /// Concurrent read bound
    pub max_concurrent_queries: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_feature_extraction_time_ms: 100,
            max_reranking_candidates: 100,
            cache_enabled: true,
            cache_ttl_ms: 300_000,
            max_cache_size: 1000,
            max_memory_usage: 0,
            max_concurrent_queries: 8,
        }
    }
}

// ============================================================================
// ANALYTICS
// ============================================================================

/// Query-analytics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyticsConfig {
    pub tracking_enabled: bool,
    /// Snapshot flush batch size
    pub batch_size: usize,
    /// Days to retain analytics records
    pub retention_days: u32,
    /// Queries slower than this land in the slow-query ring, in milliseconds
    pub slow_query_threshold_ms: u64,
    /// Results scoring below this count as low-relevance
    pub low_relevance_threshold: f64,
    /// Confidence level for reported intervals
    pub default_confidence_level: f64,
    /// Minimum effect size for comparisons
    pub default_minimum_effect: f64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            tracking_enabled: true,
            batch_size: 100,
            retention_days: 30,
            slow_query_threshold_ms: 1000,
            low_relevance_threshold: 0.3,
            default_confidence_level: 0.95,
            default_minimum_effect: 0.05,
        }
    }
}

// ============================================================================
// AGGREGATE
// ============================================================================

/// Full engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub index: IndexConfig,
    pub bandit: BanditConfig,
    pub features: FeatureConfig,
    pub rerank: RerankConfig,
    pub hybrid: HybridConfig,
    pub performance: PerformanceConfig,
    pub analytics: AnalyticsConfig,
    /// Sidecar directory for analytics snapshots, bandit exports and ranker
    /// checkpoints; `None` resolves the platform data directory
    pub sidecar_dir: Option<PathBuf>,
}

/// Resolve the platform data directory, creating it if needed
pub fn default_data_dir() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("dev", "kenning", "core")
        .ok_or_else(|| EngineError::Init("Could not determine project directories".to_string()))?;

    let data_dir = proj_dirs.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)?;
    // Restrict directory permissions to owner-only on Unix
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o700);
        let _ = std::fs::set_permissions(&data_dir, perms);
    }
    Ok(data_dir)
}

impl EngineConfig {
    /// Resolve the database path, falling back to the platform default
    pub fn resolve_database_path(&self) -> Result<PathBuf> {
        match &self.index.database_path {
            Some(p) => Ok(p.clone()),
            None => Ok(default_data_dir()?.join("kenning.db")),
        }
    }

    /// Resolve the sidecar directory, falling back to the platform default
    pub fn resolve_sidecar_dir(&self) -> Result<PathBuf> {
        let dir = match &self.sidecar_dir {
            Some(p) => p.clone(),
            None => default_data_dir()?.join("sidecar"),
        };
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}
