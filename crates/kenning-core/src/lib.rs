//! # Kenning Core
//!
//! Adaptive knowledge-retrieval engine. Given a textual query plus a
//! structured context (project, agent role, expertise, issue labels, session
//! history), it returns a ranked list of knowledge entries from a persistent
//! full-text index:
//!
//! - **FTS5 Index Store**: SQLite row store + inverted index with weighted
//!   BM25 scoring, four query languages (simple, phrase, boolean, fuzzy),
//!   facet counting, vacuum and rebuild
//! - **Search Engine**: validation, relevance-factor enhancement, snippet
//!   highlighting, facets, suggestions, a TTL result cache, and analytics
//! - **Index Manager**: batched writes, a debounced content-change queue,
//!   a file-watcher bridge, and typed lifecycle events
//! - **Feature Extractor**: a seven-category feature vector per
//!   (query, entry) pair with batch min-max / z-score scaling
//! - **Rank Fusion**: RRF, Borda, weighted and learning-to-rank fusion with
//!   diversity, boost and tie-break post-passes
//! - **Online Re-ranker**: logistic model trained from user feedback
//! - **Bandit Learner**: ε-greedy (contextual) and UCB1 strategy selection
//! - **Hybrid Retriever**: single, parallel (hard-deadline fan-out) and
//!   adaptive retrieval modes with a feedback loop into the learners
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use kenning_core::prelude::*;
//! use std::sync::Arc;
//!
//! let config = EngineConfig::default();
//! let store = Arc::new(IndexStore::open(config.index.clone())?);
//! let engine = Arc::new(SearchEngine::new(store, config.clone()));
//!
//! engine.store().insert(&[Entry::new("e1", "Connection pooling", "Reuse connections")])?;
//! let results = engine.search(&SearchQuery::simple("pooling"))?;
//!
//! // Adaptive retrieval with bandit strategy selection
//! let retriever = HybridRetriever::new(Arc::clone(&engine), config)?;
//! let retrieval = retriever.retrieve(RetrievalQuery {
//!     search: SearchQuery::simple("connection pooling"),
//!     context: QueryContext::default(),
//! }).await?;
//! retriever.observe_feedback(&retrieval.query_id, &UserFeedback {
//!     result_id: retrieval.results.results[0].entry.id.clone(),
//!     used_in_solution: true,
//!     ..Default::default()
//! })?;
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod bandit;
pub mod config;
pub mod error;
pub mod features;
pub mod fusion;
pub mod index;
pub mod manager;
pub mod model;
pub mod rerank;
pub mod retriever;
pub mod search;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Error handling
pub use error::{EngineError, Result};

// Configuration
pub use config::{
    AnalyticsConfig, BanditAlgorithm, BanditConfig, EngineConfig, FeatureConfig, FeatureWeights,
    FusionAlgorithm, HybridConfig, IndexConfig, JournalMode, PerformanceConfig, RerankAlgorithm,
    RerankConfig, RetrievalMode, ScalingMethod, Synchronous, Tokenizer,
};

// Data model
pub use model::{
    ChangeType, ContentChange, DateRange, Difficulty, Entry, EntryMetadata, EntryType,
    FacetBucket, MatchedField, QueryContext, QueryType, RankerUsed, RelevanceFactors,
    RetrievalQuery, RetrievalResult, RetrievalTimings, Scope, SearchFacets, SearchFilters,
    SearchQuery, SearchResultItem, SearchResults, SearchWeights, Snippet, UserFeedback,
};

// Index store
pub use index::{
    BatchOperation, FacetSource, FtsHit, FtsPage, IndexStats, IndexStore, VacuumResult,
};

// Search engine
pub use search::{CacheMetrics, QueryStat, SearchAnalytics, SearchEngine, SlowQuery};

// Index manager
pub use manager::{ContentLoader, EventBus, IndexEvent, IndexManager, WatchBridge};

// Features
pub use features::{CorpusStats, FeatureExtractor, FeatureVector};

// Fusion
pub use fusion::{
    apply_diversity_penalty, apply_query_boosts, apply_tie_break, borda_fusion, confidence_score,
    fuse, ltr_fusion, reciprocal_rank_fusion, weighted_fusion, RankingModel, TieBreak, RRF_K,
};

// Re-ranker
pub use rerank::{LogisticReranker, RankerCheckpoint};

// Bandit
pub use bandit::{
    ArmChoice, ArmEstimate, ArmStats, Bandit, BanditModel, BanditStats, Strategy,
};

// Hybrid retriever
pub use retriever::HybridRetriever;

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        Bandit, ContentChange, EngineConfig, EngineError, Entry, EntryMetadata, EntryType,
        HybridRetriever, IndexEvent, IndexManager, IndexStore, QueryContext, QueryType, Result,
        RetrievalQuery, RetrievalResult, SearchEngine, SearchFilters, SearchQuery, SearchResults,
        Strategy, UserFeedback,
    };
}
