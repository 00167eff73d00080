//! Hybrid Retriever
//!
//! Top-level retrieval entry point. The bandit picks a strategy for the
//! query's context, the strategy shapes a search plan, one or several plans
//! execute (parallel fan-out under a hard deadline), feature extraction and
//! fusion refine the candidates, and the optional online re-ranker produces
//! the final order. User feedback flows back into the bandit and re-ranker.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use lru::LruCache;
use tokio::task::JoinSet;
use tokio::time::timeout;
use uuid::Uuid;

use crate::bandit::{Bandit, BanditModel, BanditStats, Strategy};
use crate::config::{EngineConfig, FusionAlgorithm, RetrievalMode};
use crate::error::{EngineError, Result};
use crate::features::{FeatureExtractor, FeatureVector};
use crate::fusion::{
    apply_diversity_penalty, apply_query_boosts, apply_tie_break, confidence_score, fuse,
    RankingModel, TieBreak,
};
use crate::model::{
    QueryContext, RankerUsed, RetrievalQuery, RetrievalResult, RetrievalTimings, SearchQuery,
    SearchResults, SearchWeights, UserFeedback,
};
use crate::rerank::LogisticReranker;
use crate::search::SearchEngine;

/// Retrievals remembered for feedback correlation
const QUERY_MEMORY: usize = 1000;

/// Confidence under which adaptive mode escalates to a parallel fan-out
const ADAPTIVE_CONFIDENCE_FLOOR: f64 = 0.5;

/// Retrieval bookkeeping kept for later feedback
#[derive(Debug, Clone)]
struct QueryRecord {
    strategy: Strategy,
    bucket: String,
}

// ============================================================================
// RETRIEVER
// ============================================================================

/// Orchestrates bandit → search → features → fusion → rerank
pub struct HybridRetriever {
    engine: Arc<SearchEngine>,
    extractor: FeatureExtractor,
    reranker: Arc<LogisticReranker>,
    bandit: Mutex<Bandit>,
    ltr_model: Mutex<Option<RankingModel>>,
    query_log: Mutex<LruCache<String, QueryRecord>>,
    read_permits: tokio::sync::Semaphore,
    config: EngineConfig,
}

impl HybridRetriever {
    pub fn new(engine: Arc<SearchEngine>, config: EngineConfig) -> Result<Self> {
        let bandit = Bandit::new(config.bandit.clone())?;
        Self::with_bandit(engine, config, bandit)
    }

    /// Deterministic construction for tests
    pub fn with_seed(engine: Arc<SearchEngine>, config: EngineConfig, seed: u64) -> Result<Self> {
        let bandit = Bandit::with_seed(config.bandit.clone(), seed)?;
        Self::with_bandit(engine, config, bandit)
    }

    fn with_bandit(engine: Arc<SearchEngine>, config: EngineConfig, bandit: Bandit) -> Result<Self> {
        Ok(Self {
            engine,
            extractor: FeatureExtractor::new(config.features.clone()),
            reranker: Arc::new(LogisticReranker::new(config.rerank.clone())),
            bandit: Mutex::new(bandit),
            ltr_model: Mutex::new(None),
            query_log: Mutex::new(LruCache::new(
                NonZeroUsize::new(QUERY_MEMORY).expect("nonzero capacity"),
            )),
            read_permits: tokio::sync::Semaphore::new(
                config.performance.max_concurrent_queries.max(1),
            ),
            config,
        })
    }

    pub fn engine(&self) -> &Arc<SearchEngine> {
        &self.engine
    }

    /// Install a learning-to-rank fusion model
    pub fn set_ranking_model(&self, model: Option<RankingModel>) {
        if let Ok(mut guard) = self.ltr_model.lock() {
            *guard = model;
        }
    }

    // ========================================================================
    // RETRIEVE
    // ========================================================================

    /// Execute one retrieval end to end
    pub async fn retrieve(&self, query: RetrievalQuery) -> Result<RetrievalResult> {
        let _permit = self
            .read_permits
            .acquire()
            .await
            .map_err(|_| EngineError::Init("Retriever shutting down".into()))?;

        let started = Instant::now();
        let now = Utc::now();
        let bucket = query.context.bucket_key(now);

        let choice = {
            let mut bandit = self
                .bandit
                .lock()
                .map_err(|_| EngineError::Init("Bandit lock poisoned".into()))?;
            bandit.select_arm(Some(&bucket))
        };

        let mode = self.config.hybrid.default_mode;
        let (mut executed, mut primary) = match mode {
            RetrievalMode::Single => {
                let results = self.run_strategy(choice.strategy, &query).await?;
                (vec![(choice.strategy, results)], choice.strategy)
            }
            RetrievalMode::Parallel => self.run_parallel(choice.strategy, &query).await?,
            RetrievalMode::Adaptive => {
                let results = self.run_strategy(choice.strategy, &query).await?;
                let confident = results
                    .results
                    .first()
                    .map(|top| top.score >= ADAPTIVE_CONFIDENCE_FLOOR)
                    .unwrap_or(false);
                if confident {
                    (vec![(choice.strategy, results)], choice.strategy)
                } else {
                    tracing::debug!("Adaptive escalation to parallel fan-out");
                    self.run_parallel(choice.strategy, &query).await?
                }
            }
        };
        let search_time_ms = started.elapsed().as_millis() as u64;

        // Primary response carries the aggregate fields (facets, paging,
        // suggestions); fusion rewrites the ranked list
        let primary_idx = executed
            .iter()
            .position(|(s, _)| *s == primary)
            .unwrap_or(0);
        primary = executed[primary_idx].0;
        let mut response = executed.swap_remove(primary_idx).1;

        let fused_items = if executed.is_empty() {
            response.results.clone()
        } else {
            let mut lists = vec![response.results.clone()];
            lists.extend(executed.iter().map(|(_, r)| r.results.clone()));
            let model_guard = self
                .ltr_model
                .lock()
                .map_err(|_| EngineError::Init("Model lock poisoned".into()))?;
            fuse(
                &lists,
                self.config.hybrid.fusion_algorithm,
                None,
                model_guard.as_ref(),
            )?
        };
        let fused_count = !executed.is_empty();

        // Feature extraction over the fused candidates
        let feature_started = Instant::now();
        let entries: Vec<crate::model::Entry> =
            fused_items.iter().map(|i| i.entry.clone()).collect();
        let features = self.extractor.extract_batch(
            &query,
            &entries,
            now,
            Some(Duration::from_millis(
                self.config.performance.max_feature_extraction_time_ms,
            )),
        );
        let feature_extraction_time_ms = feature_started.elapsed().as_millis() as u64;

        // Post-fusion passes. The penalty and boost passes mutate scores in
        // place; the tie-break pass is the final sort and rank rewrite, so
        // rank order tracks the adjusted scores for every strategy.
        let ranking_started = Instant::now();
        let mut items = fused_items;
        apply_diversity_penalty(&mut items);
        apply_query_boosts(&mut items, &query.search.query, &query.context);
        apply_tie_break(&mut items, Self::tie_break_for(primary));

        // Optional online rerank
        let query_id = Uuid::new_v4().to_string();
        let mut ranker_used = if fused_count {
            RankerUsed::Hybrid
        } else {
            RankerUsed::Base
        };
        if self.reranker.is_enabled()
            && items.len() <= self.config.performance.max_reranking_candidates
        {
            items = self.reranker.rerank(&query_id, items, &features);
            ranker_used = if fused_count {
                RankerUsed::Hybrid
            } else {
                RankerUsed::Ml
            };
        }
        let confidence = confidence_score(&items);
        let ranking_time_ms = ranking_started.elapsed().as_millis() as u64;

        response.results = items;

        if let Ok(mut log) = self.query_log.lock() {
            log.put(
                query_id.clone(),
                QueryRecord {
                    strategy: primary,
                    bucket,
                },
            );
        }

        Ok(RetrievalResult {
            results: response,
            query_id,
            retrieval_strategy: primary.as_str().to_string(),
            confidence_score: confidence,
            ranker_used,
            exploration_performed: choice.explored,
            adaptive_learning_active: self.reranker.is_enabled()
                && self.config.rerank.online_learning,
            timings: RetrievalTimings {
                search_time_ms,
                feature_extraction_time_ms,
                ranking_time_ms,
                total_ml_time_ms: feature_extraction_time_ms + ranking_time_ms,
                total_time_ms: started.elapsed().as_millis() as u64,
            },
        })
    }

    /// Run one strategy's plan on the blocking pool
    async fn run_strategy(
        &self,
        strategy: Strategy,
        query: &RetrievalQuery,
    ) -> Result<SearchResults> {
        let engine = Arc::clone(&self.engine);
        let plan = Self::build_plan(strategy, query);
        tokio::task::spawn_blocking(move || engine.search(&plan))
            .await
            .map_err(|e| EngineError::Init(format!("Search task failed: {e}")))?
    }

    /// Fan out the chosen strategy plus complementary arms under the hard
    /// parallel deadline. Late arrivals are discarded; partial failures are
    /// tolerated while at least one strategy returns.
    async fn run_parallel(
        &self,
        chosen: Strategy,
        query: &RetrievalQuery,
    ) -> Result<(Vec<(Strategy, SearchResults)>, Strategy)> {
        let mut strategies = vec![chosen];
        for extra in [Strategy::FtsHeavy, Strategy::Balanced] {
            if !strategies.contains(&extra) {
                strategies.push(extra);
            }
        }

        let deadline = Duration::from_millis(self.config.hybrid.parallel_timeout_ms);
        let started = Instant::now();
        let mut join_set: JoinSet<(Strategy, Result<SearchResults>)> = JoinSet::new();
        for strategy in strategies {
            let engine = Arc::clone(&self.engine);
            let plan = Self::build_plan(strategy, query);
            join_set.spawn_blocking(move || (strategy, engine.search(&plan)));
        }

        let mut survived: Vec<(Strategy, SearchResults)> = Vec::new();
        let mut first_error: Option<EngineError> = None;
        loop {
            let remaining = deadline.saturating_sub(started.elapsed());
            match timeout(remaining, join_set.join_next()).await {
                Ok(Some(Ok((strategy, Ok(results))))) => survived.push((strategy, results)),
                Ok(Some(Ok((strategy, Err(e))))) => {
                    tracing::warn!("Strategy {strategy} failed in fan-out: {e}");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Ok(Some(Err(e))) => {
                    tracing::warn!("Fan-out task join failed: {e}");
                }
                Ok(None) => break,
                Err(_) => {
                    // Hard deadline: stragglers are cancelled, not merged
                    join_set.abort_all();
                    tracing::warn!(
                        "Parallel fan-out deadline ({:?}) hit with {} strategies done",
                        deadline,
                        survived.len()
                    );
                    break;
                }
            }
        }

        if survived.is_empty() {
            return match first_error {
                Some(e) => Err(e),
                None => Err(EngineError::SearchTimeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }),
            };
        }

        let primary = if survived.iter().any(|(s, _)| *s == chosen) {
            chosen
        } else {
            survived[0].0
        };
        Ok((survived, primary))
    }

    /// Shape a search plan for a strategy: weight emphasis and boost flags
    fn build_plan(strategy: Strategy, query: &RetrievalQuery) -> SearchQuery {
        let mut plan = query.search.clone();
        let base = plan.custom_weights.clone().unwrap_or_default();
        match strategy {
            Strategy::FtsHeavy => {
                // Raw text relevance; no metadata shaping
                plan.boost_recent = false;
                plan.boost_effective = false;
            }
            Strategy::VectorHeavy | Strategy::SemanticFocused => {
                plan.custom_weights = Some(SearchWeights {
                    tags: base.tags * 2.0,
                    category: base.category * 2.0,
                    ..base
                });
            }
            Strategy::Balanced => {
                plan.boost_recent = true;
                plan.boost_effective = true;
            }
            Strategy::RecencyFocused => {
                plan.boost_recent = true;
                plan.custom_weights = Some(SearchWeights {
                    recency: (base.recency * 10.0).max(1.0),
                    ..base
                });
            }
            Strategy::EffectivenessFocused => {
                plan.boost_effective = true;
                plan.custom_weights = Some(SearchWeights {
                    effectiveness: (base.effectiveness * 10.0).max(1.0),
                    ..base
                });
            }
            Strategy::PopularityFocused => {
                // Usage boost is always part of scoring; the post-fusion
                // tie-break finishes the job
            }
        }
        plan
    }

    fn tie_break_for(strategy: Strategy) -> TieBreak {
        match strategy {
            Strategy::RecencyFocused => TieBreak::Recency,
            Strategy::EffectivenessFocused => TieBreak::Effectiveness,
            Strategy::PopularityFocused => TieBreak::Popularity,
            _ => TieBreak::None,
        }
    }

    // ========================================================================
    // FEEDBACK
    // ========================================================================

    /// Map user feedback to a scalar reward, update the bandit's arm for the
    /// original context bucket, and train the re-ranker
    pub fn observe_feedback(&self, query_id: &str, feedback: &UserFeedback) -> Result<()> {
        let record = {
            let mut log = self
                .query_log
                .lock()
                .map_err(|_| EngineError::Init("Query log lock poisoned".into()))?;
            log.get(query_id).cloned()
        };
        let Some(record) = record else {
            return Err(EngineError::NotFound(format!(
                "no retrieval recorded for query {query_id}"
            )));
        };

        let reward = feedback.reward();
        {
            let mut bandit = self
                .bandit
                .lock()
                .map_err(|_| EngineError::Init("Bandit lock poisoned".into()))?;
            bandit.update_reward(record.strategy, Some(&record.bucket), reward)?;
        }

        if !feedback.result_id.is_empty() {
            self.reranker
                .observe_feedback(query_id, &feedback.result_id, feedback.label())?;
        }
        Ok(())
    }

    // ========================================================================
    // MODEL SURFACE
    // ========================================================================

    pub fn bandit_stats(&self) -> Result<BanditStats> {
        let bandit = self
            .bandit
            .lock()
            .map_err(|_| EngineError::Init("Bandit lock poisoned".into()))?;
        Ok(bandit.stats())
    }

    pub fn export_bandit_model(&self) -> Result<BanditModel> {
        let bandit = self
            .bandit
            .lock()
            .map_err(|_| EngineError::Init("Bandit lock poisoned".into()))?;
        Ok(bandit.export_model())
    }

    pub fn import_bandit_model(&self, model: &BanditModel) -> Result<()> {
        let mut bandit = self
            .bandit
            .lock()
            .map_err(|_| EngineError::Init("Bandit lock poisoned".into()))?;
        bandit.import_model(model)
    }

    /// Persist the bandit model to the sidecar directory
    pub fn save_bandit_model(&self) -> Result<std::path::PathBuf> {
        let model = self.export_bandit_model()?;
        let dir = self.config.resolve_sidecar_dir()?;
        let path = dir.join("bandit-model.json");
        std::fs::write(&path, serde_json::to_vec_pretty(&model).unwrap_or_default())?;
        Ok(path)
    }

    /// Persist the re-ranker checkpoint to the sidecar directory
    pub fn save_ranker_checkpoint(&self) -> Result<std::path::PathBuf> {
        let dir = self.config.resolve_sidecar_dir()?;
        self.reranker.save_checkpoint(&dir)
    }

    /// Batch-extract features for external consumers
    pub fn extract_features(
        &self,
        query: &RetrievalQuery,
        entries: &[crate::model::Entry],
    ) -> Vec<FeatureVector> {
        self.extractor.extract_batch(
            query,
            entries,
            Utc::now(),
            Some(Duration::from_millis(
                self.config.performance.max_feature_extraction_time_ms,
            )),
        )
    }
}

/// Build the strategy → context reward map used by dashboards
pub fn strategy_rewards(stats: &BanditStats) -> HashMap<String, f64> {
    stats
        .arms
        .iter()
        .map(|(name, arm)| (name.clone(), arm.average_reward))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::index::IndexStore;
    use crate::model::Entry;

    fn retriever_with(config: EngineConfig) -> HybridRetriever {
        let store = Arc::new(IndexStore::open_in_memory(config.index.clone()).unwrap());
        let engine = Arc::new(SearchEngine::new(store, config.clone()));
        HybridRetriever::with_seed(engine, config, 42).unwrap()
    }

    fn seeded(config: EngineConfig) -> HybridRetriever {
        let retriever = retriever_with(config);
        let mut a = Entry::new(
            "a",
            "Authentication error handling",
            "Retry failed authentication with backoff",
        );
        a.metadata.tags = vec!["auth".into(), "errors".into()];
        a.metadata.project_id = Some("p1".into());
        let b = Entry::new("b", "Error logging", "Structured error logs");
        retriever.engine().store().insert(&[a, b]).unwrap();
        retriever
    }

    fn query(text: &str) -> RetrievalQuery {
        RetrievalQuery {
            search: SearchQuery::simple(text),
            context: QueryContext::default(),
        }
    }

    #[tokio::test]
    async fn test_single_mode_retrieval() {
        let retriever = seeded(EngineConfig::default());
        let result = retriever.retrieve(query("authentication error")).await.unwrap();

        assert_eq!(result.results.results[0].entry.id, "a");
        assert!(!result.retrieval_strategy.is_empty());
        assert!(!result.query_id.is_empty());
        assert_eq!(result.ranker_used, RankerUsed::Base);
        assert!(result.confidence_score > 0.0);
        assert!(result.timings.total_time_ms >= result.timings.ranking_time_ms);
    }

    #[tokio::test]
    async fn test_parallel_mode_fuses_strategies() {
        let config = EngineConfig {
            hybrid: crate::config::HybridConfig {
                default_mode: RetrievalMode::Parallel,
                fusion_algorithm: FusionAlgorithm::Rrf,
                ..Default::default()
            },
            ..Default::default()
        };
        let retriever = seeded(config);
        let result = retriever.retrieve(query("error")).await.unwrap();

        assert_eq!(result.ranker_used, RankerUsed::Hybrid);
        assert!(!result.results.results.is_empty());
        // Ranks are rewritten 1..N with non-increasing scores
        for (i, item) in result.results.results.iter().enumerate() {
            assert_eq!(item.rank, i + 1);
        }
    }

    #[tokio::test]
    async fn test_feedback_flows_into_bandit() {
        let retriever = seeded(EngineConfig::default());
        let result = retriever.retrieve(query("error")).await.unwrap();

        let feedback = UserFeedback {
            result_id: result.results.results[0].entry.id.clone(),
            clicked: true,
            used_in_solution: true,
            dwell_time_secs: 30.0,
            relevance_rating: Some(5),
            copied: false,
            bookmarked: false,
        };
        retriever.observe_feedback(&result.query_id, &feedback).unwrap();

        let stats = retriever.bandit_stats().unwrap();
        assert_eq!(stats.total_trials, 1);
        let arm = &stats.arms[&result.retrieval_strategy];
        assert!(arm.average_reward > 0.7);
    }

    #[tokio::test]
    async fn test_feedback_for_unknown_query_is_not_found() {
        let retriever = seeded(EngineConfig::default());
        let err = retriever
            .observe_feedback("missing", &UserFeedback::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_rerank_enabled_marks_ml() {
        let config = EngineConfig {
            rerank: crate::config::RerankConfig {
                enabled: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let retriever = seeded(config);
        let result = retriever.retrieve(query("error")).await.unwrap();
        assert_eq!(result.ranker_used, RankerUsed::Ml);
        assert!(result.adaptive_learning_active);
    }

    #[tokio::test]
    async fn test_project_context_boost() {
        let retriever = seeded(EngineConfig::default());
        let mut q = query("error");
        q.context.project_id = Some("p1".into());
        let result = retriever.retrieve(q).await.unwrap();
        // Entry a carries project p1 and gets the flat project boost
        assert_eq!(result.results.results[0].entry.id, "a");
    }

    #[tokio::test]
    async fn test_invalid_query_propagates() {
        let retriever = seeded(EngineConfig::default());
        let err = retriever.retrieve(query("")).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidQuery(_)));
    }

    #[test]
    fn test_plan_shaping_per_strategy() {
        let q = query("error");
        let semantic = HybridRetriever::build_plan(Strategy::SemanticFocused, &q);
        let weights = semantic.custom_weights.unwrap();
        assert!((weights.tags - 4.0).abs() < 1e-9);
        assert!((weights.category - 3.0).abs() < 1e-9);

        let recency = HybridRetriever::build_plan(Strategy::RecencyFocused, &q);
        assert!(recency.boost_recent);

        let fts = HybridRetriever::build_plan(Strategy::FtsHeavy, &q);
        assert!(!fts.boost_recent && !fts.boost_effective);
    }

    #[tokio::test]
    async fn test_bandit_model_round_trip_through_sidecar_surface() {
        let retriever = seeded(EngineConfig::default());
        let result = retriever.retrieve(query("error")).await.unwrap();
        retriever
            .observe_feedback(
                &result.query_id,
                &UserFeedback {
                    used_in_solution: true,
                    ..Default::default()
                },
            )
            .unwrap();

        let model = retriever.export_bandit_model().unwrap();
        assert_eq!(model.model_version, 1);
        retriever.import_bandit_model(&model).unwrap();
    }
}
