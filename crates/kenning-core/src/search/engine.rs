//! Search Engine
//!
//! Enforces query contracts, executes against the index store, enhances raw
//! BM25 hits with relevance factors, presents snippets/facets/suggestions,
//! and records analytics.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::index::{query_terms, FtsHit, IndexStore};
use crate::model::{
    MatchedField, QueryType, RelevanceFactors, SearchQuery, SearchResultItem, SearchResults,
    SearchWeights,
};

use super::analytics::{QueryAnalytics, SearchAnalytics};
use super::cache::ResultCache;
use super::facets::build_facets;
use super::snippet::{count_matches, extract_snippets, find_all_ci, title_snippet};
use super::suggest::build_suggestions;

/// Maximum query text length
const MAX_QUERY_CHARS: usize = 500;

/// Keywords used to build a similarity query
const SIMILAR_KEYWORDS: usize = 10;

/// Words too common to describe an entry
const STOP_WORDS: &[&str] = &[
    "about", "after", "also", "been", "before", "being", "between", "both", "could", "does",
    "doing", "each", "from", "have", "having", "here", "into", "more", "most", "other", "over",
    "same", "should", "some", "such", "than", "that", "their", "them", "then", "there", "these",
    "they", "this", "those", "under", "very", "were", "what", "when", "where", "which", "while",
    "will", "with", "would", "your",
];

// ============================================================================
// ENGINE
// ============================================================================

/// Query-surface entry point over one index store
pub struct SearchEngine {
    store: Arc<IndexStore>,
    cache: ResultCache,
    analytics: QueryAnalytics,
    config: EngineConfig,
}

impl SearchEngine {
    pub fn new(store: Arc<IndexStore>, config: EngineConfig) -> Self {
        let cache = ResultCache::new(&config.performance);
        let analytics = QueryAnalytics::new(config.analytics.clone());
        Self {
            store,
            cache,
            analytics,
            config,
        }
    }

    pub fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    /// Drop every cached response. Called after any successful write.
    pub fn invalidate_cache(&self) {
        self.cache.invalidate_all();
    }

    // ========================================================================
    // SEARCH
    // ========================================================================

    /// Execute a search query end to end
    pub fn search(&self, query: &SearchQuery) -> Result<SearchResults> {
        self.validate(query)?;
        let started = Instant::now();

        let cache_key = ResultCache::key(query);
        if let Some(cached) = self.cache.get(&cache_key) {
            self.analytics.record_query(
                &query.query,
                cached.results.len(),
                started.elapsed().as_millis() as u64,
                true,
            );
            return Ok(cached);
        }

        let limit = query
            .limit
            .unwrap_or(self.config.index.default_limit)
            .max(1);

        let page = match self.store.search_fts(
            &query.query,
            query.query_type,
            &query.filters,
            limit,
            query.offset,
        ) {
            Ok(p) => p,
            Err(e) => {
                self.analytics.record_failure(&query.query);
                return Err(e);
            }
        };

        let terms = query_terms(&query.query);
        let weights = query
            .custom_weights
            .clone()
            .unwrap_or_default();
        let now = Utc::now();

        let mut items: Vec<SearchResultItem> = page
            .hits
            .into_iter()
            .map(|hit| self.build_item(hit, query, &terms, &weights, now))
            .collect();

        // Enhanced scores re-order within the page; ties stay stable by id
        items.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.entry.id.cmp(&b.entry.id))
        });
        for (i, item) in items.iter_mut().enumerate() {
            item.rank = i + 1;
        }

        let facet_sources =
            self.store
                .facet_sources(&query.query, query.query_type, &query.filters)?;
        let facets = build_facets(&facet_sources, &query.filters);

        let suggestions = build_suggestions(
            &query.query,
            &self.analytics.popular_queries(50),
            super::suggest::MAX_SUGGESTIONS,
        );

        let execution_time_ms = started.elapsed().as_millis() as u64;
        let results = SearchResults {
            results: items,
            total_matches: page.total_matches,
            total_pages: page.total_matches.div_ceil(limit),
            current_page: query.offset / limit + 1,
            execution_time_ms,
            facets,
            suggestions,
        };

        self.analytics
            .record_query(&query.query, results.results.len(), execution_time_ms, false);
        self.cache.put(cache_key, &results);

        Ok(results)
    }

    fn validate(&self, query: &SearchQuery) -> Result<()> {
        let trimmed = query.query.trim();
        if trimmed.is_empty() {
            return Err(EngineError::InvalidQuery("query text is empty".into()));
        }
        if trimmed.chars().count() > MAX_QUERY_CHARS {
            return Err(EngineError::InvalidQuery(format!(
                "query exceeds {MAX_QUERY_CHARS} characters"
            )));
        }
        if let Some(limit) = query.limit {
            if limit > self.config.index.max_limit {
                return Err(EngineError::InvalidQuery(format!(
                    "limit {} exceeds maximum {}",
                    limit, self.config.index.max_limit
                )));
            }
            if limit == 0 {
                return Err(EngineError::InvalidQuery("limit must be positive".into()));
            }
        }
        Ok(())
    }

    fn build_item(
        &self,
        hit: FtsHit,
        query: &SearchQuery,
        terms: &[String],
        weights: &SearchWeights,
        now: DateTime<Utc>,
    ) -> SearchResultItem {
        let entry = hit.entry;
        let factors = self.relevance_factors(&entry, query, terms, now);

        let score = hit.score
            + weights.title * factors.title_match
            + weights.content * factors.content_match
            + weights.tags * factors.tag_match
            + weights.category * factors.category_match
            + weights.recency * factors.recency_boost
            + weights.effectiveness * factors.effectiveness_boost
            + factors.usage_boost;

        let mut matched_fields = Vec::new();
        if count_matches(&entry.title, terms) > 0 {
            matched_fields.push(MatchedField::Title);
        }
        if count_matches(&entry.content, terms) > 0 {
            matched_fields.push(MatchedField::Content);
        }
        if entry
            .metadata
            .tags
            .iter()
            .any(|t| terms.iter().any(|w| t.to_lowercase().contains(w)))
        {
            matched_fields.push(MatchedField::Tags);
        }
        if entry
            .category
            .as_deref()
            .map_or(false, |c| terms.iter().any(|w| c.to_lowercase().contains(w)))
        {
            matched_fields.push(MatchedField::Category);
        }

        let snippet_length = query
            .snippet_length
            .unwrap_or(self.config.index.snippet_length);
        let max_snippets = query.max_snippets.unwrap_or(self.config.index.max_snippets);

        let content_snippets = if query.include_snippets {
            extract_snippets(&entry.content, terms, snippet_length, max_snippets)
        } else {
            Vec::new()
        };
        let title_snip = if query.highlight_results {
            title_snippet(&entry.title, terms)
        } else {
            None
        };

        let total_matches =
            count_matches(&entry.title, terms) + count_matches(&entry.content, terms);

        SearchResultItem {
            entry,
            score,
            rank: 0,
            matched_fields,
            title_snippet: title_snip,
            content_snippets,
            relevance_factors: factors,
            total_matches,
        }
    }

    fn relevance_factors(
        &self,
        entry: &crate::model::Entry,
        query: &SearchQuery,
        terms: &[String],
        now: DateTime<Utc>,
    ) -> RelevanceFactors {
        let title_match = self.field_match(&entry.title, &query.query, terms);
        let content_match = self.field_match(&entry.content, &query.query, terms);

        let tag_match = if entry.metadata.tags.is_empty() {
            0.0
        } else {
            let matching = entry
                .metadata
                .tags
                .iter()
                .filter(|t| {
                    let tl = t.to_lowercase();
                    terms.iter().any(|w| tl.contains(w))
                })
                .count();
            matching as f64 / entry.metadata.tags.len() as f64
        };

        let category_match = entry.category.as_deref().map_or(0.0, |c| {
            if query.query.to_lowercase().contains(&c.to_lowercase()) {
                1.0
            } else {
                0.0
            }
        });

        let recency_boost = if query.boost_recent {
            (-entry.days_since_modified(now) / 30.0).exp()
        } else {
            0.0
        };
        let effectiveness_boost = if query.boost_effective {
            entry.metadata.effectiveness.unwrap_or(0.0)
        } else {
            0.0
        };
        let usage_boost = ((entry.metadata.usage_count as f64) + 1.0).ln() / 10.0;

        RelevanceFactors {
            title_match,
            content_match,
            tag_match,
            category_match,
            recency_boost,
            effectiveness_boost,
            usage_boost,
        }
    }

    /// 1.0 on a whole-query substring hit, else matched-word fraction
    fn field_match(&self, field: &str, full_query: &str, terms: &[String]) -> f64 {
        if terms.is_empty() {
            return 0.0;
        }
        let substring_hit = if self.config.index.case_sensitive {
            field.contains(full_query.trim())
        } else {
            !find_all_ci(field, full_query.trim()).is_empty()
        };
        if substring_hit {
            return 1.0;
        }
        let matched = terms
            .iter()
            .filter(|t| !find_all_ci(field, t).is_empty())
            .count();
        matched as f64 / terms.len() as f64
    }

    // ========================================================================
    // SIMILARITY
    // ========================================================================

    /// Find entries similar to an existing one: top keywords from
    /// title+content, OR-combined, seed removed from results
    pub fn search_similar(&self, entry_id: &str, limit: usize) -> Result<SearchResults> {
        let seed = self
            .store
            .get(entry_id)?
            .ok_or_else(|| EngineError::NotFound(entry_id.to_string()))?;

        let text = format!("{} {}", seed.title, seed.content);
        let mut freq: HashMap<String, usize> = HashMap::new();
        for word in query_terms(&text) {
            if word.chars().count() >= 4 && !STOP_WORDS.contains(&word.as_str()) {
                *freq.entry(word).or_default() += 1;
            }
        }
        let mut ranked: Vec<(String, usize)> = freq.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let keywords: Vec<String> = ranked
            .into_iter()
            .take(SIMILAR_KEYWORDS)
            .map(|(w, _)| w)
            .collect();

        if keywords.is_empty() {
            return Ok(SearchResults::default());
        }

        let query = SearchQuery {
            query: keywords.join(" OR "),
            query_type: QueryType::Boolean,
            limit: Some((limit + 1).min(self.config.index.max_limit)),
            ..Default::default()
        };

        let mut results = self.search(&query)?;
        results.results.retain(|r| r.entry.id != entry_id);
        results.results.truncate(limit);
        for (i, item) in results.results.iter_mut().enumerate() {
            item.rank = i + 1;
        }
        Ok(results)
    }

    // ========================================================================
    // ANALYTICS SURFACE
    // ========================================================================

    /// Suggestions for a prefix
    pub fn get_suggestions(&self, prefix: &str, limit: usize) -> Vec<String> {
        build_suggestions(prefix, &self.analytics.popular_queries(50), limit)
    }

    /// Most frequent prior queries
    pub fn get_popular_queries(&self, limit: usize) -> Vec<String> {
        self.analytics.popular_queries(limit)
    }

    /// Externally-observed query execution (ingest surface for callers that
    /// ran their own searches)
    pub fn record_query(&self, query: &str, result_count: usize, response_ms: u64) {
        self.analytics
            .record_query(query, result_count, response_ms, false);
    }

    /// Record a click on a result; bumps the entry's usage counters
    pub fn record_click(&self, entry_id: &str) -> Result<()> {
        self.analytics.record_click();
        if let Some(mut entry) = self.store.get(entry_id)? {
            entry.metadata.usage_count += 1;
            entry.metadata.last_used = Some(Utc::now());
            self.store.update(std::slice::from_ref(&entry))?;
            self.cache.invalidate_all();
        }
        Ok(())
    }

    /// Aggregate analytics over an observation window
    pub fn get_analytics(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> SearchAnalytics {
        self.analytics.analytics(from, to, self.cache.metrics())
    }

    /// Write an analytics snapshot to the sidecar directory
    pub fn snapshot_analytics(&self) -> Result<std::path::PathBuf> {
        let dir = self.config.resolve_sidecar_dir()?;
        self.analytics.snapshot(&dir, self.cache.metrics())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::model::Entry;

    fn engine() -> SearchEngine {
        let config = EngineConfig {
            index: IndexConfig::default(),
            ..Default::default()
        };
        let store = Arc::new(IndexStore::open_in_memory(config.index.clone()).unwrap());
        SearchEngine::new(store, config)
    }

    fn seeded_engine() -> SearchEngine {
        let engine = engine();
        let mut a = Entry::new(
            "a",
            "Authentication Error Handling",
            "How to retry failed authentication attempts with exponential backoff",
        );
        a.metadata.tags = vec!["auth".into(), "errors".into()];
        a.category = Some("security".into());
        let b = Entry::new(
            "b",
            "Error Logging",
            "Structured logging of application errors",
        );
        let c = Entry::new("c", "User Interface", "Component layout guidance");
        engine.store.insert(&[a, b, c]).unwrap();
        engine
    }

    #[test]
    fn test_basic_ranking_scenario() {
        let engine = seeded_engine();
        let results = engine
            .search(&SearchQuery::simple("authentication error"))
            .unwrap();

        assert_eq!(results.results[0].entry.id, "a");
        for pair in results.results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        assert_eq!(results.results[0].rank, 1);
    }

    #[test]
    fn test_validation_rejects_bad_queries() {
        let engine = engine();
        assert!(matches!(
            engine.search(&SearchQuery::simple("")),
            Err(EngineError::InvalidQuery(_))
        ));
        assert!(matches!(
            engine.search(&SearchQuery::simple("x".repeat(501))),
            Err(EngineError::InvalidQuery(_))
        ));
        let mut q = SearchQuery::simple("ok");
        q.limit = Some(1001);
        assert!(matches!(engine.search(&q), Err(EngineError::InvalidQuery(_))));
    }

    #[test]
    fn test_relevance_factors_populated() {
        let engine = seeded_engine();
        let mut q = SearchQuery::simple("authentication");
        q.boost_recent = true;
        let results = engine.search(&q).unwrap();
        let top = &results.results[0];
        assert!((top.relevance_factors.title_match - 1.0).abs() < 1e-9);
        assert!(top.relevance_factors.recency_boost > 0.9); // just modified
        assert!(top.matched_fields.contains(&MatchedField::Title));
    }

    #[test]
    fn test_snippets_and_highlighting() {
        let engine = seeded_engine();
        let results = engine.search(&SearchQuery::simple("backoff")).unwrap();
        let top = &results.results[0];
        assert!(!top.content_snippets.is_empty());
        assert!(top.content_snippets[0]
            .highlighted
            .contains("<mark>backoff</mark>"));
    }

    #[test]
    fn test_cache_hit_and_invalidation() {
        let engine = seeded_engine();
        let q = SearchQuery::simple("error");
        engine.search(&q).unwrap();
        engine.search(&q).unwrap();
        let analytics = engine.get_analytics(None, None);
        assert_eq!(analytics.cache_metrics.total_hits, 1);

        // A write invalidates; the next search misses and sees fresh data
        let mut updated = Entry::new("b", "Error Logging v2", "new content about errors");
        updated.metadata.tags = vec!["logging".into()];
        engine.store.update(std::slice::from_ref(&updated)).unwrap();
        engine.invalidate_cache();

        let results = engine.search(&q).unwrap();
        let b = results
            .results
            .iter()
            .find(|r| r.entry.id == "b")
            .unwrap();
        assert_eq!(b.entry.title, "Error Logging v2");
    }

    #[test]
    fn test_facets_over_match_set() {
        let engine = seeded_engine();
        let results = engine.search(&SearchQuery::simple("error")).unwrap();
        assert!(!results.facets.types.is_empty());
        let tag_total: usize = results.facets.tags.iter().map(|b| b.count).sum();
        assert!(tag_total >= 1);
    }

    #[test]
    fn test_empty_results_still_carry_suggestions() {
        let engine = seeded_engine();
        engine.record_query("zzz unknown topic", 0, 5);
        let results = engine
            .search(&SearchQuery::simple("zzz unknown"))
            .unwrap();
        assert!(results.results.is_empty());
        // Prefix suggestion from prior analytics
        assert!(results
            .suggestions
            .iter()
            .any(|s| s == "zzz unknown topic"));
    }

    #[test]
    fn test_search_similar_excludes_seed() {
        let engine = engine();
        let a = Entry::new(
            "a",
            "Database connection pooling",
            "Pooling database connections avoids connection churn under load",
        );
        let b = Entry::new(
            "b",
            "Connection pool sizing",
            "Choosing database connection pool sizes for stable throughput",
        );
        let c = Entry::new("c", "CSS layout", "Flexbox column guidance");
        engine.store.insert(&[a, b, c]).unwrap();

        let results = engine.search_similar("a", 5).unwrap();
        assert!(results.results.iter().all(|r| r.entry.id != "a"));
        assert!(results.results.iter().any(|r| r.entry.id == "b"));
        assert!(results.results.iter().all(|r| r.entry.id != "c"));
    }

    #[test]
    fn test_search_similar_unknown_id() {
        let engine = engine();
        assert!(matches!(
            engine.search_similar("ghost", 5),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_record_click_bumps_usage() {
        let engine = seeded_engine();
        engine.record_click("a").unwrap();
        let entry = engine.store.get("a").unwrap().unwrap();
        assert_eq!(entry.metadata.usage_count, 1);
        assert!(entry.metadata.last_used.is_some());
    }

    #[test]
    fn test_custom_weights_shift_ranking() {
        let engine = engine();
        let mut tagged = Entry::new("t", "Misc notes", "unrelated body copy");
        tagged.metadata.tags = vec!["error".into()];
        let titled = Entry::new("u", "Error digest", "error error error error error");
        engine.store.insert(&[tagged, titled]).unwrap();

        let mut q = SearchQuery::simple("error");
        q.custom_weights = Some(SearchWeights {
            tags: 50.0,
            ..Default::default()
        });
        let results = engine.search(&q).unwrap();
        assert_eq!(results.results[0].entry.id, "t");
    }

    #[test]
    fn test_pagination_bookkeeping() {
        let engine = engine();
        let entries: Vec<Entry> = (0..25)
            .map(|i| Entry::new(format!("e{i:02}"), format!("Item {i}"), "shared token"))
            .collect();
        engine.store.insert(&entries).unwrap();

        let mut q = SearchQuery::simple("shared");
        q.limit = Some(10);
        q.offset = 20;
        let results = engine.search(&q).unwrap();
        assert_eq!(results.total_matches, 25);
        assert_eq!(results.total_pages, 3);
        assert_eq!(results.current_page, 3);
        assert_eq!(results.results.len(), 5);
    }
}
