//! Search and Retrieval Results

use serde::{Deserialize, Serialize};

use super::entry::Entry;

// ============================================================================
// SNIPPETS & RELEVANCE
// ============================================================================

/// A short excerpt of content surrounding a match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snippet {
    /// Raw excerpt text
    pub text: String,
    /// Excerpt with query terms wrapped in `<mark>…</mark>`
    pub highlighted: String,
    /// Byte offset of the excerpt start in the source field
    pub start: usize,
    /// Byte offset of the excerpt end in the source field
    pub end: usize,
    /// ±50 characters of surrounding context
    pub context: String,
}

/// Named sub-scores contributing to the enhanced relevance of a result.
/// All values are in [0,1] unless noted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelevanceFactors {
    /// 1.0 on a title substring hit, else matched-word fraction
    pub title_match: f64,
    /// Same rule applied to content
    pub content_match: f64,
    /// Fraction of tags containing any query word
    pub tag_match: f64,
    /// 1.0 when the query contains the category
    pub category_match: f64,
    /// exp(−daysSinceModified/30) when recency boosting is on
    pub recency_boost: f64,
    /// Entry effectiveness when effectiveness boosting is on
    pub effectiveness_boost: f64,
    /// log(usageCount+1)/10 — may exceed 1 for heavily used entries
    pub usage_boost: f64,
}

/// Fields of an entry that matched the query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchedField {
    Title,
    Content,
    Tags,
    Category,
}

// ============================================================================
// RESULT ITEMS
// ============================================================================

/// One ranked entry in a result set
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultItem {
    /// The matched entry, metadata verbatim
    pub entry: Entry,
    /// Enhanced relevance score
    pub score: f64,
    /// 1-based rank, strictly monotonic with non-increasing score
    pub rank: usize,
    /// Fields containing at least one query word
    pub matched_fields: Vec<MatchedField>,
    /// Highlighted title, when highlighting is on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_snippet: Option<String>,
    /// Content excerpts around matches
    pub content_snippets: Vec<Snippet>,
    /// Named sub-scores
    pub relevance_factors: RelevanceFactors,
    /// Total query-term matches within this entry
    pub total_matches: usize,
}

// ============================================================================
// FACETS
// ============================================================================

/// One value bucket within a facet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacetBucket {
    pub value: String,
    /// Count over the raw (pre-page) match set
    pub count: usize,
    /// True when the current filters select this value
    pub selected: bool,
}

/// Grouped counts of metadata values within the current match set,
/// top-20 per facet
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFacets {
    pub types: Vec<FacetBucket>,
    pub categories: Vec<FacetBucket>,
    pub tags: Vec<FacetBucket>,
    pub projects: Vec<FacetBucket>,
    pub agents: Vec<FacetBucket>,
    pub languages: Vec<FacetBucket>,
}

// ============================================================================
// RESULT SETS
// ============================================================================

/// A ranked search response
#[non_exhaustive]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    pub results: Vec<SearchResultItem>,
    /// Matches across the whole corpus, not just this page
    pub total_matches: usize,
    pub total_pages: usize,
    /// 1-based page index
    pub current_page: usize,
    /// Search execution time in milliseconds
    pub execution_time_ms: u64,
    pub facets: SearchFacets,
    /// Up to 10 query suggestions; populated even for empty result sets
    pub suggestions: Vec<String>,
}

impl Default for SearchResultItem {
    fn default() -> Self {
        Self {
            entry: Entry::new("", "", ""),
            score: 0.0,
            rank: 0,
            matched_fields: Vec::new(),
            title_snippet: None,
            content_snippets: Vec::new(),
            relevance_factors: RelevanceFactors::default(),
            total_matches: 0,
        }
    }
}

// ============================================================================
// RETRIEVAL RESULTS
// ============================================================================

/// Which ranking path produced the final ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RankerUsed {
    /// Enhanced FTS scoring only
    #[default]
    Base,
    /// Online logistic re-ranker
    Ml,
    /// Fusion of multiple strategies plus re-ranking
    Hybrid,
}

/// Per-stage timings of a retrieval
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalTimings {
    pub search_time_ms: u64,
    pub feature_extraction_time_ms: u64,
    pub ranking_time_ms: u64,
    pub total_ml_time_ms: u64,
    pub total_time_ms: u64,
}

/// A retrieval response: search results plus learning metadata
#[non_exhaustive]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalResult {
    #[serde(flatten)]
    pub results: SearchResults,
    /// Correlates later feedback with this retrieval
    pub query_id: String,
    /// Strategy the bandit executed (the surviving arm in parallel mode)
    pub retrieval_strategy: String,
    /// Post-fusion confidence in [0,1]
    pub confidence_score: f64,
    pub ranker_used: RankerUsed,
    /// True when the bandit explored rather than exploited
    pub exploration_performed: bool,
    /// True when feedback-driven learning is active
    pub adaptive_learning_active: bool,
    pub timings: RetrievalTimings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_serialize_camel_case() {
        let results = SearchResults {
            total_matches: 3,
            execution_time_ms: 12,
            ..Default::default()
        };
        let json = serde_json::to_string(&results).unwrap();
        assert!(json.contains("totalMatches"));
        assert!(json.contains("executionTimeMs"));
    }

    #[test]
    fn test_retrieval_result_flattens_search_results() {
        let r = RetrievalResult {
            retrieval_strategy: "fts-heavy".into(),
            ..Default::default()
        };
        let json = serde_json::to_string(&r).unwrap();
        // Flattened: results array at top level, not nested under "results.results"
        assert!(json.contains("\"results\":[]"));
        assert!(json.contains("\"retrievalStrategy\":\"fts-heavy\""));
    }
}
