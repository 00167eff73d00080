//! Search and Retrieval Queries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entry::EntryType;

// ============================================================================
// QUERY TYPES
// ============================================================================

/// How the query string is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    /// Whitespace-split terms, AND semantics with relevance ranking
    #[default]
    Simple,
    /// Exact adjacent sequence
    Phrase,
    /// AND / OR / NOT with parentheses
    Boolean,
    /// Terms matched within an edit-distance budget
    Fuzzy,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Simple => "simple",
            QueryType::Phrase => "phrase",
            QueryType::Boolean => "boolean",
            QueryType::Fuzzy => "fuzzy",
        }
    }
}

/// Inclusive date range filter over `last_modified`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Structured filters applied after candidate selection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchFilters {
    /// Entry types to include
    pub types: Vec<EntryType>,
    /// Categories to include
    pub categories: Vec<String>,
    /// Tags; an entry matches if it carries any of them
    pub tags: Vec<String>,
    /// Project restriction
    pub project_id: Option<String>,
    /// Agent types; an entry matches if it shares any
    pub agent_types: Vec<String>,
    /// Modification date range
    pub date_range: Option<DateRange>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
            && self.categories.is_empty()
            && self.tags.is_empty()
            && self.project_id.is_none()
            && self.agent_types.is_empty()
            && self.date_range.is_none()
    }
}

// ============================================================================
// WEIGHTS
// ============================================================================

/// Field weights for the enhanced-relevance blend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchWeights {
    pub title: f64,
    pub content: f64,
    pub tags: f64,
    pub category: f64,
    pub recency: f64,
    pub effectiveness: f64,
}

impl Default for SearchWeights {
    fn default() -> Self {
        Self {
            title: 3.0,
            content: 1.0,
            tags: 2.0,
            category: 1.5,
            recency: 0.1,
            effectiveness: 0.2,
        }
    }
}

// ============================================================================
// SEARCH QUERY
// ============================================================================

/// A full-text search request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchQuery {
    /// Query text, 1..500 characters
    pub query: String,
    /// Structured filters
    pub filters: SearchFilters,
    /// Query-language interpretation
    pub query_type: QueryType,
    /// Page size; capped at the configured maximum
    pub limit: Option<usize>,
    /// Page offset in entries
    pub offset: usize,
    /// Emit content snippets
    pub include_snippets: bool,
    /// Wrap hits in `<mark>` markers
    pub highlight_results: bool,
    /// Snippet window override, in characters
    pub snippet_length: Option<usize>,
    /// Maximum snippets per result override
    pub max_snippets: Option<usize>,
    /// Boost recently modified entries
    pub boost_recent: bool,
    /// Boost entries with high observed effectiveness
    pub boost_effective: bool,
    /// Weight overrides for the enhanced-relevance blend
    pub custom_weights: Option<SearchWeights>,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            query: String::new(),
            filters: SearchFilters::default(),
            query_type: QueryType::Simple,
            limit: None,
            offset: 0,
            include_snippets: true,
            highlight_results: true,
            snippet_length: None,
            max_snippets: None,
            boost_recent: false,
            boost_effective: false,
            custom_weights: None,
        }
    }
}

impl SearchQuery {
    /// Build a simple query over the given text
    pub fn simple(text: impl Into<String>) -> Self {
        Self {
            query: text.into(),
            ..Default::default()
        }
    }
}

// ============================================================================
// RETRIEVAL QUERY & CONTEXT
// ============================================================================

/// Structured context accompanying a retrieval query; also the source of the
/// bandit context bucket
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryContext {
    /// Active project
    pub project_id: Option<String>,
    /// Requesting agent roles
    pub agent_types: Vec<String>,
    /// Requesting agent expertise: "low" | "medium" | "high"
    pub expertise_level: Option<String>,
    /// Labels on the issue currently being worked
    pub issue_labels: Vec<String>,
    /// Title of the issue currently being worked
    pub issue_title: Option<String>,
    /// Current task phase label
    pub task_phase: Option<String>,
    /// Urgency label ("critical", "urgent", ...)
    pub urgency: Option<String>,
    /// Preferred programming languages
    pub preferred_languages: Vec<String>,
    /// Recent queries in this session, oldest first
    pub session_history: Vec<String>,
    /// Active repository flag
    pub repository_active: bool,
    /// Current branch name
    pub branch: Option<String>,
}

impl QueryContext {
    /// Canonical bucket key: sorted agent types + project + sorted issue
    /// labels + working-hours flag
    pub fn bucket_key(&self, now: DateTime<Utc>) -> String {
        use chrono::Timelike;

        let mut agents = self.agent_types.clone();
        agents.sort();
        let mut labels = self.issue_labels.clone();
        labels.sort();
        let hour = now.hour();
        let working_hours = (9..18).contains(&hour);
        format!(
            "{}|{}|{}|{}",
            agents.join(","),
            self.project_id.as_deref().unwrap_or(""),
            labels.join(","),
            working_hours
        )
    }
}

/// A retrieval request: a search query plus structured context
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrievalQuery {
    #[serde(flatten)]
    pub search: SearchQuery,
    pub context: QueryContext,
}

// ============================================================================
// USER FEEDBACK
// ============================================================================

/// Observed user behaviour on a returned result, mapped to a scalar reward
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserFeedback {
    /// Result the feedback refers to
    pub result_id: String,
    pub clicked: bool,
    pub used_in_solution: bool,
    /// Seconds the user dwelled on the result
    pub dwell_time_secs: f64,
    /// Explicit rating 0..=5
    pub relevance_rating: Option<u8>,
    pub copied: bool,
    pub bookmarked: bool,
}

impl UserFeedback {
    /// Map feedback to a reward in [0,1]:
    /// 0.2·clicked + 0.3·used + 0.2·dwell/20s + 0.1·rating/5 + 0.1·copied + 0.1·bookmarked
    pub fn reward(&self) -> f64 {
        let mut r = 0.0;
        if self.clicked {
            r += 0.2;
        }
        if self.used_in_solution {
            r += 0.3;
        }
        r += 0.2 * (self.dwell_time_secs / 20.0).clamp(0.0, 1.0);
        if let Some(rating) = self.relevance_rating {
            r += 0.1 * (f64::from(rating.min(5)) / 5.0);
        }
        if self.copied {
            r += 0.1;
        }
        if self.bookmarked {
            r += 0.1;
        }
        r.clamp(0.0, 1.0)
    }

    /// Binary relevance label for the online re-ranker
    pub fn label(&self) -> u8 {
        if self.used_in_solution || self.relevance_rating.map_or(false, |r| r >= 4) {
            1
        } else {
            0
        }
    }
}
