//! Search Engine
//!
//! Query validation, execution against the index store, relevance
//! enhancement, snippet/highlight generation, facets, suggestions, result
//! caching, and query analytics.

mod analytics;
mod cache;
mod engine;
mod facets;
mod snippet;
mod suggest;

pub use analytics::{QueryAnalytics, QueryStat, SearchAnalytics, SlowQuery};
pub use cache::{CacheMetrics, ResultCache};
pub use engine::SearchEngine;
pub use facets::build_facets;
pub use snippet::{count_matches, extract_snippets, find_all_ci, highlight, title_snippet};
pub use suggest::{build_suggestions, MAX_SUGGESTIONS};
