//! Facet Aggregation
//!
//! Groups metadata values over the raw (pre-page) match set. Each facet
//! keeps its top-20 buckets by count; buckets matching the active filters
//! are flagged `selected`.

use std::collections::HashMap;

use crate::index::FacetSource;
use crate::model::{FacetBucket, SearchFacets, SearchFilters};

/// Buckets kept per facet
const TOP_BUCKETS: usize = 20;

fn top_buckets(counts: HashMap<String, usize>, selected: &[String]) -> Vec<FacetBucket> {
    let mut buckets: Vec<FacetBucket> = counts
        .into_iter()
        .map(|(value, count)| FacetBucket {
            selected: selected.iter().any(|s| s.eq_ignore_ascii_case(&value)),
            value,
            count,
        })
        .collect();
    // Count desc, then value asc for a stable presentation order
    buckets.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
    buckets.truncate(TOP_BUCKETS);
    buckets
}

/// Aggregate facet sources into the response facets
pub fn build_facets(sources: &[FacetSource], filters: &SearchFilters) -> SearchFacets {
    let mut types: HashMap<String, usize> = HashMap::new();
    let mut categories: HashMap<String, usize> = HashMap::new();
    let mut tags: HashMap<String, usize> = HashMap::new();
    let mut projects: HashMap<String, usize> = HashMap::new();
    let mut agents: HashMap<String, usize> = HashMap::new();
    let mut languages: HashMap<String, usize> = HashMap::new();

    for src in sources {
        *types.entry(src.entry_type.clone()).or_default() += 1;
        if let Some(c) = &src.category {
            *categories.entry(c.clone()).or_default() += 1;
        }
        for tag in &src.tags {
            *tags.entry(tag.clone()).or_default() += 1;
        }
        if let Some(p) = &src.project_id {
            *projects.entry(p.clone()).or_default() += 1;
        }
        for agent in &src.agent_types {
            *agents.entry(agent.clone()).or_default() += 1;
        }
        if let Some(l) = &src.language {
            *languages.entry(l.clone()).or_default() += 1;
        }
    }

    let selected_types: Vec<String> = filters.types.iter().map(|t| t.as_str().to_string()).collect();
    let selected_project: Vec<String> = filters.project_id.iter().cloned().collect();

    SearchFacets {
        types: top_buckets(types, &selected_types),
        categories: top_buckets(categories, &filters.categories),
        tags: top_buckets(tags, &filters.tags),
        projects: top_buckets(projects, &selected_project),
        agents: top_buckets(agents, &filters.agent_types),
        languages: top_buckets(languages, &[]),
    }
}
