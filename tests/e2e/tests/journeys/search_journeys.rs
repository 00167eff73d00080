//! Search journeys: ranking, query languages, facets, snippets, similarity
//! and the analytics surface, end to end over a real database file.

use kenning_e2e_tests::{entry, knowledge_corpus, TestEngine};
use kenning_core::{QueryType, SearchQuery};

#[test]
fn basic_ranking_puts_the_double_match_first() {
    let harness = TestEngine::new();
    harness.seed(&knowledge_corpus());

    let results = harness
        .engine
        .search(&SearchQuery::simple("authentication error"))
        .unwrap();

    assert_eq!(results.results[0].entry.id, "auth-errors");
    for pair in results.results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[test]
fn phrase_search_requires_adjacency() {
    let harness = TestEngine::new();
    harness.seed(&knowledge_corpus());

    let mut query = SearchQuery::simple("\"database connection timeout\"");
    query.query_type = QueryType::Phrase;
    let results = harness.engine.search(&query).unwrap();
    assert_eq!(results.total_matches, 1);
    assert_eq!(results.results[0].entry.id, "db-timeout");

    let mut rearranged = SearchQuery::simple("\"timeout connection database\"");
    rearranged.query_type = QueryType::Phrase;
    let results = harness.engine.search(&rearranged).unwrap();
    assert_eq!(results.total_matches, 0);
}

#[test]
fn boolean_search_honours_operators() {
    let harness = TestEngine::new();
    harness.seed(&[
        entry("login-kb", "Login walkthrough", "authentication via login form", &["auth", "login"]),
        entry("signin-kb", "Signin walkthrough", "authentication via signin token", &["auth", "signin"]),
    ]);

    let mut both = SearchQuery::simple("authentication AND (login OR signin)");
    both.query_type = QueryType::Boolean;
    assert_eq!(harness.engine.search(&both).unwrap().total_matches, 2);

    let mut excluded = SearchQuery::simple("authentication AND NOT login");
    excluded.query_type = QueryType::Boolean;
    let results = harness.engine.search(&excluded).unwrap();
    assert_eq!(results.total_matches, 1);
    assert_eq!(results.results[0].entry.id, "signin-kb");
}

#[test]
fn fuzzy_search_recovers_misspellings() {
    let harness = TestEngine::new();
    harness.seed(&knowledge_corpus());

    let mut query = SearchQuery::simple("databse timeout");
    query.query_type = QueryType::Fuzzy;
    let results = harness.engine.search(&query).unwrap();
    assert!(results
        .results
        .iter()
        .any(|r| r.entry.id == "db-timeout"));
}

#[test]
fn facets_count_the_whole_match_set() {
    let harness = TestEngine::new();
    harness.seed(&knowledge_corpus());

    let results = harness.engine.search(&SearchQuery::simple("errors")).unwrap();

    // Corpus has matching entries across 3 types
    assert_eq!(results.facets.types.len(), 3);
    assert!(results.facets.tags[0].count >= 1);
    let facet_total: usize = results.facets.types.iter().map(|b| b.count).sum();
    assert_eq!(facet_total, results.total_matches);
}

#[test]
fn snippets_highlight_hits_with_offsets() {
    let harness = TestEngine::new();
    harness.seed(&knowledge_corpus());

    let results = harness.engine.search(&SearchQuery::simple("backoff")).unwrap();
    let top = &results.results[0];
    let snippet = &top.content_snippets[0];
    assert!(snippet.highlighted.contains("<mark>backoff</mark>"));
    let entry_content = &top.entry.content;
    assert_eq!(&entry_content[snippet.start..snippet.end], snippet.text);
}

#[test]
fn similar_entries_share_vocabulary() {
    let harness = TestEngine::new();
    harness.seed(&knowledge_corpus());

    let results = harness.engine.search_similar("auth-errors", 3).unwrap();
    assert!(results.results.iter().all(|r| r.entry.id != "auth-errors"));
    assert!(results
        .results
        .iter()
        .any(|r| r.entry.id == "error-logging" || r.entry.id == "db-timeout"));
}

#[test]
fn suggestions_surface_popular_prefixes() {
    let harness = TestEngine::new();
    harness.seed(&knowledge_corpus());

    for _ in 0..3 {
        harness
            .engine
            .search(&SearchQuery::simple("database timeouts"))
            .unwrap();
    }
    let suggestions = harness.engine.get_suggestions("data", 10);
    assert!(suggestions.iter().any(|s| s.starts_with("database")));
}

#[test]
fn analytics_track_queries_and_cache() {
    let harness = TestEngine::new();
    harness.seed(&knowledge_corpus());

    let query = SearchQuery::simple("errors");
    harness.engine.search(&query).unwrap();
    harness.engine.search(&query).unwrap(); // cache hit

    let analytics = harness.engine.get_analytics(None, None);
    assert_eq!(analytics.total_queries, 2);
    assert_eq!(analytics.unique_queries, 1);
    assert_eq!(analytics.cache_metrics.total_hits, 1);
    assert!(analytics.average_results > 0.0);

    harness.engine.record_click("auth-errors").unwrap();
    let analytics = harness.engine.get_analytics(None, None);
    assert!(analytics.click_through_rate > 0.0);
}

#[test]
fn analytics_snapshot_lands_in_sidecar() {
    let harness = TestEngine::new();
    harness.seed(&knowledge_corpus());
    harness.engine.search(&SearchQuery::simple("errors")).unwrap();

    let path = harness.engine.snapshot_analytics().unwrap();
    let text = std::fs::read_to_string(path).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(doc["modelVersion"], 1);
    assert!(doc["analytics"]["totalQueries"].as_u64().unwrap() >= 1);
}
