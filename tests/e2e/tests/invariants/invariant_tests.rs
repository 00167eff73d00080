//! The quantified engine contracts: idempotence, delete totality, rank
//! monotonicity, pagination completeness, cache consistency, bandit bounds,
//! feature totality and fusion unity.

use std::collections::HashSet;

use chrono::Utc;
use kenning_e2e_tests::{entry, knowledge_corpus, TestEngine};
use kenning_core::{
    Bandit, BanditConfig, Entry, FeatureConfig, FeatureExtractor, QueryContext, RetrievalQuery,
    SearchQuery, Strategy,
};

#[test]
fn insert_is_idempotent_upsert() {
    let harness = TestEngine::new();
    let e = entry("dup", "Original title", "original content body", &["one"]);
    harness.seed(std::slice::from_ref(&e));
    harness.seed(std::slice::from_ref(&e));

    let results = harness.engine.search(&SearchQuery::simple("original")).unwrap();
    assert_eq!(results.total_matches, 1);
    assert_eq!(results.results[0].entry, e);
}

#[test]
fn delete_is_total_across_search_and_facets() {
    let harness = TestEngine::new();
    harness.seed(&knowledge_corpus());
    harness.store.delete(&["auth-errors".to_string()]).unwrap();
    harness.engine.invalidate_cache();

    let results = harness.engine.search(&SearchQuery::simple("authentication")).unwrap();
    assert!(results.results.iter().all(|r| r.entry.id != "auth-errors"));
    assert!(results
        .facets
        .categories
        .iter()
        .all(|b| b.value != "security"));
}

#[test]
fn ranks_are_dense_and_scores_non_increasing() {
    let harness = TestEngine::new();
    harness.seed(&knowledge_corpus());

    let results = harness.engine.search(&SearchQuery::simple("errors")).unwrap();
    for (i, item) in results.results.iter().enumerate() {
        assert_eq!(item.rank, i + 1);
    }
    for pair in results.results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[test]
fn pages_partition_the_match_set() {
    let harness = TestEngine::new();
    let entries: Vec<Entry> = (0..37)
        .map(|i| {
            entry(
                &format!("page-{i:02}"),
                &format!("Paged entry {i}"),
                "a shared corpus token appears here",
                &["paging"],
            )
        })
        .collect();
    harness.seed(&entries);

    let mut seen: HashSet<String> = HashSet::new();
    let page_size = 10;
    for page in 0..4 {
        let results = harness
            .engine
            .search(&SearchQuery {
                query: "shared corpus".into(),
                limit: Some(page_size),
                offset: page * page_size,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(results.total_matches, 37);
        for item in &results.results {
            assert!(
                seen.insert(item.entry.id.clone()),
                "entry {} appeared on two pages",
                item.entry.id
            );
        }
    }
    assert_eq!(seen.len(), 37, "union of pages is the full match set");
}

#[test]
fn no_stale_cache_hit_survives_a_write() {
    let harness = TestEngine::new();
    harness.seed(&knowledge_corpus());

    let query = SearchQuery::simple("structured logging");
    let before = harness.engine.search(&query).unwrap();
    assert_eq!(before.results[0].entry.title, "Error Logging");

    let mut mutated = entry(
        "error-logging",
        "Log Aggregation",
        "Structured logging shipped to the aggregation pipeline",
        &["logging"],
    );
    mutated.category = Some("observability".into());
    harness.store.update(std::slice::from_ref(&mutated)).unwrap();
    harness.engine.invalidate_cache();

    let after = harness.engine.search(&query).unwrap();
    let hit = after
        .results
        .iter()
        .find(|r| r.entry.id == "error-logging")
        .expect("entry still matches");
    assert_eq!(hit.entry.title, "Log Aggregation");
}

#[test]
fn bandit_rewards_stay_bounded_and_epsilon_monotone() {
    let mut bandit = Bandit::with_seed(BanditConfig::default(), 99).unwrap();
    let mut last_epsilon = bandit.exploration_rate();

    for i in 0..3000 {
        let arm = Strategy::ALL[i % Strategy::ALL.len()];
        bandit
            .update_reward(arm, Some("bucket"), (i % 11) as f64 / 10.0)
            .unwrap();
        let epsilon = bandit.exploration_rate();
        assert!(epsilon <= last_epsilon, "epsilon decays monotonically");
        last_epsilon = epsilon;
    }
    assert!((last_epsilon - 0.01).abs() < 1e-9, "epsilon reaches the floor");

    for stat in bandit.stats().arms.values() {
        assert!(stat.average_reward >= 0.0 && stat.average_reward <= 1.0);
    }
}

#[test]
fn feature_extraction_is_total_for_any_entry() {
    let extractor = FeatureExtractor::new(FeatureConfig::default());
    let query = RetrievalQuery {
        search: SearchQuery::simple("anything at all"),
        context: QueryContext::default(),
    };

    // A hostile entry: empty-ish fields, no metadata
    let bare = Entry::new("bare", "t", "c");
    let fv = extractor.extract(&query, &bare, Utc::now());
    for value in fv.flatten() {
        assert!(value.is_finite());
    }

    // Disabled categories still yield a complete, finite vector
    let disabled = FeatureExtractor::new(FeatureConfig {
        enable_basic_features: false,
        enable_recency_features: false,
        enable_proximity_features: false,
        enable_affinity_features: false,
        enable_semantic_features: false,
        enable_context_features: false,
        enable_derived_features: false,
        ..Default::default()
    });
    let fv = disabled.extract(&query, &bare, Utc::now());
    for value in fv.flatten() {
        assert!(value.is_finite());
    }
}

#[test]
fn empty_results_are_legal_and_carry_suggestions() {
    let harness = TestEngine::new();
    harness.seed(&knowledge_corpus());

    harness.engine.record_query("zebra migrations", 3, 12);
    let results = harness
        .engine
        .search(&SearchQuery::simple("zebra"))
        .unwrap();
    assert!(results.results.is_empty());
    assert!(results.suggestions.iter().any(|s| s == "zebra migrations"));
}
