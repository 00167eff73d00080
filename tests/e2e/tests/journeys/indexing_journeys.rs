//! Indexing journeys: manager ingestion with events, debounced content
//! changes, vacuum, rebuild and cleanup over a real database file.

use std::sync::Arc;

use chrono::Utc;
use kenning_e2e_tests::{entry, knowledge_corpus, TestEngine};
use kenning_core::{
    BatchOperation, ChangeType, ContentChange, ContentLoader, Entry, IndexEvent, IndexManager,
    QueryType, Result, SearchFilters, SearchQuery,
};

struct MarkdownStub;

impl ContentLoader for MarkdownStub {
    fn load(&self, change: &ContentChange) -> Result<Vec<Entry>> {
        let mut e = Entry::new(
            change.path.clone(),
            format!("Doc at {}", change.path),
            "stub content loaded from disk",
        );
        e.path = change.path.clone();
        Ok(vec![e])
    }
}

#[tokio::test]
async fn ingestion_emits_lifecycle_events() {
    let harness = TestEngine::new();
    let manager = harness.manager();
    let mut events = manager.subscribe();

    manager.index_content(knowledge_corpus()).await.unwrap();

    let mut batch_indexed = 0;
    let mut content_indexed = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            IndexEvent::BatchIndexed { .. } => batch_indexed += 1,
            IndexEvent::ContentIndexed { count } => {
                content_indexed += 1;
                assert_eq!(count, 5);
            }
            _ => {}
        }
    }
    assert_eq!(batch_indexed, 1);
    assert_eq!(content_indexed, 1);

    let results = harness
        .engine
        .search(&SearchQuery::simple("authentication"))
        .unwrap();
    assert!(!results.results.is_empty());
}

#[tokio::test]
async fn mixed_batches_apply_atomically() {
    let harness = TestEngine::new();
    let manager = harness.manager();
    manager.index_content(knowledge_corpus()).await.unwrap();

    let ops = vec![
        BatchOperation::Insert(entry(
            "cache-keys",
            "Cache Key Design",
            "Stable cache keys avoid stampedes",
            &["caching"],
        )),
        BatchOperation::Delete("ui-layout".into()),
    ];
    let (inserted, _, deleted) = manager.index_batch(ops).await.unwrap();
    assert_eq!((inserted, deleted), (1, 1));

    assert!(harness.store.get("cache-keys").unwrap().is_some());
    assert!(harness.store.get("ui-layout").unwrap().is_none());
}

#[tokio::test]
async fn debounced_changes_index_through_the_loader() {
    let harness = TestEngine::new();
    let manager = IndexManager::new(
        Arc::clone(&harness.engine),
        harness.config.index.clone(),
        Some(Arc::new(MarkdownStub)),
    );

    for _ in 0..4 {
        manager.handle_content_change(ContentChange {
            change_type: ChangeType::Modified,
            path: "/kb/watched-note.md".into(),
            content_type: Some("md".into()),
            timestamp: Utc::now(),
        });
    }
    manager.flush_changes().await;

    // Four rapid changes coalesced into one indexed entry
    assert_eq!(manager.stats().unwrap().total_entries, 1);

    manager.handle_content_change(ContentChange {
        change_type: ChangeType::Deleted,
        path: "/kb/watched-note.md".into(),
        content_type: None,
        timestamp: Utc::now(),
    });
    manager.flush_changes().await;
    assert_eq!(manager.stats().unwrap().total_entries, 0);
}

#[tokio::test]
async fn vacuum_reclaims_space_and_keeps_survivors() {
    let harness = TestEngine::new();
    let manager = harness.manager();

    let entries: Vec<Entry> = (0..50)
        .map(|i| {
            entry(
                &format!("bulk-{i:02}"),
                &format!("Bulk entry {i}"),
                &"repeated filler content for vacuum measurement ".repeat(40),
                &["bulk"],
            )
        })
        .collect();
    manager.index_content(entries).await.unwrap();

    let ids: Vec<String> = (0..25).map(|i| format!("bulk-{i:02}")).collect();
    harness.store.delete(&ids).unwrap();

    let report = manager.vacuum().unwrap();
    assert!(report.vacuum_performed);
    assert!(report.space_reclaimed_bytes > 0);

    let results = harness
        .engine
        .search(&SearchQuery {
            query: "filler".into(),
            limit: Some(100),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(results.total_matches, 25);
}

#[tokio::test]
async fn rebuild_recreates_postings() {
    let harness = TestEngine::new();
    let manager = harness.manager();
    manager.index_content(knowledge_corpus()).await.unwrap();

    manager.rebuild_index().await.unwrap();

    let results = harness
        .engine
        .search(&SearchQuery::simple("deployment rollback"))
        .unwrap();
    assert!(results.results.iter().any(|r| r.entry.id == "deploy-runbook"));

    // Fuzzy still works against the rebuilt vocabulary
    let mut fuzzy = SearchQuery::simple("deploymnt");
    fuzzy.query_type = QueryType::Fuzzy;
    assert!(!harness.engine.search(&fuzzy).unwrap().results.is_empty());
}

#[tokio::test]
async fn partial_rebuild_touches_one_type() {
    let harness = TestEngine::new();
    let manager = harness.manager();
    manager.index_content(knowledge_corpus()).await.unwrap();

    let refreshed = manager
        .rebuild_partial_index(kenning_core::EntryType::Gotcha)
        .await
        .unwrap();
    assert_eq!(refreshed, 2);
}

#[tokio::test]
async fn cleanup_honours_age_cutoff() {
    let harness = TestEngine::new();
    let manager = harness.manager();
    manager.index_content(knowledge_corpus()).await.unwrap();

    // ui-layout is 90 days old; everything else is fresh
    let deleted = manager.cleanup(30).unwrap();
    assert_eq!(deleted, 1);
    assert!(harness.store.get("ui-layout").unwrap().is_none());

    assert_eq!(manager.cleanup(0).unwrap(), 4);
    assert_eq!(manager.stats().unwrap().total_entries, 0);
}

#[tokio::test]
async fn stats_expose_type_breakdown() {
    let harness = TestEngine::new();
    let manager = harness.manager();
    manager.index_content(knowledge_corpus()).await.unwrap();

    let stats = manager.stats().unwrap();
    assert_eq!(stats.total_entries, 5);
    assert!(stats
        .entries_by_type
        .iter()
        .any(|(t, n)| t == "gotcha" && *n == 2));
    assert!(stats.last_write.is_some());
}

#[tokio::test]
async fn searches_observe_committed_writes() {
    let harness = TestEngine::new();
    let manager = harness.manager();
    manager.index_content(knowledge_corpus()).await.unwrap();

    // Warm the cache, then mutate and verify the next read is fresh
    let query = SearchQuery::simple("authentication");
    harness.engine.search(&query).unwrap();

    let mut updated = entry(
        "auth-errors",
        "Authentication Error Handling v2",
        "Rotate credentials before retrying authentication.",
        &["auth"],
    );
    updated.entry_type = kenning_core::EntryType::Gotcha;
    manager
        .index_batch(vec![BatchOperation::Update(updated)])
        .await
        .unwrap();

    let results = harness.engine.search(&query).unwrap();
    let hit = results
        .results
        .iter()
        .find(|r| r.entry.id == "auth-errors")
        .unwrap();
    assert_eq!(hit.entry.title, "Authentication Error Handling v2");

    let count = harness.store.count(&SearchFilters::default()).unwrap();
    assert_eq!(count, 5);
}
