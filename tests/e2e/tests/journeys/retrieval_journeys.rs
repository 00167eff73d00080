//! Retrieval journeys: bandit-driven strategy selection, parallel fan-out
//! with a hard deadline, the feedback loop, and model persistence.

use std::time::Instant;

use kenning_e2e_tests::{knowledge_corpus, TestEngine};
use kenning_core::{
    EngineConfig, EngineError, HybridConfig, JournalMode, QueryContext, RankerUsed, RerankConfig,
    RetrievalMode, RetrievalQuery, SearchQuery, UserFeedback,
};

fn retrieval(text: &str) -> RetrievalQuery {
    RetrievalQuery {
        search: SearchQuery::simple(text),
        context: QueryContext {
            project_id: Some("p1".into()),
            agent_types: vec!["backend".into()],
            ..Default::default()
        },
    }
}

#[tokio::test]
async fn single_mode_returns_strategy_and_timings() {
    let harness = TestEngine::new();
    harness.seed(&knowledge_corpus());
    let retriever = harness.retriever(42);

    let result = retriever
        .retrieve(retrieval("authentication error"))
        .await
        .unwrap();

    assert_eq!(result.results.results[0].entry.id, "auth-errors");
    assert!(!result.retrieval_strategy.is_empty());
    assert!(result.timings.total_time_ms < 500, "sub-500ms latency contract");
    assert_eq!(result.ranker_used, RankerUsed::Base);
}

#[tokio::test]
async fn parallel_mode_fuses_and_reports_survivor() {
    let config = EngineConfig {
        hybrid: HybridConfig {
            default_mode: RetrievalMode::Parallel,
            ..Default::default()
        },
        ..Default::default()
    };
    let harness = TestEngine::with_config(config);
    harness.seed(&knowledge_corpus());
    let retriever = harness.retriever(42);

    let result = retriever.retrieve(retrieval("errors")).await.unwrap();
    assert_eq!(result.ranker_used, RankerUsed::Hybrid);
    assert!(!result.results.results.is_empty());
    assert!(result.confidence_score > 0.0);

    // Fusion unity: no duplicate ids in the fused output
    let mut ids: Vec<&str> = result
        .results
        .results
        .iter()
        .map(|r| r.entry.id.as_str())
        .collect();
    ids.sort_unstable();
    let before = ids.len();
    ids.dedup();
    assert_eq!(ids.len(), before);
}

#[tokio::test]
async fn parallel_deadline_is_hard() {
    // Delete journal mode: an exclusive transaction on a second connection
    // blocks every reader, so all strategies stall past the deadline
    let mut config = EngineConfig::default();
    config.index.journal_mode = JournalMode::Delete;
    config.hybrid.default_mode = RetrievalMode::Parallel;
    config.hybrid.parallel_timeout_ms = 300;

    let harness = TestEngine::with_config(config);
    harness.seed(&knowledge_corpus());
    let retriever = harness.retriever(42);

    let blocker = rusqlite::Connection::open(harness.db_path()).unwrap();
    blocker.execute_batch("BEGIN EXCLUSIVE;").unwrap();

    let started = Instant::now();
    let err = retriever.retrieve(retrieval("errors")).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, EngineError::SearchTimeout { .. }));
    assert!(elapsed.as_millis() < 2000, "late arrivals are discarded, not awaited");

    blocker.execute_batch("ROLLBACK;").unwrap();
}

#[tokio::test]
async fn feedback_updates_bandit_statistics() {
    let harness = TestEngine::new();
    harness.seed(&knowledge_corpus());
    let retriever = harness.retriever(7);

    for _ in 0..20 {
        let result = retriever.retrieve(retrieval("errors")).await.unwrap();
        retriever
            .observe_feedback(
                &result.query_id,
                &UserFeedback {
                    result_id: result.results.results[0].entry.id.clone(),
                    clicked: true,
                    used_in_solution: true,
                    dwell_time_secs: 25.0,
                    relevance_rating: Some(4),
                    ..Default::default()
                },
            )
            .unwrap();
    }

    let stats = retriever.bandit_stats().unwrap();
    assert_eq!(stats.total_trials, 20);
    assert!(stats.average_reward > 0.7);
    assert!(stats.average_reward <= 1.0);
    assert!(stats.exploration_rate < 0.1, "epsilon decayed");
}

#[tokio::test]
async fn online_reranker_learns_from_feedback() {
    let config = EngineConfig {
        rerank: RerankConfig {
            enabled: true,
            learning_rate: 0.3,
            ..Default::default()
        },
        ..Default::default()
    };
    let harness = TestEngine::with_config(config);
    harness.seed(&knowledge_corpus());
    let retriever = harness.retriever(7);

    let result = retriever.retrieve(retrieval("errors")).await.unwrap();
    assert_eq!(result.ranker_used, RankerUsed::Ml);
    assert!(result.adaptive_learning_active);

    retriever
        .observe_feedback(
            &result.query_id,
            &UserFeedback {
                result_id: result.results.results[0].entry.id.clone(),
                used_in_solution: true,
                ..Default::default()
            },
        )
        .unwrap();

    // Checkpoint persists the trained weights
    let path = retriever.save_ranker_checkpoint().unwrap();
    let doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(doc["algorithm"], "logistic");
    assert_eq!(doc["updates"], 1);
}

#[tokio::test]
async fn bandit_model_persists_to_sidecar() {
    let harness = TestEngine::new();
    harness.seed(&knowledge_corpus());
    let retriever = harness.retriever(7);

    let result = retriever.retrieve(retrieval("errors")).await.unwrap();
    retriever
        .observe_feedback(
            &result.query_id,
            &UserFeedback {
                used_in_solution: true,
                ..Default::default()
            },
        )
        .unwrap();

    let path = retriever.save_bandit_model().unwrap();
    let doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(doc["modelVersion"], 1);
    assert_eq!(doc["algorithm"], "epsilon-greedy");
    assert!(doc["armEstimates"].is_object());

    // A fresh retriever imports the exported model
    let model = serde_json::from_value(doc).unwrap();
    let other = harness.retriever(8);
    other.import_bandit_model(&model).unwrap();
}

#[tokio::test]
async fn adaptive_mode_stays_single_on_confident_hits() {
    let config = EngineConfig {
        hybrid: HybridConfig {
            default_mode: RetrievalMode::Adaptive,
            ..Default::default()
        },
        ..Default::default()
    };
    let harness = TestEngine::with_config(config);
    harness.seed(&knowledge_corpus());
    let retriever = harness.retriever(42);

    // Strong match: enhanced scores sit well above the escalation floor
    let result = retriever
        .retrieve(retrieval("authentication error handling"))
        .await
        .unwrap();
    assert_eq!(result.ranker_used, RankerUsed::Base);
}
