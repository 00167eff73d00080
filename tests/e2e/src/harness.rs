//! Disposable engine harness over a scratch database.

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use kenning_core::{
    EngineConfig, Entry, HybridRetriever, IndexManager, IndexStore, SearchEngine,
};

/// One fully wired engine on a temp-dir database. The directory lives as
/// long as the harness.
pub struct TestEngine {
    pub config: EngineConfig,
    pub store: Arc<IndexStore>,
    pub engine: Arc<SearchEngine>,
    tmp: TempDir,
}

impl TestEngine {
    /// Default configuration on a scratch database file
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Custom configuration; the database path and sidecar dir are pointed
    /// into the scratch directory
    pub fn with_config(mut config: EngineConfig) -> Self {
        let tmp = TempDir::new().expect("create scratch dir");
        config.index.database_path = Some(tmp.path().join("kenning.db"));
        config.sidecar_dir = Some(tmp.path().join("sidecar"));

        let store = Arc::new(IndexStore::open(config.index.clone()).expect("open store"));
        let engine = Arc::new(SearchEngine::new(Arc::clone(&store), config.clone()));
        Self {
            config,
            store,
            engine,
            tmp,
        }
    }

    /// Path of the backing database file
    pub fn db_path(&self) -> PathBuf {
        self.tmp.path().join("kenning.db")
    }

    /// Spawn an index manager over this engine (requires a tokio runtime)
    pub fn manager(&self) -> Arc<IndexManager> {
        IndexManager::new(
            Arc::clone(&self.engine),
            self.config.index.clone(),
            None,
        )
    }

    /// Build a deterministic hybrid retriever over this engine
    pub fn retriever(&self, seed: u64) -> HybridRetriever {
        HybridRetriever::with_seed(Arc::clone(&self.engine), self.config.clone(), seed)
            .expect("build retriever")
    }

    /// Insert entries directly through the store
    pub fn seed(&self, entries: &[Entry]) {
        self.store.insert(entries).expect("seed entries");
    }
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}
