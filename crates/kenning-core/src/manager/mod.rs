//! Index Manager
//!
//! Orchestrates writes: validated batch ingestion, a debounced content-change
//! queue fed by producers and the file-watcher bridge, rebuilds, cleanup, and
//! lifecycle events. Reads stay concurrent; writes serialize on the store's
//! write connection, one batch at a time.

mod events;
mod watcher;

pub use events::{EventBus, IndexEvent};
pub use watcher::WatchBridge;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::config::IndexConfig;
use crate::error::{EngineError, Result};
use crate::index::{BatchOperation, IndexStats, IndexStore, VacuumResult};
use crate::model::{ChangeType, ContentChange, Entry, EntryType};
use crate::search::SearchEngine;

/// Transient write failures are retried this many times with exponential
/// backoff before the batch is reported
const WRITE_ATTEMPTS: u32 = 3;

/// Resolves a content change into indexable entries. Producers that cannot
/// load content (pure notification sources) simply omit the loader; deletes
/// are still applied by path.
pub trait ContentLoader: Send + Sync {
    fn load(&self, change: &ContentChange) -> Result<Vec<Entry>>;
}

enum ChangeMsg {
    Change(ContentChange),
    Flush(oneshot::Sender<()>),
}

// ============================================================================
// MANAGER
// ============================================================================

/// Write-side orchestrator over one search engine + index store
pub struct IndexManager {
    engine: Arc<SearchEngine>,
    events: EventBus,
    loader: Option<Arc<dyn ContentLoader>>,
    change_tx: UnboundedSender<ChangeMsg>,
    watch_tx: UnboundedSender<ContentChange>,
    watch: Mutex<Option<WatchBridge>>,
    config: IndexConfig,
}

impl IndexManager {
    /// Create the manager and start its debounce loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        engine: Arc<SearchEngine>,
        config: IndexConfig,
        loader: Option<Arc<dyn ContentLoader>>,
    ) -> Arc<Self> {
        let (change_tx, change_rx) = mpsc::unbounded_channel();
        let (watch_tx, watch_rx) = mpsc::unbounded_channel();

        let manager = Arc::new(Self {
            engine,
            events: EventBus::new(),
            loader,
            change_tx,
            watch_tx,
            watch: Mutex::new(None),
            config,
        });

        let debounce = Duration::from_millis(manager.config.debounce_ms);
        tokio::spawn(change_loop(Arc::downgrade(&manager), change_rx, debounce));
        tokio::spawn(forward_watch_events(
            Arc::downgrade(&manager),
            watch_rx,
        ));

        manager.events.emit(IndexEvent::Initialized);
        manager
    }

    fn store(&self) -> &Arc<IndexStore> {
        self.engine.store()
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<IndexEvent> {
        self.events.subscribe()
    }

    // ========================================================================
    // INGESTION
    // ========================================================================

    /// Validate and index entries in batches of the configured size.
    /// Validation failures propagate synchronously before any batch runs.
    pub async fn index_content(&self, entries: Vec<Entry>) -> Result<usize> {
        for entry in &entries {
            self.validate_entry(entry)?;
        }
        if entries.is_empty() {
            return Ok(0);
        }

        let total = entries.len();
        for (batch_index, chunk) in entries.chunks(self.config.batch_size.max(1)).enumerate() {
            let result = self
                .with_retries(|| self.store().insert(chunk))
                .await;
            match result {
                Ok(count) => {
                    self.events.emit(IndexEvent::BatchIndexed { batch_index, count });
                }
                Err(e) => {
                    self.events.emit(IndexEvent::IndexingError {
                        message: e.to_string(),
                    });
                    return Err(e);
                }
            }
        }

        self.engine.invalidate_cache();
        self.events.emit(IndexEvent::ContentIndexed { count: total });
        Ok(total)
    }

    /// Apply a mixed insert/update/delete batch atomically: all or none
    pub async fn index_batch(&self, ops: Vec<BatchOperation>) -> Result<(usize, usize, usize)> {
        for op in &ops {
            match op {
                BatchOperation::Insert(e) | BatchOperation::Update(e) => self.validate_entry(e)?,
                BatchOperation::Delete(id) => {
                    if id.is_empty() {
                        return Err(EngineError::InvalidArgument(
                            "delete operation with empty id".into(),
                        ));
                    }
                }
            }
        }

        let result = self.with_retries(|| self.store().apply_batch(&ops)).await;
        match result {
            Ok((inserted, updated, deleted)) => {
                self.engine.invalidate_cache();
                self.events.emit(IndexEvent::BatchProcessed {
                    inserted,
                    updated,
                    deleted,
                });
                if deleted > 0 {
                    self.store().maybe_auto_vacuum()?;
                }
                Ok((inserted, updated, deleted))
            }
            Err(e) => {
                self.events.emit(IndexEvent::BatchError {
                    message: e.to_string(),
                });
                Err(EngineError::BatchError {
                    failed: ops.len(),
                    message: e.to_string(),
                })
            }
        }
    }

    fn validate_entry(&self, entry: &Entry) -> Result<()> {
        if entry.id.is_empty() {
            return Err(EngineError::InvalidArgument("entry id is empty".into()));
        }
        if entry.title.is_empty() {
            return Err(EngineError::InvalidArgument(format!(
                "entry {} has an empty title",
                entry.id
            )));
        }
        if entry.content.is_empty() {
            return Err(EngineError::InvalidArgument(format!(
                "entry {} has empty content",
                entry.id
            )));
        }
        if entry.path.is_empty() {
            return Err(EngineError::InvalidArgument(format!(
                "entry {} has an empty path",
                entry.id
            )));
        }
        if entry.content.len() > self.config.max_content_length {
            return Err(EngineError::InvalidArgument(format!(
                "entry {} content exceeds {} bytes",
                entry.id, self.config.max_content_length
            )));
        }
        Ok(())
    }

    async fn with_retries<T>(&self, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut delay = Duration::from_millis(50);
        let mut attempt = 0;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt + 1 < WRITE_ATTEMPTS => {
                    attempt += 1;
                    tracing::warn!("Transient write failure (attempt {attempt}): {e}");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // ========================================================================
    // CONTENT CHANGES
    // ========================================================================

    /// Queue a content change. Bursts on the same path coalesce inside the
    /// debounce window; a new change resets the window.
    pub fn handle_content_change(&self, change: ContentChange) {
        let _ = self.change_tx.send(ChangeMsg::Change(change));
    }

    /// Process all pending debounced changes immediately. Part of graceful
    /// shutdown: drain the queue, commit, then drop the manager.
    pub async fn flush_changes(&self) {
        let (tx, rx) = oneshot::channel();
        if self.change_tx.send(ChangeMsg::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    async fn process_changes(&self, changes: Vec<ContentChange>) {
        let mut ops: Vec<BatchOperation> = Vec::new();
        let mut deleted_paths = 0usize;

        for change in changes {
            match change.change_type {
                ChangeType::Deleted => match self.store().delete_by_path(&change.path) {
                    Ok(n) => deleted_paths += n,
                    Err(e) => self.events.emit(IndexEvent::IndexingError {
                        message: format!("delete {} failed: {e}", change.path),
                    }),
                },
                ChangeType::Created | ChangeType::Modified => {
                    if let Some(loader) = &self.loader {
                        match loader.load(&change) {
                            Ok(entries) => {
                                ops.extend(entries.into_iter().map(BatchOperation::Insert));
                            }
                            Err(e) => self.events.emit(IndexEvent::IndexingError {
                                message: format!("load {} failed: {e}", change.path),
                            }),
                        }
                    } else {
                        tracing::debug!(
                            "No content loader registered; change to {} ignored",
                            change.path
                        );
                    }
                }
            }
        }

        if deleted_paths > 0 {
            self.engine.invalidate_cache();
            self.events.emit(IndexEvent::BatchProcessed {
                inserted: 0,
                updated: 0,
                deleted: deleted_paths,
            });
        }
        if !ops.is_empty() {
            if let Err(e) = self.index_batch(ops).await {
                tracing::warn!("Debounced batch failed: {e}");
            }
        }
    }

    // ========================================================================
    // WATCHING
    // ========================================================================

    /// Subscribe to file-system notifications under `dir`
    pub fn add_watch_directory(&self, dir: &Path) -> Result<()> {
        let mut guard = self
            .watch
            .lock()
            .map_err(|_| EngineError::Init("Watch lock poisoned".into()))?;
        if guard.is_none() {
            *guard = Some(WatchBridge::new(self.watch_tx.clone())?);
        }
        guard
            .as_mut()
            .expect("bridge just created")
            .watch(dir)
    }

    /// Unsubscribe from `dir`
    pub fn remove_watch_directory(&self, dir: &Path) -> Result<()> {
        let mut guard = self
            .watch
            .lock()
            .map_err(|_| EngineError::Init("Watch lock poisoned".into()))?;
        match guard.as_mut() {
            Some(bridge) => bridge.unwatch(dir),
            None => Ok(()),
        }
    }

    // ========================================================================
    // MAINTENANCE
    // ========================================================================

    /// Drop and rewrite all inverted postings without losing entries
    pub async fn rebuild_index(&self) -> Result<()> {
        self.events.emit(IndexEvent::RebuildStarted);
        let started = Instant::now();
        self.store().rebuild_fts()?;
        self.engine.invalidate_cache();
        let entries = self.store().stats()?.total_entries;
        self.events.emit(IndexEvent::RebuildCompleted {
            entries,
            duration_ms: started.elapsed().as_millis() as u64,
        });
        Ok(())
    }

    /// Refresh the postings of every entry of one type
    pub async fn rebuild_partial_index(&self, entry_type: EntryType) -> Result<usize> {
        self.events.emit(IndexEvent::RebuildStarted);
        let started = Instant::now();
        let entries = self.store().list(Some(entry_type))?;
        let count = entries.len();
        for chunk in entries.chunks(self.config.batch_size.max(1)) {
            self.with_retries(|| self.store().update(chunk)).await?;
        }
        self.engine.invalidate_cache();
        self.events.emit(IndexEvent::RebuildCompleted {
            entries: count,
            duration_ms: started.elapsed().as_millis() as u64,
        });
        Ok(count)
    }

    /// Delete entries older than `max_age_days`; 0 deletes all
    pub fn cleanup(&self, max_age_days: u32) -> Result<usize> {
        let deleted = self.store().cleanup(max_age_days)?;
        if deleted > 0 {
            self.engine.invalidate_cache();
            self.store().maybe_auto_vacuum()?;
        }
        Ok(deleted)
    }

    /// Reclaim space now
    pub fn vacuum(&self) -> Result<VacuumResult> {
        self.store().vacuum()
    }

    /// Store-level statistics
    pub fn stats(&self) -> Result<IndexStats> {
        self.store().stats()
    }
}

// ============================================================================
// BACKGROUND LOOPS
// ============================================================================

/// Single-task debouncer: coalesces changes per path, resetting each path's
/// deadline on every new change, and hands due changes to the manager
async fn change_loop(
    manager: Weak<IndexManager>,
    mut rx: UnboundedReceiver<ChangeMsg>,
    window: Duration,
) {
    let mut pending: HashMap<String, (ContentChange, Instant)> = HashMap::new();

    loop {
        let next_deadline = pending.values().map(|(_, d)| *d).min();

        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Some(ChangeMsg::Change(change)) => {
                        let deadline = Instant::now() + window;
                        pending.insert(change.path.clone(), (change, deadline));
                    }
                    Some(ChangeMsg::Flush(ack)) => {
                        let due: Vec<ContentChange> =
                            pending.drain().map(|(_, (c, _))| c).collect();
                        if let Some(mgr) = manager.upgrade() {
                            if !due.is_empty() {
                                mgr.process_changes(due).await;
                            }
                        }
                        let _ = ack.send(());
                    }
                    None => break,
                }
            }
            _ = sleep_until_opt(next_deadline) => {
                let now = Instant::now();
                let due: Vec<ContentChange> = pending
                    .iter()
                    .filter(|(_, (_, d))| *d <= now)
                    .map(|(p, _)| p.clone())
                    .collect::<Vec<_>>()
                    .into_iter()
                    .filter_map(|p| pending.remove(&p).map(|(c, _)| c))
                    .collect();

                match manager.upgrade() {
                    Some(mgr) if !due.is_empty() => mgr.process_changes(due).await,
                    Some(_) => {}
                    None => break,
                }
            }
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

/// Forward watcher events into the debounce queue
async fn forward_watch_events(
    manager: Weak<IndexManager>,
    mut rx: UnboundedReceiver<ContentChange>,
) {
    while let Some(change) = rx.recv().await {
        match manager.upgrade() {
            Some(mgr) => mgr.handle_content_change(change),
            None => break,
        }
    }
}
