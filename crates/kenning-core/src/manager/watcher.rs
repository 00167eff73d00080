//! File-Watcher Bridge
//!
//! Translates file-system notifications into content changes. Any provider
//! implementing create/modify/delete callbacks would do; this bridge uses
//! the platform recommended watcher.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::Utc;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::UnboundedSender;

use crate::error::{EngineError, Result};
use crate::model::{ChangeType, ContentChange};

/// Map one notify event to content changes, one per affected path
fn translate(event: &Event) -> Vec<ContentChange> {
    let change_type = match event.kind {
        EventKind::Create(_) => ChangeType::Created,
        EventKind::Modify(_) => ChangeType::Modified,
        EventKind::Remove(_) => ChangeType::Deleted,
        _ => return Vec::new(),
    };
    event
        .paths
        .iter()
        .map(|path| ContentChange {
            change_type,
            path: path.to_string_lossy().into_owned(),
            content_type: path
                .extension()
                .map(|ext| ext.to_string_lossy().into_owned()),
            timestamp: Utc::now(),
        })
        .collect()
}

/// Watches directories and forwards changes into the manager's debounce queue
pub struct WatchBridge {
    watcher: RecommendedWatcher,
    watched: HashSet<PathBuf>,
}

impl WatchBridge {
    /// Create the bridge; changes are forwarded through `tx`
    pub fn new(tx: UnboundedSender<ContentChange>) -> Result<Self> {
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for change in translate(&event) {
                    let _ = tx.send(change);
                }
            }
            Err(e) => tracing::warn!("File watcher error: {}", e),
        })
        .map_err(|e| EngineError::Init(format!("Failed to create file watcher: {e}")))?;

        Ok(Self {
            watcher,
            watched: HashSet::new(),
        })
    }

    /// Subscribe to file-system notifications under `dir` (recursive)
    pub fn watch(&mut self, dir: &Path) -> Result<()> {
        self.watcher
            .watch(dir, RecursiveMode::Recursive)
            .map_err(|e| EngineError::Init(format!("Failed to watch {}: {e}", dir.display())))?;
        self.watched.insert(dir.to_path_buf());
        tracing::info!("Watching directory {}", dir.display());
        Ok(())
    }

    /// Unsubscribe from `dir`
    pub fn unwatch(&mut self, dir: &Path) -> Result<()> {
        self.watcher
            .unwatch(dir)
            .map_err(|e| EngineError::Init(format!("Failed to unwatch {}: {e}", dir.display())))?;
        self.watched.remove(dir);
        Ok(())
    }

    /// Currently watched directories
    pub fn watched(&self) -> impl Iterator<Item = &PathBuf> {
        self.watched.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, RemoveKind};

    #[test]
    fn test_translate_create_event() {
        let event = Event {
            kind: EventKind::Create(CreateKind::File),
            paths: vec![PathBuf::from("/tmp/notes/entry.md")],
            attrs: Default::default(),
        };
        let changes = translate(&event);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::Created);
        assert_eq!(changes[0].content_type.as_deref(), Some("md"));
    }

    #[test]
    fn test_translate_remove_event() {
        let event = Event {
            kind: EventKind::Remove(RemoveKind::File),
            paths: vec![PathBuf::from("/tmp/notes/old.md")],
            attrs: Default::default(),
        };
        let changes = translate(&event);
        assert_eq!(changes[0].change_type, ChangeType::Deleted);
    }

    #[test]
    fn test_translate_ignores_access_events() {
        let event = Event {
            kind: EventKind::Access(notify::event::AccessKind::Read),
            paths: vec![PathBuf::from("/tmp/notes/entry.md")],
            attrs: Default::default(),
        };
        assert!(translate(&event).is_empty());
    }
}
