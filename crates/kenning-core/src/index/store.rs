//! Index Store
//!
//! Persists entries and serves full-text queries over an FTS5 inverted index
//! with BM25 scoring.
//!
//! Uses separate reader/writer connections for interior mutability. All
//! methods take `&self` (not `&mut self`), making the store `Send + Sync` so
//! callers can share it behind an `Arc` without an outer mutex.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use rusqlite::types::ToSql;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::config::{default_data_dir, IndexConfig, JournalMode, Synchronous};
use crate::error::{EngineError, Result};
use crate::model::{
    Difficulty, Entry, EntryMetadata, EntryType, QueryType, Scope, SearchFilters,
};

use super::query::{compile, levenshtein};

/// Corrupt rows tolerated within a single query before the store reports
/// `IndexCorruption` and falls back to read-only
const CORRUPT_ROW_THRESHOLD: u64 = 10;

/// BM25 field weights: (id, title, search_text, tags_text, category)
const BM25_WEIGHTS: &str = "bm25(entries_fts, 0.0, 3.0, 1.0, 2.0, 1.5)";

// ============================================================================
// TYPES
// ============================================================================

/// One operation inside a mixed batch
#[derive(Debug, Clone)]
pub enum BatchOperation {
    Insert(Entry),
    Update(Entry),
    Delete(String),
}

/// A raw FTS hit before relevance enhancement
#[derive(Debug, Clone)]
pub struct FtsHit {
    pub entry: Entry,
    /// Positive BM25 score summed across weighted fields
    pub score: f64,
}

/// One page of raw FTS hits plus the pre-page match count
#[derive(Debug, Clone)]
pub struct FtsPage {
    pub hits: Vec<FtsHit>,
    /// Matches across the whole corpus, before paging
    pub total_matches: usize,
}

/// Facet source columns for one entry of the raw match set
#[derive(Debug, Clone)]
pub struct FacetSource {
    pub entry_type: String,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub project_id: Option<String>,
    pub agent_types: Vec<String>,
    pub language: Option<String>,
}

/// Outcome of a vacuum pass
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VacuumResult {
    pub vacuum_performed: bool,
    pub space_reclaimed_bytes: u64,
    pub duration_ms: u64,
}

/// Store-level statistics
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub total_entries: usize,
    pub entries_by_type: Vec<(String, usize)>,
    pub deleted_since_vacuum: u64,
    pub database_size_bytes: u64,
    pub corrupt_rows_skipped: u64,
    pub last_write: Option<DateTime<Utc>>,
}

// ============================================================================
// STORE
// ============================================================================

/// On-disk inverted index plus row store
pub struct IndexStore {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    config: IndexConfig,
    corrupt_rows_skipped: AtomicU64,
    read_only: AtomicBool,
    last_write: Mutex<Option<DateTime<Utc>>>,
}

impl IndexStore {
    /// Apply PRAGMAs from config to a connection
    fn configure_connection(conn: &Connection, config: &IndexConfig) -> Result<()> {
        let journal = match config.journal_mode {
            JournalMode::Delete => "DELETE",
            JournalMode::Wal => "WAL",
        };
        let synchronous = match config.synchronous {
            Synchronous::Off => "OFF",
            Synchronous::Normal => "NORMAL",
            Synchronous::Full => "FULL",
        };

        conn.execute_batch(&format!(
            "PRAGMA journal_mode = {journal};
             PRAGMA synchronous = {synchronous};
             PRAGMA cache_size = -{cache};
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
            cache = config.cache_size,
        ))?;

        Ok(())
    }

    /// Open (or create) the store at the configured path
    pub fn open(config: IndexConfig) -> Result<Self> {
        let path = match &config.database_path {
            Some(p) => p.clone(),
            None => default_data_dir()?.join("kenning.db"),
        };
        Self::open_at(path, config)
    }

    fn open_at(path: PathBuf, config: IndexConfig) -> Result<Self> {
        let writer_conn = Connection::open(&path)?;

        // Restrict database file permissions to owner-only on Unix
        #[cfg(unix)]
        if path.exists() {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(&path, perms);
        }

        Self::configure_connection(&writer_conn, &config)?;
        super::migrations::apply_migrations(&writer_conn, &config)?;

        let reader_conn = Connection::open(&path)?;
        Self::configure_connection(&reader_conn, &config)?;

        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
            config,
            corrupt_rows_skipped: AtomicU64::new(0),
            read_only: AtomicBool::new(false),
            last_write: Mutex::new(None),
        })
    }

    /// Open an in-memory store (shared cache so reader and writer see one
    /// database). Test and ephemeral use.
    pub fn open_in_memory(config: IndexConfig) -> Result<Self> {
        let uri = format!(
            "file:kenning-{}?mode=memory&cache=shared",
            uuid::Uuid::new_v4()
        );
        let writer_conn = Connection::open(&uri)?;
        Self::configure_connection(&writer_conn, &config)?;
        super::migrations::apply_migrations(&writer_conn, &config)?;

        let reader_conn = Connection::open(&uri)?;
        Self::configure_connection(&reader_conn, &config)?;

        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
            config,
            corrupt_rows_skipped: AtomicU64::new(0),
            read_only: AtomicBool::new(false),
            last_write: Mutex::new(None),
        })
    }

    /// Handle for aborting an in-flight read at the next row boundary
    pub fn interrupt_handle(&self) -> Result<rusqlite::InterruptHandle> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| EngineError::Init("Reader lock poisoned".into()))?;
        Ok(reader.get_interrupt_handle())
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only.load(Ordering::Relaxed) {
            return Err(EngineError::IndexCorruption(
                "store is in read-only fallback; rebuild the index".into(),
            ));
        }
        Ok(())
    }

    fn mark_written(&self) {
        if let Ok(mut guard) = self.last_write.lock() {
            *guard = Some(Utc::now());
        }
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Insert entries. Reinsertion with an existing id atomically replaces
    /// the previous row and all its inverted postings.
    pub fn insert(&self, entries: &[Entry]) -> Result<usize> {
        self.check_writable()?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| EngineError::Init("Writer lock poisoned".into()))?;
        let tx = writer.transaction()?;
        for entry in entries {
            Self::upsert_in_tx(&tx, entry)?;
        }
        tx.commit()?;
        self.mark_written();
        Ok(entries.len())
    }

    /// Update entries (same upsert semantics as insert)
    pub fn update(&self, entries: &[Entry]) -> Result<usize> {
        self.insert(entries)
    }

    /// Delete entries by id; returns how many rows existed
    pub fn delete(&self, ids: &[String]) -> Result<usize> {
        self.check_writable()?;
        let mut deleted = 0usize;
        {
            let mut writer = self
                .writer
                .lock()
                .map_err(|_| EngineError::Init("Writer lock poisoned".into()))?;
            let tx = writer.transaction()?;
            for id in ids {
                deleted += tx.execute("DELETE FROM entries WHERE id = ?1", params![id])?;
            }
            if deleted > 0 {
                tx.execute(
                    "UPDATE index_meta
                     SET value = CAST(value AS INTEGER) + ?1, updated_at = datetime('now')
                     WHERE key = 'deleted_since_vacuum'",
                    params![deleted as i64],
                )?;
            }
            tx.commit()?;
        }
        self.mark_written();
        Ok(deleted)
    }

    /// Delete every entry originating from `path`; returns how many existed
    pub fn delete_by_path(&self, path: &str) -> Result<usize> {
        self.check_writable()?;
        let deleted = {
            let writer = self
                .writer
                .lock()
                .map_err(|_| EngineError::Init("Writer lock poisoned".into()))?;
            let deleted = writer.execute("DELETE FROM entries WHERE path = ?1", params![path])?;
            if deleted > 0 {
                writer.execute(
                    "UPDATE index_meta
                     SET value = CAST(value AS INTEGER) + ?1, updated_at = datetime('now')
                     WHERE key = 'deleted_since_vacuum'",
                    params![deleted as i64],
                )?;
            }
            deleted
        };
        self.mark_written();
        Ok(deleted)
    }

    /// Apply a mixed batch atomically: all operations commit or none do
    pub fn apply_batch(&self, ops: &[BatchOperation]) -> Result<(usize, usize, usize)> {
        self.check_writable()?;
        let mut inserted = 0usize;
        let mut updated = 0usize;
        let mut deleted = 0usize;
        {
            let mut writer = self
                .writer
                .lock()
                .map_err(|_| EngineError::Init("Writer lock poisoned".into()))?;
            let tx = writer.transaction()?;
            for op in ops {
                match op {
                    BatchOperation::Insert(entry) => {
                        Self::upsert_in_tx(&tx, entry)?;
                        inserted += 1;
                    }
                    BatchOperation::Update(entry) => {
                        Self::upsert_in_tx(&tx, entry)?;
                        updated += 1;
                    }
                    BatchOperation::Delete(id) => {
                        deleted += tx.execute("DELETE FROM entries WHERE id = ?1", params![id])?;
                    }
                }
            }
            if deleted > 0 {
                tx.execute(
                    "UPDATE index_meta
                     SET value = CAST(value AS INTEGER) + ?1, updated_at = datetime('now')
                     WHERE key = 'deleted_since_vacuum'",
                    params![deleted as i64],
                )?;
            }
            tx.commit()?;
        }
        self.mark_written();
        Ok((inserted, updated, deleted))
    }

    fn upsert_in_tx(tx: &rusqlite::Transaction<'_>, entry: &Entry) -> Result<()> {
        let m = &entry.metadata;
        let tags_json = serde_json::to_string(&m.tags).unwrap_or_else(|_| "[]".into());
        let agents_json = serde_json::to_string(&m.agent_types).unwrap_or_else(|_| "[]".into());
        let related_json = serde_json::to_string(&m.related_ids).unwrap_or_else(|_| "[]".into());
        let children_json = serde_json::to_string(&m.child_ids).unwrap_or_else(|_| "[]".into());
        let search_text = entry.indexed_content();
        let tags_text = m.tags.join(" ");
        let now = Utc::now().to_rfc3339();

        tx.execute(
            "INSERT INTO entries (
                id, entry_type, title, content, category, path, hash,
                last_modified, created_at,
                tags, agent_types, project_id, language, scope, difficulty,
                severity, status, usage_count, file_size, effectiveness,
                success_rate, last_used, related_ids, parent_id, child_ids,
                annotations, search_text, tags_text
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7,
                ?8, ?9,
                ?10, ?11, ?12, ?13, ?14, ?15,
                ?16, ?17, ?18, ?19, ?20,
                ?21, ?22, ?23, ?24, ?25,
                ?26, ?27, ?28
            )
            ON CONFLICT(id) DO UPDATE SET
                entry_type = excluded.entry_type,
                title = excluded.title,
                content = excluded.content,
                category = excluded.category,
                path = excluded.path,
                hash = excluded.hash,
                last_modified = excluded.last_modified,
                tags = excluded.tags,
                agent_types = excluded.agent_types,
                project_id = excluded.project_id,
                language = excluded.language,
                scope = excluded.scope,
                difficulty = excluded.difficulty,
                severity = excluded.severity,
                status = excluded.status,
                usage_count = excluded.usage_count,
                file_size = excluded.file_size,
                effectiveness = excluded.effectiveness,
                success_rate = excluded.success_rate,
                last_used = excluded.last_used,
                related_ids = excluded.related_ids,
                parent_id = excluded.parent_id,
                child_ids = excluded.child_ids,
                annotations = excluded.annotations,
                search_text = excluded.search_text,
                tags_text = excluded.tags_text",
            params![
                entry.id,
                entry.entry_type.as_str(),
                entry.title,
                entry.content,
                entry.category,
                entry.path,
                entry.hash,
                entry.last_modified.to_rfc3339(),
                now,
                tags_json,
                agents_json,
                m.project_id,
                m.language,
                m.scope.map(|s| match s {
                    Scope::Project => "project",
                    Scope::Global => "global",
                }),
                m.difficulty.map(|d| d.as_str()),
                m.severity,
                m.status,
                m.usage_count as i64,
                m.file_size as i64,
                m.effectiveness,
                m.success_rate,
                m.last_used.map(|t| t.to_rfc3339()),
                related_json,
                m.parent_id,
                children_json,
                m.annotations,
                search_text,
                tags_text,
            ],
        )?;
        Ok(())
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Fetch one entry by id
    pub fn get(&self, id: &str) -> Result<Option<Entry>> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| EngineError::Init("Reader lock poisoned".into()))?;
        let entry = reader
            .query_row("SELECT * FROM entries WHERE id = ?1", params![id], |row| {
                Self::row_to_entry(row)
            })
            .optional()?;
        Ok(entry)
    }

    /// List entries, optionally restricted to one type
    pub fn list(&self, entry_type: Option<EntryType>) -> Result<Vec<Entry>> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| EngineError::Init("Reader lock poisoned".into()))?;
        let (sql, args): (&str, Vec<Box<dyn ToSql>>) = match entry_type {
            Some(t) => (
                "SELECT * FROM entries WHERE entry_type = ?1 ORDER BY id",
                vec![Box::new(t.as_str().to_string())],
            ),
            None => ("SELECT * FROM entries ORDER BY id", Vec::new()),
        };
        let mut stmt = reader.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| Self::row_to_entry(row))?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Execute a full-text query: parse per `query_type`, match, filter,
    /// BM25-score, order (score desc, id asc), page
    pub fn search_fts(
        &self,
        query: &str,
        query_type: QueryType,
        filters: &SearchFilters,
        limit: usize,
        offset: usize,
    ) -> Result<FtsPage> {
        let match_expr = self.compile_query(query, query_type)?;
        let (filter_sql, filter_args) = Self::filter_clause(filters);

        let reader = self
            .reader
            .lock()
            .map_err(|_| EngineError::Init("Reader lock poisoned".into()))?;

        // Pre-page match count (facet invariant: counts sum over the raw set)
        let count_sql = format!(
            "SELECT COUNT(*) FROM entries e
             JOIN entries_fts fts ON e.rowid = fts.rowid
             WHERE entries_fts MATCH ?1{filter_sql}"
        );
        let mut args: Vec<Box<dyn ToSql>> = vec![Box::new(match_expr.clone())];
        args.extend(filter_args);
        let total_matches: i64 = reader.query_row(
            &count_sql,
            params_from_iter(args.iter()),
            |row| row.get(0),
        )?;

        let page_sql = format!(
            "SELECT e.*, -{BM25_WEIGHTS} AS fts_score FROM entries e
             JOIN entries_fts fts ON e.rowid = fts.rowid
             WHERE entries_fts MATCH ?1{filter_sql}
             ORDER BY {BM25_WEIGHTS} ASC, e.id ASC
             LIMIT ?{limit_idx} OFFSET ?{offset_idx}",
            limit_idx = args.len() + 1,
            offset_idx = args.len() + 2,
        );
        args.push(Box::new(limit as i64));
        args.push(Box::new(offset as i64));

        let mut stmt = reader.prepare(&page_sql)?;
        let mut rows = stmt.query(params_from_iter(args.iter()))?;

        let mut hits = Vec::new();
        let mut corrupt_this_query = 0u64;
        while let Some(row) = rows.next()? {
            let score: f64 = row.get("fts_score")?;
            match Self::row_to_entry(row) {
                Ok(entry) => hits.push(FtsHit { entry, score }),
                Err(e) => {
                    corrupt_this_query += 1;
                    self.corrupt_rows_skipped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Skipping corrupt row during search: {}", e);
                    if corrupt_this_query > CORRUPT_ROW_THRESHOLD {
                        self.read_only.store(true, Ordering::Relaxed);
                        return Err(EngineError::IndexCorruption(format!(
                            "{corrupt_this_query} unreadable rows in one query"
                        )));
                    }
                }
            }
        }

        Ok(FtsPage {
            hits,
            total_matches: total_matches as usize,
        })
    }

    /// Facet source columns for the whole (pre-page) match set
    pub fn facet_sources(
        &self,
        query: &str,
        query_type: QueryType,
        filters: &SearchFilters,
    ) -> Result<Vec<FacetSource>> {
        let match_expr = self.compile_query(query, query_type)?;
        let (filter_sql, filter_args) = Self::filter_clause(filters);

        let reader = self
            .reader
            .lock()
            .map_err(|_| EngineError::Init("Reader lock poisoned".into()))?;
        let sql = format!(
            "SELECT e.entry_type, e.category, e.tags, e.project_id, e.agent_types, e.language
             FROM entries e
             JOIN entries_fts fts ON e.rowid = fts.rowid
             WHERE entries_fts MATCH ?1{filter_sql}"
        );
        let mut args: Vec<Box<dyn ToSql>> = vec![Box::new(match_expr)];
        args.extend(filter_args);

        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            let tags_json: String = row.get(2)?;
            let agents_json: String = row.get(4)?;
            Ok(FacetSource {
                entry_type: row.get(0)?,
                category: row.get(1)?,
                tags: serde_json::from_str(&tags_json).unwrap_or_default(),
                project_id: row.get(3)?,
                agent_types: serde_json::from_str(&agents_json).unwrap_or_default(),
                language: row.get(5)?,
            })
        })?;

        let mut sources = Vec::new();
        for row in rows {
            match row {
                Ok(s) => sources.push(s),
                Err(e) => {
                    self.corrupt_rows_skipped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Skipping corrupt row during facet scan: {}", e);
                }
            }
        }
        Ok(sources)
    }

    /// Count entries matching structured filters only (no text match)
    pub fn count(&self, filters: &SearchFilters) -> Result<usize> {
        let (filter_sql, filter_args) = Self::filter_clause(filters);
        let reader = self
            .reader
            .lock()
            .map_err(|_| EngineError::Init("Reader lock poisoned".into()))?;
        // The shared clause starts with AND; anchor it on a tautology
        let sql = format!("SELECT COUNT(*) FROM entries e WHERE 1=1{filter_sql}");
        let count: i64 = reader.query_row(
            &sql,
            params_from_iter(filter_args.iter()),
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn compile_query(&self, query: &str, query_type: QueryType) -> Result<String> {
        compile(query, query_type, |term, budget| {
            self.fuzzy_neighbours(term, budget).unwrap_or_default()
        })
    }

    /// Dictionary terms within `budget` edits of `term`. When nothing is in
    /// budget, falls back to the nearest neighbours so unknown terms still
    /// retrieve something.
    pub fn fuzzy_neighbours(&self, term: &str, budget: usize) -> Result<Vec<String>> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| EngineError::Init("Reader lock poisoned".into()))?;

        let term_len = term.chars().count() as i64;
        let mut stmt = reader.prepare(
            "SELECT term FROM entries_vocab
             WHERE LENGTH(term) BETWEEN ?1 AND ?2",
        )?;
        let rows = stmt.query_map(
            params![term_len - budget as i64, term_len + budget as i64],
            |row| row.get::<_, String>(0),
        )?;

        let mut in_budget = Vec::new();
        let mut nearest: Vec<(usize, String)> = Vec::new();
        for row in rows {
            let candidate = row?;
            let dist = levenshtein(term, &candidate);
            if dist == 0 {
                continue;
            }
            if dist <= budget {
                in_budget.push(candidate);
            } else {
                nearest.push((dist, candidate));
            }
        }

        if in_budget.is_empty() && !nearest.is_empty() {
            nearest.sort();
            in_budget = nearest.into_iter().take(5).map(|(_, t)| t).collect();
        }
        Ok(in_budget)
    }

    /// Build the shared filter clause (starts with ` AND` or empty)
    fn filter_clause(filters: &SearchFilters) -> (String, Vec<Box<dyn ToSql>>) {
        let mut sql = String::new();
        let mut args: Vec<Box<dyn ToSql>> = Vec::new();
        // Placeholders are numbered after the MATCH param in search paths;
        // rusqlite binds `?` positionally so plain ? works in every caller
        if !filters.types.is_empty() {
            let marks = vec!["?"; filters.types.len()].join(", ");
            sql.push_str(&format!(" AND e.entry_type IN ({marks})"));
            for t in &filters.types {
                args.push(Box::new(t.as_str().to_string()));
            }
        }
        if !filters.categories.is_empty() {
            let marks = vec!["?"; filters.categories.len()].join(", ");
            sql.push_str(&format!(" AND e.category IN ({marks})"));
            for c in &filters.categories {
                args.push(Box::new(c.clone()));
            }
        }
        if !filters.tags.is_empty() {
            let marks = vec!["?"; filters.tags.len()].join(", ");
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM json_each(e.tags) WHERE json_each.value IN ({marks}))"
            ));
            for t in &filters.tags {
                args.push(Box::new(t.clone()));
            }
        }
        if let Some(project) = &filters.project_id {
            sql.push_str(" AND e.project_id = ?");
            args.push(Box::new(project.clone()));
        }
        if !filters.agent_types.is_empty() {
            let marks = vec!["?"; filters.agent_types.len()].join(", ");
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM json_each(e.agent_types) WHERE json_each.value IN ({marks}))"
            ));
            for a in &filters.agent_types {
                args.push(Box::new(a.clone()));
            }
        }
        if let Some(range) = &filters.date_range {
            if let Some(from) = range.from {
                sql.push_str(" AND e.last_modified >= ?");
                args.push(Box::new(from.to_rfc3339()));
            }
            if let Some(to) = range.to {
                sql.push_str(" AND e.last_modified <= ?");
                args.push(Box::new(to.to_rfc3339()));
            }
        }
        (sql, args)
    }

    fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entry> {
        let parse_dt = |col: &str, value: String| -> rusqlite::Result<DateTime<Utc>> {
            DateTime::parse_from_rfc3339(&value)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        0,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })
                .map_err(|e| {
                    tracing::debug!("bad timestamp in column {col}");
                    e
                })
        };

        let last_modified: String = row.get("last_modified")?;
        let tags_json: String = row.get("tags")?;
        let agents_json: String = row.get("agent_types")?;
        let related_json: String = row.get("related_ids")?;
        let children_json: String = row.get("child_ids")?;
        let scope: Option<String> = row.get("scope")?;
        let difficulty: Option<String> = row.get("difficulty")?;
        let last_used: Option<String> = row.get("last_used")?;
        let entry_type: String = row.get("entry_type")?;

        Ok(Entry {
            id: row.get("id")?,
            entry_type: EntryType::parse_name(&entry_type),
            title: row.get("title")?,
            content: row.get("content")?,
            category: row.get("category")?,
            path: row.get("path")?,
            hash: row.get("hash")?,
            last_modified: parse_dt("last_modified", last_modified)?,
            metadata: EntryMetadata {
                tags: serde_json::from_str(&tags_json).unwrap_or_default(),
                agent_types: serde_json::from_str(&agents_json).unwrap_or_default(),
                project_id: row.get("project_id")?,
                language: row.get("language")?,
                scope: scope.as_deref().map(|s| match s {
                    "global" => Scope::Global,
                    _ => Scope::Project,
                }),
                difficulty: difficulty.as_deref().map(Difficulty::parse_name),
                severity: row.get("severity")?,
                status: row.get("status")?,
                usage_count: row.get::<_, i64>("usage_count")? as u64,
                file_size: row.get::<_, i64>("file_size")? as u64,
                effectiveness: row.get("effectiveness")?,
                success_rate: row.get("success_rate")?,
                last_used: match last_used {
                    Some(v) if !v.is_empty() => Some(
                        DateTime::parse_from_rfc3339(&v)
                            .map(|dt| dt.with_timezone(&Utc))
                            .map_err(|e| {
                                rusqlite::Error::FromSqlConversionFailure(
                                    0,
                                    rusqlite::types::Type::Text,
                                    Box::new(e),
                                )
                            })?,
                    ),
                    _ => None,
                },
                related_ids: serde_json::from_str(&related_json).unwrap_or_default(),
                parent_id: row.get("parent_id")?,
                child_ids: serde_json::from_str(&children_json).unwrap_or_default(),
                annotations: row.get("annotations")?,
            },
        })
    }

    // ========================================================================
    // MAINTENANCE
    // ========================================================================

    /// Reclaim space. Reports bytes freed and duration; also merges FTS
    /// segments and resets the deletion counter.
    pub fn vacuum(&self) -> Result<VacuumResult> {
        self.check_writable()?;
        let started = Instant::now();

        let writer = self
            .writer
            .lock()
            .map_err(|_| EngineError::Init("Writer lock poisoned".into()))?;

        let size_before = Self::database_size(&writer)?;
        writer.execute("INSERT INTO entries_fts(entries_fts) VALUES('optimize')", [])?;
        writer.execute_batch("VACUUM;")?;
        let size_after = Self::database_size(&writer)?;

        writer.execute(
            "UPDATE index_meta SET value = '0', updated_at = datetime('now')
             WHERE key = 'deleted_since_vacuum'",
            [],
        )?;
        writer.execute(
            "UPDATE index_meta SET value = ?1, updated_at = datetime('now')
             WHERE key = 'last_vacuum'",
            params![Utc::now().to_rfc3339()],
        )?;
        drop(writer);

        let result = VacuumResult {
            vacuum_performed: true,
            space_reclaimed_bytes: size_before.saturating_sub(size_after),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            "Vacuum reclaimed {} bytes in {}ms",
            result.space_reclaimed_bytes,
            result.duration_ms
        );
        Ok(result)
    }

    /// Vacuum when the deleted fraction crosses the configured threshold
    pub fn maybe_auto_vacuum(&self) -> Result<Option<VacuumResult>> {
        if !self.config.auto_vacuum {
            return Ok(None);
        }
        let stats = self.stats()?;
        let total = stats.total_entries as u64 + stats.deleted_since_vacuum;
        if total == 0 {
            return Ok(None);
        }
        let deleted_pct = stats.deleted_since_vacuum * 100 / total;
        if deleted_pct >= u64::from(self.config.vacuum_threshold) {
            return Ok(Some(self.vacuum()?));
        }
        Ok(None)
    }

    fn database_size(conn: &Connection) -> Result<u64> {
        let page_count: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
        let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
        Ok((page_count * page_size) as u64)
    }

    /// Drop and rewrite all inverted postings without losing entries
    pub fn rebuild_fts(&self) -> Result<()> {
        self.check_writable()?;
        let writer = self
            .writer
            .lock()
            .map_err(|_| EngineError::Init("Writer lock poisoned".into()))?;
        writer.execute_batch(super::migrations::DROP_FTS_SQL)?;
        writer.execute_batch(&super::migrations::fts_schema(&self.config))?;
        writer.execute("INSERT INTO entries_fts(entries_fts) VALUES('rebuild')", [])?;
        writer.execute_batch(
            "CREATE VIRTUAL TABLE IF NOT EXISTS entries_vocab USING fts5vocab('entries_fts', 'row');",
        )?;
        // A successful rebuild clears the read-only fallback
        self.read_only.store(false, Ordering::Relaxed);
        tracing::info!("FTS index rebuilt");
        Ok(())
    }

    /// Delete entries older than `max_age_days`; 0 deletes all
    pub fn cleanup(&self, max_age_days: u32) -> Result<usize> {
        self.check_writable()?;
        let deleted = {
            let writer = self
                .writer
                .lock()
                .map_err(|_| EngineError::Init("Writer lock poisoned".into()))?;
            if max_age_days == 0 {
                writer.execute("DELETE FROM entries", [])?
            } else {
                let cutoff = Utc::now() - Duration::days(i64::from(max_age_days));
                writer.execute(
                    "DELETE FROM entries WHERE last_modified < ?1",
                    params![cutoff.to_rfc3339()],
                )?
            }
        };
        if deleted > 0 {
            let writer = self
                .writer
                .lock()
                .map_err(|_| EngineError::Init("Writer lock poisoned".into()))?;
            writer.execute(
                "UPDATE index_meta
                 SET value = CAST(value AS INTEGER) + ?1, updated_at = datetime('now')
                 WHERE key = 'deleted_since_vacuum'",
                params![deleted as i64],
            )?;
        }
        self.mark_written();
        Ok(deleted)
    }

    /// PRAGMA integrity_check
    pub fn integrity_check(&self) -> Result<bool> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| EngineError::Init("Reader lock poisoned".into()))?;
        let verdict: String = reader.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        Ok(verdict == "ok")
    }

    /// Store-level statistics
    pub fn stats(&self) -> Result<IndexStats> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| EngineError::Init("Reader lock poisoned".into()))?;

        let total_entries: i64 =
            reader.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;

        let mut stmt = reader.prepare(
            "SELECT entry_type, COUNT(*) FROM entries GROUP BY entry_type ORDER BY entry_type",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })?;
        let mut entries_by_type = Vec::new();
        for row in rows {
            entries_by_type.push(row?);
        }

        let deleted: String = reader
            .query_row(
                "SELECT value FROM index_meta WHERE key = 'deleted_since_vacuum'",
                [],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or_else(|| "0".into());

        let database_size_bytes = Self::database_size(&reader)?;
        drop(stmt);
        drop(reader);

        Ok(IndexStats {
            total_entries: total_entries as usize,
            entries_by_type,
            deleted_since_vacuum: deleted.parse().unwrap_or(0),
            database_size_bytes,
            corrupt_rows_skipped: self.corrupt_rows_skipped.load(Ordering::Relaxed),
            last_write: self.last_write.lock().ok().and_then(|g| *g),
        })
    }
}
