//! Database Migrations
//!
//! Schema migration definitions for the index store.

use crate::config::{IndexConfig, Tokenizer};

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema: row store, FTS5 index, sync triggers",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "FTS5 vocabulary table for fuzzy matching",
        up: MIGRATION_V2_UP,
    },
    Migration {
        version: 3,
        description: "Index metadata: deletion counter for vacuum triggering",
        up: MIGRATION_V3_UP,
    },
];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: Initial schema
///
/// The row store keeps metadata verbatim; `search_text` and `tags_text` are
/// denormalized copies (content + annotations, space-joined tags) so the
/// external-content FTS5 table can index them directly.
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL,
    applied_at TEXT NOT NULL
);
INSERT INTO schema_version (version, applied_at)
SELECT 0, datetime('now') WHERE NOT EXISTS (SELECT 1 FROM schema_version);

CREATE TABLE IF NOT EXISTS entries (
    id TEXT PRIMARY KEY,
    entry_type TEXT NOT NULL DEFAULT 'knowledge',
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    category TEXT,
    path TEXT NOT NULL DEFAULT '',
    hash TEXT NOT NULL DEFAULT '',
    last_modified TEXT NOT NULL,
    created_at TEXT NOT NULL,

    -- Metadata (semantic values, preserved verbatim on output)
    tags TEXT NOT NULL DEFAULT '[]',
    agent_types TEXT NOT NULL DEFAULT '[]',
    project_id TEXT,
    language TEXT,
    scope TEXT,
    difficulty TEXT,
    severity TEXT,
    status TEXT,
    usage_count INTEGER NOT NULL DEFAULT 0,
    file_size INTEGER NOT NULL DEFAULT 0,
    effectiveness REAL,
    success_rate REAL,
    last_used TEXT,
    related_ids TEXT NOT NULL DEFAULT '[]',
    parent_id TEXT,
    child_ids TEXT NOT NULL DEFAULT '[]',
    annotations TEXT,

    -- Denormalized search columns fed to FTS5
    search_text TEXT NOT NULL,
    tags_text TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_entries_type ON entries(entry_type);
CREATE INDEX IF NOT EXISTS idx_entries_category ON entries(category);
CREATE INDEX IF NOT EXISTS idx_entries_project ON entries(project_id);
CREATE INDEX IF NOT EXISTS idx_entries_modified ON entries(last_modified);

UPDATE schema_version SET version = 1, applied_at = datetime('now');
"#;

/// V2: fts5vocab over the main index, used for fuzzy-query term expansion
const MIGRATION_V2_UP: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS entries_vocab USING fts5vocab('entries_fts', 'row');

UPDATE schema_version SET version = 2, applied_at = datetime('now');
"#;

/// V3: key/value metadata; `deleted_since_vacuum` drives the auto-vacuum
/// threshold check
const MIGRATION_V3_UP: &str = r#"
CREATE TABLE IF NOT EXISTS index_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

INSERT OR IGNORE INTO index_meta (key, value, updated_at)
VALUES ('deleted_since_vacuum', '0', datetime('now'));
INSERT OR IGNORE INTO index_meta (key, value, updated_at)
VALUES ('last_vacuum', '', datetime('now'));

UPDATE schema_version SET version = 3, applied_at = datetime('now');
"#;

/// FTS5 table + sync triggers, parameterized by tokenizer configuration.
///
/// Built dynamically (not a const migration) because the tokenize= clause
/// depends on config; `apply_migrations` runs it after V1 and `rebuild`
/// re-runs it after dropping the index.
pub fn fts_schema(config: &IndexConfig) -> String {
    let tokenize = match (config.tokenizer, config.remove_accents) {
        (Tokenizer::Porter, true) => "porter unicode61 remove_diacritics 2",
        (Tokenizer::Porter, false) => "porter unicode61 remove_diacritics 0",
        (Tokenizer::Simple, true) => "unicode61 remove_diacritics 2",
        (Tokenizer::Simple, false) => "unicode61 remove_diacritics 0",
    };

    format!(
        r#"
CREATE VIRTUAL TABLE IF NOT EXISTS entries_fts USING fts5(
    id, title, search_text, tags_text, category,
    content='entries',
    content_rowid='rowid',
    tokenize='{tokenize}'
);

CREATE TRIGGER IF NOT EXISTS entries_ai AFTER INSERT ON entries BEGIN
    INSERT INTO entries_fts(rowid, id, title, search_text, tags_text, category)
    VALUES (NEW.rowid, NEW.id, NEW.title, NEW.search_text, NEW.tags_text, NEW.category);
END;

CREATE TRIGGER IF NOT EXISTS entries_ad AFTER DELETE ON entries BEGIN
    INSERT INTO entries_fts(entries_fts, rowid, id, title, search_text, tags_text, category)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.title, OLD.search_text, OLD.tags_text, OLD.category);
END;

CREATE TRIGGER IF NOT EXISTS entries_au AFTER UPDATE ON entries BEGIN
    INSERT INTO entries_fts(entries_fts, rowid, id, title, search_text, tags_text, category)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.title, OLD.search_text, OLD.tags_text, OLD.category);
    INSERT INTO entries_fts(rowid, id, title, search_text, tags_text, category)
    VALUES (NEW.rowid, NEW.id, NEW.title, NEW.search_text, NEW.tags_text, NEW.category);
END;
"#
    )
}

/// SQL that tears the FTS index down for a rebuild
pub const DROP_FTS_SQL: &str = r#"
DROP TRIGGER IF EXISTS entries_ai;
DROP TRIGGER IF EXISTS entries_ad;
DROP TRIGGER IF EXISTS entries_au;
DROP TABLE IF EXISTS entries_vocab;
DROP TABLE IF EXISTS entries_fts;
"#;

/// Get current schema version from database
pub fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or(Ok(0))
}

/// Apply pending migrations
pub fn apply_migrations(conn: &rusqlite::Connection, config: &IndexConfig) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                "Applying migration v{}: {}",
                migration.version,
                migration.description
            );

            // Use execute_batch to handle multi-statement SQL including triggers
            conn.execute_batch(migration.up)?;

            // The FTS table carries a config-dependent tokenize= clause, so it
            // is created right after the row store rather than as const SQL
            if migration.version == 1 {
                conn.execute_batch(&fts_schema(config))?;
            }

            applied += 1;
        }
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_migrations_apply_cleanly() {
        let conn = Connection::open_in_memory().unwrap();
        let applied = apply_migrations(&conn, &IndexConfig::default()).unwrap();
        assert_eq!(applied as usize, MIGRATIONS.len());
        assert_eq!(get_current_version(&conn).unwrap(), 3);

        // Second run is a no-op
        let applied = apply_migrations(&conn, &IndexConfig::default()).unwrap();
        assert_eq!(applied, 0);
    }

    #[test]
    fn test_fts_triggers_stay_in_sync() {
        let conn = Connection::open_in_memory().unwrap();
        apply_migrations(&conn, &IndexConfig::default()).unwrap();

        conn.execute(
            "INSERT INTO entries (id, title, content, last_modified, created_at, search_text, tags_text)
             VALUES ('e1', 'Connection pooling', 'Reuse database connections', datetime('now'), datetime('now'),
                     'Reuse database connections', 'performance')",
            [],
        )
        .unwrap();

        let hits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM entries_fts WHERE entries_fts MATCH 'pooling'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(hits, 1);

        conn.execute("DELETE FROM entries WHERE id = 'e1'", []).unwrap();
        let hits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM entries_fts WHERE entries_fts MATCH 'pooling'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(hits, 0);
    }

    #[test]
    fn test_tokenizer_clause_follows_config() {
        let cfg = IndexConfig {
            tokenizer: Tokenizer::Simple,
            remove_accents: false,
            ..Default::default()
        };
        let sql = fts_schema(&cfg);
        assert!(sql.contains("unicode61 remove_diacritics 0"));
        assert!(!sql.contains("porter"));
    }
}
