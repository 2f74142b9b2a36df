use rusqlite::Connection;

use crate::error::Result;

/// Current schema version. Bumped whenever a migration is added below;
/// `migrate` applies every migration whose version is greater than the
/// value on disk and then writes the new version in the same transaction.
pub const SCHEMA_VERSION: i64 = 1;

pub fn open_and_migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_meta (
            id      INTEGER PRIMARY KEY CHECK (id = 0),
            version INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            name       TEXT NOT NULL,
            leaf_id    TEXT,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id INTEGER NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            role       TEXT NOT NULL,
            content    TEXT NOT NULL,
            timestamp  INTEGER NOT NULL,
            ephemeral  INTEGER NOT NULL DEFAULT 0,
            tool_name  TEXT,
            tool_input TEXT,
            status     TEXT NOT NULL DEFAULT 'sent',
            entry_id   TEXT,
            parent_id  TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_entry ON messages(session_id, entry_id);

        CREATE TABLE IF NOT EXISTS labels (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id INTEGER NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            target_id  TEXT NOT NULL,
            label      TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_labels_unique ON labels(session_id, label);

        CREATE TABLE IF NOT EXISTS compactions (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id        INTEGER NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            summary           TEXT NOT NULL,
            first_kept_msg_id INTEGER NOT NULL,
            tokens_before     INTEGER NOT NULL,
            details           TEXT,
            created_at        INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_compactions_session ON compactions(session_id, id);

        CREATE TABLE IF NOT EXISTS agent_runs (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id        INTEGER NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            status            TEXT NOT NULL,
            pending_tools     TEXT,
            current_tool_idx  INTEGER NOT NULL DEFAULT 0,
            tool_results      TEXT,
            assistant_content TEXT,
            created_at        INTEGER NOT NULL,
            updated_at        INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_agent_runs_session ON agent_runs(session_id, id);
        "#,
    )?;

    let version: i64 = conn
        .query_row("SELECT version FROM schema_meta WHERE id = 0", [], |row| row.get(0))
        .unwrap_or(0);

    migrate(conn, version)?;

    conn.execute(
        "INSERT INTO schema_meta (id, version) VALUES (0, ?1)
         ON CONFLICT(id) DO UPDATE SET version = excluded.version",
        [SCHEMA_VERSION],
    )?;

    Ok(())
}

/// Additive migrations live here, each guarded by `from < N`. A migration
/// that adds a column tolerates "duplicate column name" so re-running it
/// against a database that already has the column is a no-op rather than
/// an error.
fn migrate(conn: &Connection, from: i64) -> Result<()> {
    if from < 1 {
        // Initial schema is created unconditionally above via CREATE TABLE
        // IF NOT EXISTS; nothing else to backfill for version 1.
        let _ = conn;
    }
    Ok(())
}

/// Runs `sql`, swallowing only a "duplicate column name" failure — used by
/// future migrations that `ALTER TABLE ... ADD COLUMN`.
#[allow(dead_code)]
fn add_column_if_absent(conn: &Connection, sql: &str) -> Result<()> {
    match conn.execute(sql, []) {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(_, Some(msg))) if msg.contains("duplicate column") => {
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
