//! Database schema migrations.
//!
//! Each store owns its own database file and schema. We use a simple
//! versioned migration system with a `schema_migrations` table; `migrate`
//! is idempotent and safe to call on every open.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Which store's schema to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    Queue,
    History,
    State,
}

/// Current schema version, shared by all three stores.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate a store database.
pub fn migrate(conn: &mut Connection, schema: Schema) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, schema, version)?;
            tracing::debug!(?schema, version, "applied migration");

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, parley_core::now_millis()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, schema: Schema, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn, schema),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: initial schema for each store.
fn apply_v1(conn: &Connection, schema: Schema) -> Result<()> {
    let sql = match schema {
        // FIFO order comes from the autoincrement rowid: the smallest id
        // is the oldest entry.
        Schema::Queue => {
            "CREATE TABLE sync_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                body BLOB NOT NULL       -- canonical message bytes
            )"
        }
        // LIFO order: the largest id is the newest entry.
        Schema::History => {
            "CREATE TABLE history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                body BLOB NOT NULL       -- canonical message bytes
            )"
        }
        // A single key-value row holds the counter.
        Schema::State => {
            "CREATE TABLE state (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL
            )"
        }
    };

    conn.execute(sql, [])?;
    Ok(())
}
