//! Database schema migrations for SQLite.
//!
//! Versioned: each migration moves the schema from version N to N+1 inside
//! one transaction, and applied versions are recorded in `schema_migrations`.

use rusqlite::Connection;
use tally_core::now_millis;

use crate::error::{Result, StoreError};

/// Schema steps, in order. Step `i` moves the schema to version `i + 1`.
const MIGRATIONS: &[&str] = &[
    // v1: node and peer tables
    r#"
    CREATE TABLE nodes (
        subnet_id TEXT NOT NULL,
        node_id BLOB NOT NULL,
        sequence INTEGER NOT NULL,             -- u64 bit pattern
        last_link_state_update BLOB,           -- signed envelope
        peer_state BLOB NOT NULL,              -- CBOR NodePeerState
        PRIMARY KEY (subnet_id, node_id)
    );

    CREATE TABLE peers (
        subnet_id TEXT NOT NULL,
        node_id BLOB NOT NULL,
        state TEXT NOT NULL,                   -- 'request-peering' | 'peered'
        url TEXT NOT NULL,
        node_public_key BLOB NOT NULL,
        last_seen INTEGER NOT NULL,            -- Unix ms
        PRIMARY KEY (subnet_id, node_id)
    );

    CREATE INDEX idx_peers_state ON peers(state);
    "#,
];

/// Schema version this build writes.
pub const CURRENT_VERSION: u32 = MIGRATIONS.len() as u32;

/// Bring the schema up to [`CURRENT_VERSION`]. A no-op on an up-to-date database.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
    )?;

    let applied: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;
    if applied > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "schema version {applied} is newer than this build ({CURRENT_VERSION})"
        )));
    }

    let pending = &MIGRATIONS[applied as usize..];
    if pending.is_empty() {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for (offset, sql) in pending.iter().enumerate() {
        let version = applied + offset as u32 + 1;
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![version, now_millis()],
        )?;
        tracing::debug!(version, "applied table schema migration");
    }
    tx.commit()?;
    Ok(())
}
