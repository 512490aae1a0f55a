// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Audit trail: append-only SQLite log of every custody-relevant event.
//
// Schema:
//   audit_log(
//     id          INTEGER PRIMARY KEY AUTOINCREMENT,
//     timestamp   TEXT    NOT NULL,   -- RFC 3339
//     actor       TEXT    NOT NULL,   -- e.g. "Li Qiang (001235)", "system"
//     action      TEXT    NOT NULL,   -- e.g. "certificate_borrowed"
//     details     TEXT    NOT NULL,
//     level       TEXT    NOT NULL,   -- INFO | WARNING | CRITICAL
//     prev_hash   TEXT    NOT NULL,   -- entry_hash of the previous row
//     entry_hash  TEXT    NOT NULL    -- SHA-256 over prev_hash + fields
//   )

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use certvault_core::error::{CertvaultError, Result};
use certvault_core::sink::AuditSink;
use certvault_core::types::{AuditEvent, AuditLevel};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::integrity::{chain_hash, GENESIS_HASH};

const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS audit_log (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp   TEXT    NOT NULL,
    actor       TEXT    NOT NULL,
    action      TEXT    NOT NULL,
    details     TEXT    NOT NULL,
    level       TEXT    NOT NULL,
    prev_hash   TEXT    NOT NULL,
    entry_hash  TEXT    NOT NULL
);";

const SELECT_COLUMNS: &str =
    "SELECT id, timestamp, actor, action, details, level, prev_hash, entry_hash FROM audit_log";

// ---------------------------------------------------------------------------
// Local error helpers
// ---------------------------------------------------------------------------

/// Convert a `rusqlite::Error` into a `CertvaultError::Database`.
fn db_err(e: rusqlite::Error) -> CertvaultError {
    CertvaultError::Database(e.to_string())
}

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// A single stored entry in the audit log, used for queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub timestamp: String,
    pub actor: String,
    pub action: String,
    pub details: String,
    pub level: AuditLevel,
    pub prev_hash: String,
    pub entry_hash: String,
}

impl AuditEntry {
    fn expected_hash(&self) -> String {
        chain_hash(
            &self.prev_hash,
            &[
                &self.timestamp,
                &self.actor,
                &self.action,
                &self.details,
                self.level.label(),
            ],
        )
    }
}

/// Result of walking the hash chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainVerdict {
    Intact { entries: u64 },
    /// The first entry whose stored hash or back-link does not match.
    Broken { entry_id: i64 },
}

/// Append-only audit log backed by a SQLite database.
///
/// The connection sits behind a mutex so the log can be shared as an
/// `AuditSink` across threads; appends are serialized, which keeps the hash
/// chain linear.
pub struct AuditLog {
    conn: Mutex<Connection>,
}

impl AuditLog {
    /// Open (or create) the audit database at `path`.
    ///
    /// WAL mode is enabled for better concurrent-read performance.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err)?;

        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(db_err)?;
        conn.execute_batch(CREATE_TABLE_SQL).map_err(db_err)?;

        debug!("audit log opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory audit database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(CREATE_TABLE_SQL).map_err(db_err)?;

        debug!("in-memory audit log opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CertvaultError::Database("audit connection lock poisoned".into()))
    }

    /// Append an event, linking it to the previous entry's hash.
    #[instrument(skip(self, event), fields(action = %event.action, actor = %event.actor))]
    pub fn record(&self, event: &AuditEvent) -> Result<i64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;

        let prev_hash: String = tx
            .query_row(
                "SELECT entry_hash FROM audit_log ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?
            .unwrap_or_else(|| GENESIS_HASH.to_owned());

        let timestamp = event.timestamp.to_rfc3339();
        let level = event.level.label();
        let entry_hash = chain_hash(
            &prev_hash,
            &[&timestamp, &event.actor, &event.action, &event.details, level],
        );

        tx.execute(
            "INSERT INTO audit_log (timestamp, actor, action, details, level, prev_hash, entry_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                timestamp,
                event.actor,
                event.action,
                event.details,
                level,
                prev_hash,
                entry_hash
            ],
        )
        .map_err(db_err)?;
        let id = tx.last_insert_rowid();
        tx.commit().map_err(db_err)?;

        debug!(id, "audit entry recorded");
        Ok(id)
    }

    /// Retrieve the most recent `limit` entries, ordered newest-first.
    pub fn recent_entries(&self, limit: u32) -> Result<Vec<AuditEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("{SELECT_COLUMNS} ORDER BY id DESC LIMIT ?1"))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![limit], row_to_entry)
            .map_err(db_err)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(db_err)?);
        }
        Ok(entries)
    }

    /// Retrieve all entries by one actor, oldest first.
    pub fn entries_for_actor(&self, actor: &str) -> Result<Vec<AuditEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("{SELECT_COLUMNS} WHERE actor = ?1 ORDER BY id ASC"))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![actor], row_to_entry)
            .map_err(db_err)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(db_err)?);
        }
        Ok(entries)
    }

    /// Return the total number of entries in the audit log.
    pub fn count(&self) -> Result<u64> {
        let conn = self.lock()?;
        conn.query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))
            .map_err(db_err)
    }

    /// Walk the whole log and check every back-link and entry hash.
    pub fn verify_chain(&self) -> Result<ChainVerdict> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("{SELECT_COLUMNS} ORDER BY id ASC"))
            .map_err(db_err)?;
        let rows = stmt.query_map([], row_to_entry).map_err(db_err)?;

        let mut expected_prev = GENESIS_HASH.to_owned();
        let mut entries = 0u64;
        for row in rows {
            let entry = row.map_err(db_err)?;
            if entry.prev_hash != expected_prev || entry.expected_hash() != entry.entry_hash {
                warn!(entry_id = entry.id, "audit chain broken");
                return Ok(ChainVerdict::Broken { entry_id: entry.id });
            }
            expected_prev = entry.entry_hash;
            entries += 1;
        }
        Ok(ChainVerdict::Intact { entries })
    }
}

impl AuditSink for AuditLog {
    fn append(&self, event: &AuditEvent) -> Result<()> {
        self.record(event).map(|_| ())
    }
}

/// Map a SQLite row to an `AuditEntry`. Column order matches `SELECT_COLUMNS`.
fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEntry> {
    let level_str: String = row.get(5)?;
    let level = AuditLevel::from_label(&level_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Text,
            format!("unknown audit level {level_str}").into(),
        )
    })?;

    Ok(AuditEntry {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        actor: row.get(2)?,
        action: row.get(3)?,
        details: row.get(4)?,
        level,
        prev_hash: row.get(6)?,
        entry_hash: row.get(7)?,
    })
}
