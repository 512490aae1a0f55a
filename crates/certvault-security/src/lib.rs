// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! certvault-security: tamper-evident audit trail.
//!
//! Every custody transition, approval decision and overdue alert emitted by
//! the core lands in an append-only SQLite table whose rows are chained by
//! SHA-256, so that edits or deletions after the fact are detectable.

pub mod audit;
pub mod integrity;

pub use audit::{AuditEntry, AuditLog, ChainVerdict};
pub use integrity::{chain_hash, hash_bytes, GENESIS_HASH};
