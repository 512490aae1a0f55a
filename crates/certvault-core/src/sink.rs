// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Audit sink seam. The core appends events and never reads them back.

use crate::error::Result;
use crate::types::AuditEvent;

/// Append-only destination for audit events.
///
/// Callers treat this as fire-and-forget: an `Err` is reported as a warning
/// and never fails the operation that produced the event.
pub trait AuditSink: Send + Sync {
    fn append(&self, event: &AuditEvent) -> Result<()>;
}

/// Sink that drops every event. Used when auditing is disabled in config.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardSink;

impl AuditSink for DiscardSink {
    fn append(&self, _event: &AuditEvent) -> Result<()> {
        Ok(())
    }
}

/// Sink that keeps events in memory. Backs tests and audit-less terminals
/// that still want to show recent activity.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: std::sync::Mutex<Vec<AuditEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything appended so far, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Number of events with the given action.
    pub fn count_action(&self, action: &str) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .filter(|e| e.action == action)
            .count()
    }
}

impl AuditSink for MemorySink {
    fn append(&self, event: &AuditEvent) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(event.clone());
        Ok(())
    }
}
