// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for audit recording and chain verification in the
// certvault-security crate.

use chrono::Utc;
use criterion::{Criterion, black_box, criterion_group, criterion_main};

use certvault_core::types::AuditEvent;
use certvault_security::AuditLog;

/// Benchmark recording an audit entry to an in-memory SQLite database.
///
/// Each record reads the previous hash and inserts inside one transaction,
/// so this measures the full cost of extending the chain.
fn bench_audit_record(c: &mut Criterion) {
    c.bench_function("audit_record (in-memory SQLite)", |b| {
        let log = AuditLog::open_in_memory().expect("open in-memory audit log");
        let event = AuditEvent::info(
            Utc::now(),
            "Li Qiang (001235)",
            "certificate_borrowed",
            "UK-2024-002 from slot 2, reason: field investigation",
        );

        b.iter(|| {
            log.record(black_box(&event)).expect("record failed");
        });
    });
}

/// Benchmark verifying a 1 000-entry chain.
fn bench_verify_chain(c: &mut Criterion) {
    let log = AuditLog::open_in_memory().expect("open in-memory audit log");
    for i in 0..1_000 {
        let event = AuditEvent::info(Utc::now(), "system", "overdue_alert", format!("c{i}"));
        log.record(&event).expect("record failed");
    }

    c.bench_function("verify_chain (1000 entries)", |b| {
        b.iter(|| {
            black_box(log.verify_chain().expect("verify failed"));
        });
    });
}

criterion_group!(benches, bench_audit_record, bench_verify_chain);
criterion_main!(benches);
