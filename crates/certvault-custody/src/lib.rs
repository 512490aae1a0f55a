// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Certvault Custody: certificate registry, cabinet slots, approval workflow
// and overdue monitoring.  Front ends talk to `CustodyService`; the pieces
// underneath are public for embedding and testing.

pub mod directory;
pub mod notify;
pub mod overdue;
pub mod registry;
pub mod retry;
pub mod service;
pub mod slots;
pub mod workflow;

pub use directory::OfficerDirectory;
pub use notify::{
    DeliveryError, LogGateway, NotificationGateway, OverdueAlert, RecordingGateway, SmsGateway,
};
pub use overdue::{OverdueMonitor, OverdueReport};
pub use registry::{BorrowReceipt, CertificateRegistry, NewCertificate, ReturnReceipt};
pub use service::{CustodyService, CustodySettings};
pub use slots::SlotAllocator;
pub use workflow::{DecisionOutcome, Execution, WorkflowConfig, WorkflowEdit, WorkflowEngine};
