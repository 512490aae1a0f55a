// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Certvault: Core types, errors, clock and authorization rules shared across
// all crates.

pub mod authz;
pub mod clock;
pub mod config;
pub mod error;
pub mod human_errors;
pub mod sink;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CertvaultConfig;
pub use error::{CertvaultError, CollaboratorWarning, Outcome, ResultCode};
pub use sink::AuditSink;
pub use types::*;
