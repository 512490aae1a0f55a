// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Multi-step approval workflow: chain configuration and the request engine.

pub mod config;
pub mod engine;

pub use config::{WorkflowConfig, WorkflowEdit};
pub use engine::{DecisionOutcome, Execution, WorkflowEngine};
