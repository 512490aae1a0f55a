// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Operator-facing error messages for the self-service terminal and admin
// console.
//
// Every error is mapped to a plain sentence with a concrete next step. The
// severity drives how a front end presents it.

use crate::error::{CertvaultError, EntityKind};

/// Severity of an error from the operator's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Try again; nothing is wrong with the request itself.
    Transient,
    /// The operator must do something first (pick another slot, return the key).
    ActionRequired,
    /// The request can never succeed as asked.
    Permanent,
    /// An administrator has to step in.
    AdminRequired,
}

/// A human-readable error with plain message and actionable suggestion.
#[derive(Debug, Clone)]
pub struct HumanError {
    /// One-line summary (shown as a heading).
    pub message: String,
    /// What the operator should try (shown as body text).
    pub suggestion: String,
    /// Whether retrying the same request may succeed.
    pub retriable: bool,
    pub severity: Severity,
}

/// Convert a `CertvaultError` into a `HumanError` for display.
pub fn humanize_error(err: &CertvaultError) -> HumanError {
    match err {
        CertvaultError::NotFound { kind, id } => humanize_not_found(*kind, id),

        CertvaultError::InvalidStateTransition { entity, detail } => HumanError {
            message: format!("{entity} can't do that right now."),
            suggestion: format!("Check the certificate's current status and try the matching action. ({detail})"),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        CertvaultError::SlotUnavailable(detail) => HumanError {
            message: "No cabinet slot is available.".into(),
            suggestion: format!("Choose a different slot or ask an administrator to clear faulty slots. ({detail})"),
            retriable: false,
            severity: Severity::AdminRequired,
        },

        CertvaultError::UnauthorizedApprover { required, .. } => HumanError {
            message: "You can't approve this step.".into(),
            suggestion: format!("This step must be decided by a {required} or higher."),
            retriable: false,
            severity: Severity::Permanent,
        },

        CertvaultError::WorkflowTerminated { status, .. } => HumanError {
            message: format!("This request has already been {}.", status.label().to_ascii_lowercase()),
            suggestion: "Submit a new request if the certificate is still needed.".into(),
            retriable: false,
            severity: Severity::Permanent,
        },

        CertvaultError::AccessDenied { .. } => HumanError {
            message: "You don't have access to this function.".into(),
            suggestion: "Ask an administrator if you need this permission.".into(),
            retriable: false,
            severity: Severity::Permanent,
        },

        CertvaultError::InvalidConfig(detail) => HumanError {
            message: "That workflow change isn't allowed.".into(),
            suggestion: format!("Every workflow needs at least one step and each step needs its own position. ({detail})"),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        CertvaultError::Notification(_) => HumanError {
            message: "The message gateway didn't respond.".into(),
            suggestion: "Alerts will be retried on the next scan. Check the SMS gateway settings.".into(),
            retriable: true,
            severity: Severity::Transient,
        },

        CertvaultError::Database(_) => HumanError {
            message: "The audit store had a problem.".into(),
            suggestion: "Try again. If this keeps happening, check the disk holding the data directory.".into(),
            retriable: true,
            severity: Severity::Transient,
        },

        CertvaultError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::NotFound {
                HumanError {
                    message: "A data file couldn't be found.".into(),
                    suggestion: "Check the data directory path in the environment.".into(),
                    retriable: false,
                    severity: Severity::AdminRequired,
                }
            } else if io_err.kind() == std::io::ErrorKind::PermissionDenied {
                HumanError {
                    message: "The terminal doesn't have permission to use its data files.".into(),
                    suggestion: "Ask an administrator to fix the data directory permissions.".into(),
                    retriable: false,
                    severity: Severity::AdminRequired,
                }
            } else {
                HumanError {
                    message: "There was a problem reading or writing a file.".into(),
                    suggestion: "Try again. If this keeps happening, the disk may be full.".into(),
                    retriable: true,
                    severity: Severity::Transient,
                }
            }
        }

        CertvaultError::Serialization(_) => HumanError {
            message: "A data file is damaged.".into(),
            suggestion: "Check config.json and the inventory file for syntax errors.".into(),
            retriable: false,
            severity: Severity::AdminRequired,
        },
    }
}

fn humanize_not_found(kind: EntityKind, id: &str) -> HumanError {
    let (message, suggestion) = match kind {
        EntityKind::Certificate => (
            format!("Certificate {id} isn't registered."),
            "Scan the key again or check the serial number with an administrator.",
        ),
        EntityKind::Officer => (
            format!("Officer {id} isn't known to this terminal."),
            "Check the badge, or ask an administrator to provision the account.",
        ),
        EntityKind::Slot => (
            format!("Cabinet slot {id} doesn't exist."),
            "Pick a slot number shown on the cabinet.",
        ),
        EntityKind::Request => (
            format!("Approval request {id} doesn't exist."),
            "List pending approvals and copy the request id again.",
        ),
        EntityKind::WorkflowStep => (
            format!("Workflow step {id} doesn't exist."),
            "List the workflow configuration and use one of the shown step ids.",
        ),
    };
    HumanError {
        message,
        suggestion: suggestion.into(),
        retriable: false,
        severity: Severity::ActionRequired,
    }
}
