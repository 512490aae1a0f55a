// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Certvault.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ApprovalStatus, OfficerId, RequestId, Role};

/// Kind of entity a lookup failed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Officer,
    Certificate,
    Slot,
    Request,
    WorkflowStep,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Officer => "officer",
            Self::Certificate => "certificate",
            Self::Slot => "slot",
            Self::Request => "approval request",
            Self::WorkflowStep => "workflow step",
        })
    }
}

/// Top-level error type for all Certvault operations.
///
/// Every variant is recoverable. Operations returning one of these leave no
/// partial state behind.
#[derive(Debug, Error)]
pub enum CertvaultError {
    // -- Custody errors --
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: String },

    #[error("invalid state transition for {entity}: {detail}")]
    InvalidStateTransition { entity: String, detail: String },

    #[error("slot unavailable: {0}")]
    SlotUnavailable(String),

    // -- Workflow errors --
    #[error("approver {approver} holds {role}, step requires {required}")]
    UnauthorizedApprover {
        approver: OfficerId,
        role: Role,
        required: Role,
    },

    #[error("approval request {request} is already {status}")]
    WorkflowTerminated {
        request: RequestId,
        status: ApprovalStatus,
    },

    #[error("{role} may not {action}")]
    AccessDenied { role: Role, action: String },

    #[error("invalid workflow configuration: {0}")]
    InvalidConfig(String),

    // -- Collaborators / persistence --
    #[error("notification gateway error: {0}")]
    Notification(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CertvaultError {
    pub fn not_found(kind: EntityKind, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn invalid_state(entity: impl std::fmt::Display, detail: impl Into<String>) -> Self {
        Self::InvalidStateTransition {
            entity: entity.to_string(),
            detail: detail.into(),
        }
    }

    /// Result code surfaced to calling layers.
    pub fn code(&self) -> ResultCode {
        match self {
            Self::NotFound { .. } => ResultCode::NotFound,
            Self::InvalidStateTransition { .. } => ResultCode::InvalidState,
            Self::SlotUnavailable(_) => ResultCode::SlotConflict,
            Self::UnauthorizedApprover { .. } | Self::AccessDenied { .. } => {
                ResultCode::Unauthorized
            }
            Self::WorkflowTerminated { .. } => ResultCode::WorkflowTerminated,
            Self::InvalidConfig(_) => ResultCode::InvalidConfig,
            Self::Notification(_)
            | Self::Database(_)
            | Self::Io(_)
            | Self::Serialization(_) => ResultCode::Internal,
        }
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CertvaultError>;

/// Result codes for API, console and UI adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultCode {
    Ok,
    NotFound,
    InvalidState,
    Unauthorized,
    SlotConflict,
    WorkflowTerminated,
    InvalidConfig,
    Internal,
}

impl ResultCode {
    pub fn of<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Self::Ok,
            Err(e) => e.code(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::NotFound => "NOT_FOUND",
            Self::InvalidState => "INVALID_STATE",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::SlotConflict => "SLOT_CONFLICT",
            Self::WorkflowTerminated => "WORKFLOW_TERMINATED",
            Self::InvalidConfig => "INVALID_CONFIG",
            Self::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which collaborator produced a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collaborator {
    AuditSink,
    NotificationGateway,
}

/// A collaborator failure captured alongside a successful core result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollaboratorWarning {
    pub collaborator: Collaborator,
    pub message: String,
}

impl CollaboratorWarning {
    pub fn audit(message: impl Into<String>) -> Self {
        Self {
            collaborator: Collaborator::AuditSink,
            message: message.into(),
        }
    }

    pub fn notification(message: impl Into<String>) -> Self {
        Self {
            collaborator: Collaborator::NotificationGateway,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for CollaboratorWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let who = match self.collaborator {
            Collaborator::AuditSink => "audit",
            Collaborator::NotificationGateway => "notification",
        };
        write!(f, "{who}: {}", self.message)
    }
}

/// A successful core result plus any collaborator warnings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome<T> {
    pub value: T,
    pub warnings: Vec<CollaboratorWarning>,
}

impl<T> Outcome<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(value: T, warnings: Vec<CollaboratorWarning>) -> Self {
        Self { value, warnings }
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            value: f(self.value),
            warnings: self.warnings,
        }
    }
}
