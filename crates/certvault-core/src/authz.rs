// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Authorization predicates. Every front end calls these instead of comparing
// roles itself.

use serde::{Deserialize, Serialize};

use crate::error::{CertvaultError, Result};
use crate::types::{Role, WorkflowStep};

/// Front-end modules subject to access control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    Dashboard,
    Certificates,
    BorrowReturn,
    Cabinets,
    Officers,
    Approvals,
    Workflow,
    AuditLog,
    Settings,
}

impl Module {
    /// Minimum role needed to open the module.
    pub fn required_role(&self) -> Role {
        match self {
            Self::Dashboard | Self::Certificates | Self::BorrowReturn => Role::User,
            Self::Officers | Self::Approvals | Self::Workflow => Role::DeptAdmin,
            Self::Cabinets | Self::AuditLog | Self::Settings => Role::SysAdmin,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Dashboard => "dashboard",
            Self::Certificates => "certificates",
            Self::BorrowReturn => "borrow-return",
            Self::Cabinets => "cabinets",
            Self::Officers => "officers",
            Self::Approvals => "approvals",
            Self::Workflow => "workflow",
            Self::AuditLog => "audit",
            Self::Settings => "settings",
        }
    }
}

pub fn can_access_module(role: Role, module: Module) -> bool {
    role.satisfies(module.required_role())
}

/// Whether `role` may decide `step`.
pub fn can_approve(role: Role, step: &WorkflowStep) -> bool {
    role.satisfies(step.approver_role)
}

/// Whether `actor` may assign `target` to another officer. Department
/// admins manage users and department admins; only system admins can grant
/// system admin.
pub fn can_manage_roles(actor: Role, target: Role) -> bool {
    actor >= Role::DeptAdmin && actor >= target
}

/// `can_access_module` as a `Result`, for operations that must refuse.
pub fn require_module(role: Role, module: Module) -> Result<()> {
    if can_access_module(role, module) {
        Ok(())
    } else {
        Err(CertvaultError::AccessDenied {
            role,
            action: format!("open {}", module.name()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StepId;

    fn step(role: Role) -> WorkflowStep {
        WorkflowStep {
            id: StepId(1),
            name: "review".into(),
            approver_role: role,
            is_enabled: true,
            order: 1,
        }
    }

    #[test]
    fn module_access_matches_navigation_rules() {
        assert!(can_access_module(Role::User, Module::BorrowReturn));
        assert!(can_access_module(Role::User, Module::Certificates));
        assert!(!can_access_module(Role::User, Module::Approvals));
        assert!(can_access_module(Role::DeptAdmin, Module::Workflow));
        assert!(!can_access_module(Role::DeptAdmin, Module::Cabinets));
        assert!(!can_access_module(Role::DeptAdmin, Module::AuditLog));
        assert!(can_access_module(Role::SysAdmin, Module::Settings));
    }

    #[test]
    fn approval_needs_equal_or_higher_role() {
        assert!(can_approve(Role::DeptAdmin, &step(Role::DeptAdmin)));
        assert!(can_approve(Role::SysAdmin, &step(Role::DeptAdmin)));
        assert!(!can_approve(Role::DeptAdmin, &step(Role::SysAdmin)));
        assert!(!can_approve(Role::User, &step(Role::DeptAdmin)));
    }

    #[test]
    fn only_sys_admin_grants_sys_admin() {
        assert!(can_manage_roles(Role::DeptAdmin, Role::DeptAdmin));
        assert!(!can_manage_roles(Role::DeptAdmin, Role::SysAdmin));
        assert!(can_manage_roles(Role::SysAdmin, Role::SysAdmin));
        assert!(!can_manage_roles(Role::User, Role::User));
    }

    #[test]
    fn require_module_reports_access_denied() {
        let err = require_module(Role::User, Module::AuditLog).unwrap_err();
        assert!(matches!(err, CertvaultError::AccessDenied { .. }));
        assert_eq!(err.to_string(), "USER may not open audit");
    }
}
