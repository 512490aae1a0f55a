// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Approval chain definition and its typed edit operations.

use std::collections::HashSet;

use certvault_core::error::{CertvaultError, EntityKind, Result};
use certvault_core::types::{Role, StepId, WorkflowStep};
use serde::{Deserialize, Serialize};

/// One typed change to the workflow definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WorkflowEdit {
    AddStep { name: String, approver_role: Role },
    RemoveStep { id: StepId },
    RenameStep { id: StepId, name: String },
    SetApproverRole { id: StepId, role: Role },
    ToggleEnabled { id: StepId },
    /// Move a step to 1-based `position`; the others keep their relative order.
    Reorder { id: StepId, position: u32 },
}

/// The ordered list of approval steps that future requests are chained from.
///
/// Always has at least one enabled step, unique ids, unique orders and
/// non-blank names. Steps are kept sorted by `order`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowConfig {
    steps: Vec<WorkflowStep>,
}

impl WorkflowConfig {
    /// Validate and adopt a full step list.
    pub fn new(mut steps: Vec<WorkflowStep>) -> Result<Self> {
        if steps.is_empty() {
            return Err(CertvaultError::InvalidConfig(
                "a workflow needs at least one step".into(),
            ));
        }

        let mut ids = HashSet::new();
        let mut orders = HashSet::new();
        for step in &steps {
            if step.name.trim().is_empty() {
                return Err(CertvaultError::InvalidConfig(format!(
                    "step {} has an empty name",
                    step.id
                )));
            }
            if !ids.insert(step.id) {
                return Err(CertvaultError::InvalidConfig(format!(
                    "step id {} appears twice",
                    step.id
                )));
            }
            if !orders.insert(step.order) {
                return Err(CertvaultError::InvalidConfig(format!(
                    "order {} is used by more than one step",
                    step.order
                )));
            }
        }

        steps.sort_by_key(|s| s.order);
        let config = Self { steps };
        config.require_enabled_step()?;
        Ok(config)
    }

    fn require_enabled_step(&self) -> Result<()> {
        if self.steps.iter().any(|s| s.is_enabled) {
            Ok(())
        } else {
            Err(CertvaultError::InvalidConfig(
                "at least one workflow step must stay enabled".into(),
            ))
        }
    }

    /// All steps, enabled or not, in order.
    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }

    /// The chain a request submitted now would follow: enabled steps only.
    pub fn chain(&self) -> Vec<WorkflowStep> {
        self.steps.iter().filter(|s| s.is_enabled).cloned().collect()
    }

    pub fn step(&self, id: StepId) -> Result<&WorkflowStep> {
        self.steps
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| CertvaultError::not_found(EntityKind::WorkflowStep, id))
    }

    fn step_mut(&mut self, id: StepId) -> Result<&mut WorkflowStep> {
        self.steps
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| CertvaultError::not_found(EntityKind::WorkflowStep, id))
    }

    /// Apply one edit. On error the configuration is unchanged.
    pub fn apply(&mut self, edit: WorkflowEdit) -> Result<()> {
        let mut next = self.clone();
        next.apply_in_place(edit)?;
        next.require_enabled_step()?;
        *self = next;
        Ok(())
    }

    fn apply_in_place(&mut self, edit: WorkflowEdit) -> Result<()> {
        match edit {
            WorkflowEdit::AddStep {
                name,
                approver_role,
            } => {
                let name = non_blank(name)?;
                let id = next_after(self.steps.iter().map(|s| s.id.0), "step id")?;
                let order = next_after(self.steps.iter().map(|s| s.order), "step order")?;
                self.steps.push(WorkflowStep {
                    id: StepId(id),
                    name,
                    approver_role,
                    is_enabled: true,
                    order,
                });
            }
            WorkflowEdit::RemoveStep { id } => {
                self.step(id)?;
                if self.steps.len() == 1 {
                    return Err(CertvaultError::InvalidConfig(
                        "cannot remove the only workflow step".into(),
                    ));
                }
                self.steps.retain(|s| s.id != id);
                self.renumber();
            }
            WorkflowEdit::RenameStep { id, name } => {
                let name = non_blank(name)?;
                self.step_mut(id)?.name = name;
            }
            WorkflowEdit::SetApproverRole { id, role } => {
                self.step_mut(id)?.approver_role = role;
            }
            WorkflowEdit::ToggleEnabled { id } => {
                let step = self.step_mut(id)?;
                step.is_enabled = !step.is_enabled;
            }
            WorkflowEdit::Reorder { id, position } => {
                let len = self.steps.len() as u32;
                if position == 0 || position > len {
                    return Err(CertvaultError::InvalidConfig(format!(
                        "position {position} is outside 1..={len}"
                    )));
                }
                let from = self
                    .steps
                    .iter()
                    .position(|s| s.id == id)
                    .ok_or_else(|| CertvaultError::not_found(EntityKind::WorkflowStep, id))?;
                let step = self.steps.remove(from);
                self.steps.insert(position as usize - 1, step);
                self.renumber();
            }
        }
        Ok(())
    }

    /// Reassign orders 1..=n following the current sequence.
    fn renumber(&mut self) {
        for (i, step) in self.steps.iter_mut().enumerate() {
            step.order = i as u32 + 1;
        }
    }
}

impl Default for WorkflowConfig {
    /// Department admin approval, then a system admin review that ships
    /// disabled.
    fn default() -> Self {
        Self {
            steps: vec![
                WorkflowStep {
                    id: StepId(1),
                    name: "Department admin approval".into(),
                    approver_role: Role::DeptAdmin,
                    is_enabled: true,
                    order: 1,
                },
                WorkflowStep {
                    id: StepId(2),
                    name: "System admin review".into(),
                    approver_role: Role::SysAdmin,
                    is_enabled: false,
                    order: 2,
                },
            ],
        }
    }
}

impl<'de> Deserialize<'de> for WorkflowConfig {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            steps: Vec<WorkflowStep>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Self::new(raw.steps).map_err(serde::de::Error::custom)
    }
}

/// One past the largest value, refusing to wrap.
fn next_after(values: impl Iterator<Item = u32>, what: &str) -> Result<u32> {
    values
        .max()
        .unwrap_or(0)
        .checked_add(1)
        .ok_or_else(|| CertvaultError::InvalidConfig(format!("no {what} left after {}", u32::MAX)))
}

fn non_blank(name: String) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CertvaultError::InvalidConfig("step name must not be empty".into()));
    }
    Ok(trimmed.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: u32, order: u32, role: Role) -> WorkflowStep {
        WorkflowStep {
            id: StepId(id),
            name: format!("step {id}"),
            approver_role: role,
            is_enabled: true,
            order,
        }
    }

    fn ids(config: &WorkflowConfig) -> Vec<u32> {
        config.steps().iter().map(|s| s.id.0).collect()
    }

    #[test]
    fn default_chain_has_one_enabled_step() {
        let config = WorkflowConfig::default();
        assert_eq!(config.steps().len(), 2);
        let chain = config.chain();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].approver_role, Role::DeptAdmin);
    }

    #[test]
    fn new_sorts_by_order() {
        let config = WorkflowConfig::new(vec![
            step(1, 20, Role::SysAdmin),
            step(2, 10, Role::DeptAdmin),
        ])
        .unwrap();
        assert_eq!(ids(&config), vec![2, 1]);
    }

    #[test]
    fn new_rejects_bad_lists() {
        assert!(WorkflowConfig::new(vec![]).is_err());
        assert!(WorkflowConfig::new(vec![step(1, 1, Role::User), step(2, 1, Role::User)]).is_err());
        assert!(WorkflowConfig::new(vec![step(1, 1, Role::User), step(1, 2, Role::User)]).is_err());

        let mut blank = step(1, 1, Role::User);
        blank.name = "  ".into();
        let err = WorkflowConfig::new(vec![blank]).unwrap_err();
        assert!(matches!(err, CertvaultError::InvalidConfig(_)));
    }

    #[test]
    fn add_step_appends_enabled() {
        let mut config = WorkflowConfig::default();
        config
            .apply(WorkflowEdit::AddStep {
                name: "Security officer sign-off".into(),
                approver_role: Role::SysAdmin,
            })
            .unwrap();
        let added = config.steps().last().unwrap();
        assert_eq!(added.id, StepId(3));
        assert_eq!(added.order, 3);
        assert!(added.is_enabled);
    }

    #[test]
    fn add_step_refuses_to_wrap_order() {
        let mut config = WorkflowConfig::new(vec![step(1, u32::MAX, Role::DeptAdmin)]).unwrap();
        let before = config.clone();
        let err = config
            .apply(WorkflowEdit::AddStep {
                name: "Overflow".into(),
                approver_role: Role::User,
            })
            .unwrap_err();
        assert!(matches!(err, CertvaultError::InvalidConfig(_)));
        assert_eq!(config, before);

        let mut config = WorkflowConfig::new(vec![step(u32::MAX, 1, Role::DeptAdmin)]).unwrap();
        assert!(config
            .apply(WorkflowEdit::AddStep {
                name: "Overflow".into(),
                approver_role: Role::User,
            })
            .is_err());
    }

    #[test]
    fn every_step_disabled_is_refused() {
        let mut config = WorkflowConfig::default();
        let before = config.clone();
        let err = config
            .apply(WorkflowEdit::ToggleEnabled { id: StepId(1) })
            .unwrap_err();
        assert!(matches!(err, CertvaultError::InvalidConfig(_)));
        assert_eq!(config, before);

        // Removing the only enabled step is refused the same way.
        assert!(config.apply(WorkflowEdit::RemoveStep { id: StepId(1) }).is_err());

        let mut off = step(1, 1, Role::DeptAdmin);
        off.is_enabled = false;
        assert!(WorkflowConfig::new(vec![off]).is_err());
    }

    #[test]
    fn remove_renumbers() {
        let mut config = WorkflowConfig::default();
        config
            .apply(WorkflowEdit::AddStep {
                name: "Third".into(),
                approver_role: Role::User,
            })
            .unwrap();
        config.apply(WorkflowEdit::RemoveStep { id: StepId(1) }).unwrap();

        let orders: Vec<u32> = config.steps().iter().map(|s| s.order).collect();
        assert_eq!(orders, vec![1, 2]);
        assert_eq!(ids(&config), vec![2, 3]);
    }

    #[test]
    fn last_step_cannot_be_removed() {
        let mut config = WorkflowConfig::new(vec![step(1, 1, Role::DeptAdmin)]).unwrap();
        let before = config.clone();
        assert!(config.apply(WorkflowEdit::RemoveStep { id: StepId(1) }).is_err());
        assert_eq!(config, before);
    }

    #[test]
    fn rename_rejects_blank() {
        let mut config = WorkflowConfig::default();
        let err = config
            .apply(WorkflowEdit::RenameStep {
                id: StepId(1),
                name: " ".into(),
            })
            .unwrap_err();
        assert!(matches!(err, CertvaultError::InvalidConfig(_)));
        assert_eq!(config.step(StepId(1)).unwrap().name, "Department admin approval");
    }

    #[test]
    fn toggle_and_role_change() {
        let mut config = WorkflowConfig::default();
        config.apply(WorkflowEdit::ToggleEnabled { id: StepId(2) }).unwrap();
        config
            .apply(WorkflowEdit::SetApproverRole {
                id: StepId(1),
                role: Role::SysAdmin,
            })
            .unwrap();

        let chain = config.chain();
        assert_eq!(chain.len(), 2);
        assert!(chain.iter().all(|s| s.approver_role == Role::SysAdmin));
    }

    #[test]
    fn reorder_moves_step() {
        let mut config = WorkflowConfig::new(vec![
            step(1, 1, Role::User),
            step(2, 2, Role::User),
            step(3, 3, Role::User),
        ])
        .unwrap();
        config
            .apply(WorkflowEdit::Reorder {
                id: StepId(3),
                position: 1,
            })
            .unwrap();
        assert_eq!(ids(&config), vec![3, 1, 2]);
        assert_eq!(config.step(StepId(3)).unwrap().order, 1);

        assert!(config
            .apply(WorkflowEdit::Reorder {
                id: StepId(1),
                position: 4,
            })
            .is_err());
    }

    #[test]
    fn unknown_step_is_not_found() {
        let mut config = WorkflowConfig::default();
        let err = config
            .apply(WorkflowEdit::ToggleEnabled { id: StepId(9) })
            .unwrap_err();
        assert!(matches!(
            err,
            CertvaultError::NotFound { kind: EntityKind::WorkflowStep, .. }
        ));
    }

    #[test]
    fn deserialize_validates() {
        let json = r#"{ "steps": [] }"#;
        assert!(serde_json::from_str::<WorkflowConfig>(json).is_err());

        let json = serde_json::to_string(&WorkflowConfig::default()).unwrap();
        let back: WorkflowConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, WorkflowConfig::default());
    }
}
