// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Officer directory: provisioning, lookup and role administration.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use certvault_core::authz::can_manage_roles;
use certvault_core::error::{CertvaultError, EntityKind, Result};
use certvault_core::types::{Officer, OfficerId, Recipient, Role};
use tracing::{info, instrument};

/// Outcome of a role change, for auditing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleChange {
    pub officer: Officer,
    pub previous: Role,
}

#[derive(Debug, Default)]
pub struct OfficerDirectory {
    officers: RwLock<BTreeMap<OfficerId, Officer>>,
}

impl OfficerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new officer. Ids are unique.
    #[instrument(skip(self, officer), fields(officer_id = %officer.id))]
    pub fn provision(&self, officer: Officer) -> Result<()> {
        let mut officers = self.officers.write().unwrap_or_else(PoisonError::into_inner);
        if officers.contains_key(&officer.id) {
            return Err(CertvaultError::invalid_state(
                &officer.id,
                "officer id is already provisioned",
            ));
        }
        info!(role = %officer.role, "officer provisioned");
        officers.insert(officer.id.clone(), officer);
        Ok(())
    }

    /// Insert `officer` only if the directory is empty. The emptiness check
    /// and the insert happen under one write lock.
    pub fn provision_first(&self, officer: Officer) -> Result<()> {
        let mut officers = self.officers.write().unwrap_or_else(PoisonError::into_inner);
        if !officers.is_empty() {
            return Err(CertvaultError::invalid_state(
                &officer.id,
                "only the first officer can be provisioned without an administrator",
            ));
        }
        info!(role = %officer.role, "first officer provisioned");
        officers.insert(officer.id.clone(), officer);
        Ok(())
    }

    pub fn get(&self, id: &OfficerId) -> Result<Officer> {
        self.officers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| CertvaultError::not_found(EntityKind::Officer, id))
    }

    pub fn name_of(&self, id: &OfficerId) -> Option<String> {
        self.officers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|o| o.name.clone())
    }

    pub fn list(&self) -> Vec<Officer> {
        self.officers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Case-insensitive substring search over name, badge number and
    /// department. An empty query matches everyone.
    pub fn search(&self, text: &str) -> Vec<Officer> {
        let needle = text.trim().to_lowercase();
        self.officers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|o| {
                needle.is_empty()
                    || o.name.to_lowercase().contains(&needle)
                    || o.badge_number.to_lowercase().contains(&needle)
                    || o.department.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect()
    }

    /// Change an officer's role on behalf of `actor`.
    ///
    /// The actor must be allowed to manage both the officer's current role
    /// and the new one, so a department admin can neither grant nor strip
    /// system admin.
    #[instrument(skip_all, fields(%actor, %target, %role))]
    pub fn set_role(&self, actor: &OfficerId, target: &OfficerId, role: Role) -> Result<RoleChange> {
        let mut officers = self.officers.write().unwrap_or_else(PoisonError::into_inner);
        let actor_role = officers
            .get(actor)
            .map(|o| o.role)
            .ok_or_else(|| CertvaultError::not_found(EntityKind::Officer, actor))?;
        let officer = officers
            .get_mut(target)
            .ok_or_else(|| CertvaultError::not_found(EntityKind::Officer, target))?;

        let previous = officer.role;
        if !can_manage_roles(actor_role, previous.max(role)) {
            return Err(CertvaultError::AccessDenied {
                role: actor_role,
                action: format!("change {target} from {previous} to {role}"),
            });
        }

        officer.role = role;
        info!(%previous, "officer role changed");
        Ok(RoleChange {
            officer: officer.clone(),
            previous,
        })
    }

    /// Who to tell about an overdue certificate: its owner plus every
    /// administrator, each once, skipping anyone without a phone number.
    pub fn alert_recipients(&self, owner: &OfficerId) -> Vec<Recipient> {
        let officers = self.officers.read().unwrap_or_else(PoisonError::into_inner);
        let owner_first = officers.get(owner).into_iter();
        let admins = officers
            .values()
            .filter(|o| o.role >= Role::DeptAdmin && &o.id != owner);

        owner_first
            .chain(admins)
            .filter(|o| !o.phone.trim().is_empty())
            .map(|o| Recipient {
                officer_id: o.id.clone(),
                name: o.name.clone(),
                phone: o.phone.clone(),
            })
            .collect()
    }
}
