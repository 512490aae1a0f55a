// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Certificate registry: custody state machine for certificate tokens.
//
// Certificates and cabinet slots live together in one `Inventory` behind a
// single `RwLock`. Every mutation validates first and only then touches the
// certificate and its slot, all under the same write guard, so readers never
// see a certificate and its slot disagree. Readers copy records out under the
// read guard and get a point-in-time snapshot.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use certvault_core::clock::Clock;
use certvault_core::error::{CertvaultError, EntityKind, Result};
use certvault_core::types::{
    AuditEvent, CabinetSlot, Certificate, CertificateFilter, CertificateId, CertificateStatus,
    CustodySummary, OfficerId, SlotId, SlotStatus,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::directory::OfficerDirectory;
use crate::slots::SlotAllocator;

/// Data needed to register a new certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCertificate {
    pub id: CertificateId,
    pub serial_number: String,
    pub owner_id: OfficerId,
    pub valid_until: NaiveDate,
}

/// Result of a successful borrow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BorrowReceipt {
    pub certificate: Certificate,
    pub slot_freed: SlotId,
    pub reason: String,
}

impl BorrowReceipt {
    pub fn audit_event(&self, actor: &str) -> AuditEvent {
        AuditEvent::info(
            self.certificate.borrow_time.unwrap_or_else(Utc::now),
            actor,
            "certificate_borrowed",
            format!(
                "{} ({}) taken from slot {}, reason: {}",
                self.certificate.id, self.certificate.serial_number, self.slot_freed, self.reason
            ),
        )
    }
}

/// Result of a successful return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnReceipt {
    pub certificate: Certificate,
    pub slot_assigned: SlotId,
    pub borrowed_at: DateTime<Utc>,
    pub returned_at: DateTime<Utc>,
}

impl ReturnReceipt {
    pub fn audit_event(&self, actor: &str) -> AuditEvent {
        let minutes = (self.returned_at - self.borrowed_at).num_minutes();
        AuditEvent::info(
            self.returned_at,
            actor,
            "certificate_returned",
            format!(
                "{} ({}) placed in slot {} after {} min",
                self.certificate.id, self.certificate.serial_number, self.slot_assigned, minutes
            ),
        )
    }
}

#[derive(Debug)]
struct Inventory {
    certificates: BTreeMap<CertificateId, Certificate>,
    slots: SlotAllocator,
    /// Slot each certificate last occupied, used as the preferred return slot.
    last_slot: HashMap<CertificateId, SlotId>,
}

impl Inventory {
    fn certificate(&self, id: &CertificateId) -> Result<&Certificate> {
        self.certificates
            .get(id)
            .ok_or_else(|| CertvaultError::not_found(EntityKind::Certificate, id))
    }

    fn certificate_mut(&mut self, id: &CertificateId) -> Result<&mut Certificate> {
        self.certificates
            .get_mut(id)
            .ok_or_else(|| CertvaultError::not_found(EntityKind::Certificate, id))
    }

    /// Move a BORROWED certificate into `slot`. Caller holds the write guard.
    fn return_into(
        &mut self,
        id: &CertificateId,
        slot: SlotId,
        now: DateTime<Utc>,
    ) -> Result<ReturnReceipt> {
        let cert = self.certificate(id)?;
        let borrowed_at = match (cert.status, cert.borrow_time) {
            (CertificateStatus::Borrowed, Some(at)) => at,
            (status, _) => {
                return Err(CertvaultError::invalid_state(
                    id,
                    format!("cannot return a certificate that is {status}"),
                ));
            }
        };
        self.slots.ensure_empty(slot)?;

        self.slots.occupy(slot, id)?;
        self.last_slot.insert(id.clone(), slot);
        let cert = self.certificate_mut(id)?;
        cert.status = CertificateStatus::Active;
        cert.cabinet_slot = Some(slot);
        cert.borrow_time = None;

        Ok(ReturnReceipt {
            certificate: cert.clone(),
            slot_assigned: slot,
            borrowed_at,
            returned_at: now,
        })
    }
}

pub struct CertificateRegistry {
    inventory: RwLock<Inventory>,
    directory: Arc<OfficerDirectory>,
    clock: Arc<dyn Clock>,
}

impl CertificateRegistry {
    /// An empty registry over a cabinet of `slot_count` slots.
    pub fn new(slot_count: u32, directory: Arc<OfficerDirectory>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inventory: RwLock::new(Inventory {
                certificates: BTreeMap::new(),
                slots: SlotAllocator::new(slot_count),
                last_slot: HashMap::new(),
            }),
            directory,
            clock,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inventory> {
        self.inventory.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inventory> {
        self.inventory.write().unwrap_or_else(PoisonError::into_inner)
    }

    // -- Provisioning --------------------------------------------------------

    /// Register a new certificate as ACTIVE in an empty slot.
    #[instrument(skip(self, new), fields(certificate = %new.id, %slot))]
    pub fn provision(&self, new: NewCertificate, slot: SlotId) -> Result<Certificate> {
        self.directory.get(&new.owner_id)?;

        let mut inv = self.write();
        if inv.certificates.contains_key(&new.id) {
            return Err(CertvaultError::invalid_state(
                &new.id,
                "certificate id is already registered",
            ));
        }
        inv.slots.ensure_empty(slot)?;

        let cert = Certificate {
            id: new.id,
            serial_number: new.serial_number,
            owner_id: new.owner_id,
            valid_until: new.valid_until,
            status: CertificateStatus::Active,
            cabinet_slot: Some(slot),
            borrow_time: None,
        };
        inv.slots.occupy(slot, &cert.id)?;
        inv.last_slot.insert(cert.id.clone(), slot);
        inv.certificates.insert(cert.id.clone(), cert.clone());

        info!("certificate provisioned");
        Ok(cert)
    }

    /// Load existing records (e.g. from a seed file) in any status.
    ///
    /// The whole batch is validated against the current inventory and the
    /// officer directory before anything is inserted.
    pub fn import(&self, certificates: Vec<Certificate>) -> Result<()> {
        for cert in &certificates {
            self.directory.get(&cert.owner_id)?;
        }
        let mut inv = self.write();
        let mut claimed: HashMap<SlotId, &CertificateId> = HashMap::new();

        for cert in &certificates {
            if !cert.is_consistent() {
                return Err(CertvaultError::invalid_state(
                    &cert.id,
                    format!("{} record has inconsistent slot/borrow fields", cert.status),
                ));
            }
            if inv.certificates.contains_key(&cert.id)
                || certificates.iter().filter(|c| c.id == cert.id).count() > 1
            {
                return Err(CertvaultError::invalid_state(
                    &cert.id,
                    "certificate id is already registered",
                ));
            }
            if let Some(slot) = cert.cabinet_slot {
                inv.slots.ensure_empty(slot)?;
                if let Some(other) = claimed.insert(slot, &cert.id) {
                    return Err(CertvaultError::SlotUnavailable(format!(
                        "slot {slot} claimed by both {other} and {}",
                        cert.id
                    )));
                }
            }
        }

        for cert in certificates {
            if let Some(slot) = cert.cabinet_slot {
                inv.slots.occupy(slot, &cert.id)?;
                inv.last_slot.insert(cert.id.clone(), slot);
            }
            inv.certificates.insert(cert.id.clone(), cert);
        }
        debug!(total = inv.certificates.len(), "certificates imported");
        Ok(())
    }

    // -- Custody transitions -------------------------------------------------

    /// Take an ACTIVE certificate out of the cabinet.
    #[instrument(skip(self, reason), fields(certificate = %id))]
    pub fn borrow(&self, id: &CertificateId, reason: &str) -> Result<BorrowReceipt> {
        let now = self.clock.now();
        let mut inv = self.write();

        let cert = inv.certificate(id)?;
        let slot = match (cert.status, cert.cabinet_slot) {
            (CertificateStatus::Active, Some(slot)) => slot,
            (status, _) => {
                return Err(CertvaultError::invalid_state(
                    id,
                    format!("cannot borrow a certificate that is {status}"),
                ));
            }
        };

        inv.slots.free(slot)?;
        let cert = inv.certificate_mut(id)?;
        cert.status = CertificateStatus::Borrowed;
        cert.cabinet_slot = None;
        cert.borrow_time = Some(now);

        info!(slot_freed = %slot, "certificate borrowed");
        Ok(BorrowReceipt {
            certificate: cert.clone(),
            slot_freed: slot,
            reason: reason.to_owned(),
        })
    }

    /// Put a BORROWED certificate back into a specific empty slot.
    #[instrument(skip(self), fields(certificate = %id, %slot))]
    pub fn return_to(&self, id: &CertificateId, slot: SlotId) -> Result<ReturnReceipt> {
        let now = self.clock.now();
        let receipt = self.write().return_into(id, slot, now)?;
        info!("certificate returned");
        Ok(receipt)
    }

    /// Put a BORROWED certificate back, choosing the slot by return policy:
    /// its previous slot if still empty, else the lowest empty slot.
    #[instrument(skip(self), fields(certificate = %id))]
    pub fn return_to_preferred(&self, id: &CertificateId) -> Result<ReturnReceipt> {
        let now = self.clock.now();
        let mut inv = self.write();

        // Report a wrong status before a full cabinet.
        let status = inv.certificate(id)?.status;
        if status != CertificateStatus::Borrowed {
            return Err(CertvaultError::invalid_state(
                id,
                format!("cannot return a certificate that is {status}"),
            ));
        }
        let preferred = inv.last_slot.get(id).copied();
        let slot = inv.slots.choose_return_slot(preferred)?;
        let receipt = inv.return_into(id, slot, now)?;

        info!(slot_assigned = %slot, "certificate returned");
        Ok(receipt)
    }

    // -- Administrative transitions ------------------------------------------

    /// Move a certificate to EXPIRED, REVOKED or LOST.
    #[instrument(skip(self), fields(certificate = %id, %status))]
    pub fn retire(&self, id: &CertificateId, status: CertificateStatus) -> Result<Certificate> {
        if !status.is_retired() {
            return Err(CertvaultError::invalid_state(
                id,
                format!("{status} is not a retirement status"),
            ));
        }

        let mut inv = self.write();
        let slot = inv.certificate(id)?.cabinet_slot;
        if let Some(slot) = slot {
            inv.slots.free(slot)?;
        }
        let cert = inv.certificate_mut(id)?;
        cert.status = status;
        cert.cabinet_slot = None;
        cert.borrow_time = None;

        info!("certificate retired");
        Ok(cert.clone())
    }

    /// Bring a retired certificate back into service in an empty slot.
    #[instrument(skip(self), fields(certificate = %id, %slot))]
    pub fn reinstate(&self, id: &CertificateId, slot: SlotId) -> Result<Certificate> {
        let mut inv = self.write();
        let status = inv.certificate(id)?.status;
        if !status.is_retired() {
            return Err(CertvaultError::invalid_state(
                id,
                format!("cannot reinstate a certificate that is {status}"),
            ));
        }
        inv.slots.ensure_empty(slot)?;

        inv.slots.occupy(slot, id)?;
        inv.last_slot.insert(id.clone(), slot);
        let cert = inv.certificate_mut(id)?;
        cert.status = CertificateStatus::Active;
        cert.cabinet_slot = Some(slot);

        info!("certificate reinstated");
        Ok(cert.clone())
    }

    /// Extend the validity date. Custody status is untouched.
    #[instrument(skip(self), fields(certificate = %id, %valid_until))]
    pub fn renew(&self, id: &CertificateId, valid_until: NaiveDate) -> Result<Certificate> {
        let mut inv = self.write();
        let cert = inv.certificate_mut(id)?;
        if matches!(cert.status, CertificateStatus::Revoked | CertificateStatus::Lost) {
            return Err(CertvaultError::invalid_state(
                id,
                format!("cannot renew a certificate that is {}", cert.status),
            ));
        }
        if valid_until <= cert.valid_until {
            return Err(CertvaultError::invalid_state(
                id,
                format!("renewal date {valid_until} is not after {}", cert.valid_until),
            ));
        }
        cert.valid_until = valid_until;

        info!("certificate renewed");
        Ok(cert.clone())
    }

    pub fn mark_slot_fault(&self, slot: SlotId) -> Result<()> {
        self.write().slots.mark_fault(slot)?;
        info!(%slot, "slot marked faulty");
        Ok(())
    }

    pub fn clear_slot_fault(&self, slot: SlotId) -> Result<()> {
        self.write().slots.clear_fault(slot)?;
        info!(%slot, "slot fault cleared");
        Ok(())
    }

    // -- Queries -------------------------------------------------------------

    pub fn get(&self, id: &CertificateId) -> Result<Certificate> {
        self.read().certificate(id).cloned()
    }

    /// Certificates matching `filter`, in id order.
    pub fn list(&self, filter: &CertificateFilter) -> Vec<Certificate> {
        let snapshot: Vec<Certificate> = self
            .read()
            .certificates
            .values()
            .filter(|c| filter.status.is_none_or(|s| c.status == s))
            .cloned()
            .collect();

        let needle = filter
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase);
        let Some(needle) = needle else {
            return snapshot;
        };

        snapshot
            .into_iter()
            .filter(|c| {
                c.serial_number.to_lowercase().contains(&needle)
                    || self
                        .directory
                        .name_of(&c.owner_id)
                        .is_some_and(|name| name.to_lowercase().contains(&needle))
            })
            .collect()
    }

    pub fn list_slots(&self) -> Vec<CabinetSlot> {
        self.read().slots.iter().cloned().collect()
    }

    pub fn slot(&self, id: SlotId) -> Result<CabinetSlot> {
        self.read().slots.get(id).cloned()
    }

    /// Snapshot of every BORROWED certificate.
    pub fn borrowed(&self) -> Vec<Certificate> {
        self.read()
            .certificates
            .values()
            .filter(|c| c.status == CertificateStatus::Borrowed)
            .cloned()
            .collect()
    }

    pub fn summary(&self) -> CustodySummary {
        let inv = self.read();
        let mut summary = CustodySummary {
            total_certificates: inv.certificates.len(),
            ..CustodySummary::default()
        };
        for cert in inv.certificates.values() {
            match cert.status {
                CertificateStatus::Active => summary.active += 1,
                CertificateStatus::Borrowed => summary.borrowed += 1,
                CertificateStatus::Expired => summary.expired += 1,
                CertificateStatus::Revoked => summary.revoked += 1,
                CertificateStatus::Lost => summary.lost += 1,
            }
        }
        let (empty, occupied, faulty) = inv.slots.counts();
        summary.empty_slots = empty;
        summary.occupied_slots = occupied;
        summary.faulty_slots = faulty;
        summary
    }

    /// Every breach of the certificate/slot binding rules, as messages.
    /// Empty when the inventory is consistent.
    pub fn binding_violations(&self) -> Vec<String> {
        let inv = self.read();
        let mut violations = Vec::new();

        for cert in inv.certificates.values() {
            if !cert.is_consistent() {
                violations.push(format!("{} is {} with inconsistent fields", cert.id, cert.status));
            }
            if let Some(slot_id) = cert.cabinet_slot {
                match inv.slots.get(slot_id) {
                    Ok(slot)
                        if slot.status == SlotStatus::Occupied
                            && slot.certificate_id.as_ref() == Some(&cert.id) => {}
                    Ok(_) => violations.push(format!(
                        "{} points at slot {slot_id} which does not hold it",
                        cert.id
                    )),
                    Err(_) => violations.push(format!("{} points at missing slot {slot_id}", cert.id)),
                }
            }
        }

        for slot in inv.slots.iter() {
            let held = slot.certificate_id.as_ref();
            match (slot.status, held) {
                (SlotStatus::Occupied, Some(cert_id)) => {
                    let back = inv
                        .certificates
                        .get(cert_id)
                        .is_some_and(|c| c.cabinet_slot == Some(slot.id));
                    if !back {
                        violations.push(format!(
                            "slot {} holds {cert_id} which does not point back",
                            slot.id
                        ));
                    }
                }
                (SlotStatus::Occupied, None) => {
                    violations.push(format!("slot {} is occupied by nothing", slot.id));
                }
                (_, Some(cert_id)) => violations.push(format!(
                    "slot {} is {} but references {cert_id}",
                    slot.id, slot.status
                )),
                (_, None) => {}
            }
        }
        violations
    }
}
