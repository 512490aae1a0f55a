// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Cabinet slot allocation.
//
// The allocator is a plain owned value with no locking of its own. It lives
// inside the registry's inventory so that a certificate update and the
// matching slot update always happen under the same write guard.

use std::collections::BTreeMap;

use certvault_core::error::{CertvaultError, EntityKind, Result};
use certvault_core::types::{CabinetSlot, CertificateId, SlotId, SlotStatus};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SlotAllocator {
    slots: BTreeMap<SlotId, CabinetSlot>,
}

impl SlotAllocator {
    /// A cabinet with slots `1..=count`, all empty.
    pub fn new(count: u32) -> Self {
        let slots = (1..=count)
            .map(|n| (SlotId(n), CabinetSlot::empty(SlotId(n))))
            .collect();
        Self { slots }
    }

    pub fn get(&self, id: SlotId) -> Result<&CabinetSlot> {
        self.slots
            .get(&id)
            .ok_or_else(|| CertvaultError::not_found(EntityKind::Slot, id))
    }

    fn get_mut(&mut self, id: SlotId) -> Result<&mut CabinetSlot> {
        self.slots
            .get_mut(&id)
            .ok_or_else(|| CertvaultError::not_found(EntityKind::Slot, id))
    }

    /// All slots in id order.
    pub fn iter(&self) -> impl Iterator<Item = &CabinetSlot> {
        self.slots.values()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Fail unless the slot exists and is empty.
    pub fn ensure_empty(&self, id: SlotId) -> Result<()> {
        let slot = self.get(id)?;
        match slot.status {
            SlotStatus::Empty => Ok(()),
            SlotStatus::Occupied => Err(CertvaultError::SlotUnavailable(format!(
                "slot {id} is occupied by {}",
                slot.certificate_id
                    .as_ref()
                    .map(|c| c.as_str())
                    .unwrap_or("an unknown certificate")
            ))),
            SlotStatus::Error => Err(CertvaultError::SlotUnavailable(format!(
                "slot {id} has a hardware fault"
            ))),
        }
    }

    /// Mark the slot empty. Idempotent on a slot that is already empty; a
    /// faulty slot keeps its fault.
    pub fn free(&mut self, id: SlotId) -> Result<()> {
        let slot = self.get_mut(id)?;
        if slot.status == SlotStatus::Occupied {
            slot.status = SlotStatus::Empty;
            slot.certificate_id = None;
            debug!(slot = %id, "slot freed");
        }
        Ok(())
    }

    pub fn occupy(&mut self, id: SlotId, certificate: &CertificateId) -> Result<()> {
        self.ensure_empty(id)?;
        let slot = self.get_mut(id)?;
        slot.status = SlotStatus::Occupied;
        slot.certificate_id = Some(certificate.clone());
        debug!(slot = %id, certificate = %certificate, "slot occupied");
        Ok(())
    }

    /// Pick the slot a returning certificate goes into.
    ///
    /// The preferred slot (normally the one the certificate last held) wins
    /// if it is still empty; otherwise the lowest-numbered empty slot.
    pub fn choose_return_slot(&self, preferred: Option<SlotId>) -> Result<SlotId> {
        if let Some(id) = preferred {
            if self.slots.get(&id).is_some_and(CabinetSlot::is_empty) {
                return Ok(id);
            }
        }
        self.slots
            .values()
            .find(|s| s.is_empty())
            .map(|s| s.id)
            .ok_or_else(|| CertvaultError::SlotUnavailable("no empty slot in the cabinet".into()))
    }

    /// Flag a hardware fault. Only empty slots can be flagged; an occupied
    /// slot has to be emptied first so no certificate loses its binding.
    pub fn mark_fault(&mut self, id: SlotId) -> Result<()> {
        let slot = self.get_mut(id)?;
        match slot.status {
            SlotStatus::Occupied => Err(CertvaultError::SlotUnavailable(format!(
                "slot {id} is occupied and cannot be taken out of service"
            ))),
            SlotStatus::Empty | SlotStatus::Error => {
                slot.status = SlotStatus::Error;
                Ok(())
            }
        }
    }

    /// Administrative clearing of a fault. No-op unless the slot is faulty.
    pub fn clear_fault(&mut self, id: SlotId) -> Result<()> {
        let slot = self.get_mut(id)?;
        if slot.status == SlotStatus::Error {
            slot.status = SlotStatus::Empty;
        }
        Ok(())
    }

    /// (empty, occupied, error) counts.
    pub fn counts(&self) -> (usize, usize, usize) {
        self.slots
            .values()
            .fold((0, 0, 0), |(e, o, f), slot| match slot.status {
                SlotStatus::Empty => (e + 1, o, f),
                SlotStatus::Occupied => (e, o + 1, f),
                SlotStatus::Error => (e, o, f + 1),
            })
    }
}
