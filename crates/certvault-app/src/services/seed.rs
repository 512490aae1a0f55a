// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Initial inventory: an `inventory.json` in the data directory, or the
// built-in demonstration set when there is none.

use std::path::Path;

use certvault_core::error::Result;
use certvault_core::types::{Certificate, CertificateStatus, Officer, Rank, Role, SlotId};
use certvault_custody::CustodyService;
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

pub const SEED_FILE: &str = "inventory.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seed {
    pub officers: Vec<Officer>,
    pub certificates: Vec<Certificate>,
}

impl Seed {
    /// Load `inventory.json` from `dir`, if present.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(SEED_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    /// Load officers and certificates into a fresh service.
    pub fn apply(self, service: &CustodyService) -> Result<()> {
        let officers = self.officers.len();
        for officer in self.officers {
            service.directory().provision(officer)?;
        }
        let certificates = self.certificates.len();
        service.registry().import(self.certificates)?;
        info!(officers, certificates, "inventory seeded");
        Ok(())
    }

    /// Four officers and five certificates, one of them out for nine hours.
    pub fn demo(now: DateTime<Utc>) -> Self {
        let officer = |id: &str, name: &str, badge: &str, department: &str, rank, phone: &str, role| Officer {
            id: id.into(),
            name: name.into(),
            badge_number: badge.into(),
            department: department.into(),
            rank,
            phone: phone.into(),
            role,
        };
        let date = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default();
        let certificate = |id: &str, serial: &str, owner: &str, valid_until, status, slot: Option<u32>| {
            Certificate {
                id: id.into(),
                serial_number: serial.into(),
                owner_id: owner.into(),
                valid_until,
                status,
                cabinet_slot: slot.map(SlotId),
                borrow_time: None,
            }
        };

        let mut borrowed = certificate("c2", "UK-2024-002", "o2", date(2025, 10, 15), CertificateStatus::Borrowed, None);
        borrowed.borrow_time = Some(now - TimeDelta::hours(9));

        Self {
            officers: vec![
                officer("o1", "Zhang Wei", "001234", "Criminal Investigation", Rank::Inspector, "13800138000", Role::DeptAdmin),
                officer("o2", "Li Qiang", "001235", "Cyber Security", Rank::Sergeant, "13900139000", Role::User),
                officer("o3", "Wang Fang", "001236", "Public Order", Rank::Constable, "13700137000", Role::User),
                officer("o4", "Zhao Min", "001237", "Command Centre", Rank::Superintendent, "13600136000", Role::SysAdmin),
            ],
            certificates: vec![
                certificate("c1", "UK-2024-001", "o1", date(2025, 12, 31), CertificateStatus::Active, Some(1)),
                borrowed,
                // Expired tokens are kept out of the cabinet.
                certificate("c3", "UK-2023-099", "o3", date(2024, 1, 1), CertificateStatus::Expired, None),
                certificate("c4", "UK-2024-055", "o4", date(2026, 5, 20), CertificateStatus::Active, Some(4)),
                certificate("c5", "UK-2024-056", "o1", date(2025, 11, 20), CertificateStatus::Active, Some(5)),
            ],
        }
    }
}
