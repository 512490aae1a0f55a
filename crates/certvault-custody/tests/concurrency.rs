// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Multi-threaded custody scenarios: racing borrowers, racing approvers and
// readers running alongside writers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use chrono::{NaiveDate, TimeDelta, TimeZone, Utc};

use certvault_core::clock::{Clock, ManualClock};
use certvault_core::error::CertvaultError;
use certvault_core::sink::MemorySink;
use certvault_core::types::{
    ApprovalStatus, Certificate, CertificateFilter, CertificateId, CertificateStatus, Decision,
    Officer, Rank, RequestType, Role, SlotId, SlotStatus, StepId,
};
use certvault_custody::{
    CustodyService, CustodySettings, NewCertificate, RecordingGateway, WorkflowEdit,
};

fn officer(id: &str, name: &str, role: Role) -> Officer {
    Officer {
        id: id.into(),
        name: name.into(),
        badge_number: id.to_uppercase(),
        department: "Cyber Security".into(),
        rank: Rank::Inspector,
        phone: format!("138{id}"),
        role,
    }
}

struct World {
    service: Arc<CustodyService>,
    sink: Arc<MemorySink>,
    gateway: Arc<RecordingGateway>,
    clock: Arc<ManualClock>,
}

/// Four officers, `certs` certificates in slots 1..=certs of a 24-slot cabinet.
fn world(certs: u32) -> World {
    let sink = Arc::new(MemorySink::new());
    let gateway = Arc::new(RecordingGateway::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 5, 21, 8, 0, 0).unwrap(),
    ));
    let service = CustodyService::new(
        CustodySettings::default(),
        sink.clone(),
        gateway.clone(),
        clock.clone(),
    );

    let admin = "o4".into();
    service
        .provision_officer(None, officer("o4", "Zhao Min", Role::SysAdmin))
        .unwrap();
    for (id, name, role) in [
        ("o1", "Zhang Wei", Role::DeptAdmin),
        ("o2", "Li Qiang", Role::User),
        ("o3", "Wang Fang", Role::User),
    ] {
        service
            .provision_officer(Some(&admin), officer(id, name, role))
            .unwrap();
    }
    for n in 1..=certs {
        let new = NewCertificate {
            id: format!("c{n}").as_str().into(),
            serial_number: format!("UK-2024-{n:03}"),
            owner_id: "o1".into(),
            valid_until: NaiveDate::from_ymd_opt(2027, 12, 31).unwrap(),
        };
        service.provision_certificate(&admin, new, SlotId(n)).unwrap();
    }

    World {
        service: Arc::new(service),
        sink,
        gateway,
        clock,
    }
}

#[test]
fn only_one_concurrent_borrow_wins() {
    let w = world(1);
    let wins = Arc::new(AtomicUsize::new(0));
    let conflicts = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let service = w.service.clone();
            let wins = wins.clone();
            let conflicts = conflicts.clone();
            let who = if i % 2 == 0 { "o1" } else { "o4" };
            thread::spawn(move || {
                match service.borrow_certificate(&"c1".into(), &who.into(), "race") {
                    Ok(_) => wins.fetch_add(1, Ordering::SeqCst),
                    Err(CertvaultError::InvalidStateTransition { .. }) => {
                        conflicts.fetch_add(1, Ordering::SeqCst)
                    }
                    Err(e) => panic!("unexpected error: {e}"),
                };
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(wins.load(Ordering::SeqCst), 1);
    assert_eq!(conflicts.load(Ordering::SeqCst), 15);
    assert_eq!(w.sink.count_action("certificate_borrowed"), 1);
}

#[test]
fn churn_keeps_slot_binding_consistent() {
    let w = world(12);
    let stop = Arc::new(AtomicBool::new(false));

    // Readers check every snapshot they take.
    let readers: Vec<_> = (0..2)
        .map(|_| {
            let service = w.service.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    for cert in service.list_certificates(&CertificateFilter::default()) {
                        assert!(cert.is_consistent(), "torn certificate {cert:?}");
                    }
                    let occupied = service
                        .list_slots()
                        .iter()
                        .filter(|s| s.status == SlotStatus::Occupied)
                        .count();
                    assert!(occupied <= 12);
                    let summary = service.summary();
                    assert_eq!(summary.active, summary.occupied_slots);
                }
            })
        })
        .collect();

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let service = w.service.clone();
            thread::spawn(move || {
                for round in 0..200 {
                    let id = CertificateId::from(format!("c{}", 1 + (t * 3 + round) % 12).as_str());
                    if service.borrow_certificate(&id, &"o4".into(), "churn").is_ok() {
                        // Another writer may grab the freed slot first;
                        // preferred return then falls back.
                        service.return_certificate(&id, &"o1".into()).unwrap();
                    }
                }
            })
        })
        .collect();

    for h in writers {
        h.join().unwrap();
    }
    stop.store(true, Ordering::SeqCst);
    for h in readers {
        h.join().unwrap();
    }

    assert!(w.service.registry().binding_violations().is_empty());
    let summary = w.service.summary();
    assert_eq!(summary.active, 12);
    assert_eq!(summary.borrowed, 0);
    assert_eq!(
        w.sink.count_action("certificate_borrowed"),
        w.sink.count_action("certificate_returned")
    );
}

#[test]
fn racing_final_approvals_execute_once() {
    let w = world(1);
    let id = w
        .service
        .submit_approval_request(&"o2".into(), &"c1".into(), RequestType::Borrow, "raid")
        .unwrap()
        .value
        .request
        .id;

    let approvers = ["o1", "o4", "o1", "o4", "o1", "o4"];
    let handles: Vec<_> = approvers
        .iter()
        .map(|who| {
            let service = w.service.clone();
            let who = who.to_string();
            thread::spawn(move || service.decide_approval(&id, &who.as_str().into(), Decision::Approve))
        })
        .collect();

    let mut approved = 0;
    let mut terminated = 0;
    for h in handles {
        match h.join().unwrap() {
            Ok(outcome) => {
                assert!(outcome.value.executed.is_some());
                approved += 1;
            }
            Err(CertvaultError::WorkflowTerminated { status, .. }) => {
                assert_eq!(status, ApprovalStatus::Approved);
                terminated += 1;
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!((approved, terminated), (1, 5));
    assert_eq!(w.sink.count_action("certificate_borrowed"), 1);
    assert_eq!(
        w.service.certificate(&"c1".into()).unwrap().status,
        CertificateStatus::Borrowed
    );
}

#[test]
fn rejected_request_leaves_certificate_alone() {
    let w = world(2);
    w.service
        .edit_workflow(
            &"o4".into(),
            WorkflowEdit::ToggleEnabled { id: StepId(2) },
        )
        .unwrap();
    let submitted = w
        .service
        .submit_approval_request(&"o3".into(), &"c2".into(), RequestType::Borrow, "x")
        .unwrap();
    assert_eq!(submitted.value.request.chain.len(), 2);

    let outcome = w
        .service
        .decide_approval(&submitted.value.request.id, &"o1".into(), Decision::Reject)
        .unwrap();
    assert_eq!(outcome.value.request.status, ApprovalStatus::Rejected);
    let cert = w.service.certificate(&"c2".into()).unwrap();
    assert_eq!(cert.status, CertificateStatus::Active);
    assert_eq!(cert.cabinet_slot, Some(SlotId(2)));
}

#[tokio::test]
async fn documented_scenario() {
    let w = world(1);
    let now = w.clock.now();
    w.service
        .registry()
        .import(vec![Certificate {
            id: "c2".into(),
            serial_number: "UK-2024-002".into(),
            owner_id: "o2".into(),
            valid_until: NaiveDate::from_ymd_opt(2025, 10, 15).unwrap(),
            status: CertificateStatus::Borrowed,
            cabinet_slot: None,
            borrow_time: Some(now - TimeDelta::hours(9)),
        }])
        .unwrap();

    let report = w.service.run_overdue_scan(8).await;
    assert_eq!(report.value.overdue, vec![CertificateId::from("c2")]);
    assert_eq!(w.gateway.count_for(&"c2".into()), 1);

    let freed = w.service.borrow_certificate(&"c1".into(), &"o1".into(), "x").unwrap();
    assert_eq!(freed.value, SlotId(1));
    assert_eq!(w.service.list_slots()[0].status, SlotStatus::Empty);

    let assigned = w.service.return_certificate(&"c1".into(), &"o1".into()).unwrap();
    assert_eq!(assigned.value, SlotId(1));
    let slot = &w.service.list_slots()[0];
    assert_eq!(slot.certificate_id, Some(CertificateId::from("c1")));
}
