// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Overdue detection and alerting.
//
// `scan` is a pure read over a registry snapshot. `run` scans and then
// alerts according to the configured `AlertPolicy`, remembering per borrow
// episode (certificate id + borrow time) when the last alert went out.
// An alert counts as sent only once the gateway call returns `Ok`; failed
// deliveries are not remembered, so the next run tries again. The episode map
// is an async mutex held for the whole run so two overlapping runs cannot
// both alert the same episode.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use certvault_core::clock::Clock;
use certvault_core::config::AlertPolicy;
use certvault_core::error::{CollaboratorWarning, Outcome};
use certvault_core::sink::AuditSink;
use certvault_core::types::{AuditEvent, Certificate, CertificateId};
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, instrument, warn};

use crate::directory::OfficerDirectory;
use crate::notify::{NotificationGateway, OverdueAlert};
use crate::registry::CertificateRegistry;

/// Result of one monitoring pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverdueReport {
    /// Every certificate over the threshold, in id order.
    pub overdue: Vec<CertificateId>,
    /// The subset alerted during this pass.
    pub alerted: Vec<CertificateId>,
}

#[derive(Debug, Clone, Copy)]
struct Alerted {
    borrowed_at: DateTime<Utc>,
    last_sent: DateTime<Utc>,
}

pub struct OverdueMonitor {
    registry: Arc<CertificateRegistry>,
    directory: Arc<OfficerDirectory>,
    gateway: Arc<dyn NotificationGateway>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    policy: Mutex<AlertPolicy>,
    alerted: AsyncMutex<HashMap<CertificateId, Alerted>>,
}

impl OverdueMonitor {
    pub fn new(
        registry: Arc<CertificateRegistry>,
        directory: Arc<OfficerDirectory>,
        gateway: Arc<dyn NotificationGateway>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        policy: AlertPolicy,
    ) -> Self {
        Self {
            registry,
            directory,
            gateway,
            audit,
            clock,
            policy: Mutex::new(policy),
            alerted: AsyncMutex::new(HashMap::new()),
        }
    }

    pub fn set_policy(&self, policy: AlertPolicy) {
        *self.policy.lock().unwrap_or_else(PoisonError::into_inner) = policy;
    }

    /// Borrowed certificates out strictly longer than `threshold_hours`.
    pub fn scan(&self, threshold_hours: u32) -> Vec<CertificateId> {
        self.overdue(threshold_hours)
            .into_iter()
            .map(|c| c.id)
            .collect()
    }

    fn overdue(&self, threshold_hours: u32) -> Vec<Certificate> {
        let now = self.clock.now();
        let threshold = TimeDelta::hours(i64::from(threshold_hours));
        self.registry
            .borrowed()
            .into_iter()
            .filter(|c| c.is_overdue(now, threshold))
            .collect()
    }

    /// Scan, then alert on every overdue certificate the policy says is due.
    #[instrument(skip(self))]
    pub async fn run(&self, threshold_hours: u32) -> Outcome<OverdueReport> {
        let mut alerted = self.alerted.lock().await;
        let now = self.clock.now();
        let overdue = self.overdue(threshold_hours);
        let policy = *self.policy.lock().unwrap_or_else(PoisonError::into_inner);

        // Forget episodes that ended: returned, retired or re-borrowed.
        alerted.retain(|id, state| {
            overdue
                .iter()
                .any(|c| &c.id == id && c.borrow_time == Some(state.borrowed_at))
        });

        let mut report = OverdueReport::default();
        let mut warnings = Vec::new();
        for cert in &overdue {
            report.overdue.push(cert.id.clone());
            let Some(borrowed_at) = cert.borrow_time else {
                continue;
            };
            if !is_due(policy, alerted.get(&cert.id), now) {
                debug!(certificate = %cert.id, "already alerted this episode");
                continue;
            }

            let alert = OverdueAlert {
                certificate_id: cert.id.clone(),
                serial_number: cert.serial_number.clone(),
                owner_id: cert.owner_id.clone(),
                owner_name: self
                    .directory
                    .name_of(&cert.owner_id)
                    .unwrap_or_else(|| cert.owner_id.to_string()),
                borrowed_at,
                hours_out: (now - borrowed_at).num_hours(),
            };
            let recipients = self.directory.alert_recipients(&cert.owner_id);

            let event = match self.gateway.send_overdue_alert(&alert, &recipients).await {
                Ok(()) => {
                    alerted.insert(
                        cert.id.clone(),
                        Alerted {
                            borrowed_at,
                            last_sent: now,
                        },
                    );
                    report.alerted.push(cert.id.clone());
                    AuditEvent::warning(
                        now,
                        "system",
                        "overdue_alert",
                        format!(
                            "{} ({}) out {}h, notified {} recipient(s)",
                            cert.id,
                            cert.serial_number,
                            alert.hours_out,
                            recipients.len()
                        ),
                    )
                }
                Err(e) => {
                    warn!(certificate = %cert.id, error = %e, "overdue alert not delivered");
                    warnings.push(CollaboratorWarning::notification(format!("{}: {e}", cert.id)));
                    AuditEvent::warning(
                        now,
                        "system",
                        "overdue_alert_failed",
                        format!("{} ({}): {e}", cert.id, cert.serial_number),
                    )
                }
            };
            if let Err(e) = self.audit.append(&event) {
                warn!(error = %e, "audit append failed");
                warnings.push(CollaboratorWarning::audit(e.to_string()));
            }
        }
        drop(alerted);

        info!(
            overdue = report.overdue.len(),
            alerted = report.alerted.len(),
            "overdue scan complete"
        );
        Outcome::with_warnings(report, warnings)
    }
}

fn is_due(policy: AlertPolicy, previous: Option<&Alerted>, now: DateTime<Utc>) -> bool {
    match (policy, previous) {
        (_, None) => true,
        (AlertPolicy::OncePerEpisode, Some(_)) => false,
        (AlertPolicy::ResendEvery { minutes }, Some(state)) => {
            now - state.last_sent >= TimeDelta::minutes(i64::from(minutes))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::RecordingGateway;
    use crate::notify::tests::sms_gateway;
    use crate::registry::tests::{fixture_parts, start};
    use certvault_core::clock::ManualClock;
    use certvault_core::sink::MemorySink;
    use certvault_core::types::{CertificateStatus, SlotId};
    use chrono::NaiveDate;

    struct Harness {
        monitor: OverdueMonitor,
        registry: Arc<CertificateRegistry>,
        gateway: Arc<RecordingGateway>,
        sink: Arc<MemorySink>,
        clock: Arc<ManualClock>,
    }

    fn borrowed(id: &str, borrowed_at: DateTime<Utc>) -> Certificate {
        Certificate {
            id: id.into(),
            serial_number: format!("UK-{id}"),
            owner_id: "o2".into(),
            valid_until: NaiveDate::from_ymd_opt(2027, 1, 1).unwrap(),
            status: CertificateStatus::Borrowed,
            cabinet_slot: None,
            borrow_time: Some(borrowed_at),
        }
    }

    fn harness(policy: AlertPolicy) -> Harness {
        let (registry, directory, clock) = fixture_parts();
        let registry = Arc::new(registry);
        let gateway = Arc::new(RecordingGateway::new());
        let sink = Arc::new(MemorySink::new());
        let monitor = OverdueMonitor::new(
            registry.clone(),
            directory,
            gateway.clone(),
            sink.clone(),
            clock.clone(),
            policy,
        );
        Harness {
            monitor,
            registry,
            gateway,
            sink,
            clock,
        }
    }

    #[test]
    fn threshold_is_strict() {
        let h = harness(AlertPolicy::OncePerEpisode);
        let now = start();
        h.registry
            .import(vec![
                borrowed("b9", now - TimeDelta::hours(9)),
                borrowed("b8", now - TimeDelta::hours(8)),
                borrowed("b7", now - TimeDelta::hours(7)),
            ])
            .unwrap();

        let ids = h.monitor.scan(8);
        assert_eq!(ids, vec![CertificateId::from("b9")]);
        assert!(h.gateway.sent().is_empty());
        assert!(h.sink.events().is_empty());
    }

    #[tokio::test]
    async fn run_alerts_owner_and_admins() {
        let h = harness(AlertPolicy::OncePerEpisode);
        h.registry
            .import(vec![borrowed("c2", start() - TimeDelta::hours(9))])
            .unwrap();

        let outcome = h.monitor.run(8).await;
        assert!(outcome.is_clean());
        assert_eq!(outcome.value.overdue, vec![CertificateId::from("c2")]);
        assert_eq!(outcome.value.alerted, vec![CertificateId::from("c2")]);

        let sent = h.gateway.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.owner_name, "Li Qiang");
        assert_eq!(sent[0].0.hours_out, 9);
        let ids: Vec<_> = sent[0].1.iter().map(|r| r.officer_id.as_str()).collect();
        assert_eq!(ids, vec!["o2", "o1", "o4"]);
        assert_eq!(h.sink.count_action("overdue_alert"), 1);
    }

    #[tokio::test]
    async fn once_per_episode_until_reborrowed() {
        let h = harness(AlertPolicy::OncePerEpisode);
        h.registry.borrow(&"c1".into(), "x").unwrap();
        h.clock.advance(TimeDelta::hours(9));

        assert_eq!(h.monitor.run(8).await.value.alerted.len(), 1);
        h.clock.advance(TimeDelta::hours(1));
        let second = h.monitor.run(8).await;
        assert_eq!(second.value.overdue.len(), 1);
        assert!(second.value.alerted.is_empty());

        // Return and borrow again: a new episode.
        h.registry.return_to(&"c1".into(), SlotId(1)).unwrap();
        h.registry.borrow(&"c1".into(), "again").unwrap();
        h.clock.advance(TimeDelta::hours(9));
        assert_eq!(h.monitor.run(8).await.value.alerted.len(), 1);
        assert_eq!(h.gateway.count_for(&"c1".into()), 2);
    }

    #[tokio::test]
    async fn resend_policy_waits_for_interval() {
        let h = harness(AlertPolicy::ResendEvery { minutes: 60 });
        h.registry.borrow(&"c1".into(), "x").unwrap();
        h.clock.advance(TimeDelta::hours(9));

        h.monitor.run(8).await;
        h.clock.advance(TimeDelta::minutes(30));
        h.monitor.run(8).await;
        assert_eq!(h.gateway.count_for(&"c1".into()), 1);

        h.clock.advance(TimeDelta::minutes(30));
        h.monitor.run(8).await;
        assert_eq!(h.gateway.count_for(&"c1".into()), 2);
    }

    #[tokio::test]
    async fn failed_delivery_is_warning_and_retried() {
        let h = harness(AlertPolicy::OncePerEpisode);
        h.registry.borrow(&"c1".into(), "x").unwrap();
        h.clock.advance(TimeDelta::hours(9));
        h.gateway.set_failing(true);

        let outcome = h.monitor.run(8).await;
        assert_eq!(outcome.value.overdue.len(), 1);
        assert!(outcome.value.alerted.is_empty());
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(h.sink.count_action("overdue_alert_failed"), 1);
        assert_eq!(
            h.registry.get(&"c1".into()).unwrap().status,
            CertificateStatus::Borrowed
        );

        h.gateway.set_failing(false);
        assert_eq!(h.monitor.run(8).await.value.alerted.len(), 1);
    }

    #[tokio::test]
    async fn unreachable_sms_gateway_is_not_marked_sent() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (registry, directory, clock) = fixture_parts();
        let registry = Arc::new(registry);
        let sink = Arc::new(MemorySink::new());
        let gateway = sms_gateway(&format!("http://127.0.0.1:{port}/sms/send"), 0);
        let monitor = OverdueMonitor::new(
            registry.clone(),
            directory,
            Arc::new(gateway),
            sink.clone(),
            clock.clone(),
            AlertPolicy::OncePerEpisode,
        );
        registry.borrow(&"c1".into(), "x").unwrap();
        clock.advance(TimeDelta::hours(9));

        for _ in 0..2 {
            let outcome = monitor.run(8).await;
            assert_eq!(outcome.value.overdue, vec![CertificateId::from("c1")]);
            assert!(outcome.value.alerted.is_empty());
            assert_eq!(outcome.warnings.len(), 1);
        }
        assert_eq!(sink.count_action("overdue_alert_failed"), 2);
        assert_eq!(sink.count_action("overdue_alert"), 0);
    }

    #[tokio::test]
    async fn scan_does_not_mutate() {
        let h = harness(AlertPolicy::OncePerEpisode);
        h.registry.borrow(&"c1".into(), "x").unwrap();
        h.clock.advance(TimeDelta::hours(12));
        let before = h.registry.get(&"c1".into()).unwrap();
        h.monitor.scan(8);
        h.monitor.run(8).await;
        assert_eq!(h.registry.get(&"c1".into()).unwrap(), before);
    }
}
