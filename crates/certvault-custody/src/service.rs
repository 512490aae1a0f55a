// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Custody service: the single entry point front ends call.
//
// Wires the directory, registry, workflow engine and overdue monitor
// together, applies the authorization predicates before each operation and
// records an audit event after each successful one. Audit failures come
// back as warnings on the `Outcome`, never as errors.

use std::sync::Arc;

use certvault_core::authz::{Module, can_manage_roles, require_module};
use certvault_core::clock::Clock;
use certvault_core::config::{AlertPolicy, CertvaultConfig};
use certvault_core::error::{CertvaultError, CollaboratorWarning, Outcome, Result};
use certvault_core::sink::AuditSink;
use certvault_core::types::{
    ApprovalRequest, ApprovalStatus, AuditEvent, CabinetSlot, Certificate, CertificateFilter, CertificateId,
    CertificateStatus, CustodySummary, Decision, Officer, OfficerId, RequestId, RequestType, Role,
    SlotId, WorkflowStep,
};
use tracing::{info, instrument, warn};

use crate::directory::OfficerDirectory;
use crate::notify::NotificationGateway;
use crate::overdue::{OverdueMonitor, OverdueReport};
use crate::registry::{CertificateRegistry, NewCertificate};
use crate::workflow::{DecisionOutcome, WorkflowConfig, WorkflowEdit, WorkflowEngine};

/// Engine settings taken from [`CertvaultConfig`].
#[derive(Debug, Clone)]
pub struct CustodySettings {
    pub slot_count: u32,
    pub renewal_period_days: u32,
    pub alert_policy: AlertPolicy,
    pub workflow: WorkflowConfig,
}

impl From<&CertvaultConfig> for CustodySettings {
    fn from(config: &CertvaultConfig) -> Self {
        Self {
            slot_count: config.slot_count,
            renewal_period_days: config.renewal_period_days,
            alert_policy: config.alert_policy,
            workflow: WorkflowConfig::default(),
        }
    }
}

impl Default for CustodySettings {
    fn default() -> Self {
        Self::from(&CertvaultConfig::default())
    }
}

pub struct CustodyService {
    directory: Arc<OfficerDirectory>,
    registry: Arc<CertificateRegistry>,
    workflow: WorkflowEngine,
    monitor: OverdueMonitor,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl CustodyService {
    pub fn new(
        settings: CustodySettings,
        audit: Arc<dyn AuditSink>,
        gateway: Arc<dyn NotificationGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let directory = Arc::new(OfficerDirectory::new());
        let registry = Arc::new(CertificateRegistry::new(
            settings.slot_count,
            directory.clone(),
            clock.clone(),
        ));
        let workflow = WorkflowEngine::new(
            settings.workflow,
            registry.clone(),
            directory.clone(),
            audit.clone(),
            clock.clone(),
            settings.renewal_period_days,
        );
        let monitor = OverdueMonitor::new(
            registry.clone(),
            directory.clone(),
            gateway,
            audit.clone(),
            clock.clone(),
            settings.alert_policy,
        );
        Self {
            directory,
            registry,
            workflow,
            monitor,
            audit,
            clock,
        }
    }

    pub fn directory(&self) -> &OfficerDirectory {
        &self.directory
    }

    pub fn registry(&self) -> &CertificateRegistry {
        &self.registry
    }

    fn record(&self, event: AuditEvent) -> Vec<CollaboratorWarning> {
        match self.audit.append(&event) {
            Ok(()) => Vec::new(),
            Err(e) => {
                warn!(action = %event.action, error = %e, "audit append failed");
                vec![CollaboratorWarning::audit(e.to_string())]
            }
        }
    }

    fn event(&self, actor: &Officer, action: &str, details: impl Into<String>) -> AuditEvent {
        AuditEvent::info(self.clock.now(), actor.actor_label(), action, details)
    }

    /// Look up `actor` and require at least `role`.
    fn require_role(&self, actor: &OfficerId, role: Role, action: &str) -> Result<Officer> {
        let officer = self.directory.get(actor)?;
        if officer.role.satisfies(role) {
            Ok(officer)
        } else {
            Err(CertvaultError::AccessDenied {
                role: officer.role,
                action: action.to_owned(),
            })
        }
    }

    /// Look up `actor` and require access to `module`.
    fn authorize(&self, actor: &OfficerId, module: Module) -> Result<Officer> {
        let officer = self.directory.get(actor)?;
        require_module(officer.role, module)?;
        Ok(officer)
    }

    // -- Direct custody ------------------------------------------------------

    /// Take a certificate out of the cabinet without an approval chain.
    ///
    /// Officers may take their own certificates; administrators may take any.
    /// Everyone else has to go through [`Self::submit_approval_request`].
    #[instrument(skip_all, fields(%certificate, %requester))]
    pub fn borrow_certificate(
        &self,
        certificate: &CertificateId,
        requester: &OfficerId,
        reason: &str,
    ) -> Result<Outcome<SlotId>> {
        let officer = self.authorize(requester, Module::BorrowReturn)?;
        let cert = self.registry.get(certificate)?;
        if cert.owner_id != officer.id && !officer.role.satisfies(Role::DeptAdmin) {
            return Err(CertvaultError::AccessDenied {
                role: officer.role,
                action: format!("borrow {certificate} owned by {} without approval", cert.owner_id),
            });
        }

        let receipt = self.registry.borrow(certificate, reason)?;
        let warnings = self.record(receipt.audit_event(&officer.actor_label()));
        Ok(Outcome::with_warnings(receipt.slot_freed, warnings))
    }

    /// Put a borrowed certificate back, in its previous slot when free.
    #[instrument(skip_all, fields(%certificate, %requester))]
    pub fn return_certificate(
        &self,
        certificate: &CertificateId,
        requester: &OfficerId,
    ) -> Result<Outcome<SlotId>> {
        let officer = self.authorize(requester, Module::BorrowReturn)?;
        let receipt = self.registry.return_to_preferred(certificate)?;
        let warnings = self.record(receipt.audit_event(&officer.actor_label()));
        Ok(Outcome::with_warnings(receipt.slot_assigned, warnings))
    }

    /// Put a borrowed certificate into a specific slot.
    pub fn return_certificate_to(
        &self,
        certificate: &CertificateId,
        requester: &OfficerId,
        slot: SlotId,
    ) -> Result<Outcome<SlotId>> {
        let officer = self.authorize(requester, Module::BorrowReturn)?;
        let receipt = self.registry.return_to(certificate, slot)?;
        let warnings = self.record(receipt.audit_event(&officer.actor_label()));
        Ok(Outcome::with_warnings(receipt.slot_assigned, warnings))
    }

    // -- Workflow ------------------------------------------------------------

    pub fn submit_approval_request(
        &self,
        requester: &OfficerId,
        certificate: &CertificateId,
        request_type: RequestType,
        reason: &str,
    ) -> Result<Outcome<DecisionOutcome>> {
        self.authorize(requester, Module::BorrowReturn)?;
        self.workflow.submit(requester, certificate, request_type, reason)
    }

    pub fn decide_approval(
        &self,
        request: &RequestId,
        approver: &OfficerId,
        decision: Decision,
    ) -> Result<Outcome<DecisionOutcome>> {
        self.workflow.decide(request, approver, decision)
    }

    pub fn approval_request(&self, id: &RequestId) -> Result<ApprovalRequest> {
        self.workflow.get(id)
    }

    pub fn approval_requests(&self) -> Vec<ApprovalRequest> {
        self.workflow.list()
    }

    pub fn approval_requests_with_status(&self, status: ApprovalStatus) -> Vec<ApprovalRequest> {
        self.workflow.list_with_status(status)
    }

    /// Requests awaiting a step `actor` may decide.
    pub fn pending_approvals(&self, actor: &OfficerId) -> Result<Vec<ApprovalRequest>> {
        let officer = self.authorize(actor, Module::Approvals)?;
        Ok(self.workflow.pending_for(officer.role))
    }

    pub fn workflow_config(&self) -> WorkflowConfig {
        self.workflow.config()
    }

    /// Replace the workflow step list for future requests.
    pub fn update_workflow_config(
        &self,
        actor: &OfficerId,
        steps: Vec<WorkflowStep>,
    ) -> Result<Outcome<WorkflowConfig>> {
        let officer = self.authorize(actor, Module::Workflow)?;
        let config = self.workflow.update_config(steps)?;
        let warnings = self.record(self.event(
            &officer,
            "workflow_updated",
            format!("{} step(s), {} enabled", config.steps().len(), config.chain().len()),
        ));
        Ok(Outcome::with_warnings(config, warnings))
    }

    pub fn edit_workflow(
        &self,
        actor: &OfficerId,
        edit: WorkflowEdit,
    ) -> Result<Outcome<WorkflowConfig>> {
        self.edit_workflow_and_persist(actor, edit, |_| Ok(()))
    }

    /// Like [`edit_workflow`](Self::edit_workflow), but `persist` must
    /// succeed before the edited chain is used for new requests.
    pub fn edit_workflow_and_persist(
        &self,
        actor: &OfficerId,
        edit: WorkflowEdit,
        persist: impl FnOnce(&WorkflowConfig) -> Result<()>,
    ) -> Result<Outcome<WorkflowConfig>> {
        let officer = self.authorize(actor, Module::Workflow)?;
        let details = format!("{edit:?}");
        let config = self.workflow.edit_config_and(edit, persist)?;
        let warnings = self.record(self.event(&officer, "workflow_edited", details));
        Ok(Outcome::with_warnings(config, warnings))
    }

    // -- Overdue -------------------------------------------------------------

    /// Overdue certificate ids without alerting anyone.
    pub fn overdue_certificates(&self, threshold_hours: u32) -> Vec<CertificateId> {
        self.monitor.scan(threshold_hours)
    }

    /// Scan and alert per the alert policy.
    pub async fn run_overdue_scan(&self, threshold_hours: u32) -> Outcome<OverdueReport> {
        self.monitor.run(threshold_hours).await
    }

    pub fn set_alert_policy(&self, policy: AlertPolicy) {
        self.monitor.set_policy(policy);
    }

    // -- Queries -------------------------------------------------------------

    pub fn certificate(&self, id: &CertificateId) -> Result<Certificate> {
        self.registry.get(id)
    }

    pub fn list_certificates(&self, filter: &CertificateFilter) -> Vec<Certificate> {
        self.registry.list(filter)
    }

    pub fn list_slots(&self) -> Vec<CabinetSlot> {
        self.registry.list_slots()
    }

    pub fn summary(&self) -> CustodySummary {
        self.registry.summary()
    }

    pub fn officers(&self) -> Vec<Officer> {
        self.directory.list()
    }

    // -- Administration ------------------------------------------------------

    /// Add an officer. The very first officer may be added by nobody
    /// (`actor = None`); after that an administrator must do it.
    pub fn provision_officer(
        &self,
        actor: Option<&OfficerId>,
        officer: Officer,
    ) -> Result<Outcome<()>> {
        let details = format!("{} as {}", officer.actor_label(), officer.role);
        let by = match actor {
            Some(actor) => {
                let by = self.authorize(actor, Module::Officers)?;
                if !can_manage_roles(by.role, officer.role) {
                    return Err(CertvaultError::AccessDenied {
                        role: by.role,
                        action: format!("provision a {} officer", officer.role),
                    });
                }
                self.directory.provision(officer)?;
                by.actor_label()
            }
            None => {
                self.directory.provision_first(officer)?;
                "system".to_owned()
            }
        };
        let warnings = self.record(AuditEvent::info(self.clock.now(), by, "officer_provisioned", details));
        Ok(Outcome::with_warnings((), warnings))
    }

    pub fn set_officer_role(
        &self,
        actor: &OfficerId,
        target: &OfficerId,
        role: Role,
    ) -> Result<Outcome<Officer>> {
        let by = self.authorize(actor, Module::Officers)?;
        let change = self.directory.set_role(actor, target, role)?;
        let warnings = self.record(AuditEvent::warning(
            self.clock.now(),
            by.actor_label(),
            "role_changed",
            format!("{} from {} to {}", change.officer.actor_label(), change.previous, role),
        ));
        Ok(Outcome::with_warnings(change.officer, warnings))
    }

    pub fn provision_certificate(
        &self,
        actor: &OfficerId,
        new: NewCertificate,
        slot: SlotId,
    ) -> Result<Outcome<Certificate>> {
        let by = self.authorize(actor, Module::Cabinets)?;
        let cert = self.registry.provision(new, slot)?;
        let warnings = self.record(self.event(
            &by,
            "certificate_provisioned",
            format!("{} ({}) in slot {slot}", cert.id, cert.serial_number),
        ));
        Ok(Outcome::with_warnings(cert, warnings))
    }

    /// Mark a certificate EXPIRED, REVOKED or LOST.
    pub fn retire_certificate(
        &self,
        actor: &OfficerId,
        certificate: &CertificateId,
        status: CertificateStatus,
    ) -> Result<Outcome<Certificate>> {
        let by = self.require_role(actor, Role::DeptAdmin, "retire certificates")?;
        let cert = self.registry.retire(certificate, status)?;
        let event = AuditEvent::warning(
            self.clock.now(),
            by.actor_label(),
            "certificate_retired",
            format!("{} ({}) marked {status}", cert.id, cert.serial_number),
        );
        let warnings = self.record(event);
        info!(certificate = %cert.id, %status, "certificate retired");
        Ok(Outcome::with_warnings(cert, warnings))
    }

    pub fn reinstate_certificate(
        &self,
        actor: &OfficerId,
        certificate: &CertificateId,
        slot: SlotId,
    ) -> Result<Outcome<Certificate>> {
        let by = self.authorize(actor, Module::Cabinets)?;
        let cert = self.registry.reinstate(certificate, slot)?;
        let warnings = self.record(self.event(
            &by,
            "certificate_reinstated",
            format!("{} ({}) in slot {slot}", cert.id, cert.serial_number),
        ));
        Ok(Outcome::with_warnings(cert, warnings))
    }

    pub fn mark_slot_fault(&self, actor: &OfficerId, slot: SlotId) -> Result<Outcome<()>> {
        let by = self.authorize(actor, Module::Cabinets)?;
        self.registry.mark_slot_fault(slot)?;
        let warnings = self.record(AuditEvent::warning(
            self.clock.now(),
            by.actor_label(),
            "slot_fault",
            format!("slot {slot} taken out of service"),
        ));
        Ok(Outcome::with_warnings((), warnings))
    }

    pub fn clear_slot_fault(&self, actor: &OfficerId, slot: SlotId) -> Result<Outcome<()>> {
        let by = self.authorize(actor, Module::Cabinets)?;
        self.registry.clear_slot_fault(slot)?;
        let warnings = self.record(self.event(&by, "slot_fault_cleared", format!("slot {slot}")));
        Ok(Outcome::with_warnings((), warnings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::tests::officer;
    use crate::notify::RecordingGateway;
    use crate::registry::tests::{new_cert, start};
    use certvault_core::clock::ManualClock;
    use certvault_core::error::ResultCode;
    use certvault_core::sink::MemorySink;
    use certvault_core::types::{ApprovalStatus, StepId};
    use chrono::TimeDelta;

    struct Harness {
        service: CustodyService,
        sink: Arc<MemorySink>,
        gateway: Arc<RecordingGateway>,
        clock: Arc<ManualClock>,
    }

    fn harness() -> Harness {
        let sink = Arc::new(MemorySink::new());
        let gateway = Arc::new(RecordingGateway::new());
        let clock = Arc::new(ManualClock::new(start()));
        let service = CustodyService::new(
            CustodySettings::default(),
            sink.clone(),
            gateway.clone(),
            clock.clone(),
        );
        service
            .provision_officer(None, officer("o4", "Zhao Min", Role::SysAdmin))
            .unwrap();
        let admin = OfficerId::from("o4");
        for (id, name, role) in [
            ("o1", "Zhang Wei", Role::DeptAdmin),
            ("o2", "Li Qiang", Role::User),
            ("o3", "Wang Fang", Role::User),
        ] {
            service
                .provision_officer(Some(&admin), officer(id, name, role))
                .unwrap();
        }
        service
            .provision_certificate(&admin, new_cert("c1", "UK-2024-001", "o1"), SlotId(1))
            .unwrap();
        service
            .provision_certificate(&admin, new_cert("c2", "UK-2024-002", "o2"), SlotId(2))
            .unwrap();
        Harness {
            service,
            sink,
            gateway,
            clock,
        }
    }

    #[test]
    fn borrow_then_return_to_same_slot() {
        let h = harness();
        let freed = h.service.borrow_certificate(&"c1".into(), &"o1".into(), "audit").unwrap();
        assert_eq!(freed.value, SlotId(1));
        assert!(h.service.list_slots()[0].is_empty());

        let assigned = h.service.return_certificate(&"c1".into(), &"o1".into()).unwrap();
        assert_eq!(assigned.value, SlotId(1));
        let cert = h.service.certificate(&"c1".into()).unwrap();
        assert_eq!(cert.status, CertificateStatus::Active);
        assert_eq!(cert.cabinet_slot, Some(SlotId(1)));
        assert_eq!(h.sink.count_action("certificate_borrowed"), 1);
        assert_eq!(h.sink.count_action("certificate_returned"), 1);
    }

    #[test]
    fn users_cannot_borrow_other_officers_certificates() {
        let h = harness();
        let result = h.service.borrow_certificate(&"c1".into(), &"o3".into(), "x");
        assert_eq!(ResultCode::of(&result), ResultCode::Unauthorized);

        assert!(h.service.borrow_certificate(&"c2".into(), &"o2".into(), "x").is_ok());
        h.service.return_certificate(&"c2".into(), &"o2".into()).unwrap();
        assert!(h.service.borrow_certificate(&"c2".into(), &"o1".into(), "x").is_ok());
    }

    #[test]
    fn result_codes_surface() {
        let h = harness();
        let missing = h.service.borrow_certificate(&"c9".into(), &"o4".into(), "x");
        assert_eq!(ResultCode::of(&missing), ResultCode::NotFound);

        h.service.borrow_certificate(&"c1".into(), &"o4".into(), "x").unwrap();
        let again = h.service.borrow_certificate(&"c1".into(), &"o4".into(), "x");
        assert_eq!(ResultCode::of(&again), ResultCode::InvalidState);

        let occupied = h.service.return_certificate_to(&"c1".into(), &"o4".into(), SlotId(2));
        assert_eq!(ResultCode::of(&occupied), ResultCode::SlotConflict);
    }

    #[test]
    fn approval_round_trip() {
        let h = harness();
        let submitted = h
            .service
            .submit_approval_request(&"o3".into(), &"c1".into(), RequestType::Borrow, "night shift")
            .unwrap();
        let id = submitted.value.request.id;

        let refused = h.service.decide_approval(&id, &"o2".into(), Decision::Approve);
        assert_eq!(ResultCode::of(&refused), ResultCode::Unauthorized);

        let outcome = h.service.decide_approval(&id, &"o1".into(), Decision::Approve).unwrap();
        assert_eq!(outcome.value.request.status, ApprovalStatus::Approved);
        assert_eq!(
            h.service.certificate(&"c1".into()).unwrap().status,
            CertificateStatus::Borrowed
        );

        let late = h.service.decide_approval(&id, &"o4".into(), Decision::Reject);
        assert_eq!(ResultCode::of(&late), ResultCode::WorkflowTerminated);
    }

    #[test]
    fn workflow_edits_need_admin() {
        let h = harness();
        let err = h
            .service
            .edit_workflow(&"o2".into(), WorkflowEdit::ToggleEnabled { id: StepId(2) })
            .unwrap_err();
        assert!(matches!(err, CertvaultError::AccessDenied { .. }));

        let config = h
            .service
            .edit_workflow(&"o1".into(), WorkflowEdit::ToggleEnabled { id: StepId(2) })
            .unwrap()
            .value;
        assert_eq!(config.chain().len(), 2);
        assert_eq!(h.sink.count_action("workflow_edited"), 1);

        let result = h.service.update_workflow_config(&"o1".into(), Vec::new());
        assert_eq!(ResultCode::of(&result), ResultCode::InvalidConfig);
    }

    #[test]
    fn workflow_cannot_be_edited_into_auto_approval() {
        let h = harness();
        let result = h
            .service
            .edit_workflow(&"o1".into(), WorkflowEdit::ToggleEnabled { id: StepId(1) });
        assert_eq!(ResultCode::of(&result), ResultCode::InvalidConfig);

        let submitted = h
            .service
            .submit_approval_request(&"o3".into(), &"c1".into(), RequestType::Borrow, "x")
            .unwrap();
        assert_eq!(submitted.value.request.status, ApprovalStatus::Pending);
        assert_eq!(
            h.service.certificate(&"c1".into()).unwrap().status,
            CertificateStatus::Active
        );
    }

    #[tokio::test]
    async fn overdue_scan_alerts_once() {
        let h = harness();
        h.service.borrow_certificate(&"c2".into(), &"o2".into(), "x").unwrap();
        h.clock.advance(TimeDelta::hours(9));

        assert_eq!(h.service.overdue_certificates(8), vec![CertificateId::from("c2")]);
        assert_eq!(h.service.run_overdue_scan(8).await.value.alerted.len(), 1);
        assert!(h.service.run_overdue_scan(8).await.value.alerted.is_empty());
        assert_eq!(h.gateway.count_for(&"c2".into()), 1);
    }

    #[test]
    fn admin_operations_are_role_gated() {
        let h = harness();
        let err = h
            .service
            .retire_certificate(&"o2".into(), &"c2".into(), CertificateStatus::Lost)
            .unwrap_err();
        assert!(matches!(err, CertvaultError::AccessDenied { .. }));

        h.service
            .retire_certificate(&"o1".into(), &"c2".into(), CertificateStatus::Lost)
            .unwrap();
        assert_eq!(h.service.summary().lost, 1);

        assert!(h.service.mark_slot_fault(&"o1".into(), SlotId(10)).is_err());
        h.service.mark_slot_fault(&"o4".into(), SlotId(10)).unwrap();
        assert_eq!(h.service.summary().faulty_slots, 1);
        h.service.clear_slot_fault(&"o4".into(), SlotId(10)).unwrap();
        h.service
            .reinstate_certificate(&"o4".into(), &"c2".into(), SlotId(10))
            .unwrap();
        assert!(h.service.registry().binding_violations().is_empty());
    }

    #[test]
    fn only_first_officer_bootstraps() {
        let h = harness();
        let err = h
            .service
            .provision_officer(None, officer("o9", "Nobody", Role::SysAdmin))
            .unwrap_err();
        assert!(matches!(err, CertvaultError::InvalidStateTransition { .. }));

        let err = h
            .service
            .provision_officer(Some(&"o1".into()), officer("o9", "Nobody", Role::SysAdmin))
            .unwrap_err();
        assert!(matches!(err, CertvaultError::AccessDenied { .. }));

        let changed = h
            .service
            .set_officer_role(&"o4".into(), &"o3".into(), Role::DeptAdmin)
            .unwrap();
        assert_eq!(changed.value.role, Role::DeptAdmin);
        assert_eq!(h.sink.count_action("role_changed"), 1);
    }
}
