// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Approval workflow engine.
//
// A request snapshots the enabled steps at submission and walks them in
// order. A rejection at any step is final. Approval at the last step runs
// the underlying custody transaction exactly once.
//
// Lock order: `requests` before the registry's inventory. The engine holds
// the requests lock across the final transaction so two approvers racing on
// the last step cannot both execute it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use certvault_core::authz::can_approve;
use certvault_core::clock::Clock;
use certvault_core::error::{CertvaultError, CollaboratorWarning, EntityKind, Outcome, Result};
use certvault_core::sink::AuditSink;
use certvault_core::types::{
    ApprovalRequest, ApprovalStatus, AuditEvent, Certificate, CertificateId, CertificateStatus,
    Decision, OfficerId, RequestId, RequestType, Role, StepDecision, WorkflowStep,
};
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, instrument, warn};

use super::config::{WorkflowConfig, WorkflowEdit};
use crate::directory::OfficerDirectory;
use crate::registry::{BorrowReceipt, CertificateRegistry, ReturnReceipt};

/// The custody transaction run when a request is fully approved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Execution {
    Borrowed(BorrowReceipt),
    Returned(ReturnReceipt),
    Renewed(Certificate),
}

/// State of a request after a submission or decision, plus the transaction
/// it triggered, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionOutcome {
    pub request: ApprovalRequest,
    pub executed: Option<Execution>,
}

pub struct WorkflowEngine {
    requests: Mutex<BTreeMap<RequestId, ApprovalRequest>>,
    config: RwLock<WorkflowConfig>,
    registry: Arc<CertificateRegistry>,
    directory: Arc<OfficerDirectory>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    renewal_period: TimeDelta,
}

impl WorkflowEngine {
    pub fn new(
        config: WorkflowConfig,
        registry: Arc<CertificateRegistry>,
        directory: Arc<OfficerDirectory>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        renewal_period_days: u32,
    ) -> Self {
        Self {
            requests: Mutex::new(BTreeMap::new()),
            config: RwLock::new(config),
            registry,
            directory,
            audit,
            clock,
            renewal_period: TimeDelta::days(i64::from(renewal_period_days)),
        }
    }

    fn requests(&self) -> MutexGuard<'_, BTreeMap<RequestId, ApprovalRequest>> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -- Configuration -------------------------------------------------------

    pub fn config(&self) -> WorkflowConfig {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replace the whole step list. Pending requests keep their chains.
    pub fn update_config(&self, steps: Vec<WorkflowStep>) -> Result<WorkflowConfig> {
        let next = WorkflowConfig::new(steps)?;
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = next.clone();
        info!(steps = next.steps().len(), "workflow configuration replaced");
        Ok(next)
    }

    /// Apply one typed edit. Pending requests keep their chains.
    pub fn edit_config(&self, edit: WorkflowEdit) -> Result<WorkflowConfig> {
        self.edit_config_and(edit, |_| Ok(()))
    }

    /// Apply one typed edit, handing the result to `commit` before it goes
    /// live. If `commit` fails the live configuration is unchanged.
    pub fn edit_config_and(
        &self,
        edit: WorkflowEdit,
        commit: impl FnOnce(&WorkflowConfig) -> Result<()>,
    ) -> Result<WorkflowConfig> {
        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = config.clone();
        next.apply(edit)?;
        commit(&next)?;
        *config = next.clone();
        debug!(steps = next.steps().len(), "workflow configuration edited");
        Ok(next)
    }

    // -- Submission ----------------------------------------------------------

    /// Open a request against the current chain.
    ///
    /// The certificate must be in a status the request type can act on. The
    /// request always starts pending on the first enabled step.
    #[instrument(skip_all, fields(%requester, %certificate, kind = %request_type))]
    pub fn submit(
        &self,
        requester: &OfficerId,
        certificate: &CertificateId,
        request_type: RequestType,
        reason: &str,
    ) -> Result<Outcome<DecisionOutcome>> {
        let officer = self.directory.get(requester)?;
        let cert = self.registry.get(certificate)?;
        check_submittable(&cert, request_type)?;

        let now = self.clock.now();
        let chain = self.config().chain();
        if chain.is_empty() {
            return Err(CertvaultError::InvalidConfig(
                "the workflow has no enabled approval step".into(),
            ));
        }
        let request = ApprovalRequest {
            id: RequestId::new(),
            requester_id: requester.clone(),
            certificate_id: certificate.clone(),
            request_type,
            reason: reason.to_owned(),
            created_at: now,
            status: ApprovalStatus::Pending,
            chain,
            current_step: 0,
            decisions: Vec::new(),
            decided_at: None,
        };

        let event = AuditEvent::info(
            now,
            officer.actor_label(),
            "approval_submitted",
            format!(
                "{} request {} for {} ({}): {}",
                request_type, request.id, cert.id, cert.serial_number, reason
            ),
        );

        let mut requests = self.requests();
        if let Some(open) = requests.values().find(|r| {
            r.status == ApprovalStatus::Pending
                && r.certificate_id == *certificate
                && r.request_type == request_type
        }) {
            return Err(CertvaultError::invalid_state(
                certificate,
                format!("{request_type} request {} is already pending", open.id),
            ));
        }

        info!(request = %request.id, steps = request.chain.len(), "approval request submitted");
        requests.insert(request.id, request.clone());
        drop(requests);

        let warnings = self.emit(&[event]);
        Ok(Outcome::with_warnings(
            DecisionOutcome {
                request,
                executed: None,
            },
            warnings,
        ))
    }

    // -- Decisions -----------------------------------------------------------

    /// Record `approver`'s decision on the request's current step.
    #[instrument(skip_all, fields(request = %id, %approver, ?decision))]
    pub fn decide(
        &self,
        id: &RequestId,
        approver: &OfficerId,
        decision: Decision,
    ) -> Result<Outcome<DecisionOutcome>> {
        let mut requests = self.requests();
        let request = requests
            .get(id)
            .ok_or_else(|| CertvaultError::not_found(EntityKind::Request, id))?;
        if request.status.is_terminal() {
            return Err(CertvaultError::WorkflowTerminated {
                request: *id,
                status: request.status,
            });
        }

        let officer = self.directory.get(approver)?;
        let step = request
            .pending_step()
            .cloned()
            .ok_or_else(|| CertvaultError::invalid_state(id, "request has no step awaiting a decision"))?;
        if !can_approve(officer.role, &step) {
            warn!(role = %officer.role, required = %step.approver_role, "approver role too low");
            return Err(CertvaultError::UnauthorizedApprover {
                approver: approver.clone(),
                role: officer.role,
                required: step.approver_role,
            });
        }

        let now = self.clock.now();
        let is_last = request.current_step + 1 >= request.chain.len();
        // Run the transaction before touching the request so a failure leaves
        // it pending at the same step.
        let executed = match decision {
            Decision::Approve if is_last => Some(self.execute(request, now)?),
            _ => None,
        };

        let request = requests
            .get_mut(id)
            .ok_or_else(|| CertvaultError::not_found(EntityKind::Request, id))?;
        request.decisions.push(StepDecision {
            step_id: step.id,
            step_name: step.name.clone(),
            approver_id: approver.clone(),
            decision,
            decided_at: now,
        });

        let actor = officer.actor_label();
        let mut events = Vec::new();
        match decision {
            Decision::Reject => {
                request.status = ApprovalStatus::Rejected;
                request.decided_at = Some(now);
                events.push(AuditEvent::warning(
                    now,
                    &actor,
                    "approval_rejected",
                    format!("{} rejected at step \"{}\"", request.id, step.name),
                ));
                info!(step = %step.id, "request rejected");
            }
            Decision::Approve if is_last => {
                request.status = ApprovalStatus::Approved;
                request.decided_at = Some(now);
                events.push(AuditEvent::info(
                    now,
                    &actor,
                    "approval_granted",
                    format!("{} approved at final step \"{}\"", request.id, step.name),
                ));
                if let Some(execution) = &executed {
                    events.push(execution_event(execution, &actor, now));
                }
                info!(step = %step.id, "request approved and executed");
            }
            Decision::Approve => {
                request.current_step += 1;
                events.push(AuditEvent::info(
                    now,
                    &actor,
                    "approval_step_passed",
                    format!("{} passed step \"{}\"", request.id, step.name),
                ));
                debug!(next = request.current_step, "request advanced");
            }
        }
        let snapshot = request.clone();
        drop(requests);

        let warnings = self.emit(&events);
        Ok(Outcome::with_warnings(
            DecisionOutcome {
                request: snapshot,
                executed,
            },
            warnings,
        ))
    }

    /// Run the custody transaction for a fully approved request.
    fn execute(&self, request: &ApprovalRequest, now: DateTime<Utc>) -> Result<Execution> {
        let cert = &request.certificate_id;
        match request.request_type {
            RequestType::Borrow => self
                .registry
                .borrow(cert, &request.reason)
                .map(Execution::Borrowed),
            RequestType::Return => self
                .registry
                .return_to_preferred(cert)
                .map(Execution::Returned),
            RequestType::Renewal => {
                let current = self.registry.get(cert)?;
                let base = current.valid_until.max(now.date_naive());
                let until = base + self.renewal_period;
                self.registry.renew(cert, until).map(Execution::Renewed)
            }
        }
    }

    fn emit(&self, events: &[AuditEvent]) -> Vec<CollaboratorWarning> {
        events
            .iter()
            .filter_map(|event| match self.audit.append(event) {
                Ok(()) => None,
                Err(e) => {
                    warn!(action = %event.action, error = %e, "audit append failed");
                    Some(CollaboratorWarning::audit(e.to_string()))
                }
            })
            .collect()
    }

    // -- Queries -------------------------------------------------------------

    pub fn get(&self, id: &RequestId) -> Result<ApprovalRequest> {
        self.requests()
            .get(id)
            .cloned()
            .ok_or_else(|| CertvaultError::not_found(EntityKind::Request, id))
    }

    /// Every request, oldest first.
    pub fn list(&self) -> Vec<ApprovalRequest> {
        let mut all: Vec<ApprovalRequest> = self.requests().values().cloned().collect();
        all.sort_by_key(|r| r.created_at);
        all
    }

    pub fn list_with_status(&self, status: ApprovalStatus) -> Vec<ApprovalRequest> {
        let mut matching: Vec<ApprovalRequest> = self
            .requests()
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.created_at);
        matching
    }

    /// Pending requests whose current step `role` may decide, oldest first.
    pub fn pending_for(&self, role: Role) -> Vec<ApprovalRequest> {
        self.list()
            .into_iter()
            .filter(|r| r.pending_step().is_some_and(|step| can_approve(role, step)))
            .collect()
    }
}

/// Whether the certificate's status lets a request of this type run.
fn check_submittable(cert: &Certificate, request_type: RequestType) -> Result<()> {
    let ok = match request_type {
        RequestType::Borrow => cert.status == CertificateStatus::Active,
        RequestType::Return => cert.status == CertificateStatus::Borrowed,
        RequestType::Renewal => !matches!(
            cert.status,
            CertificateStatus::Revoked | CertificateStatus::Lost
        ),
    };
    if ok {
        Ok(())
    } else {
        Err(CertvaultError::invalid_state(
            &cert.id,
            format!("cannot request {request_type} for a certificate that is {}", cert.status),
        ))
    }
}

fn execution_event(execution: &Execution, actor: &str, now: DateTime<Utc>) -> AuditEvent {
    match execution {
        Execution::Borrowed(receipt) => receipt.audit_event(actor),
        Execution::Returned(receipt) => receipt.audit_event(actor),
        Execution::Renewed(cert) => AuditEvent::info(
            now,
            actor,
            "certificate_renewed",
            format!("{} ({}) valid until {}", cert.id, cert.serial_number, cert.valid_until),
        ),
    }
}
