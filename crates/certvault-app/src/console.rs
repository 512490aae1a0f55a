// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Operator console: one command per line, acting as the officer selected
// with `use`. Every state-changing command prints its result code.

use certvault_core::authz::{can_access_module, require_module, Module};
use certvault_core::config::{AlertPolicy, CertvaultConfig};
use certvault_core::error::{CertvaultError, CollaboratorWarning, ResultCode};
use certvault_core::human_errors::humanize_error;
use certvault_core::types::{
    ApprovalRequest, ApprovalStatus, CertificateFilter, CertificateId, CertificateStatus, Decision, OfficerId,
    RequestId, RequestType, Role, SlotId, StepId,
};
use certvault_custody::{DecisionOutcome, Execution, WorkflowEdit};
use certvault_security::audit::ChainVerdict;
use clap::{Parser, Subcommand};

use crate::services::app_services::AppServices;

const MODULES: [Module; 9] = [
    Module::Dashboard,
    Module::Certificates,
    Module::BorrowReturn,
    Module::Cabinets,
    Module::Officers,
    Module::Approvals,
    Module::Workflow,
    Module::AuditLog,
    Module::Settings,
];

pub const HELP: &str = "\
use <officer>                          act as an officer
whoami | modules                       current officer and the modules they may open
summary                                dashboard counts
certs [status|text]                    list certificates
slots | officers [text]                cabinet slots, officer directory
borrow <cert> [reason]                 take a certificate out
return <cert> [slot]                   put a certificate back
request <borrow|return|renewal> <cert> [reason]
requests [status] | pending           all requests, requests awaiting you
approve <request> | reject <request>   decide the pending step (id prefix is enough)
workflow                               show the approval chain
workflow add <role> <name>
workflow remove|toggle <step>
workflow rename <step> <name>
workflow role <step> <role>
workflow move <step> <position>
retire <cert> <expired|revoked|lost>   take a certificate out of circulation
reinstate <cert> <slot>
fault <slot> | repair <slot>
role <officer> <role>                  change an officer's role
overdue | scan                         list overdue certificates, run an alert scan
audit [n|officer] | verify             recent audit entries, check the hash chain
set threshold <hours>                  overdue threshold
set policy <once|minutes>              alert once per borrow or re-send every N minutes
help | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Use(OfficerId),
    WhoAmI,
    Modules,
    Summary,
    Certificates(Option<String>),
    Slots,
    Officers(Option<String>),
    Borrow { certificate: CertificateId, reason: String },
    Return { certificate: CertificateId, slot: Option<SlotId> },
    Request { request_type: RequestType, certificate: CertificateId, reason: String },
    Requests(Option<ApprovalStatus>),
    Pending,
    Decide { request: String, decision: Decision },
    Workflow,
    EditWorkflow(WorkflowEdit),
    Retire { certificate: CertificateId, status: CertificateStatus },
    Reinstate { certificate: CertificateId, slot: SlotId },
    Fault(SlotId),
    Repair(SlotId),
    SetRole { target: OfficerId, role: Role },
    Overdue,
    Scan,
    Audit(u32),
    AuditFor(OfficerId),
    SetThreshold(u32),
    SetPolicy(AlertPolicy),
    Verify,
    Help,
    Quit,
}

impl Command {
    /// Parse one console line. Blank lines are `Ok(None)`; usage errors come
    /// back as the text to print.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let mut words: Vec<String> = line.split_whitespace().map(str::to_owned).collect();
        let Some(verb) = words.first_mut() else {
            return Ok(None);
        };
        *verb = verb.to_ascii_lowercase();
        let parsed = Line::try_parse_from(words).map_err(|e| e.render().to_string().trim_end().to_owned())?;
        Ok(Some(parsed.verb.into()))
    }
}

/// Grammar of one console line.
#[derive(Debug, Parser)]
#[command(
    name = "certvault",
    no_binary_name = true,
    disable_help_flag = true,
    disable_help_subcommand = true,
    disable_version_flag = true
)]
struct Line {
    #[command(subcommand)]
    verb: Verb,
}

#[derive(Debug, Subcommand)]
enum Verb {
    Use { officer: String },
    Whoami,
    Modules,
    #[command(alias = "dashboard")]
    Summary,
    #[command(alias = "certificates")]
    Certs { filter: Vec<String> },
    Slots,
    Officers { text: Vec<String> },
    Borrow {
        certificate: String,
        #[arg(trailing_var_arg = true)]
        reason: Vec<String>,
    },
    Return { certificate: String, slot: Option<u32> },
    Request {
        #[arg(value_parser = parse_request_type)]
        kind: RequestType,
        certificate: String,
        #[arg(trailing_var_arg = true)]
        reason: Vec<String>,
    },
    Requests {
        #[arg(value_parser = parse_approval_status)]
        status: Option<ApprovalStatus>,
    },
    Pending,
    Approve { request: String },
    Reject { request: String },
    Workflow {
        #[command(subcommand)]
        edit: Option<WorkflowVerb>,
    },
    Retire {
        certificate: String,
        #[arg(value_parser = parse_retired_status)]
        status: CertificateStatus,
    },
    Reinstate { certificate: String, slot: u32 },
    Fault { slot: u32 },
    Repair { slot: u32 },
    Role {
        officer: String,
        #[arg(value_parser = parse_role)]
        role: Role,
    },
    Overdue,
    Scan,
    /// A number lists that many recent entries; anything else is an officer id.
    Audit { target: Option<String> },
    Set {
        #[command(subcommand)]
        setting: Setting,
    },
    Verify,
    #[command(alias = "?")]
    Help,
    #[command(alias = "exit")]
    Quit,
}

#[derive(Debug, Subcommand)]
enum WorkflowVerb {
    Add {
        #[arg(value_parser = parse_role)]
        role: Role,
        name: Vec<String>,
    },
    Remove { step: u32 },
    Toggle { step: u32 },
    Rename { step: u32, name: Vec<String> },
    Role {
        step: u32,
        #[arg(value_parser = parse_role)]
        role: Role,
    },
    Move { step: u32, position: u32 },
}

#[derive(Debug, Subcommand)]
enum Setting {
    Threshold { hours: u32 },
    Policy {
        #[arg(value_parser = parse_policy)]
        policy: AlertPolicy,
    },
}

impl From<Verb> for Command {
    fn from(verb: Verb) -> Self {
        let joined = |words: Vec<String>| Some(words.join(" ")).filter(|s| !s.is_empty());
        match verb {
            Verb::Use { officer } => Self::Use(officer.as_str().into()),
            Verb::Whoami => Self::WhoAmI,
            Verb::Modules => Self::Modules,
            Verb::Summary => Self::Summary,
            Verb::Certs { filter } => Self::Certificates(joined(filter)),
            Verb::Slots => Self::Slots,
            Verb::Officers { text } => Self::Officers(joined(text)),
            Verb::Borrow { certificate, reason } => Self::Borrow {
                certificate: certificate.as_str().into(),
                reason: reason.join(" "),
            },
            Verb::Return { certificate, slot } => Self::Return {
                certificate: certificate.as_str().into(),
                slot: slot.map(SlotId),
            },
            Verb::Request {
                kind,
                certificate,
                reason,
            } => Self::Request {
                request_type: kind,
                certificate: certificate.as_str().into(),
                reason: reason.join(" "),
            },
            Verb::Requests { status } => Self::Requests(status),
            Verb::Pending => Self::Pending,
            Verb::Approve { request } => Self::Decide {
                request,
                decision: Decision::Approve,
            },
            Verb::Reject { request } => Self::Decide {
                request,
                decision: Decision::Reject,
            },
            Verb::Workflow { edit: None } => Self::Workflow,
            Verb::Workflow { edit: Some(edit) } => Self::EditWorkflow(edit.into()),
            Verb::Retire { certificate, status } => Self::Retire {
                certificate: certificate.as_str().into(),
                status,
            },
            Verb::Reinstate { certificate, slot } => Self::Reinstate {
                certificate: certificate.as_str().into(),
                slot: SlotId(slot),
            },
            Verb::Fault { slot } => Self::Fault(SlotId(slot)),
            Verb::Repair { slot } => Self::Repair(SlotId(slot)),
            Verb::Role { officer, role } => Self::SetRole {
                target: officer.as_str().into(),
                role,
            },
            Verb::Overdue => Self::Overdue,
            Verb::Scan => Self::Scan,
            Verb::Audit { target: None } => Self::Audit(20),
            Verb::Audit { target: Some(target) } => match target.parse() {
                Ok(limit) => Self::Audit(limit),
                Err(_) => Self::AuditFor(target.as_str().into()),
            },
            Verb::Set {
                setting: Setting::Threshold { hours },
            } => Self::SetThreshold(hours),
            Verb::Set {
                setting: Setting::Policy { policy },
            } => Self::SetPolicy(policy),
            Verb::Verify => Self::Verify,
            Verb::Help => Self::Help,
            Verb::Quit => Self::Quit,
        }
    }
}

impl From<WorkflowVerb> for WorkflowEdit {
    fn from(verb: WorkflowVerb) -> Self {
        match verb {
            WorkflowVerb::Add { role, name } => Self::AddStep {
                name: name.join(" "),
                approver_role: role,
            },
            WorkflowVerb::Remove { step } => Self::RemoveStep { id: StepId(step) },
            WorkflowVerb::Toggle { step } => Self::ToggleEnabled { id: StepId(step) },
            WorkflowVerb::Rename { step, name } => Self::RenameStep {
                id: StepId(step),
                name: name.join(" "),
            },
            WorkflowVerb::Role { step, role } => Self::SetApproverRole { id: StepId(step), role },
            WorkflowVerb::Move { step, position } => Self::Reorder {
                id: StepId(step),
                position,
            },
        }
    }
}

fn parse_role(s: &str) -> Result<Role, String> {
    Role::from_label(s).ok_or_else(|| "expected USER, DEPT_ADMIN or SYS_ADMIN".to_owned())
}

fn parse_request_type(s: &str) -> Result<RequestType, String> {
    RequestType::from_label(s).ok_or_else(|| "expected borrow, return or renewal".to_owned())
}

fn parse_approval_status(s: &str) -> Result<ApprovalStatus, String> {
    ApprovalStatus::from_label(s).ok_or_else(|| "expected pending, approved or rejected".to_owned())
}

fn parse_retired_status(s: &str) -> Result<CertificateStatus, String> {
    CertificateStatus::from_label(s)
        .filter(CertificateStatus::is_retired)
        .ok_or_else(|| "expected expired, revoked or lost".to_owned())
}

fn parse_policy(s: &str) -> Result<AlertPolicy, String> {
    if s.eq_ignore_ascii_case("once") {
        return Ok(AlertPolicy::OncePerEpisode);
    }
    s.parse()
        .map(|minutes| AlertPolicy::ResendEvery { minutes })
        .map_err(|_| "expected once or a number of minutes".to_owned())
}

/// What the console prints for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Present for commands that reach the custody service.
    pub code: Option<ResultCode>,
    pub lines: Vec<String>,
}

impl Reply {
    fn info(lines: Vec<String>) -> Self {
        Self { code: None, lines }
    }

    fn ok(line: impl Into<String>, warnings: &[CollaboratorWarning]) -> Self {
        let mut lines = vec![format!("OK {}", line.into())];
        lines.extend(warnings.iter().map(|w| format!("  warning: {w}")));
        Self {
            code: Some(ResultCode::Ok),
            lines,
        }
    }

    fn error(err: &CertvaultError) -> Self {
        let human = humanize_error(err);
        Self {
            code: Some(err.code()),
            lines: vec![
                format!("{} {}", err.code(), human.message),
                format!("  {}", human.suggestion),
            ],
        }
    }
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.lines.join("\n"))
    }
}

pub struct Console {
    services: AppServices,
    actor: Option<OfficerId>,
}

impl Console {
    pub fn new(services: AppServices) -> Self {
        Self {
            services,
            actor: None,
        }
    }

    /// Run one command. `Quit` is left to the caller.
    pub async fn execute(&mut self, command: Command) -> Reply {
        let custody = self.services.custody();

        if let Command::Use(id) = &command {
            return match custody.directory().get(id) {
                Ok(officer) => {
                    self.actor = Some(officer.id.clone());
                    Reply::info(vec![format!("acting as {} [{}]", officer.actor_label(), officer.role)])
                }
                Err(e) => Reply::error(&e),
            };
        }
        let needs_actor = !matches!(
            command,
            Command::Help | Command::Quit | Command::Summary | Command::Overdue
        );
        let actor = match (&self.actor, needs_actor) {
            (Some(actor), _) => actor.clone(),
            (None, false) => OfficerId::from(""),
            (None, true) => return Reply::info(vec!["no acting officer, run `use <officer>` first".into()]),
        };

        match command {
            Command::Use(_) | Command::Quit => Reply::info(Vec::new()),
            Command::Help => Reply::info(HELP.lines().map(str::to_owned).collect()),
            Command::WhoAmI => match custody.directory().get(&actor) {
                Ok(o) => Reply::info(vec![format!(
                    "{} [{}] {:?}, {}",
                    o.actor_label(),
                    o.role,
                    o.rank,
                    o.department
                )]),
                Err(e) => Reply::error(&e),
            },
            Command::Modules => match custody.directory().get(&actor) {
                Ok(o) => Reply::info(
                    MODULES
                        .iter()
                        .filter(|m| can_access_module(o.role, **m))
                        .map(|m| m.name().to_owned())
                        .collect(),
                ),
                Err(e) => Reply::error(&e),
            },
            Command::Summary => {
                let s = custody.summary();
                let pending = custody.approval_requests_with_status(ApprovalStatus::Pending).len();
                let threshold = self.services.config().overdue_threshold_hours;
                let overdue = custody.overdue_certificates(threshold).len();
                Reply::info(vec![
                    format!(
                        "certificates {} (active {}, borrowed {}, expired {}, revoked {}, lost {})",
                        s.total_certificates, s.active, s.borrowed, s.expired, s.revoked, s.lost
                    ),
                    format!(
                        "slots: {} occupied, {} empty, {} faulty",
                        s.occupied_slots, s.empty_slots, s.faulty_slots
                    ),
                    format!("pending approvals {pending}, overdue {overdue}"),
                ])
            }
            Command::Certificates(filter) => {
                let filter = match filter {
                    Some(f) => match CertificateStatus::from_label(&f) {
                        Some(status) => CertificateFilter::with_status(status),
                        None => CertificateFilter::with_text(f),
                    },
                    None => CertificateFilter::default(),
                };
                Reply::info(
                    custody
                        .list_certificates(&filter)
                        .iter()
                        .map(|c| {
                            let place = match (c.cabinet_slot, c.borrow_time) {
                                (Some(slot), _) => format!("slot {slot}"),
                                (None, Some(at)) => format!("out since {}", at.format("%Y-%m-%d %H:%M")),
                                (None, None) => "-".into(),
                            };
                            format!(
                                "{:<4} {:<12} {:<9} owner {:<4} valid to {} {place}",
                                c.id, c.serial_number, c.status, c.owner_id, c.valid_until
                            )
                        })
                        .collect(),
                )
            }
            Command::Slots => Reply::info(
                custody
                    .list_slots()
                    .iter()
                    .map(|s| match &s.certificate_id {
                        Some(c) => format!("{:>3} {} {c}", s.id, s.status),
                        None => format!("{:>3} {}", s.id, s.status),
                    })
                    .collect(),
            ),
            Command::Officers(text) => {
                let officers = match text {
                    Some(text) => custody.directory().search(&text),
                    None => custody.officers(),
                };
                Reply::info(
                    officers
                        .iter()
                        .map(|o| format!("{:<4} {} [{}] {}", o.id, o.actor_label(), o.role, o.department))
                        .collect(),
                )
            }
            Command::Borrow { certificate, reason } => {
                match custody.borrow_certificate(&certificate, &actor, &reason) {
                    Ok(o) => Reply::ok(format!("{certificate} taken from slot {}", o.value), &o.warnings),
                    Err(e) => Reply::error(&e),
                }
            }
            Command::Return { certificate, slot } => {
                let result = match slot {
                    Some(slot) => custody.return_certificate_to(&certificate, &actor, slot),
                    None => custody.return_certificate(&certificate, &actor),
                };
                match result {
                    Ok(o) => Reply::ok(format!("{certificate} stored in slot {}", o.value), &o.warnings),
                    Err(e) => Reply::error(&e),
                }
            }
            Command::Request {
                request_type,
                certificate,
                reason,
            } => match custody.submit_approval_request(&actor, &certificate, request_type, &reason) {
                Ok(o) => Reply::ok(describe_decision(&o.value), &o.warnings),
                Err(e) => Reply::error(&e),
            },
            Command::Requests(status) => {
                let requests = match status {
                    Some(status) => custody.approval_requests_with_status(status),
                    None => custody.approval_requests(),
                };
                Reply::info(requests.iter().map(describe_request).collect())
            }
            Command::Pending => match custody.pending_approvals(&actor) {
                Ok(requests) => Reply::info(requests.iter().map(describe_request).collect()),
                Err(e) => Reply::error(&e),
            },
            Command::Decide { request, decision } => {
                let id = match self.resolve_request(&request) {
                    Ok(id) => id,
                    Err(reply) => return reply,
                };
                match custody.decide_approval(&id, &actor, decision) {
                    Ok(o) => Reply::ok(describe_decision(&o.value), &o.warnings),
                    Err(e) => Reply::error(&e),
                }
            }
            Command::Workflow => Reply::info(
                custody
                    .workflow_config()
                    .steps()
                    .iter()
                    .map(|s| {
                        format!(
                            "{}. [{}] {} ({}){}",
                            s.order,
                            s.id,
                            s.name,
                            s.approver_role,
                            if s.is_enabled { "" } else { " disabled" }
                        )
                    })
                    .collect(),
            ),
            Command::EditWorkflow(edit) => match self.services.edit_workflow(&actor, edit) {
                Ok(o) => Reply::ok(format!("workflow now has {} enabled step(s)", o.value.chain().len()), &o.warnings),
                Err(e) => Reply::error(&e),
            },
            Command::Retire { certificate, status } => {
                match custody.retire_certificate(&actor, &certificate, status) {
                    Ok(o) => Reply::ok(format!("{certificate} is now {}", o.value.status), &o.warnings),
                    Err(e) => Reply::error(&e),
                }
            }
            Command::Reinstate { certificate, slot } => {
                match custody.reinstate_certificate(&actor, &certificate, slot) {
                    Ok(o) => Reply::ok(format!("{certificate} back in slot {slot}"), &o.warnings),
                    Err(e) => Reply::error(&e),
                }
            }
            Command::Fault(slot) => match custody.mark_slot_fault(&actor, slot) {
                Ok(o) => Reply::ok(format!("slot {slot} out of service"), &o.warnings),
                Err(e) => Reply::error(&e),
            },
            Command::Repair(slot) => match custody.clear_slot_fault(&actor, slot) {
                Ok(o) => Reply::ok(format!("slot {slot} back in service"), &o.warnings),
                Err(e) => Reply::error(&e),
            },
            Command::SetRole { target, role } => match custody.set_officer_role(&actor, &target, role) {
                Ok(o) => Reply::ok(format!("{} is now {}", o.value.actor_label(), o.value.role), &o.warnings),
                Err(e) => Reply::error(&e),
            },
            Command::Overdue => {
                let threshold = self.services.config().overdue_threshold_hours;
                Reply::info(
                    custody
                        .overdue_certificates(threshold)
                        .iter()
                        .map(ToString::to_string)
                        .collect(),
                )
            }
            Command::Scan => {
                let o = self.services.run_overdue_scan().await;
                Reply::ok(
                    format!("{} overdue, {} alerted", o.value.overdue.len(), o.value.alerted.len()),
                    &o.warnings,
                )
            }
            Command::Audit(limit) => {
                if let Some(reply) = self.require(&actor, Module::AuditLog) {
                    return reply;
                }
                match self.services.recent_audit_entries(limit) {
                    Ok(entries) => Reply::info(
                        entries
                            .iter()
                            .map(|e| {
                                format!(
                                    "{} {:<7} {} {}: {}",
                                    e.timestamp,
                                    e.level.label(),
                                    e.actor,
                                    e.action,
                                    e.details
                                )
                            })
                            .collect(),
                    ),
                    Err(e) => Reply::error(&e),
                }
            }
            Command::AuditFor(officer) => {
                if let Some(reply) = self.require(&actor, Module::AuditLog) {
                    return reply;
                }
                let label = match custody.directory().get(&officer) {
                    Ok(o) => o.actor_label(),
                    Err(e) => return Reply::error(&e),
                };
                match self.services.audit_entries_for_actor(&label) {
                    Ok(entries) => Reply::info(
                        entries
                            .iter()
                            .map(|e| format!("{} {}: {}", e.timestamp, e.action, e.details))
                            .collect(),
                    ),
                    Err(e) => Reply::error(&e),
                }
            }
            Command::SetThreshold(hours) => {
                let config = CertvaultConfig {
                    overdue_threshold_hours: hours,
                    ..self.services.config()
                };
                self.save_settings(&actor, config, format!("overdue threshold {hours}h"))
            }
            Command::SetPolicy(policy) => {
                let config = CertvaultConfig {
                    alert_policy: policy,
                    ..self.services.config()
                };
                self.save_settings(&actor, config, format!("alert policy {policy:?}"))
            }
            Command::Verify => {
                if let Some(reply) = self.require(&actor, Module::AuditLog) {
                    return reply;
                }
                match self.services.verify_audit_chain() {
                    Ok(ChainVerdict::Intact { entries }) => Reply::info(vec![format!("audit chain intact, {entries} entries")]),
                    Ok(ChainVerdict::Broken { entry_id }) => {
                        Reply::info(vec![format!("audit chain BROKEN at entry {entry_id}")])
                    }
                    Err(e) => Reply::error(&e),
                }
            }
        }
    }

    fn save_settings(&self, actor: &OfficerId, config: CertvaultConfig, what: String) -> Reply {
        if let Some(reply) = self.require(actor, Module::Settings) {
            return reply;
        }
        match self.services.save_config(&config) {
            Ok(()) => Reply::ok(what, &[]),
            Err(e) => Reply::error(&e),
        }
    }

    fn require(&self, actor: &OfficerId, module: Module) -> Option<Reply> {
        let officer = match self.services.custody().directory().get(actor) {
            Ok(officer) => officer,
            Err(e) => return Some(Reply::error(&e)),
        };
        require_module(officer.role, module)
            .err()
            .map(|e| Reply::error(&e))
    }

    /// Find the one request whose id starts with `prefix`.
    fn resolve_request(&self, prefix: &str) -> Result<RequestId, Reply> {
        let matches: Vec<RequestId> = self
            .services
            .custody()
            .approval_requests()
            .iter()
            .map(|r| r.id)
            .filter(|id| id.to_string().starts_with(prefix))
            .collect();
        match matches.as_slice() {
            [id] => Ok(*id),
            [] => Err(Reply::error(&CertvaultError::not_found(
                certvault_core::error::EntityKind::Request,
                prefix,
            ))),
            _ => Err(Reply::info(vec![format!("{prefix} matches {} requests, give more of the id", matches.len())])),
        }
    }
}

fn describe_request(r: &ApprovalRequest) -> String {
    let step = match r.pending_step() {
        Some(step) => format!(" awaiting {} ({})", step.name, step.approver_role),
        None => String::new(),
    };
    format!(
        "{} {} {} by {} {}{step}",
        r.id, r.request_type, r.certificate_id, r.requester_id, r.status
    )
}

fn describe_decision(outcome: &DecisionOutcome) -> String {
    let executed = match &outcome.executed {
        Some(Execution::Borrowed(receipt)) => format!(", slot {} freed", receipt.slot_freed),
        Some(Execution::Returned(receipt)) => format!(", stored in slot {}", receipt.slot_assigned),
        Some(Execution::Renewed(cert)) => format!(", valid until {}", cert.valid_until),
        None => String::new(),
    };
    format!("{}{executed}", describe_request(&outcome.request))
}
