// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Certvault custody engine.

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of an officer (e.g. `o1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OfficerId(pub String);

impl OfficerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OfficerId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl std::fmt::Display for OfficerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a certificate token (e.g. `c1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CertificateId(pub String);

impl CertificateId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CertificateId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl std::fmt::Display for CertificateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Physical cabinet position. Slots are numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotId(pub u32);

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Stable identifier of a workflow step, independent of its position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepId(pub u32);

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Officers
// ---------------------------------------------------------------------------

/// Authorization level. Declaration order is privilege order:
/// `User < DeptAdmin < SysAdmin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    DeptAdmin,
    SysAdmin,
}

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::DeptAdmin => "DEPT_ADMIN",
            Self::SysAdmin => "SYS_ADMIN",
        }
    }

    /// Parse the label form (`USER`, `DEPT_ADMIN`, `SYS_ADMIN`), case-insensitive.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_uppercase().as_str() {
            "USER" => Some(Self::User),
            "DEPT_ADMIN" => Some(Self::DeptAdmin),
            "SYS_ADMIN" => Some(Self::SysAdmin),
            _ => None,
        }
    }

    /// Whether this role is at least as privileged as `required`.
    pub fn satisfies(&self, required: Role) -> bool {
        *self >= required
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Police rank. Informational only; never used for authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Rank {
    Constable,
    Sergeant,
    Inspector,
    Superintendent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Officer {
    pub id: OfficerId,
    pub name: String,
    pub badge_number: String,
    pub department: String,
    pub rank: Rank,
    /// Mobile number used for overdue alerts. May be empty.
    #[serde(default)]
    pub phone: String,
    pub role: Role,
}

impl Officer {
    /// Display form used as the audit actor, e.g. `Zhang Wei (001234)`.
    pub fn actor_label(&self) -> String {
        format!("{} ({})", self.name, self.badge_number)
    }
}

// ---------------------------------------------------------------------------
// Certificates
// ---------------------------------------------------------------------------

/// Custody state of a certificate token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CertificateStatus {
    /// In the cabinet, bound to a slot.
    Active,
    /// Out of the cabinet in an officer's hands.
    Borrowed,
    Expired,
    Revoked,
    Lost,
}

impl CertificateStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Borrowed => "BORROWED",
            Self::Expired => "EXPIRED",
            Self::Revoked => "REVOKED",
            Self::Lost => "LOST",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_uppercase().as_str() {
            "ACTIVE" => Some(Self::Active),
            "BORROWED" => Some(Self::Borrowed),
            "EXPIRED" => Some(Self::Expired),
            "REVOKED" => Some(Self::Revoked),
            "LOST" => Some(Self::Lost),
            _ => None,
        }
    }

    /// Retirement statuses are set administratively and take the token out
    /// of circulation.
    pub fn is_retired(&self) -> bool {
        matches!(self, Self::Expired | Self::Revoked | Self::Lost)
    }

    pub const ALL: [CertificateStatus; 5] = [
        Self::Active,
        Self::Borrowed,
        Self::Expired,
        Self::Revoked,
        Self::Lost,
    ];
}

impl std::fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A hardware certificate token (USB key).
///
/// `cabinet_slot` is set iff `status == Active`; `borrow_time` is set iff
/// `status == Borrowed`. The registry is the only writer and maintains both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub id: CertificateId,
    /// USB key serial number.
    pub serial_number: String,
    pub owner_id: OfficerId,
    pub valid_until: NaiveDate,
    pub status: CertificateStatus,
    pub cabinet_slot: Option<SlotId>,
    pub borrow_time: Option<DateTime<Utc>>,
}

impl Certificate {
    /// Whether the slot/borrow-time fields agree with the status.
    pub fn is_consistent(&self) -> bool {
        let slot_ok = self.cabinet_slot.is_some() == (self.status == CertificateStatus::Active);
        let borrow_ok = self.borrow_time.is_some() == (self.status == CertificateStatus::Borrowed);
        slot_ok && borrow_ok
    }

    /// Whether the certificate has been out longer than `threshold` at `now`.
    ///
    /// The comparison is strict: exactly `threshold` elapsed is not overdue.
    pub fn is_overdue(&self, now: DateTime<Utc>, threshold: TimeDelta) -> bool {
        match (self.status, self.borrow_time) {
            (CertificateStatus::Borrowed, Some(borrowed_at)) => now - borrowed_at > threshold,
            _ => false,
        }
    }
}

/// Query filter for certificate listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateFilter {
    pub status: Option<CertificateStatus>,
    /// Case-insensitive substring matched against serial number and owner name.
    pub text: Option<String>,
}

impl CertificateFilter {
    pub fn with_status(status: CertificateStatus) -> Self {
        Self {
            status: Some(status),
            text: None,
        }
    }

    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            status: None,
            text: Some(text.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Cabinet slots
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Empty,
    Occupied,
    /// Hardware fault. Excluded from allocation until cleared by an admin.
    Error,
}

impl SlotStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Occupied => "occupied",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CabinetSlot {
    pub id: SlotId,
    pub status: SlotStatus,
    pub certificate_id: Option<CertificateId>,
}

impl CabinetSlot {
    pub fn empty(id: SlotId) -> Self {
        Self {
            id,
            status: SlotStatus::Empty,
            certificate_id: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status == SlotStatus::Empty
    }
}

// ---------------------------------------------------------------------------
// Approval workflow
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestType {
    Borrow,
    Return,
    Renewal,
}

impl RequestType {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Borrow => "BORROW",
            Self::Return => "RETURN",
            Self::Renewal => "RENEWAL",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_uppercase().as_str() {
            "BORROW" => Some(Self::Borrow),
            "RETURN" => Some(Self::Return),
            "RENEWAL" => Some(Self::Renewal),
            _ => None,
        }
    }
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Overall request state. `Approved` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "APPROVED" => Some(Self::Approved),
            "REJECTED" => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "approve" | "approved" | "yes" => Some(Self::Approve),
            "reject" | "rejected" | "no" => Some(Self::Reject),
            _ => None,
        }
    }
}

/// One role-gated gate in an approval chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: StepId,
    pub name: String,
    pub approver_role: Role,
    pub is_enabled: bool,
    pub order: u32,
}

/// Record of one decision taken on a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDecision {
    pub step_id: StepId,
    pub step_name: String,
    pub approver_id: OfficerId,
    pub decision: Decision,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: RequestId,
    pub requester_id: OfficerId,
    pub certificate_id: CertificateId,
    pub request_type: RequestType,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub status: ApprovalStatus,
    /// Enabled steps snapshotted at submission, sorted by `order`.
    pub chain: Vec<WorkflowStep>,
    /// Index into `chain` of the step awaiting a decision.
    pub current_step: usize,
    pub decisions: Vec<StepDecision>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    /// The step awaiting a decision, if the request is still pending.
    pub fn pending_step(&self) -> Option<&WorkflowStep> {
        if self.status.is_terminal() {
            return None;
        }
        self.chain.get(self.current_step)
    }
}

// ---------------------------------------------------------------------------
// Audit and notification payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditLevel {
    Info,
    Warning,
    Critical,
}

impl AuditLevel {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "INFO" => Some(Self::Info),
            "WARNING" => Some(Self::Warning),
            "CRITICAL" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// An event emitted by the core for the audit trail. The core never reads
/// these back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: String,
    pub details: String,
    pub level: AuditLevel,
}

impl AuditEvent {
    pub fn info(
        timestamp: DateTime<Utc>,
        actor: impl Into<String>,
        action: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            actor: actor.into(),
            action: action.into(),
            details: details.into(),
            level: AuditLevel::Info,
        }
    }

    pub fn warning(
        timestamp: DateTime<Utc>,
        actor: impl Into<String>,
        action: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            level: AuditLevel::Warning,
            ..Self::info(timestamp, actor, action, details)
        }
    }
}

/// Someone to notify about an overdue certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub officer_id: OfficerId,
    pub name: String,
    pub phone: String,
}

/// Point-in-time counts for the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodySummary {
    pub total_certificates: usize,
    pub active: usize,
    pub borrowed: usize,
    pub expired: usize,
    pub revoked: usize,
    pub lost: usize,
    pub empty_slots: usize,
    pub occupied_slots: usize,
    pub faulty_slots: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn certificate(status: CertificateStatus) -> Certificate {
        Certificate {
            id: "c1".into(),
            serial_number: "UK-2024-001".into(),
            owner_id: "o1".into(),
            valid_until: NaiveDate::from_ymd_opt(2027, 12, 31).unwrap(),
            status,
            cabinet_slot: None,
            borrow_time: None,
        }
    }

    #[test]
    fn role_ordering() {
        assert!(Role::User < Role::DeptAdmin);
        assert!(Role::DeptAdmin < Role::SysAdmin);
        assert!(Role::SysAdmin.satisfies(Role::DeptAdmin));
        assert!(!Role::User.satisfies(Role::DeptAdmin));
    }

    #[test]
    fn role_labels_parse() {
        assert_eq!(Role::from_label("dept_admin"), Some(Role::DeptAdmin));
        assert_eq!(Role::from_label("root"), None);
        assert_eq!(serde_json::to_string(&Role::SysAdmin).unwrap(), "\"SYS_ADMIN\"");
    }

    #[test]
    fn consistency_requires_slot_only_when_active() {
        let mut cert = certificate(CertificateStatus::Active);
        assert!(!cert.is_consistent());
        cert.cabinet_slot = Some(SlotId(1));
        assert!(cert.is_consistent());

        cert.status = CertificateStatus::Borrowed;
        assert!(!cert.is_consistent());
        cert.cabinet_slot = None;
        cert.borrow_time = Some(Utc::now());
        assert!(cert.is_consistent());
    }

    #[test]
    fn overdue_is_strict() {
        let now = Utc::now();
        let mut cert = certificate(CertificateStatus::Borrowed);
        cert.borrow_time = Some(now - TimeDelta::hours(8));
        assert!(!cert.is_overdue(now, TimeDelta::hours(8)));
        cert.borrow_time = Some(now - TimeDelta::hours(8) - TimeDelta::seconds(1));
        assert!(cert.is_overdue(now, TimeDelta::hours(8)));
    }

    #[test]
    fn active_certificate_is_never_overdue() {
        let now = Utc::now();
        let mut cert = certificate(CertificateStatus::Active);
        cert.borrow_time = Some(now - TimeDelta::hours(100));
        assert!(!cert.is_overdue(now, TimeDelta::hours(8)));
    }

    #[test]
    fn request_id_parses_back() {
        let id = RequestId::new();
        let parsed: RequestId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }
}
