// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Central service layer: opens the audit database, loads configuration and
// seed data, picks the notification gateway, and hands out the custody
// service to the console and the background monitor.
//
// The SQLite audit log is shared behind an `Arc` and serializes its own
// writes; configuration sits behind a `Mutex` because the console can edit
// it while the monitor task reads it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use certvault_core::clock::{Clock, SystemClock};
use certvault_core::config::CertvaultConfig;
use certvault_core::error::{CertvaultError, Outcome, Result};
use certvault_core::sink::{AuditSink, DiscardSink};
use certvault_core::types::OfficerId;
use certvault_custody::{
    CustodyService, CustodySettings, LogGateway, NotificationGateway, OverdueReport, SmsGateway,
    WorkflowConfig, WorkflowEdit,
};
use certvault_security::audit::{AuditEntry, AuditLog, ChainVerdict};
use tracing::{error, info, warn};

use super::data_dir;
use super::seed::Seed;

/// Shared application services. Cheap to clone.
#[derive(Clone)]
pub struct AppServices {
    custody: Arc<CustodyService>,
    audit_log: Arc<AuditLog>,
    data_dir: PathBuf,
    config: Arc<Mutex<CertvaultConfig>>,
}

impl AppServices {
    /// Initialise all services from the data directory. Call once at startup.
    pub fn init() -> Result<Self> {
        let dir = data_dir::data_dir();
        info!(path = %dir.display(), "initialising app services");
        let audit_log = AuditLog::open(dir.join("audit.db"))?;
        Self::assemble(dir, Arc::new(audit_log), Arc::new(SystemClock))
    }

    /// Services backed by an in-memory audit log, used when the data
    /// directory cannot be opened.
    pub fn fallback() -> Result<Self> {
        let dir = std::env::temp_dir().join("certvault-fallback");
        warn!(path = %dir.display(), "using in-memory audit log");
        let audit_log = AuditLog::open_in_memory()?;
        Self::assemble(dir, Arc::new(audit_log), Arc::new(SystemClock))
    }

    /// Build services rooted at `dir` with an injected clock.
    pub fn assemble(dir: PathBuf, audit_log: Arc<AuditLog>, clock: Arc<dyn Clock>) -> Result<Self> {
        let config = load_config(&dir).unwrap_or_default();
        let workflow = match load_workflow(&dir) {
            Ok(Some(workflow)) => workflow,
            Ok(None) => WorkflowConfig::default(),
            Err(e) => {
                error!(error = %e, "workflow.json unreadable, using the default chain");
                WorkflowConfig::default()
            }
        };

        let sink: Arc<dyn AuditSink> = if config.audit_enabled {
            audit_log.clone()
        } else {
            Arc::new(DiscardSink)
        };
        let settings = CustodySettings {
            workflow,
            ..CustodySettings::from(&config)
        };
        let now = clock.now();
        let custody = CustodyService::new(settings, sink, gateway_for(&config), clock);

        match Seed::load(&dir)? {
            Some(seed) => seed.apply(&custody)?,
            None => {
                info!("no inventory file, loading demonstration data");
                Seed::demo(now).apply(&custody)?;
            }
        }

        info!("app services initialised");
        Ok(Self {
            custody: Arc::new(custody),
            audit_log,
            data_dir: dir,
            config: Arc::new(Mutex::new(config)),
        })
    }

    pub fn custody(&self) -> &CustodyService {
        &self.custody
    }

    // -- Overdue monitoring --------------------------------------------------

    /// Scan with the configured threshold and alert as the policy dictates.
    pub async fn run_overdue_scan(&self) -> Outcome<OverdueReport> {
        let threshold = self.config().overdue_threshold_hours;
        let outcome = self.custody.run_overdue_scan(threshold).await;
        for warning in &outcome.warnings {
            warn!(%warning, "overdue scan warning");
        }
        outcome
    }

    // -- Workflow persistence ------------------------------------------------

    /// Edit the chain. The new chain is written to disk before it applies,
    /// so a failed write leaves both the file and the live chain unchanged.
    pub fn edit_workflow(&self, actor: &OfficerId, edit: WorkflowEdit) -> Result<Outcome<WorkflowConfig>> {
        self.custody
            .edit_workflow_and_persist(actor, edit, |config| persist_workflow(&self.data_dir, config))
    }

    // -- Audit ---------------------------------------------------------------

    pub fn recent_audit_entries(&self, limit: u32) -> Result<Vec<AuditEntry>> {
        self.audit_log.recent_entries(limit)
    }

    pub fn audit_entries_for_actor(&self, actor: &str) -> Result<Vec<AuditEntry>> {
        self.audit_log.entries_for_actor(actor)
    }

    pub fn verify_audit_chain(&self) -> Result<ChainVerdict> {
        self.audit_log.verify_chain()
    }

    // -- Config --------------------------------------------------------------

    pub fn config(&self) -> CertvaultConfig {
        self.config.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Update and persist the config. The alert policy applies at once;
    /// gateway and slot changes take effect on the next start.
    pub fn save_config(&self, config: &CertvaultConfig) -> Result<()> {
        if config.overdue_threshold_hours == 0 {
            return Err(CertvaultError::InvalidConfig(
                "overdue threshold must be at least one hour".into(),
            ));
        }
        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = config.clone();
        self.custody.set_alert_policy(config.alert_policy);
        persist_config(&self.data_dir, config)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

fn gateway_for(config: &CertvaultConfig) -> Arc<dyn NotificationGateway> {
    if !config.sms.enabled {
        return Arc::new(LogGateway);
    }
    match SmsGateway::new(config.sms.clone()) {
        Ok(gateway) => {
            info!(provider = %config.sms.provider, endpoint = %config.sms.endpoint, "SMS alerts enabled");
            Arc::new(gateway)
        }
        Err(e) => {
            error!(error = %e, "SMS gateway unusable, alerts go to the log only");
            Arc::new(LogGateway)
        }
    }
}

// -- File persistence --------------------------------------------------------

const CONFIG_FILE: &str = "config.json";
const WORKFLOW_FILE: &str = "workflow.json";

fn load_config(data_dir: &Path) -> Option<CertvaultConfig> {
    let path = data_dir.join(CONFIG_FILE);
    let data = std::fs::read_to_string(&path).ok()?;
    serde_json::from_str(&data).ok()
}

fn persist_config(data_dir: &Path, config: &CertvaultConfig) -> Result<()> {
    std::fs::create_dir_all(data_dir)?;
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(data_dir.join(CONFIG_FILE), json)?;
    Ok(())
}

fn load_workflow(data_dir: &Path) -> Result<Option<WorkflowConfig>> {
    let path = data_dir.join(WORKFLOW_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(&path)?;
    Ok(Some(serde_json::from_str(&data)?))
}

fn persist_workflow(data_dir: &Path, workflow: &WorkflowConfig) -> Result<()> {
    std::fs::create_dir_all(data_dir)?;
    let json = serde_json::to_string_pretty(workflow)?;
    std::fs::write(data_dir.join(WORKFLOW_FILE), json)?;
    Ok(())
}
