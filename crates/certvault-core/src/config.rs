// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application configuration.

use serde::{Deserialize, Serialize};

/// How often an alert is sent for a certificate that stays overdue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AlertPolicy {
    /// One alert per borrow; a new borrow starts a new episode.
    OncePerEpisode,
    /// Re-send while still overdue, at most once per interval.
    ResendEvery { minutes: u32 },
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self::OncePerEpisode
    }
}

/// SMS gateway used for overdue alerts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsGatewayConfig {
    pub enabled: bool,
    pub provider: String,
    /// `http://host:port/path` of the gateway's send endpoint.
    pub endpoint: String,
    pub api_key: String,
    /// Signature prepended to every message.
    pub sign_name: String,
}

impl Default for SmsGatewayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "generic-http".into(),
            endpoint: "http://127.0.0.1:8080/sms/send".into(),
            api_key: String::new(),
            sign_name: "[Certvault]".into(),
        }
    }
}

/// Persistent application settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CertvaultConfig {
    /// A borrowed certificate is overdue once out strictly longer than this.
    pub overdue_threshold_hours: u32,
    /// Interval between background overdue scans.
    pub scan_interval_secs: u64,
    pub alert_policy: AlertPolicy,
    /// Validity extension granted by an approved renewal request.
    pub renewal_period_days: u32,
    /// Number of slots in a freshly initialised cabinet.
    pub slot_count: u32,
    /// Enable audit trail logging.
    pub audit_enabled: bool,
    pub sms: SmsGatewayConfig,
}

impl Default for CertvaultConfig {
    fn default() -> Self {
        Self {
            overdue_threshold_hours: 8,
            scan_interval_secs: 300,
            alert_policy: AlertPolicy::OncePerEpisode,
            renewal_period_days: 365,
            slot_count: 24,
            audit_enabled: true,
            sms: SmsGatewayConfig::default(),
        }
    }
}
