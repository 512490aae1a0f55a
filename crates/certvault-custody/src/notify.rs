// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Overdue alert delivery.
//
// The monitor awaits each gateway call, so `Ok` always means the alert was
// delivered. The SMS gateway posts one JSON request per recipient through a
// shared `reqwest::Client` and retries transient failures before reporting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use certvault_core::config::SmsGatewayConfig;
use certvault_core::error::{CertvaultError, Result};
use certvault_core::types::{CertificateId, OfficerId, Recipient};
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::retry::{RetryConfig, RetryDecision, should_retry};

/// Whole-request timeout for one SMS POST.
const SMS_TIMEOUT: Duration = Duration::from_secs(10);

/// One overdue certificate, as handed to a gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverdueAlert {
    pub certificate_id: CertificateId,
    pub serial_number: String,
    pub owner_id: OfficerId,
    pub owner_name: String,
    pub borrowed_at: DateTime<Utc>,
    /// Whole hours out of the cabinet at scan time.
    pub hours_out: i64,
}

impl OverdueAlert {
    pub fn message(&self) -> String {
        format!(
            "Certificate {} held by {} has been out of the cabinet for {} hours. Please return it.",
            self.serial_number, self.owner_name, self.hours_out
        )
    }
}

/// Outbound channel for overdue alerts.
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    /// Deliver the alert. `Err` means it did not reach every recipient; the
    /// caller records a warning and tries again on a later scan.
    async fn send_overdue_alert(&self, alert: &OverdueAlert, recipients: &[Recipient]) -> Result<()>;
}

/// Gateway that only writes alerts to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogGateway;

#[async_trait]
impl NotificationGateway for LogGateway {
    async fn send_overdue_alert(&self, alert: &OverdueAlert, recipients: &[Recipient]) -> Result<()> {
        let names: Vec<&str> = recipients.iter().map(|r| r.name.as_str()).collect();
        warn!(
            certificate = %alert.certificate_id,
            hours_out = alert.hours_out,
            recipients = ?names,
            "overdue certificate: {}",
            alert.message()
        );
        Ok(())
    }
}

/// Gateway that remembers every alert. Can be switched into a failing mode.
#[derive(Debug, Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<(OverdueAlert, Vec<Recipient>)>>,
    failing: AtomicBool,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(OverdueAlert, Vec<Recipient>)> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of alerts accepted for `certificate`.
    pub fn count_for(&self, certificate: &CertificateId) -> usize {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(alert, _)| &alert.certificate_id == certificate)
            .count()
    }
}

#[async_trait]
impl NotificationGateway for RecordingGateway {
    async fn send_overdue_alert(&self, alert: &OverdueAlert, recipients: &[Recipient]) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeliveryError::Status(StatusCode::SERVICE_UNAVAILABLE).into());
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((alert.clone(), recipients.to_vec()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SMS over HTTP
// ---------------------------------------------------------------------------

/// Why one SMS request failed.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("SMS gateway timed out")]
    Timeout,

    #[error("cannot connect to SMS gateway: {0}")]
    Connect(String),

    #[error("SMS gateway answered {0}")]
    Status(StatusCode),

    #[error("SMS request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for DeliveryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::Connect(e.to_string())
        } else {
            Self::Request(e.to_string())
        }
    }
}

impl From<DeliveryError> for CertvaultError {
    fn from(e: DeliveryError) -> Self {
        CertvaultError::Notification(e.to_string())
    }
}

#[derive(Debug, Serialize)]
struct SmsPayload<'a> {
    provider: &'a str,
    sign_name: &'a str,
    phone: &'a str,
    message: String,
}

/// Gateway posting one JSON SMS request per recipient to an HTTP(S) endpoint.
pub struct SmsGateway {
    config: SmsGatewayConfig,
    endpoint: Url,
    client: Client,
    retry: RetryConfig,
}

impl SmsGateway {
    /// Validate the endpoint and build the shared HTTP client.
    pub fn new(config: SmsGatewayConfig) -> Result<Self> {
        let endpoint = Url::parse(config.endpoint.trim()).map_err(|e| {
            CertvaultError::InvalidConfig(format!("SMS endpoint {:?}: {e}", config.endpoint))
        })?;
        let client = Client::builder()
            .timeout(SMS_TIMEOUT)
            .user_agent(concat!("certvault/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| CertvaultError::InvalidConfig(format!("cannot build SMS client: {e}")))?;
        Ok(Self {
            config,
            endpoint,
            client,
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// POST one payload and require a 2xx status.
    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    async fn post(&self, payload: &SmsPayload<'_>) -> std::result::Result<(), DeliveryError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.config.api_key)
            .json(payload)
            .send()
            .await?;
        let status = response.status();
        debug!(%status, "SMS gateway responded");
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Status(status))
        }
    }

    async fn post_with_retry(&self, payload: &SmsPayload<'_>) -> std::result::Result<(), DeliveryError> {
        let mut attempt = 0;
        loop {
            match self.post(payload).await {
                Ok(()) => return Ok(()),
                Err(e) => match should_retry(&e, attempt, &self.retry) {
                    RetryDecision::RetryAfter(delay) => {
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    RetryDecision::GiveUp(_) | RetryDecision::Exhausted => return Err(e),
                },
            }
        }
    }
}

#[async_trait]
impl NotificationGateway for SmsGateway {
    /// Tries every recipient; reports the first failure that survived retries.
    async fn send_overdue_alert(&self, alert: &OverdueAlert, recipients: &[Recipient]) -> Result<()> {
        if !self.config.enabled {
            return Err(CertvaultError::Notification("SMS gateway is disabled".into()));
        }
        let message = format!("{} {}", self.config.sign_name, alert.message());
        let mut first_error = None;
        for recipient in recipients {
            let payload = SmsPayload {
                provider: &self.config.provider,
                sign_name: &self.config.sign_name,
                phone: &recipient.phone,
                message: message.clone(),
            };
            if let Err(e) = self.post_with_retry(&payload).await {
                warn!(recipient = %recipient.officer_id, error = %e, "SMS delivery failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => {
                info!(certificate = %alert.certificate_id, count = recipients.len(), "overdue SMS sent");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn alert() -> OverdueAlert {
        OverdueAlert {
            certificate_id: "c2".into(),
            serial_number: "UK-2024-002".into(),
            owner_id: "o2".into(),
            owner_name: "Li Qiang".into(),
            borrowed_at: Utc.with_ymd_and_hms(2026, 5, 21, 0, 0, 0).unwrap(),
            hours_out: 9,
        }
    }

    fn recipient() -> Recipient {
        Recipient {
            officer_id: "o2".into(),
            name: "Li Qiang".into(),
            phone: "13800000002".into(),
        }
    }

    /// Enabled gateway with fast retries, pointed at `endpoint`.
    pub(crate) fn sms_gateway(endpoint: &str, max_retries: u32) -> SmsGateway {
        SmsGateway::new(SmsGatewayConfig {
            enabled: true,
            endpoint: endpoint.to_owned(),
            api_key: "secret".into(),
            ..SmsGatewayConfig::default()
        })
        .unwrap()
        .with_retry(RetryConfig {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        })
    }

    #[test]
    fn endpoint_must_be_a_url() {
        let config = |endpoint: &str| SmsGatewayConfig {
            endpoint: endpoint.into(),
            ..SmsGatewayConfig::default()
        };
        assert!(SmsGateway::new(config("https://sms.example/api/send")).is_ok());
        assert!(SmsGateway::new(config("http://[::1]:8080/send")).is_ok());
        let err = SmsGateway::new(config("not a url")).err().unwrap();
        assert!(matches!(err, CertvaultError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn recording_gateway_can_fail() {
        let gateway = RecordingGateway::new();
        gateway.send_overdue_alert(&alert(), &[recipient()]).await.unwrap();
        gateway.set_failing(true);
        assert!(gateway.send_overdue_alert(&alert(), &[recipient()]).await.is_err());
        assert_eq!(gateway.count_for(&"c2".into()), 1);
    }

    #[tokio::test]
    async fn disabled_sms_gateway_refuses() {
        let gateway = SmsGateway::new(SmsGatewayConfig::default()).unwrap();
        let err = gateway.send_overdue_alert(&alert(), &[recipient()]).await.unwrap_err();
        assert!(matches!(err, CertvaultError::Notification(_)));
    }

    #[tokio::test]
    async fn sms_posts_json_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sms/send"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(json!({ "phone": "13800000002", "sign_name": "[Certvault]" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = sms_gateway(&format!("{}/sms/send", server.uri()), 0);
        gateway.send_overdue_alert(&alert(), &[recipient()]).await.unwrap();
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = sms_gateway(&server.uri(), 3);
        let err = gateway.send_overdue_alert(&alert(), &[recipient()]).await.unwrap_err();
        assert!(err.to_string().contains("400"));
    }

    #[tokio::test]
    async fn server_error_is_retried_then_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let gateway = sms_gateway(&server.uri(), 2);
        assert!(gateway.send_overdue_alert(&alert(), &[recipient()]).await.is_err());
    }

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let gateway = sms_gateway(&format!("http://127.0.0.1:{port}/sms/send"), 0);
        let err = gateway.send_overdue_alert(&alert(), &[recipient()]).await.unwrap_err();
        assert!(err.to_string().contains("connect"));
    }
}
