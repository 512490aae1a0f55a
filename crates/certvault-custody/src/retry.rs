// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Retry policy with exponential backoff + jitter for alert delivery.
//
// Classifies gateway failures into Transient (auto-retry), Misconfigured
// (wait for an administrator to fix settings) and Permanent (give up). Only
// transient failures trigger automatic retries.

use std::time::Duration;

use reqwest::StatusCode;
use tracing::{debug, info, warn};

use crate::notify::DeliveryError;

/// How a delivery failure should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Misconfigured,
    Permanent,
}

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Base delay between retries (exponential backoff).
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Result of evaluating whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after this delay.
    RetryAfter(Duration),
    /// Do not retry.
    GiveUp(ErrorClass),
    /// Maximum retries exhausted.
    Exhausted,
}

/// Classify a delivery error for retry decisions.
pub fn classify_error(err: &DeliveryError) -> ErrorClass {
    match err {
        DeliveryError::Timeout | DeliveryError::Connect(_) => ErrorClass::Transient,
        DeliveryError::Status(status) => classify_status(*status),
        DeliveryError::Request(_) => ErrorClass::Permanent,
    }
}

fn classify_status(status: StatusCode) -> ErrorClass {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorClass::Misconfigured,
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => ErrorClass::Transient,
        s if s.is_server_error() => ErrorClass::Transient,
        _ => ErrorClass::Permanent,
    }
}

/// Decide whether to retry based on the error class and attempt count.
pub fn should_retry(err: &DeliveryError, attempt: u32, config: &RetryConfig) -> RetryDecision {
    match classify_error(err) {
        ErrorClass::Permanent => {
            info!("permanent delivery error, not retrying");
            RetryDecision::GiveUp(ErrorClass::Permanent)
        }
        ErrorClass::Misconfigured => {
            info!("gateway misconfigured, not auto-retrying");
            RetryDecision::GiveUp(ErrorClass::Misconfigured)
        }
        ErrorClass::Transient => {
            if attempt >= config.max_retries {
                warn!(attempt, max = config.max_retries, "retry limit exhausted");
                RetryDecision::Exhausted
            } else {
                let delay = compute_delay(attempt, config);
                debug!(attempt, delay_ms = delay.as_millis(), "scheduling retry");
                RetryDecision::RetryAfter(delay)
            }
        }
    }
}

/// delay = min(base * 2^attempt + jitter, max_delay), jitter in [0, base).
pub(crate) fn compute_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let base_ms = config.base_delay.as_millis() as u64;
    let exp_ms = base_ms.saturating_mul(1u64 << attempt.min(10));
    let total_ms = exp_ms.saturating_add(jitter(base_ms, attempt));
    Duration::from_millis(total_ms.min(config.max_delay.as_millis() as u64))
}

fn jitter(base_ms: u64, attempt: u32) -> u64 {
    let hash = (attempt as u64).wrapping_mul(6364136223846793005);
    hash % base_ms.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> DeliveryError {
        DeliveryError::Status(StatusCode::from_u16(code).unwrap())
    }

    #[test]
    fn server_errors_are_transient() {
        assert_eq!(classify_error(&status(503)), ErrorClass::Transient);
        assert_eq!(classify_error(&status(500)), ErrorClass::Transient);
        assert_eq!(classify_error(&status(429)), ErrorClass::Transient);
        assert_eq!(classify_error(&status(408)), ErrorClass::Transient);
        assert_eq!(classify_error(&DeliveryError::Timeout), ErrorClass::Transient);
        assert_eq!(
            classify_error(&DeliveryError::Connect("refused".into())),
            ErrorClass::Transient
        );
    }

    #[test]
    fn auth_failure_needs_admin() {
        assert_eq!(classify_error(&status(401)), ErrorClass::Misconfigured);
        assert_eq!(classify_error(&status(403)), ErrorClass::Misconfigured);
    }

    #[test]
    fn bad_request_is_permanent() {
        assert_eq!(classify_error(&status(400)), ErrorClass::Permanent);
        assert_eq!(classify_error(&status(404)), ErrorClass::Permanent);
        // A redirect is not followed and counts as a rejection.
        assert_eq!(classify_error(&status(302)), ErrorClass::Permanent);
        assert_eq!(
            classify_error(&DeliveryError::Request("bad body".into())),
            ErrorClass::Permanent
        );
    }

    #[test]
    fn retry_respects_max() {
        let config = RetryConfig {
            max_retries: 2,
            ..Default::default()
        };
        let err = DeliveryError::Connect("refused".into());
        assert!(matches!(should_retry(&err, 0, &config), RetryDecision::RetryAfter(_)));
        assert_eq!(should_retry(&err, 2, &config), RetryDecision::Exhausted);
        assert_eq!(
            should_retry(&status(403), 0, &config),
            RetryDecision::GiveUp(ErrorClass::Misconfigured)
        );
    }

    #[test]
    fn delay_grows_and_is_capped() {
        let config = RetryConfig::default();
        let d0 = compute_delay(0, &config);
        let d1 = compute_delay(1, &config);
        let d2 = compute_delay(2, &config);
        assert!(d1 > d0);
        assert!(d2 > d1);
        assert!(compute_delay(20, &config) <= config.max_delay);
    }
}
