//! WebhookSubscription / WebhookDelivery: outbound event delivery state
//! (SPEC_FULL §3, §3.1, §4.9).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSubscription {
    pub id: String,
    pub tenant_id: String,
    pub url: String,
    pub secret: String,
    pub event_type_globs: Vec<String>,
    pub enabled: bool,
}

impl WebhookSubscription {
    pub fn matches(&self, event_type: &str) -> bool {
        self.enabled
            && self
                .event_type_globs
                .iter()
                .any(|glob| glob_matches(glob, event_type))
    }
}

fn glob_matches(glob: &str, value: &str) -> bool {
    if glob == "*" {
        return true;
    }
    if let Some(prefix) = glob.strip_suffix(".*") {
        return value == prefix || value.starts_with(&format!("{prefix}."));
    }
    glob == value
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryState {
    Queued,
    InFlight,
    Delivered,
    Retrying,
    DeadLettered,
}

impl DeliveryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryState::Delivered | DeliveryState::DeadLettered)
    }
}

/// Exponential backoff schedule from SPEC_FULL §4.9: 1s, 5s, 30s, 2m, 10m, 1h,
/// up to 7 attempts total (6 retries after the first attempt).
pub const RETRY_SCHEDULE_SECONDS: [u64; 6] = [1, 5, 30, 120, 600, 3600];
pub const MAX_DELIVERY_ATTEMPTS: u32 = 7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDelivery {
    pub subscription_id: String,
    pub event_id: String,
    pub attempt: u32,
    pub state: DeliveryState,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_status_code: Option<u16>,
}

impl WebhookDelivery {
    pub fn new(subscription_id: impl Into<String>, event_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            event_id: event_id.into(),
            attempt: 0,
            state: DeliveryState::Queued,
            next_attempt_at: None,
            last_status_code: None,
        }
    }

    /// Computes the delay before the next attempt, or `None` if attempts are
    /// exhausted and the delivery should be dead-lettered.
    pub fn next_delay_seconds(attempt: u32) -> Option<u64> {
        RETRY_SCHEDULE_SECONDS.get(attempt as usize).copied()
    }

    pub fn record_failure(&mut self, status_code: Option<u16>, now: DateTime<Utc>) {
        self.last_status_code = status_code;
        self.attempt += 1;
        match Self::next_delay_seconds(self.attempt - 1) {
            Some(delay) if self.attempt < MAX_DELIVERY_ATTEMPTS => {
                self.state = DeliveryState::Retrying;
                self.next_attempt_at = Some(now + chrono::Duration::seconds(delay as i64));
            }
            _ => {
                self.state = DeliveryState::DeadLettered;
                self.next_attempt_at = None;
            }
        }
    }

    pub fn record_success(&mut self, status_code: u16) {
        self.last_status_code = Some(status_code);
        self.state = DeliveryState::Delivered;
        self.next_attempt_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_glob_matches_category_wildcard() {
        let sub = WebhookSubscription {
            id: "s1".into(),
            tenant_id: "t1".into(),
            url: "https://example.com/hook".into(),
            secret: "shh".into(),
            event_type_globs: vec!["deployment.*".into()],
            enabled: true,
        };
        assert!(sub.matches("deployment.succeeded"));
        assert!(!sub.matches("build.succeeded"));
    }

    #[test]
    fn disabled_subscription_never_matches() {
        let sub = WebhookSubscription {
            id: "s1".into(),
            tenant_id: "t1".into(),
            url: "https://example.com/hook".into(),
            secret: "shh".into(),
            event_type_globs: vec!["*".into()],
            enabled: false,
        };
        assert!(!sub.matches("test"));
    }

    #[test]
    fn retries_until_dead_lettered_after_seven_attempts() {
        let mut delivery = WebhookDelivery::new("s1", "evt1");
        let now = Utc::now();
        for _ in 0..6 {
            delivery.record_failure(Some(500), now);
            assert_eq!(delivery.state, DeliveryState::Retrying);
        }
        delivery.record_failure(Some(500), now);
        assert_eq!(delivery.state, DeliveryState::DeadLettered);
        assert_eq!(delivery.attempt, 7);
    }

    #[test]
    fn success_marks_delivered() {
        let mut delivery = WebhookDelivery::new("s1", "evt1");
        delivery.record_success(200);
        assert_eq!(delivery.state, DeliveryState::Delivered);
        assert!(delivery.state.is_terminal());
    }
}
