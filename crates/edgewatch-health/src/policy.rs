//! Run snapshot of a cluster's health-check policy.
//!
//! Operators may store any values; a run always works from an
//! [`EffectivePolicy`] with defaults filled in and limits applied.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::Method;

use edgewatch_state::HealthCheckPolicy;

use crate::error::{HealthError, HealthResult};

/// Placeholder substituted with the probed address.
pub const HOST_PLACEHOLDER: &str = "${host}";

/// URL template used when the policy leaves it empty.
pub const DEFAULT_URL: &str = "http://${host}/";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const MAX_ATTEMPTS_CAP: u32 = 10;

pub const DEFAULT_TRY_DELAY: Duration = Duration::from_secs(1);
pub const MAX_TRY_DELAY: Duration = Duration::from_secs(60);

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/94.0.4606.81 Safari/537.36";

/// Header marking a request as a health probe for the edge node.
pub const HEALTH_CHECK_HEADER: &str = "x-edge-health-check-key";

/// Immutable policy snapshot taken once at the start of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectivePolicy {
    pub url_template: String,
    pub method: Method,
    /// Accepted status codes; empty accepts any response.
    pub status_codes: Vec<u16>,
    pub user_agent: String,
    pub timeout: Duration,
    /// Always within `1..=MAX_ATTEMPTS_CAP`.
    pub max_attempts: u32,
    /// Always at most `MAX_TRY_DELAY`.
    pub try_delay: Duration,
    pub success_threshold: u32,
    pub fail_threshold: u32,
    pub auto_down: bool,
    /// Value of the [`HEALTH_CHECK_HEADER`] sent with every probe.
    pub marker: String,
}

impl EffectivePolicy {
    pub fn from_policy(policy: &HealthCheckPolicy) -> HealthResult<Self> {
        let url_template = if policy.url.trim().is_empty() {
            DEFAULT_URL.to_string()
        } else {
            policy.url.trim().to_string()
        };

        let method = if policy.method.trim().is_empty() {
            Method::GET
        } else {
            Method::from_bytes(policy.method.trim().to_ascii_uppercase().as_bytes()).map_err(
                |_| HealthError::PolicyMalformed(format!("unsupported method '{}'", policy.method)),
            )?
        };

        let user_agent = if policy.user_agent.is_empty() {
            DEFAULT_USER_AGENT.to_string()
        } else {
            policy.user_agent.clone()
        };

        let timeout = match policy.timeout_ms {
            Some(ms) if ms > 0 => Duration::from_millis(ms),
            _ => DEFAULT_TIMEOUT,
        };

        Ok(Self {
            url_template,
            method,
            status_codes: policy.status_codes.clone(),
            user_agent,
            timeout,
            max_attempts: clamp_attempts(policy.max_attempts),
            try_delay: clamp_try_delay(policy.try_delay_ms.map(Duration::from_millis)),
            success_threshold: policy.count_up.max(1),
            fail_threshold: policy.count_down.max(1),
            auto_down: policy.auto_down,
            marker: marker_value(policy.only_basic_request),
        })
    }

    /// Whether a received status code counts as a pass.
    pub fn accepts(&self, status: u16) -> bool {
        self.status_codes.is_empty() || self.status_codes.contains(&status)
    }
}

/// Attempts below one fall back to the default; above the cap are capped.
pub fn clamp_attempts(raw: i64) -> u32 {
    if raw < 1 {
        DEFAULT_MAX_ATTEMPTS
    } else {
        raw.min(MAX_ATTEMPTS_CAP as i64) as u32
    }
}

/// A missing delay falls back to the default; an explicit zero is kept.
pub fn clamp_try_delay(raw: Option<Duration>) -> Duration {
    raw.unwrap_or(DEFAULT_TRY_DELAY).min(MAX_TRY_DELAY)
}

fn marker_value(only_basic_request: bool) -> String {
    let payload = serde_json::json!({ "onlyBasicRequest": only_basic_request });
    STANDARD.encode(payload.to_string())
}
