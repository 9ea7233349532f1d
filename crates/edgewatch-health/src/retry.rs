//! Bounded retry of a probe within one run.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::checker::Prober;
use crate::policy::EffectivePolicy;

/// Result of probing one address for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub passed: bool,
    /// Reason of the last failed attempt; `None` when an attempt passed.
    pub reason: Option<String>,
    /// Time spent probing, excluding delays between attempts.
    pub elapsed: Duration,
    /// Attempts made, between 1 and the policy's maximum.
    pub attempts: u32,
}

/// Probe `ip` until an attempt passes or the policy's attempts run out.
///
/// Waits `try_delay` between attempts, never after the last one.
pub async fn attempt<P>(prober: &P, ip: &str, policy: &EffectivePolicy) -> ProbeResult
where
    P: Prober + ?Sized,
{
    let mut elapsed = Duration::ZERO;
    let mut reason = None;

    for attempt in 1..=policy.max_attempts {
        let started = Instant::now();
        let outcome = prober.probe(ip, policy).await;
        elapsed += started.elapsed();

        if outcome.passed {
            return ProbeResult {
                passed: true,
                reason: None,
                elapsed,
                attempts: attempt,
            };
        }

        debug!(
            %ip,
            attempt,
            max_attempts = policy.max_attempts,
            reason = outcome.reason.as_deref().unwrap_or_default(),
            "health probe attempt failed"
        );
        reason = outcome.reason;

        if attempt < policy.max_attempts && !policy.try_delay.is_zero() {
            tokio::time::sleep(policy.try_delay).await;
        }
    }

    ProbeResult {
        passed: false,
        reason: reason.or_else(|| Some("health check failed".to_string())),
        elapsed,
        attempts: policy.max_attempts,
    }
}
