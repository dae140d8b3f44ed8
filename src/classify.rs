use std::fmt;
use std::time::Duration;

use crate::error::UpstreamError;

const QUOTA_MARKERS: &[&str] = &["quota", "resource exhausted", "billing", "permission denied"];
const RATE_LIMIT_MARKERS: &[&str] = &["rate limit", "too many requests"];

/// How a failed attempt reflects on the key that was used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    QuotaExhausted,
    RateLimited,
    /// Probably a problem with the request, not the key.
    Other,
}

impl FailureKind {
    /// Quota is checked first: some providers answer 429 for both quota and
    /// throttling, and the message decides between them.
    pub fn classify(err: &UpstreamError) -> Self {
        let message = err.message.to_lowercase();

        if err.status == Some(403) || QUOTA_MARKERS.iter().any(|m| message.contains(m)) {
            return FailureKind::QuotaExhausted;
        }
        if err.status == Some(429) || RATE_LIMIT_MARKERS.iter().any(|m| message.contains(m)) {
            return FailureKind::RateLimited;
        }
        FailureKind::Other
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::QuotaExhausted => "quota_exhausted",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Other => "other",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Cooldown windows and the "all keys cooling" wait rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownPolicy {
    pub quota: Duration,
    pub rate_limit: Duration,
    pub max_wait: Duration,  // give up if the soonest unblock is further away
    pub wait_step: Duration, // longest single sleep before re-scanning
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            quota: Duration::from_secs(30 * 60),
            rate_limit: Duration::from_secs(60),
            max_wait: Duration::from_secs(60),
            wait_step: Duration::from_secs(5),
        }
    }
}

impl CooldownPolicy {
    pub fn cooldown_for(&self, kind: FailureKind) -> Option<Duration> {
        match kind {
            FailureKind::QuotaExhausted => Some(self.quota),
            FailureKind::RateLimited => Some(self.rate_limit),
            FailureKind::Other => None,
        }
    }
}
