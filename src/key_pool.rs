use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::classify::{CooldownPolicy, FailureKind};
use crate::error::{DispatchError, UpstreamError};
use crate::metrics::{DISPATCH_ATTEMPTS, KEY_COOLDOWNS};

// A key that is temporarily out of rotation
#[derive(Debug, Clone, Copy)]
pub struct Cooldown {
    pub unblock_at: Instant,
    pub reason: FailureKind,
}

#[derive(Debug, PartialEq, Eq)]
enum Selection {
    Key(usize),
    // every key is cooling down, the first one frees up after this long
    Wait(Duration),
    // only the key that just failed is left
    Exhausted,
}

/// Round-robin pool of API keys with per-key cooldowns.
///
/// Shared by reference between all in-flight requests. The cursor and the
/// cooldown map are updated without any cross-step locking: two concurrent
/// calls may pick the same key, or use a key another call has just blocked.
/// Both only cost an extra failed attempt.
pub struct KeyPool {
    keys: Vec<String>,
    cursor: AtomicUsize,
    cooldowns: DashMap<String, Cooldown>,
    policy: CooldownPolicy,
}

// Split "key1, key2,,key3" into trimmed, non-empty keys
pub fn parse_keys(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl KeyPool {
    pub fn new(keys: Vec<String>, policy: CooldownPolicy) -> Self {
        if keys.is_empty() {
            tracing::error!("No API keys configured, every generation call will fail");
        } else {
            info!(keys = keys.len(), "Key pool initialized");
        }

        Self {
            keys,
            cursor: AtomicUsize::new(0),
            cooldowns: DashMap::new(),
            policy,
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    // Drops the cooldown record once it has run out
    pub fn is_available(&self, key: &str) -> bool {
        let now = Instant::now();
        if let Some((_, expired)) = self.cooldowns.remove_if(key, |_, c| now >= c.unblock_at) {
            info!(
                key = self.label(key),
                reason = %expired.reason,
                "API key unblocked and available again"
            );
            return true;
        }
        !self.cooldowns.contains_key(key)
    }

    pub fn available_count(&self) -> usize {
        self.keys.iter().filter(|k| self.is_available(k)).count()
    }

    /// Takes `key` out of rotation for the cooldown of `kind`, replacing any
    /// record it already had. Returns false when `kind` carries no cooldown.
    pub fn block(&self, key: &str, kind: FailureKind) -> bool {
        let Some(duration) = self.policy.cooldown_for(kind) else {
            return false;
        };

        self.cooldowns.insert(
            key.to_string(),
            Cooldown {
                unblock_at: Instant::now() + duration,
                reason: kind,
            },
        );
        KEY_COOLDOWNS.with_label_values(&[kind.as_str()]).inc();
        warn!(
            key = self.label(key),
            reason = %kind,
            cooldown_secs = duration.as_secs(),
            "API key blocked"
        );
        true
    }

    // Time until the first cooldown runs out, None when nothing is blocked
    pub fn soonest_unblock(&self) -> Option<Duration> {
        let now = Instant::now();
        self.cooldowns
            .iter()
            .map(|entry| entry.unblock_at)
            .min()
            .map(|at| at.saturating_duration_since(now))
    }

    /// Runs `operation` with one key at a time until it succeeds.
    ///
    /// Makes at most `2 * len()` calls. Quota and rate-limit failures put the
    /// key on cooldown for every caller; other failures only move on to the
    /// next key. When all keys are cooling down and the first one frees up
    /// within `max_wait`, sleeps in steps of at most `wait_step` and scans
    /// again. The last upstream error is returned unchanged on exhaustion.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T, DispatchError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        if self.is_empty() {
            return Err(DispatchError::NoCredentialsConfigured);
        }

        let budget = self.keys.len() * 2;
        let mut attempts = 0;
        let mut waited = Duration::ZERO;
        let mut last_error: Option<UpstreamError> = None;
        // key of the previous failed attempt, never retried back to back
        let mut last_failed: Option<usize> = None;

        while attempts < budget {
            let idx = match self.select(last_failed) {
                Selection::Key(idx) => idx,
                Selection::Exhausted => {
                    debug!("No other API key eligible, giving up");
                    break;
                }
                Selection::Wait(wait) => {
                    if wait >= self.policy.max_wait || waited >= self.policy.max_wait {
                        warn!(
                            wait_secs = wait.as_secs(),
                            "All API keys blocked for too long, giving up"
                        );
                        break;
                    }
                    let step = wait.min(self.policy.wait_step);
                    info!(wait_secs = wait.as_secs(), "All API keys blocked, waiting");
                    sleep(step).await;
                    waited += step;
                    continue;
                }
            };

            attempts += 1;
            DISPATCH_ATTEMPTS.inc();
            let key = &self.keys[idx];
            debug!(key = idx + 1, attempt = attempts, "Dispatching with API key");

            match operation(key.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let kind = FailureKind::classify(&err);
                    if !self.block(key, kind) {
                        warn!(key = idx + 1, error = %err, "API key error, key stays eligible");
                    }
                    last_error = Some(err);
                    last_failed = Some(idx);
                }
            }
        }

        Err(match last_error {
            Some(err) => DispatchError::Upstream(err),
            None => DispatchError::AllCredentialsUnavailable,
        })
    }

    // Circular scan from the cursor, `skip` is the key that failed last
    fn select(&self, skip: Option<usize>) -> Selection {
        for _ in 0..self.keys.len() {
            let idx = self.advance();
            if Some(idx) != skip && self.is_available(&self.keys[idx]) {
                return Selection::Key(idx);
            }
        }

        if skip.is_some_and(|skipped| self.is_available(&self.keys[skipped])) {
            return Selection::Exhausted;
        }

        wait_or_fallback(self.soonest_unblock())
    }

    // Returns the current cursor and moves it one step, wrapping
    fn advance(&self) -> usize {
        let len = self.keys.len();
        self.cursor
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| Some((c + 1) % len))
            .unwrap_or_else(|c| c)
    }

    // 1-based position for logs, keys themselves never get logged
    fn label(&self, key: &str) -> usize {
        self.keys.iter().position(|k| k == key).map_or(0, |i| i + 1)
    }
}

// Nothing found while scanning: wait for the soonest cooldown, or when no
// record is pending any more, try the first key anyway
fn wait_or_fallback(soonest: Option<Duration>) -> Selection {
    match soonest {
        Some(wait) if !wait.is_zero() => Selection::Wait(wait),
        _ => {
            debug!("No key found while scanning, falling back to the first key");
            Selection::Key(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    fn pool(keys: &[&str]) -> KeyPool {
        KeyPool::new(keys.iter().map(|k| k.to_string()).collect(), CooldownPolicy::default())
    }

    fn quota() -> UpstreamError {
        UpstreamError::new(Some(429), "Quota exceeded for this project")
    }

    #[test]
    fn parse_keys_trims_and_drops_blanks() {
        assert_eq!(parse_keys(" a, b ,,c , "), vec!["a", "b", "c"]);
        assert!(parse_keys(" , ").is_empty());
    }

    #[tokio::test]
    async fn empty_pool_fails_without_calling() {
        let pool = pool(&[]);
        let mut calls = 0;
        let result = pool
            .execute(|_key| {
                calls += 1;
                async { Ok::<_, UpstreamError>(()) }
            })
            .await;

        assert!(matches!(result, Err(DispatchError::NoCredentialsConfigured)));
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn success_on_first_key_makes_one_call() {
        let pool = pool(&["a", "b"]);
        let mut calls = Vec::new();
        let result = pool
            .execute(|key| {
                calls.push(key.clone());
                async move { Ok::<_, UpstreamError>(format!("done with {key}")) }
            })
            .await
            .unwrap();

        assert_eq!(result, "done with a");
        assert_eq!(calls, vec!["a"]);
    }

    #[tokio::test]
    async fn gives_up_after_two_rounds_and_returns_last_error() {
        let pool = pool(&["a", "b", "c"]);
        let mut calls = 0;
        let result = pool
            .execute(|key| {
                calls += 1;
                let n = calls;
                async move {
                    Err::<(), _>(UpstreamError::new(Some(500), format!("boom {n} on {key}")))
                }
            })
            .await;

        assert_eq!(calls, 6);
        match result {
            Err(DispatchError::Upstream(err)) => {
                assert_eq!(err.status, Some(500));
                assert_eq!(err.message, "boom 6 on c");
            }
            other => panic!("unexpected {other:?}"),
        }
        // transient errors never block a key
        assert_eq!(pool.available_count(), 3);
    }

    #[tokio::test]
    async fn single_key_is_not_retried_after_transient_error() {
        let pool = pool(&["only"]);
        let mut calls = Vec::new();
        let result = pool
            .execute(|key| {
                calls.push(key);
                async { Err::<(), _>(UpstreamError::new(Some(500), "internal")) }
            })
            .await;

        assert_eq!(calls, vec!["only"]);
        match result {
            Err(DispatchError::Upstream(err)) => assert_eq!(err.message, "internal"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(pool.is_available("only"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_key_not_reused_when_the_rest_are_cooling() {
        let pool = pool(&["a", "b"]);
        pool.block("b", FailureKind::QuotaExhausted);
        let mut calls = Vec::new();
        let result = pool
            .execute(|key| {
                calls.push(key);
                async { Err::<(), _>(UpstreamError::new(Some(503), "unavailable")) }
            })
            .await;

        assert_eq!(calls, vec!["a"]);
        assert!(matches!(result, Err(DispatchError::Upstream(_))));
    }

    #[test]
    fn falls_back_to_first_key_when_no_cooldown_is_pending() {
        assert_eq!(wait_or_fallback(None), Selection::Key(0));
        assert_eq!(wait_or_fallback(Some(Duration::ZERO)), Selection::Key(0));
        assert_eq!(
            wait_or_fallback(Some(Duration::from_secs(3))),
            Selection::Wait(Duration::from_secs(3))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn key_is_handed_out_at_exact_expiry() {
        let pool = pool(&["a", "b"]);
        pool.block("a", FailureKind::RateLimited);
        pool.block("b", FailureKind::RateLimited);
        tokio::time::advance(Duration::from_secs(60)).await;

        let start = Instant::now();
        let used = pool.execute(|key| async move { Ok::<_, UpstreamError>(key) }).await.unwrap();

        assert_eq!(used, "a");
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn quota_failure_moves_on_and_blocks_for_thirty_minutes() {
        let pool = pool(&["a", "b"]);
        let result = pool
            .execute(|key| async move {
                if key == "a" { Err(quota()) } else { Ok(key) }
            })
            .await
            .unwrap();
        assert_eq!(result, "b");
        assert!(!pool.is_available("a"));

        for _ in 0..4 {
            let used = pool.execute(|key| async move { Ok::<_, UpstreamError>(key) }).await.unwrap();
            assert_eq!(used, "b");
        }

        tokio::time::advance(Duration::from_secs(30 * 60 - 1)).await;
        assert!(!pool.is_available("a"));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(pool.is_available("a"));
        assert_eq!(pool.soonest_unblock(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_blocks_for_one_minute() {
        let pool = pool(&["a", "b"]);
        assert!(pool.block("a", FailureKind::RateLimited));
        assert_eq!(pool.available_count(), 1);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!pool.is_available("a"));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(pool.is_available("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn new_failure_replaces_existing_cooldown() {
        let pool = pool(&["a"]);
        pool.block("a", FailureKind::QuotaExhausted);
        pool.block("a", FailureKind::RateLimited);
        assert_eq!(pool.soonest_unblock(), Some(Duration::from_secs(60)));
        assert!(!pool.block("a", FailureKind::Other));
        assert_eq!(pool.soonest_unblock(), Some(Duration::from_secs(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_short_cooldown_then_succeeds() {
        let pool = pool(&["a", "b"]);
        pool.block("a", FailureKind::RateLimited);
        pool.block("b", FailureKind::RateLimited);
        tokio::time::advance(Duration::from_secs(50)).await;

        let start = Instant::now();
        let used = pool.execute(|key| async move { Ok::<_, UpstreamError>(key) }).await.unwrap();

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(11), "{elapsed:?}");
        assert!(used == "a" || used == "b");
    }

    #[tokio::test(start_paused = true)]
    async fn single_key_survives_the_wait() {
        let pool = pool(&["only"]);
        pool.block("only", FailureKind::RateLimited);
        tokio::time::advance(Duration::from_secs(48)).await;

        let used = pool.execute(|key| async move { Ok::<_, UpstreamError>(key) }).await.unwrap();
        assert_eq!(used, "only");
    }

    #[tokio::test(start_paused = true)]
    async fn long_cooldown_fails_fast() {
        let pool = pool(&["a", "b"]);
        pool.block("a", FailureKind::QuotaExhausted);
        pool.block("b", FailureKind::QuotaExhausted);
        tokio::time::advance(Duration::from_secs(25 * 60)).await;

        let start = Instant::now();
        let mut calls = 0;
        let result = pool
            .execute(|_key| {
                calls += 1;
                async { Ok::<_, UpstreamError>(()) }
            })
            .await;

        assert!(matches!(result, Err(DispatchError::AllCredentialsUnavailable)));
        assert_eq!(calls, 0);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn surfaces_recorded_error_when_pool_runs_dry() {
        let pool = pool(&["a"]);
        let result = pool
            .execute(|_key| async { Err::<(), _>(UpstreamError::new(Some(429), "Too Many Requests")) })
            .await;

        match result {
            Err(DispatchError::Upstream(err)) => {
                assert_eq!(err, UpstreamError::new(Some(429), "Too Many Requests"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn rotation_spreads_load_evenly() {
        let pool = pool(&["a", "b", "c"]);
        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..300 {
            let used = pool.execute(|key| async move { Ok::<_, UpstreamError>(key) }).await.unwrap();
            *counts.entry(used).or_default() += 1;
        }

        for key in ["a", "b", "c"] {
            assert_eq!(counts[key], 100, "{key}");
        }
    }

    #[tokio::test]
    async fn concurrent_calls_share_cooldowns() {
        let pool = Arc::new(pool(&["a", "b", "c"]));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let run = |pool: Arc<KeyPool>, seen: Arc<Mutex<Vec<String>>>| async move {
            pool.execute(|key| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(key.clone());
                    if key == "a" {
                        Err(UpstreamError::new(Some(403), "permission denied"))
                    } else {
                        Ok(key)
                    }
                }
            })
            .await
        };

        let (r1, r2, r3) = tokio::join!(
            run(pool.clone(), seen.clone()),
            run(pool.clone(), seen.clone()),
            run(pool.clone(), seen.clone())
        );

        for result in [r1, r2, r3] {
            assert_ne!(result.unwrap(), "a");
        }
        assert!(!pool.is_available("a"));
        assert_eq!(seen.lock().unwrap().iter().filter(|k| *k == "a").count(), 1);
    }
}
