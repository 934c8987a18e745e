//! Transient-failure retry and the submit-then-poll protocol used by every
//! long-running remote job (DoGSiteScorer, PubChem similarity search).
//!
//! Both loops live in the client layer: callers receive either the final
//! payload or a fatal error, never an intermediate "pending" state.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{LeadOptError, Result};

/// Backoff schedule for individual HTTP requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: f64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: f64,
}

fn default_retry_attempts() -> u32 { 5 }
fn default_initial_delay()  -> f64 { 2.0 }
fn default_backoff_factor() -> f64 { 1.5 }
fn default_max_delay()      -> f64 { 30.0 }

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            initial_delay_secs: default_initial_delay(),
            backoff_factor: default_backoff_factor(),
            max_delay_secs: default_max_delay(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay_secs: 0.0,
            backoff_factor: 1.0,
            max_delay_secs: 0.0,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        let secs = (self.initial_delay_secs * self.backoff_factor.powi(exp)).min(self.max_delay_secs);
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// Runs `op` until it succeeds, fails with a non-transient error, or the
/// attempt budget is spent. Transient failures are logged, not surfaced.
pub async fn retry_async<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(%label, attempt, max_attempts, error = %e, ?delay, "Transient failure, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Fixed-interval schedule for polling a job location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollPolicy {
    #[serde(default = "default_poll_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_poll_interval")]
    pub interval_secs: f64,
}

fn default_poll_attempts() -> u32 { 30 }
fn default_poll_interval() -> f64 { 10.0 }

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_poll_attempts(),
            interval_secs: default_poll_interval(),
        }
    }
}

impl PollPolicy {
    pub fn new(max_attempts: u32, interval_secs: f64) -> Self {
        Self { max_attempts, interval_secs }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs.max(0.0))
    }
}

/// Polls `url` through `fetch` until the JSON response carries every key in
/// `expected_keys`, returning that response.
///
/// `fetch` is called at most `policy.max_attempts` times. If the keys never
/// appear, fails with [`LeadOptError::PollExhausted`] carrying the last body.
pub async fn poll_for_keys<F, Fut>(
    policy: &PollPolicy,
    url: &str,
    expected_keys: &[&str],
    mut fetch: F,
) -> Result<serde_json::Value>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<serde_json::Value>>,
{
    let mut last_response = serde_json::Value::Null;

    for attempt in 1..=policy.max_attempts {
        let response = fetch().await?;
        if has_keys(&response, expected_keys) {
            debug!(%url, attempt, "Job result ready");
            return Ok(response);
        }

        debug!(%url, attempt, max_attempts = policy.max_attempts, "Job still pending");
        last_response = response;
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval()).await;
        }
    }

    Err(LeadOptError::PollExhausted {
        url: url.to_string(),
        expected_key: expected_keys.iter().map(|k| k.to_string()).collect(),
        attempts: policy.max_attempts,
        last_response: last_response.to_string(),
    })
}

fn has_keys(response: &serde_json::Value, keys: &[&str]) -> bool {
    match response.as_object() {
        Some(map) => keys.iter().all(|k| map.contains_key(*k)),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn counting_fetch(
        calls: Arc<AtomicU32>,
        ready_on: Option<u32>,
    ) -> impl FnMut() -> std::pin::Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send>> {
        move || {
            let calls = calls.clone();
            Box::pin(async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                match ready_on {
                    Some(k) if n >= k => Ok(json!({ "result_table": "url", "residues": "url", "pockets": "url" })),
                    _ => Ok(json!({ "status": "running" })),
                }
            })
        }
    }

    #[tokio::test]
    async fn test_poll_returns_ready_payload_after_pending_polls() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = PollPolicy::new(10, 0.0);
        let keys = ["result_table", "residues", "pockets"];

        let response = poll_for_keys(&policy, "https://proteins.plus/job/1", &keys, counting_fetch(calls.clone(), Some(4)))
            .await
            .unwrap();

        assert_eq!(response["result_table"], "url");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_poll_ready_on_last_allowed_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = PollPolicy::new(3, 0.0);

        let result = poll_for_keys(&policy, "u", &["pockets"], counting_fetch(calls.clone(), Some(3))).await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_poll_exhausts_after_exactly_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = PollPolicy::new(7, 0.0);

        let err = poll_for_keys(&policy, "https://pubchem.ncbi.nlm.nih.gov/x", &["PropertyTable"], counting_fetch(calls.clone(), None))
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 7);
        match err {
            LeadOptError::PollExhausted { url, expected_key, attempts, last_response } => {
                assert_eq!(url, "https://pubchem.ncbi.nlm.nih.gov/x");
                assert_eq!(expected_key, vec!["PropertyTable".to_string()]);
                assert_eq!(attempts, 7);
                assert!(last_response.contains("running"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::immediate(5);

        let value = retry_async(&policy, "flaky", || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(LeadOptError::unavailable("pubchem", "503"))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 3);
    }

    #[tokio::test]
    async fn test_retry_does_not_repeat_fatal_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::immediate(5);

        let result: Result<()> = retry_async(&policy, "fatal", || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LeadOptError::Parse("bad".into()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_does_not_repeat_rejected_requests() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::immediate(5);

        let result: Result<()> = retry_async(&policy, "lookup", || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LeadOptError::remote("pubchem", "No compound found for name `xyz`"))
            }
        })
        .await;

        assert!(matches!(result, Err(LeadOptError::RemoteService { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_gives_up_at_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::immediate(4);

        let result: Result<()> = retry_async(&policy, "down", || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LeadOptError::unavailable("dogsitescorer", "502"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(3));
        assert_eq!(policy.delay_for(20), Duration::from_secs(30));
    }
}
