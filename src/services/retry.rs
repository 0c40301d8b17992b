use std::time::Duration;
use tokio::time::sleep;

/// Backoff settings for calls to external HTTP collaborators
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            exponential_base: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    Abort,
}

/// Failure of one HTTP attempt, classified for the retry loop.
#[derive(Debug)]
pub enum HttpFailure {
    /// Timeouts, connection resets, 429 and 5xx
    Transient(String),
    /// Anything a second attempt would not fix
    Permanent(String),
}

impl std::fmt::Display for HttpFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpFailure::Transient(msg) | HttpFailure::Permanent(msg) => write!(f, "{}", msg),
        }
    }
}

impl HttpFailure {
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let msg = format!("status {}: {}", status, body);
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            HttpFailure::Transient(msg)
        } else {
            HttpFailure::Permanent(msg)
        }
    }

    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            HttpFailure::Transient(err.to_string())
        } else {
            HttpFailure::Permanent(err.to_string())
        }
    }

    pub fn decision(&self) -> RetryDecision {
        match self {
            HttpFailure::Transient(_) => RetryDecision::Retry,
            HttpFailure::Permanent(_) => RetryDecision::Abort,
        }
    }
}

/// Runs `f` until it succeeds, the policy aborts, or attempts run out.
pub async fn retry_with_policy<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut f: F,
    policy: impl Fn(&E) -> RetryDecision,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if policy(&e) == RetryDecision::Abort {
                    log::error!("{} aborted: {}", operation_name, e);
                    return Err(e);
                }
                if attempt >= config.max_attempts {
                    log::error!("{} gave up after {} attempts: {}", operation_name, attempt, e);
                    return Err(e);
                }

                let delay = calculate_delay(config, attempt);
                log::warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                    operation_name,
                    attempt,
                    config.max_attempts,
                    e,
                    delay
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Exponential backoff with ±25% jitter, capped at `max_delay`.
fn calculate_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exponential = config.exponential_base.powi(attempt.saturating_sub(1) as i32);
    let delay_ms = (config.base_delay.as_millis() as f64 * exponential) as u64;

    let jitter = delay_ms / 4;
    let jittered = delay_ms - jitter + rand::random::<u64>() % (jitter * 2 + 1);

    Duration::from_millis(jittered.min(config.max_delay.as_millis() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            exponential_base: 2.0,
        }
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = retry_with_policy(
            &fast(),
            "lookup",
            move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(HttpFailure::Transient("503".into()))
                } else {
                    Ok(42)
                }
            },
            HttpFailure::decision,
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_aborts_immediately() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), HttpFailure> = retry_with_policy(
            &fast(),
            "lookup",
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(HttpFailure::Permanent("401".into()))
            },
            HttpFailure::decision,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_status_classification() {
        let busy = HttpFailure::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "");
        let bad = HttpFailure::from_status(reqwest::StatusCode::BAD_REQUEST, "");
        assert_eq!(busy.decision(), RetryDecision::Retry);
        assert_eq!(bad.decision(), RetryDecision::Abort);
    }

    #[test]
    fn test_delay_is_capped() {
        let config = RetryConfig::default();
        assert!(calculate_delay(&config, 10) <= config.max_delay);
        assert!(calculate_delay(&config, 1) >= Duration::from_millis(375));
    }
}
