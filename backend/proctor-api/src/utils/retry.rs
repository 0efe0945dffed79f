use std::time::Duration;

/// Backoff policy for operations that can fail transiently, such as opening a
/// capture device that another process is still releasing.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter_max: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(250),
            jitter_max: Some(Duration::from_millis(25)),
        }
    }
}

impl RetryConfig {
    /// Single attempt, used when the caller already offers a retry affordance.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            jitter_max: None,
        }
    }
}

pub async fn retry_async_with_config<F, Fut, T, E>(config: RetryConfig, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempts_left = config.max_attempts.max(1);
    let mut backoff = config.base_backoff;

    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                attempts_left = attempts_left.saturating_sub(1);
                if attempts_left == 0 {
                    return Err(e);
                }
                tracing::debug!(error = %e, attempts_left, "retrying after failure");

                let extra = match config.jitter_max {
                    Some(jitter_max) if !jitter_max.is_zero() => {
                        let jitter_ms = jitter_max.as_millis() as u64;
                        Duration::from_millis(rand::random::<u64>() % (jitter_ms + 1))
                    }
                    _ => Duration::ZERO,
                };
                tokio::time::sleep(backoff + extra).await;

                backoff = std::cmp::min(backoff * 2, config.max_backoff);
            }
        }
    }
}
