//! Retry classification and bounded write retry
//!
//! [`classify`] is the single decision function shared by read-polling
//! (a failed refresh inside [`crate::poller::wait`]) and write-retrying
//! ([`retry`]).

use crate::error::{ApiError, ApiErrorKind, RetryError};
use rand::Rng;
use settleflow_config::RetrySettings;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Whether a failed remote call is worth repeating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Retryable,
    Fatal,
}

/// Classify a remote error
///
/// 409 and the 5xx family mean the remote is mid-transition on a dependent
/// object and usually resolve on retry. Everything else (bad request,
/// unauthorized, not implemented, ...) will never succeed. `NotFound` is
/// classified as fatal here; callers that expect absence check for it first.
pub fn classify(err: &ApiError) -> Verdict {
    classify_kind(err.kind)
}

pub const fn classify_kind(kind: ApiErrorKind) -> Verdict {
    match kind {
        ApiErrorKind::Conflict
        | ApiErrorKind::ServerFault
        | ApiErrorKind::BadGateway
        | ApiErrorKind::ServiceUnavailable
        | ApiErrorKind::GatewayTimeout => Verdict::Retryable,
        _ => Verdict::Fatal,
    }
}

/// Retry configuration for mutating calls
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,

    /// Jitter as a fraction of the delay, added on top of it
    pub jitter: f64,

    /// Overall deadline for the whole loop
    pub timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryConfig {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            backoff_multiplier: settings.backoff_multiplier,
            jitter: 0.25,
            timeout: Duration::from_millis(settings.timeout_ms),
        }
    }

    /// Backoff delay before retry number `attempt` (0-based), without jitter
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        let millis = (self.initial_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.delay_for_attempt(attempt);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
        base + base.mul_f64(extra)
    }
}

/// Sleep for `duration`, returning `false` if `cancel` fires first
pub(crate) async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = sleep(duration) => true,
    }
}

/// Run `op` until it succeeds, fails fatally, or the attempt/time bound is hit
///
/// Retryable failures are logged and retried silently; the caller only sees
/// an error once the loop gives up.
pub async fn retry<T, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let deadline = Instant::now() + config.timeout;
    let mut attempt: u32 = 0;
    let mut last: Option<ApiError> = None;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        attempt += 1;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            result = op() => result,
            _ = sleep_until(deadline) => {
                warn!("Attempt {} still in flight at the {:?} deadline", attempt, config.timeout);
                return Err(RetryError::Timeout {
                    timeout: config.timeout,
                    last,
                });
            }
        };

        let err = match result {
            Ok(value) => {
                if attempt > 1 {
                    debug!("Succeeded on attempt {}", attempt);
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if classify(&err) == Verdict::Fatal {
            return Err(RetryError::Fatal(err));
        }
        if attempt >= config.max_attempts {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: err,
            });
        }

        let delay = config.jittered_delay(attempt - 1);
        if Instant::now() + delay >= deadline {
            return Err(RetryError::Timeout {
                timeout: config.timeout,
                last: Some(err),
            });
        }

        warn!(
            "Retryable error on attempt {}/{}, retrying in {:?}: {}",
            attempt, config.max_attempts, delay, err
        );
        last = Some(err);
        if !pause(delay, cancel).await {
            return Err(RetryError::Cancelled);
        }
    }
}
