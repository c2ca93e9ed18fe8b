//! State polling until a remote object converges
//!
//! [`wait`] drives a [`StateRefresher`] on a backoff cadence until the
//! observed label reaches the target set, leaves the allowed pending set, or
//! the deadline passes.

use crate::error::PollError;
use crate::retry::{self, Verdict};
use crate::state::{Observation, StateLabel, StateRefresher};
use settleflow_config::PollSettings;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shortest sleep between refreshes; keeps the loop advancing on a zero cadence
const MIN_SLEEP: Duration = Duration::from_millis(1);

/// Parameters of one wait, built by the calling lifecycle operation
#[derive(Debug, Clone)]
pub struct PollSpec {
    /// Labels that mean "still converging"
    pub pending: BTreeSet<StateLabel>,

    /// Labels that end the wait successfully
    pub target: BTreeSet<StateLabel>,

    /// Bound on the whole wait, counted from the call and including `delay`;
    /// a refresh still in flight at the deadline is abandoned
    pub timeout: Duration,

    /// Sleep before the first refresh
    pub delay: Duration,

    /// Lower bound for the sleep between refreshes
    pub min_interval: Duration,

    pub backoff_initial: Duration,
    pub backoff_max: Duration,

    /// Consecutive "absent" observations tolerated when the target lacks
    /// `DELETED`
    pub not_found_checks: u32,

    /// Consecutive target observations required for success
    pub continuous_target_occurrence: u32,
}

impl PollSpec {
    pub fn new<P, T, L>(pending: P, target: T) -> Self
    where
        P: IntoIterator<Item = L>,
        T: IntoIterator<Item = L>,
        L: Into<StateLabel>,
    {
        Self::from_settings(pending, target, &PollSettings::default())
    }

    pub fn from_settings<P, T, L>(pending: P, target: T, settings: &PollSettings) -> Self
    where
        P: IntoIterator<Item = L>,
        T: IntoIterator<Item = L>,
        L: Into<StateLabel>,
    {
        Self {
            pending: pending.into_iter().map(Into::into).collect(),
            target: target.into_iter().map(Into::into).collect(),
            timeout: settings.timeout(),
            delay: settings.delay(),
            min_interval: settings.min_interval(),
            backoff_initial: Duration::from_millis(settings.backoff_initial_ms),
            backoff_max: Duration::from_millis(settings.backoff_max_ms),
            not_found_checks: settings.not_found_checks,
            continuous_target_occurrence: settings.continuous_target_occurrence.max(1),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.backoff_initial = initial;
        self.backoff_max = max.max(initial);
        self
    }

    pub fn with_not_found_checks(mut self, checks: u32) -> Self {
        self.not_found_checks = checks;
        self
    }

    pub fn with_continuous_target_occurrence(mut self, occurrences: u32) -> Self {
        self.continuous_target_occurrence = occurrences.max(1);
        self
    }

    /// Add a label to the target set
    pub fn with_target(mut self, label: impl Into<StateLabel>) -> Self {
        self.target.insert(label.into());
        self
    }

    fn expects_deletion(&self) -> bool {
        self.target.iter().any(StateLabel::is_deleted)
    }

    fn expected(&self) -> String {
        let labels: Vec<&str> = self.target.iter().map(StateLabel::as_str).collect();
        format!("[{}]", labels.join(", "))
    }
}

/// Successful end of a wait
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome<T> {
    /// `None` when the wait ended on absence
    pub object: Option<T>,
    pub state: StateLabel,
    /// Number of refresh calls issued
    pub polls: u32,
}

impl<T> PollOutcome<T> {
    /// True when the wait ended because the object is gone
    pub fn is_deleted(&self) -> bool {
        self.state.is_deleted()
    }
}

enum Step<T> {
    Done(Option<T>, StateLabel),
    Pending,
}

/// Wait for the object behind `refresher` to converge
///
/// Returns as soon as a target label is observed (no trailing sleep).
/// Absence satisfies the wait when `target` contains `DELETED`. A label in
/// neither set aborts with [`PollError::UnexpectedState`] without any further
/// refresh. Refresh errors go through [`retry::classify`]: retryable ones
/// count as a pending observation, fatal ones abort the wait.
pub async fn wait<R>(
    refresher: &R,
    spec: &PollSpec,
    cancel: &CancellationToken,
) -> Result<PollOutcome<R::Object>, PollError<R::Object>>
where
    R: StateRefresher + ?Sized,
{
    // The deadline covers the initial delay too.
    let started = Instant::now();
    let deadline = started + spec.timeout;

    if !spec.delay.is_zero() {
        debug!("Waiting {:?} before first refresh", spec.delay);
        if !retry::pause(spec.delay, cancel).await {
            return Err(PollError::Cancelled);
        }
    }

    let mut backoff = spec.backoff_initial.max(MIN_SLEEP);
    let mut polls: u32 = 0;
    let mut target_streak: u32 = 0;
    let mut not_found: u32 = 0;
    let mut last: Option<Observation<R::Object>> = None;

    loop {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled);
        }

        polls += 1;
        let refreshed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            refreshed = refresher.refresh() => refreshed,
            _ = sleep_until(deadline) => {
                warn!("Refresh still in flight at the {:?} deadline", spec.timeout);
                return Err(timeout_error(spec, last));
            }
        };

        let observation = match refreshed {
            Ok(observation) if !observation.is_absent() => Some(observation),
            Ok(_) => None,
            Err(err) if err.is_not_found() => None,
            Err(err) => match retry::classify(&err) {
                Verdict::Fatal => return Err(PollError::Api(err)),
                Verdict::Retryable => {
                    warn!("Refresh failed with retryable error: {}", err);
                    target_streak = 0;
                    let elapsed = started.elapsed();
                    if elapsed >= spec.timeout {
                        return Err(timeout_error(spec, last));
                    }
                    if !sleep_step(spec, &mut backoff, elapsed, cancel).await {
                        return Err(PollError::Cancelled);
                    }
                    continue;
                }
            },
        };

        let step = match observation {
            None => {
                if spec.expects_deletion() {
                    Step::Done(None, StateLabel::deleted())
                } else {
                    not_found += 1;
                    target_streak = 0;
                    if not_found > spec.not_found_checks {
                        return Err(PollError::NotFound { checks: not_found });
                    }
                    debug!(
                        "Object not found ({}/{}), treating as pending",
                        not_found, spec.not_found_checks
                    );
                    Step::Pending
                }
            }
            Some(observation) => {
                not_found = 0;
                if spec.target.contains(&observation.state) {
                    target_streak += 1;
                    if target_streak >= spec.continuous_target_occurrence {
                        Step::Done(observation.object, observation.state)
                    } else {
                        debug!(
                            "Target state {} observed {}/{} times",
                            observation.state, target_streak, spec.continuous_target_occurrence
                        );
                        last = Some(observation);
                        Step::Pending
                    }
                } else if spec.pending.contains(&observation.state) {
                    target_streak = 0;
                    debug!("Pending state {} (poll {})", observation.state, polls);
                    last = Some(observation);
                    Step::Pending
                } else {
                    return Err(PollError::UnexpectedState {
                        state: observation.state,
                        object: observation.object,
                        expected: spec.expected(),
                    });
                }
            }
        };

        match step {
            Step::Done(object, state) => {
                info!("Reached state {} after {} polls", state, polls);
                return Ok(PollOutcome {
                    object,
                    state,
                    polls,
                });
            }
            Step::Pending => {
                let elapsed = started.elapsed();
                if elapsed >= spec.timeout {
                    return Err(timeout_error(spec, last));
                }
                if !sleep_step(spec, &mut backoff, elapsed, cancel).await {
                    return Err(PollError::Cancelled);
                }
            }
        }
    }
}

/// Sleep `max(min_interval, backoff)`, clipped to the remaining deadline,
/// then grow the backoff. Returns `false` when cancelled.
async fn sleep_step(
    spec: &PollSpec,
    backoff: &mut Duration,
    elapsed: Duration,
    cancel: &CancellationToken,
) -> bool {
    let remaining = spec.timeout.saturating_sub(elapsed);
    let interval = (*backoff).max(spec.min_interval).min(remaining).max(MIN_SLEEP);
    debug!("Sleeping {:?} before next refresh", interval);

    if !retry::pause(interval, cancel).await {
        return false;
    }
    *backoff = backoff.saturating_mul(2).min(spec.backoff_max.max(MIN_SLEEP));
    true
}

fn timeout_error<T: std::fmt::Debug>(
    spec: &PollSpec,
    last: Option<Observation<T>>,
) -> PollError<T> {
    let (last_state, last_object) = match last {
        Some(observation) => (Some(observation.state), observation.object),
        None => (None, None),
    };
    PollError::Timeout {
        timeout: spec.timeout,
        expected: spec.expected(),
        last_state,
        last_object,
    }
}
