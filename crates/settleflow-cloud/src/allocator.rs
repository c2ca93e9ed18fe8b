//! Optimistic allocation of a unique pool member
//!
//! The remote store offers list/create/delete but no compare-and-swap. Each
//! attempt lists the claimed set, picks the first free candidate, creates an
//! allocation for it, then re-lists the allocations on that object. If the
//! claim is not the only one, the race was lost: the claim is deleted and the
//! cycle starts over after a jittered sleep. The reverify step guarantees
//! that no two allocators keep a claim on the same object; it does not
//! guarantee progress under heavy contention.

use crate::client::{Allocation, AllocationApi, AllocationCandidate};
use crate::error::{AllocationError, RetryError};
use crate::retry::{self, RetryConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use settleflow_config::Settings;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Allocator tuning
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    /// Bound on list → create → reverify → rollback cycles
    pub max_attempts: u32,

    /// Sleep window between failed cycles
    pub jitter_min: Duration,
    pub jitter_max: Duration,

    /// Fixed seed for the jitter sequence
    pub seed: Option<u64>,

    /// Retry policy applied to every remote call
    pub call_retry: RetryConfig,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl AllocatorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_attempts: settings.allocator.max_attempts,
            jitter_min: Duration::from_millis(settings.allocator.jitter_min_ms),
            jitter_max: Duration::from_millis(settings.allocator.jitter_max_ms),
            seed: settings.allocator.seed,
            call_retry: RetryConfig::from_settings(&settings.retry),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_jitter(mut self, min: Duration, max: Duration) -> Self {
        self.jitter_min = min;
        self.jitter_max = max.max(min);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Name-glob and optional owning-project filter over the candidate pool
#[derive(Debug, Clone, Default)]
pub struct CandidateFilter {
    /// `None` matches every name
    pattern: Option<glob::Pattern>,
    owner_project: Option<String>,
}

impl CandidateFilter {
    pub fn new(name_glob: &str) -> Result<Self, glob::PatternError> {
        Ok(Self {
            pattern: Some(glob::Pattern::new(name_glob)?),
            owner_project: None,
        })
    }

    /// Match every candidate
    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_owner_project(mut self, project_id: impl Into<String>) -> Self {
        self.owner_project = Some(project_id.into());
        self
    }

    pub fn matches(&self, candidate: &AllocationCandidate) -> bool {
        if let Some(pattern) = &self.pattern {
            if !pattern.matches(&candidate.display_name) {
                return false;
            }
        }
        match &self.owner_project {
            Some(project) => candidate.owner_project_id.as_deref() == Some(project.as_str()),
            None => true,
        }
    }
}

impl fmt::Display for CandidateFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let glob = self.pattern.as_ref().map_or("*", |p| p.as_str());
        write!(f, "name '{}'", glob)?;
        if let Some(project) = &self.owner_project {
            write!(f, " in project '{}'", project)?;
        }
        Ok(())
    }
}

enum Cycle {
    Claimed(Allocation),
    Lost { object_id: String },
    Drained,
}

/// Assigns exactly one unclaimed pool member per successful call
pub struct OptimisticAllocator<A: ?Sized> {
    api: Arc<A>,
    config: AllocatorConfig,
}

impl<A: AllocationApi + ?Sized> OptimisticAllocator<A> {
    pub fn new(api: Arc<A>, config: AllocatorConfig) -> Self {
        Self { api, config }
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Claim one candidate matching `filter` for `requester_id`
    ///
    /// Fails with [`AllocationError::NoCandidatesAvailable`] when the first
    /// cycle finds nothing free, and with
    /// [`AllocationError::AllocationExhausted`] when every cycle up to
    /// `max_attempts` lost its race or found the pool drained by competitors.
    pub async fn allocate(
        &self,
        filter: &CandidateFilter,
        requester_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Allocation, AllocationError> {
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut contested = false;
        let mut last_contested: Option<String> = None;

        for attempt in 1..=self.config.max_attempts {
            if cancel.is_cancelled() {
                return Err(AllocationError::Cancelled);
            }
            if attempt > 1 {
                let delay = self.jitter(&mut rng);
                debug!(
                    "Allocation attempt {}/{} for {} after {:?}",
                    attempt, self.config.max_attempts, requester_id, delay
                );
                if !retry::pause(delay, cancel).await {
                    return Err(AllocationError::Cancelled);
                }
            }

            match self.cycle(filter, requester_id, cancel).await? {
                Cycle::Claimed(allocation) => {
                    info!(
                        "Allocated {} to {} (allocation {}, attempt {})",
                        allocation.object_id, requester_id, allocation.id, attempt
                    );
                    return Ok(allocation);
                }
                Cycle::Lost { object_id } => {
                    contested = true;
                    last_contested = Some(object_id);
                }
                Cycle::Drained if !contested => {
                    return Err(AllocationError::NoCandidatesAvailable {
                        filter: filter.to_string(),
                    });
                }
                Cycle::Drained => {
                    // A winner may still be about to roll back its own claim.
                    debug!(
                        "No free candidate for {} after a lost race (attempt {})",
                        requester_id, attempt
                    );
                }
            }
        }

        warn!(
            "Allocation for {} exhausted after {} attempts",
            requester_id, self.config.max_attempts
        );
        Err(AllocationError::AllocationExhausted {
            attempts: self.config.max_attempts,
            last_contested,
        })
    }

    /// One list → create → reverify → maybe-rollback cycle
    async fn cycle(
        &self,
        filter: &CandidateFilter,
        requester_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Cycle, AllocationError> {
        let retry_config = &self.config.call_retry;

        let claimed: HashSet<String> =
            retry::retry(retry_config, cancel, || self.api.list_allocations(None))
                .await?
                .into_iter()
                .map(|a| a.object_id)
                .collect();

        let pool = retry::retry(retry_config, cancel, || self.api.list_candidates()).await?;
        let Some(candidate) = pick_candidate(pool, filter, &claimed) else {
            return Ok(Cycle::Drained);
        };

        debug!(
            "Claiming {} ({}) for {}",
            candidate.object_id, candidate.display_name, requester_id
        );
        // The create always runs to completion; a claim landing after
        // cancellation is rolled back.
        let uncancellable = CancellationToken::new();
        let created = retry::retry(retry_config, &uncancellable, || {
            self.api
                .create_allocation(&candidate.object_id, requester_id)
        })
        .await?;
        if cancel.is_cancelled() {
            debug!("Cancelled during create, rolling back {}", created.id);
            self.rollback(&created).await?;
            return Err(AllocationError::Cancelled);
        }

        let holders = match retry::retry(retry_config, cancel, || {
            self.api.list_allocations(Some(&candidate.object_id))
        })
        .await
        {
            Ok(holders) => holders,
            Err(err) => {
                // Unverified claims are never left behind.
                self.rollback(&created).await?;
                return Err(err.into());
            }
        };

        let ours = holders.iter().any(|a| a.id == created.id);
        if ours && holders.len() == 1 {
            return Ok(Cycle::Claimed(created));
        }

        warn!(
            "Lost race for {}: {} allocations present, rolling back {}",
            candidate.object_id,
            holders.len(),
            created.id
        );
        self.rollback(&created).await?;
        Ok(Cycle::Lost {
            object_id: candidate.object_id,
        })
    }

    /// Delete our own claim; runs to completion even if the caller cancelled.
    /// A claim that is already gone counts as rolled back.
    async fn rollback(&self, allocation: &Allocation) -> Result<(), AllocationError> {
        let uncancellable = CancellationToken::new();
        let result = retry::retry(&self.config.call_retry, &uncancellable, || {
            self.api.delete_allocation(&allocation.id)
        })
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(RetryError::Fatal(err)) if err.is_not_found() => {
                debug!("Allocation {} already gone", allocation.id);
                Ok(())
            }
            Err(source) => Err(AllocationError::RollbackFailed {
                allocation_id: allocation.id.clone(),
                source,
            }),
        }
    }

    fn jitter(&self, rng: &mut StdRng) -> Duration {
        let min = self.config.jitter_min;
        let max = self.config.jitter_max;
        if max <= min {
            return min;
        }
        let micros = rng.gen_range(min.as_micros() as u64..=max.as_micros() as u64);
        Duration::from_micros(micros)
    }
}

/// Filter, drop claimed objects, and take the first by (name, object ID)
fn pick_candidate(
    pool: Vec<AllocationCandidate>,
    filter: &CandidateFilter,
    claimed: &HashSet<String>,
) -> Option<AllocationCandidate> {
    pool.into_iter()
        .filter(|c| filter.matches(c) && !claimed.contains(&c.object_id))
        .min_by(|a, b| {
            a.display_name
                .cmp(&b.display_name)
                .then_with(|| a.object_id.cmp(&b.object_id))
        })
}
