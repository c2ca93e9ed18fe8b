//! In-memory doubles for the Remote API Client
//!
//! Enabled with the `test-utils` feature.

use crate::client::{Allocation, AllocationApi, AllocationCandidate};
use crate::error::{ApiError, ApiErrorKind};
use crate::state::{Observation, StateLabel, StateRefresher};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Barrier;

/// Refresher that replays a fixed script, repeating the last entry forever
pub struct ScriptedRefresher<T> {
    script: Mutex<VecDeque<Result<Observation<T>, ApiError>>>,
    calls: AtomicU32,
}

impl<T: Clone> ScriptedRefresher<T> {
    pub fn new(script: Vec<Result<Observation<T>, ApiError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
        }
    }

    /// Number of refresh calls made so far
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T> StateRefresher for ScriptedRefresher<T>
where
    T: Clone + Send + Sync + fmt::Debug,
{
    type Object = T;

    async fn refresh(&self) -> Result<Observation<T>, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = lock(&self.script);
        if script.len() > 1 {
            if let Some(next) = script.pop_front() {
                return next;
            }
        }
        script
            .front()
            .cloned()
            .unwrap_or_else(|| Ok(Observation::absent()))
    }
}

/// Remote operations whose failures can be injected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeOp {
    ListCandidates,
    ListAllocations,
    CreateAllocation,
    DeleteAllocation,
}

#[derive(Default)]
struct FakeState {
    candidates: Vec<AllocationCandidate>,
    allocations: Vec<Allocation>,
    next_id: u64,
    failures: HashMap<FakeOp, VecDeque<Option<ApiErrorKind>>>,
}

struct CreateGate {
    barrier: Arc<Barrier>,
    remaining: usize,
}

/// In-memory remote store with list/create/delete and no compare-and-swap
///
/// Every operation yields to the scheduler first so concurrent allocators
/// interleave between remote calls.
#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<FakeState>,
    gate: Mutex<Option<CreateGate>>,
    create_latency: Mutex<Duration>,
    stale_scoped_lists: AtomicU32,
    creates: AtomicU32,
    deletes: AtomicU32,
    allocation_lists: AtomicU32,
}

impl FakeRemote {
    pub fn new(candidates: impl IntoIterator<Item = AllocationCandidate>) -> Self {
        let remote = Self::default();
        lock(&remote.state).candidates = candidates.into_iter().collect();
        remote
    }

    /// Pool of candidates whose object ID and display name are both `name`
    pub fn with_names(names: &[&str]) -> Self {
        Self::new(
            names
                .iter()
                .map(|name| AllocationCandidate::new(*name, *name)),
        )
    }

    /// Seed an allocation that existed before the test started
    pub fn insert_allocation(&self, object_id: &str, requester_id: &str) -> Allocation {
        insert(&mut lock(&self.state), object_id, requester_id)
    }

    /// Hold the next `callers` create calls until all of them have arrived,
    /// so every caller lists before anyone's claim lands
    pub fn gate_creates(&self, callers: usize) {
        *lock(&self.gate) = Some(CreateGate {
            barrier: Arc::new(Barrier::new(callers)),
            remaining: callers,
        });
    }

    /// Keep each create call busy for `latency` after its record is stored
    pub fn delay_creates(&self, latency: Duration) {
        *lock(&self.create_latency) = latency;
    }

    /// Answer the next `times` object-scoped allocation lists with an empty
    /// list, as a lagging read replica would
    pub fn stale_scoped_lists(&self, times: u32) {
        self.stale_scoped_lists.store(times, Ordering::SeqCst);
    }

    /// Make the next `times` calls of `op` fail with `kind`
    ///
    /// Queued after anything already scheduled for `op`.
    pub fn fail_next(&self, op: FakeOp, kind: ApiErrorKind, times: usize) {
        self.schedule(op, Some(kind), times);
    }

    /// Let the next `times` calls of `op` through before queued failures apply
    pub fn pass_next(&self, op: FakeOp, times: usize) {
        self.schedule(op, None, times);
    }

    fn schedule(&self, op: FakeOp, outcome: Option<ApiErrorKind>, times: usize) {
        let mut state = lock(&self.state);
        let queue = state.failures.entry(op).or_default();
        queue.extend(std::iter::repeat_n(outcome, times));
    }

    pub fn allocations(&self) -> Vec<Allocation> {
        lock(&self.state).allocations.clone()
    }

    pub fn creates(&self) -> u32 {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> u32 {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn allocation_lists(&self) -> u32 {
        self.allocation_lists.load(Ordering::SeqCst)
    }

    fn injected(&self, op: FakeOp) -> Result<(), ApiError> {
        let mut state = lock(&self.state);
        match state.failures.get_mut(&op).and_then(VecDeque::pop_front).flatten() {
            Some(kind) => Err(ApiError::new(kind, format!("injected failure on {:?}", op))),
            None => Ok(()),
        }
    }

    fn take_stale_list(&self) -> bool {
        self.stale_scoped_lists
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn take_gate(&self) -> Option<Arc<Barrier>> {
        let mut gate = lock(&self.gate);
        let current = gate.as_mut()?;
        let barrier = current.barrier.clone();
        current.remaining -= 1;
        if current.remaining == 0 {
            *gate = None;
        }
        Some(barrier)
    }
}

#[async_trait]
impl AllocationApi for FakeRemote {
    async fn list_candidates(&self) -> Result<Vec<AllocationCandidate>, ApiError> {
        tokio::task::yield_now().await;
        self.injected(FakeOp::ListCandidates)?;
        Ok(lock(&self.state).candidates.clone())
    }

    async fn list_allocations(
        &self,
        object_id: Option<&str>,
    ) -> Result<Vec<Allocation>, ApiError> {
        tokio::task::yield_now().await;
        self.injected(FakeOp::ListAllocations)?;
        self.allocation_lists.fetch_add(1, Ordering::SeqCst);
        if object_id.is_some() && self.take_stale_list() {
            return Ok(Vec::new());
        }
        let state = lock(&self.state);
        Ok(state
            .allocations
            .iter()
            .filter(|a| object_id.is_none_or(|id| a.object_id == id))
            .cloned()
            .collect())
    }

    async fn create_allocation(
        &self,
        object_id: &str,
        requester_id: &str,
    ) -> Result<Allocation, ApiError> {
        tokio::task::yield_now().await;
        self.injected(FakeOp::CreateAllocation)?;
        if let Some(barrier) = self.take_gate() {
            barrier.wait().await;
        }
        self.creates.fetch_add(1, Ordering::SeqCst);
        let allocation = insert(&mut lock(&self.state), object_id, requester_id);

        let latency = *lock(&self.create_latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        Ok(allocation)
    }

    async fn delete_allocation(&self, allocation_id: &str) -> Result<(), ApiError> {
        tokio::task::yield_now().await;
        self.injected(FakeOp::DeleteAllocation)?;
        let mut state = lock(&self.state);
        let before = state.allocations.len();
        state.allocations.retain(|a| a.id != allocation_id);
        if state.allocations.len() == before {
            return Err(ApiError::not_found(format!(
                "allocation {} not found",
                allocation_id
            )));
        }
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Object whose state label a test can change between refreshes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeObject {
    pub id: String,
    pub state: String,
}

/// Store of plain objects for lifecycle tests; each object walks through a
/// queue of labels, one per refresh, then stays on the last one
#[derive(Default)]
pub struct FakeObjectStore {
    objects: Mutex<HashMap<String, VecDeque<String>>>,
    next_id: AtomicU32,
}

impl FakeObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an object that will report `labels` in order
    pub fn create(&self, labels: &[&str]) -> String {
        let id = format!("obj-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        lock(&self.objects).insert(id.clone(), labels.iter().map(|l| l.to_string()).collect());
        id
    }

    /// Replace the remaining labels of an object
    pub fn transition(&self, id: &str, labels: &[&str]) -> Result<(), ApiError> {
        let mut objects = lock(&self.objects);
        let entry = objects
            .get_mut(id)
            .ok_or_else(|| ApiError::not_found(format!("object {} not found", id)))?;
        *entry = labels.iter().map(|l| l.to_string()).collect();
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<(), ApiError> {
        lock(&self.objects)
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ApiError::not_found(format!("object {} not found", id)))
    }

    pub fn read(&self, id: &str) -> Result<Observation<FakeObject>, ApiError> {
        let mut objects = lock(&self.objects);
        let labels = objects
            .get_mut(id)
            .ok_or_else(|| ApiError::not_found(format!("object {} not found", id)))?;
        let state = if labels.len() > 1 {
            labels.pop_front().unwrap_or_default()
        } else {
            labels.front().cloned().unwrap_or_default()
        };
        if state == StateLabel::DELETED {
            return Ok(Observation::absent());
        }
        Ok(Observation::found(
            FakeObject {
                id: id.to_string(),
                state: state.clone(),
            },
            state,
        ))
    }
}

/// Refresher reading one object out of a [`FakeObjectStore`]
pub struct FakeObjectRefresher {
    pub store: Arc<FakeObjectStore>,
    pub id: String,
}

#[async_trait]
impl StateRefresher for FakeObjectRefresher {
    type Object = FakeObject;

    async fn refresh(&self) -> Result<Observation<FakeObject>, ApiError> {
        tokio::task::yield_now().await;
        self.store.read(&self.id)
    }
}

fn insert(state: &mut FakeState, object_id: &str, requester_id: &str) -> Allocation {
    state.next_id += 1;
    let allocation = Allocation {
        id: format!("alloc-{}", state.next_id),
        object_id: object_id.to_string(),
        requester_id: requester_id.to_string(),
        created_at: Utc::now(),
    };
    state.allocations.push(allocation.clone());
    allocation
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
