//! settleflow remote-state reconciliation
//!
//! Resource adapters issue a mutating call against a cloud API and then need
//! the remote object to settle. This crate provides the shared machinery for
//! that, independent of any particular cloud vocabulary.
//!
//! # Components
//!
//! - **StateRefresher** ([`state`]): one remote read reduced to an
//!   object plus a state label. Implemented once per object type.
//! - **StatePoller** ([`poller`]): drives a refresher until the label reaches
//!   a target set, leaves the pending set, or the deadline passes.
//! - **RetryClassifier** ([`retry`]): decides whether a remote error is
//!   transient; shared by polling and by bounded write retries.
//! - **OptimisticAllocator** ([`allocator`]): claims one unique member of a
//!   candidate pool without server-side locking, using
//!   list → create → reverify → rollback.
//! - **KeyedLocks** ([`lock`]): per-key in-process mutex table.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │           resource lifecycle operation           │
//! │        (create / update / delete adapters)       │
//! └────────┬──────────────────────────┬──────────────┘
//!          │ mutate                   │ allocate
//! ┌────────▼────────┐        ┌────────▼────────────┐
//! │   StatePoller   │        │ OptimisticAllocator │
//! └────────┬────────┘        └────────┬────────────┘
//!          │  refresh errors          │ every remote call
//! ┌────────▼──────────────────────────▼─────────────┐
//! │                 RetryClassifier                  │
//! └────────┬──────────────────────────┬──────────────┘
//!          │                          │
//! ┌────────▼────────┐        ┌────────▼────────────┐
//! │ StateRefresher  │        │   AllocationApi     │
//! │ (per object)    │        │ (Remote API Client) │
//! └─────────────────┘        └─────────────────────┘
//! ```

pub mod allocator;
pub mod client;
pub mod error;
pub mod lifecycle;
pub mod lock;
pub mod poller;
pub mod retry;
pub mod state;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-exports
pub use allocator::{AllocatorConfig, CandidateFilter, OptimisticAllocator};
pub use client::{Allocation, AllocationApi, AllocationCandidate, ResourceHandle};
pub use error::{
    AllocationError, ApiError, ApiErrorKind, ErrorCategory, PollError, RetryError,
};
pub use lifecycle::{create_and_wait, delete_and_wait, with_parent_lock};
pub use lock::{KeyedGuard, KeyedLocks};
pub use poller::{PollOutcome, PollSpec, wait};
pub use retry::{RetryConfig, Verdict, classify, retry};
pub use state::{Observation, StateLabel, StateRefresher};
pub use tokio_util::sync::CancellationToken;
