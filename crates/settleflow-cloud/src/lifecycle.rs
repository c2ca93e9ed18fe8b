//! Lifecycle helpers: issue a mutating call, then wait for convergence

use crate::client::ResourceHandle;
use crate::error::{ApiError, PollError};
use crate::lock::KeyedLocks;
use crate::poller::{self, PollOutcome, PollSpec};
use crate::state::{StateLabel, StateRefresher};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Run `create`, build a refresher for the new handle, and wait on it
pub async fn create_and_wait<Fut, M, R>(
    create: Fut,
    make_refresher: M,
    spec: &PollSpec,
    cancel: &CancellationToken,
) -> Result<(ResourceHandle, PollOutcome<R::Object>), PollError<R::Object>>
where
    Fut: Future<Output = Result<ResourceHandle, ApiError>>,
    M: FnOnce(&ResourceHandle) -> R,
    R: StateRefresher,
{
    let handle = create.await?;
    tracing::info!("Created {}, waiting for {:?}", handle, spec.target);

    let refresher = make_refresher(&handle);
    let outcome = poller::wait(&refresher, spec, cancel).await?;
    Ok((handle, outcome))
}

/// Run `delete`, then wait until the object is gone
///
/// A not-found answer to the delete call means the object is already gone;
/// `DELETED` is added to the target set if the caller left it out.
pub async fn delete_and_wait<Fut, R>(
    delete: Fut,
    refresher: &R,
    spec: &PollSpec,
    cancel: &CancellationToken,
) -> Result<PollOutcome<R::Object>, PollError<R::Object>>
where
    Fut: Future<Output = Result<(), ApiError>>,
    R: StateRefresher + ?Sized,
{
    match delete.await {
        Ok(()) => {}
        Err(err) if err.is_not_found() => {
            tracing::debug!("Delete returned not found, object already gone");
        }
        Err(err) => return Err(PollError::Api(err)),
    }

    let spec = spec.clone().with_target(StateLabel::deleted());
    poller::wait(refresher, &spec, cancel).await
}

/// Run `mutation` while holding the lock for `parent_id`
///
/// Used for read-modify-write of a list owned by a parent resource (e.g.,
/// routes of a route table). The lock is released however `mutation` ends.
pub async fn with_parent_lock<Fut, T>(locks: &KeyedLocks, parent_id: &str, mutation: Fut) -> T
where
    Fut: Future<Output = T>,
{
    let _guard = locks.lock(parent_id).await;
    mutation.await
}
