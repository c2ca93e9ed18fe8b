mod common;

use common::{allocator, init_tracing};
use futures_util::future::join_all;
use settleflow_cloud::testing::FakeRemote;
use settleflow_cloud::{AllocationError, CancellationToken, CandidateFilter, ErrorCategory};
use std::collections::HashSet;
use std::sync::Arc;

/// N allocators over a pool of K < N: exactly K distinct claims survive
#[tokio::test(start_paused = true)]
async fn test_concurrent_allocators_never_share_an_object() {
    init_tracing();

    for (pool, competitors) in [(vec!["a", "b"], 4usize), (vec!["a", "b", "c"], 5), (vec!["a"], 3)] {
        let remote = Arc::new(FakeRemote::with_names(&pool));
        // Everyone lists before the first claim lands.
        remote.gate_creates(competitors);

        let allocators: Vec<_> = (0..competitors)
            .map(|i| allocator(&remote, 5, 1000 + i as u64))
            .collect();
        let filter = CandidateFilter::new("*").unwrap();
        let cancel = CancellationToken::new();

        let results = join_all(allocators.iter().enumerate().map(|(i, allocator)| {
            let requester = format!("requester-{}", i);
            let filter = &filter;
            let cancel = &cancel;
            async move { allocator.allocate(filter, &requester, cancel).await }
        }))
        .await;

        let claimed: Vec<String> = results
            .iter()
            .filter_map(|r| r.as_ref().ok())
            .map(|a| a.object_id.clone())
            .collect();
        let distinct: HashSet<&String> = claimed.iter().collect();

        assert_eq!(claimed.len(), pool.len(), "pool {:?}", pool);
        assert_eq!(distinct.len(), pool.len(), "pool {:?}", pool);

        let exhausted = results
            .iter()
            .filter(|r| matches!(r, Err(AllocationError::AllocationExhausted { .. })))
            .count();
        assert_eq!(exhausted, competitors - pool.len());

        // Every losing claim was rolled back.
        let remaining = remote.allocations();
        assert_eq!(remaining.len(), pool.len());
        let remaining_objects: HashSet<&str> =
            remaining.iter().map(|a| a.object_id.as_str()).collect();
        assert_eq!(remaining_objects.len(), pool.len());
    }
}

#[tokio::test(start_paused = true)]
async fn test_preexisting_claim_is_skipped_without_rollback() {
    init_tracing();

    let remote = Arc::new(FakeRemote::with_names(&["a", "b"]));
    remote.insert_allocation("a", "earlier-requester");

    let allocation = allocator(&remote, 3, 1)
        .allocate(
            &CandidateFilter::new("*").unwrap(),
            "me",
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(allocation.object_id, "b");
    assert_eq!(remote.creates(), 1);
    assert_eq!(remote.deletes(), 0);
    // One list for the claimed set, one for the reverify.
    assert_eq!(remote.allocation_lists(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_two_allocators_one_candidate() {
    init_tracing();

    let remote = Arc::new(FakeRemote::with_names(&["a"]));
    remote.gate_creates(2);

    let first = allocator(&remote, 5, 11);
    let second = allocator(&remote, 5, 22);
    let filter = CandidateFilter::new("*").unwrap();
    let cancel = CancellationToken::new();

    let (r1, r2) = tokio::join!(
        first.allocate(&filter, "first", &cancel),
        second.allocate(&filter, "second", &cancel),
    );

    let (winner, loser) = match (r1, r2) {
        (Ok(winner), Err(loser)) | (Err(loser), Ok(winner)) => (winner, loser),
        other => panic!("Expected exactly one winner, got {:?}", other),
    };

    assert_eq!(winner.object_id, "a");
    assert_eq!(loser.category(), ErrorCategory::AllocationExhausted);
    match loser {
        AllocationError::AllocationExhausted {
            attempts,
            last_contested,
        } => {
            assert_eq!(attempts, 5);
            assert_eq!(last_contested.as_deref(), Some("a"));
        }
        other => panic!("Expected AllocationExhausted, got {:?}", other),
    }

    // Both claims landed in the first round; at least the loser's was undone.
    assert!(remote.creates() >= 2);
    assert!(remote.deletes() >= 1);
    assert_eq!(remote.allocations().len(), 1);
    assert_eq!(remote.allocations()[0].id, winner.id);
}

#[tokio::test(start_paused = true)]
async fn test_owner_project_filter_limits_pool() {
    use settleflow_cloud::AllocationCandidate;

    let remote = Arc::new(FakeRemote::new([
        AllocationCandidate::new("id-1", "share-a").with_owner("proj-1"),
        AllocationCandidate::new("id-2", "share-b").with_owner("proj-2"),
    ]));
    let filter = CandidateFilter::new("share-*")
        .unwrap()
        .with_owner_project("proj-2");

    let allocation = allocator(&remote, 3, 5)
        .allocate(&filter, "me", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(allocation.object_id, "id-2");

    let err = allocator(&remote, 3, 6)
        .allocate(&filter, "someone-else", &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::NoCandidatesAvailable);
}
