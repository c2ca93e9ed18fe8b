mod common;

use common::init_tracing;
use futures_util::future::join_all;
use settleflow_cloud::testing::{FakeObjectRefresher, FakeObjectStore};
use settleflow_cloud::{
    ApiError, CancellationToken, KeyedLocks, PollSpec, ResourceHandle, create_and_wait,
    delete_and_wait, with_parent_lock,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Route tables whose update API replaces the whole route list
#[derive(Default)]
struct RouteTables {
    routes: Mutex<HashMap<String, Vec<String>>>,
}

impl RouteTables {
    async fn read(&self, table: &str) -> Vec<String> {
        tokio::task::yield_now().await;
        self.routes
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    async fn replace(&self, table: &str, routes: Vec<String>) -> Result<(), ApiError> {
        tokio::task::yield_now().await;
        self.routes.lock().unwrap().insert(table.to_string(), routes);
        Ok(())
    }

    async fn append(&self, table: &str, route: &str) -> Result<(), ApiError> {
        let mut routes = self.read(table).await;
        routes.push(route.to_string());
        self.replace(table, routes).await
    }
}

#[tokio::test]
async fn test_parent_lock_keeps_every_concurrent_append() {
    init_tracing();

    let tables = RouteTables::default();
    let locks = KeyedLocks::new();
    let destinations: Vec<String> = (0..8).map(|i| format!("10.0.{}.0/24", i)).collect();

    let results = join_all(destinations.iter().map(|destination| {
        let table = if destination.ends_with("1.0/24") { "rt-2" } else { "rt-1" };
        let tables = &tables;
        let locks = &locks;
        async move { with_parent_lock(locks, table, tables.append(table, destination)).await }
    }))
    .await;

    assert!(results.iter().all(Result::is_ok));
    let routes = tables.routes.lock().unwrap();
    assert_eq!(routes["rt-1"].len(), 7);
    assert_eq!(routes["rt-2"], vec!["10.0.1.0/24".to_string()]);
    assert_eq!(locks.active_keys(), 0);
}

#[tokio::test]
async fn test_unlocked_appends_lose_updates() {
    let tables = RouteTables::default();

    join_all((0..4).map(|i| {
        let tables = &tables;
        async move { tables.append("rt-1", &format!("10.0.{}.0/24", i)).await }
    }))
    .await;

    // Every append read the empty list before anyone wrote.
    assert_eq!(tables.routes.lock().unwrap()["rt-1"].len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_create_then_delete_round_trip() {
    init_tracing();

    let store = Arc::new(FakeObjectStore::new());
    let spec = PollSpec::new(["BUILD"], ["ACTIVE"]).with_timeout(Duration::from_secs(30));
    let cancel = CancellationToken::new();

    let create_store = store.clone();
    let (handle, created) = create_and_wait(
        async move {
            let id = create_store.create(&["BUILD", "BUILD", "ACTIVE"]);
            Ok(ResourceHandle::new("file_share", id))
        },
        |handle| FakeObjectRefresher {
            store: store.clone(),
            id: handle.id.clone(),
        },
        &spec,
        &cancel,
    )
    .await
    .unwrap();
    assert_eq!(created.state.as_str(), "ACTIVE");
    assert_eq!(created.polls, 3);

    let refresher = FakeObjectRefresher {
        store: store.clone(),
        id: handle.id.clone(),
    };
    let deleted = delete_and_wait(
        async { store.transition(&handle.id, &["DELETING", "DELETED"]) },
        &refresher,
        &PollSpec::new(["DELETING"], Vec::<&str>::new()).with_timeout(Duration::from_secs(30)),
        &cancel,
    )
    .await
    .unwrap();

    assert!(deleted.is_deleted());
    assert!(deleted.object.is_none());
}
