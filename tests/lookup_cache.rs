use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::anyhow;
use async_trait::async_trait;
use cloudhelper::{
    directory::{LookupCache, UserLookup},
    DirectoryError,
};

#[derive(Debug, PartialEq)]
struct User {
    sub: String,
    name: String,
}

/// Directory stand-in that counts how often it gets asked.
#[derive(Default)]
struct StubDirectory {
    users: HashMap<(String, String), String>,
    calls: AtomicUsize,
    failures_left: AtomicUsize,
    latency: Option<Duration>,
}

impl StubDirectory {
    fn with_user(mut self, pool_id: &str, sub: &str, name: &str) -> Self {
        self.users
            .insert((pool_id.to_string(), sub.to_string()), name.to_string());
        self
    }

    fn failing(self, times: usize) -> Self {
        self.failures_left.store(times, Ordering::SeqCst);
        self
    }

    fn slow(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserLookup for StubDirectory {
    type Record = User;

    async fn lookup(&self, pool_id: &str, sub: &str) -> Result<User, DirectoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(anyhow!("throttled").into());
        }

        match self.users.get(&(pool_id.to_string(), sub.to_string())) {
            Some(name) => Ok(User {
                sub: sub.to_string(),
                name: name.clone(),
            }),
            None => Err(DirectoryError::UserNotFound),
        }
    }
}

fn cache_over(directory: StubDirectory) -> (LookupCache<StubDirectory>, Arc<StubDirectory>) {
    let directory = Arc::new(directory);
    (LookupCache::with_shared_provider(directory.clone()), directory)
}

#[tokio::test]
async fn test_not_found_is_memoized() {
    let (cache, directory) = cache_over(StubDirectory::default());

    let err = cache.get("pool-1", "missing-sub").await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(directory.calls(), 1);
    assert_eq!(cache.len("pool-1").await, 1);

    let err = cache.get("pool-1", "missing-sub").await.unwrap_err();
    assert!(matches!(err, DirectoryError::UserNotFound));
    assert_eq!(directory.calls(), 1);

    cache.clear("pool-1").await;
    assert_eq!(cache.len("pool-1").await, 0);
}

#[tokio::test]
async fn test_found_user_is_memoized() {
    let (cache, directory) = cache_over(StubDirectory::default().with_user("pool-1", "real-sub", "Jon"));

    let first = cache.get("pool-1", "real-sub").await.unwrap();
    assert_eq!(first.name, "Jon");
    assert_eq!(first.sub, "real-sub");

    for _ in 0..5 {
        let again = cache.get("pool-1", "real-sub").await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));
    }
    assert_eq!(directory.calls(), 1);
    assert_eq!(cache.len("pool-1").await, 1);
}

#[tokio::test]
async fn test_provider_errors_are_not_memoized() {
    let (cache, directory) = cache_over(
        StubDirectory::default()
            .with_user("pool-1", "real-sub", "Jon")
            .failing(3),
    );

    for attempt in 1..=3 {
        let err = cache.get("pool-1", "real-sub").await.unwrap_err();
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), "throttled");
        assert_eq!(directory.calls(), attempt);
        assert_eq!(cache.len("pool-1").await, 0);
    }

    // the directory recovered, now the answer sticks
    let user = cache.get("pool-1", "real-sub").await.unwrap();
    assert_eq!(user.name, "Jon");
    cache.get("pool-1", "real-sub").await.unwrap();
    assert_eq!(directory.calls(), 4);
    assert_eq!(cache.len("pool-1").await, 1);
}

#[tokio::test]
async fn test_pools_are_isolated() {
    let (cache, directory) = cache_over(
        StubDirectory::default()
            .with_user("pool-1", "real-sub", "Jon")
            .with_user("pool-2", "real-sub", "Jane"),
    );

    let in_pool_1 = cache.get("pool-1", "real-sub").await.unwrap();
    assert_eq!(directory.calls(), 1);

    // same sub, different pool: a miss
    let in_pool_2 = cache.get("pool-2", "real-sub").await.unwrap();
    assert_eq!(directory.calls(), 2);
    assert_eq!(in_pool_1.name, "Jon");
    assert_eq!(in_pool_2.name, "Jane");

    cache.get("pool-2", "missing-sub").await.unwrap_err();
    assert_eq!(cache.len("pool-1").await, 1);
    assert_eq!(cache.len("pool-2").await, 2);

    cache.clear("pool-1").await;
    assert_eq!(cache.len("pool-1").await, 0);
    assert_eq!(cache.len("pool-2").await, 2);

    cache.get("pool-2", "real-sub").await.unwrap();
    assert_eq!(directory.calls(), 3);
}

#[tokio::test]
async fn test_clear_forces_new_lookup() {
    let (cache, directory) = cache_over(StubDirectory::default().with_user("pool-1", "real-sub", "Jon"));

    let before = cache.get("pool-1", "real-sub").await.unwrap();
    cache.get("pool-1", "missing-sub").await.unwrap_err();
    assert_eq!(directory.calls(), 2);

    cache.clear("pool-1").await;

    let after = cache.get("pool-1", "real-sub").await.unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(*before, *after);
    cache.get("pool-1", "missing-sub").await.unwrap_err();
    assert_eq!(directory.calls(), 4);
}

#[tokio::test]
async fn test_clear_of_unknown_pool() {
    let (cache, directory) = cache_over(StubDirectory::default());
    cache.clear("pool-1").await;
    assert_eq!(cache.len("pool-1").await, 0);
    assert_eq!(directory.calls(), 0);
}

#[tokio::test]
async fn test_clones_share_entries() {
    let (cache, directory) = cache_over(StubDirectory::default().with_user("pool-1", "real-sub", "Jon"));
    let other = cache.clone();

    cache.get("pool-1", "real-sub").await.unwrap();
    other.get("pool-1", "real-sub").await.unwrap();
    assert_eq!(directory.calls(), 1);
    assert_eq!(other.len("pool-1").await, 1);

    other.clear("pool-1").await;
    assert_eq!(cache.len("pool-1").await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_query_directory_once() {
    let (cache, directory) = cache_over(
        StubDirectory::default()
            .with_user("pool-1", "real-sub", "Jon")
            .slow(Duration::from_millis(20)),
    );

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get("pool-1", "real-sub").await })
        })
        .collect();

    let mut users = Vec::new();
    for task in tasks {
        users.push(task.await.unwrap().unwrap());
    }

    assert_eq!(directory.calls(), 1);
    assert!(users.iter().all(|u| Arc::ptr_eq(u, &users[0])));
    assert_eq!(cache.len("pool-1").await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_not_found() {
    let (cache, directory) = cache_over(StubDirectory::default().slow(Duration::from_millis(20)));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get("pool-1", "missing-sub").await })
        })
        .collect();

    for task in tasks {
        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_not_found());
    }

    assert_eq!(directory.calls(), 1);
    assert_eq!(cache.len("pool-1").await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_distinct_keys() {
    let mut directory = StubDirectory::default();
    for i in 0..8 {
        directory = directory.with_user("pool-1", &format!("sub-{i}"), &format!("user {i}"));
    }
    let (cache, directory) = cache_over(directory);

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get("pool-1", &format!("sub-{}", i % 8)).await })
        })
        .collect();

    for (i, task) in tasks.into_iter().enumerate() {
        let user = task.await.unwrap().unwrap();
        assert_eq!(user.name, format!("user {}", i % 8));
    }

    assert_eq!(directory.calls(), 8);
    assert_eq!(cache.len("pool-1").await, 8);
}
