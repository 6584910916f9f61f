use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use framecache_core::{
    CacheError, CacheKey, CancelOutcome, FetchContext, KeyState, RequestCoordinator,
    StoreConfig, Tiers, UnifiedCache, fetcher_fn,
};
use tokio::sync::Semaphore;

/// Fetcher that blocks on `gate` and counts how often it was started.
fn gated_fetcher(
    calls: Arc<AtomicUsize>,
    gate: Arc<Semaphore>,
    payload: Vec<u8>,
) -> impl framecache_core::Fetcher<Vec<u8>> + 'static {
    fetcher_fn(move |ctx: FetchContext| {
        calls.fetch_add(1, Ordering::SeqCst);
        let gate = Arc::clone(&gate);
        let payload = payload.clone();
        async move {
            ctx.report_progress(0.25);
            let _permit = gate.acquire().await.map_err(CacheError::fetch_failed)?;
            ctx.report_progress(0.75);
            Ok::<_, CacheError>(payload)
        }
    })
}

fn coordinator() -> RequestCoordinator<Vec<u8>> {
    RequestCoordinator::new(
        Arc::new(UnifiedCache::memory_only(StoreConfig::default())),
        Tiers::MEMORY,
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_share_one_fetch() {
    let coordinator = coordinator();
    let calls = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(Semaphore::new(0));
    let key = CacheKey::new("poster-185x278-fit");

    let mut handles = Vec::new();
    for i in 0..16u8 {
        let coordinator = coordinator.clone();
        let fetcher = gated_fetcher(Arc::clone(&calls), Arc::clone(&gate), vec![i; 4]);
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            coordinator.request(key, fetcher).wait().await
        }));
    }

    while coordinator.waiter_count(&key) < 16 {
        tokio::task::yield_now().await;
    }
    gate.add_permits(1);

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(results.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(coordinator.state(&key), KeyState::Idle);
    assert_eq!(coordinator.in_flight_count(), 0);

    let stats = coordinator.stats();
    assert_eq!(stats.leaders, 1);
    assert_eq!(stats.waiters, 15);
    assert_eq!(stats.completions, 1);
    assert_eq!(coordinator.cache().memory().value(&key), Some(results[0].clone()));
}

/// Sets the flag when the fetch future that owns it is dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelling_the_only_waiter_stops_the_fetch() {
    let coordinator = coordinator();
    let calls = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(Semaphore::new(0));
    let dropped = Arc::new(AtomicBool::new(false));
    let key = CacheKey::new("backdrop-1280x720-fill");

    let fetcher = {
        let calls = Arc::clone(&calls);
        let gate = Arc::clone(&gate);
        let dropped = Arc::clone(&dropped);
        fetcher_fn(move |_ctx: FetchContext| {
            calls.fetch_add(1, Ordering::SeqCst);
            let gate = Arc::clone(&gate);
            let flag = DropFlag(Arc::clone(&dropped));
            async move {
                let _flag = flag;
                let _permit = gate.acquire().await.map_err(CacheError::fetch_failed)?;
                Ok::<_, CacheError>(vec![1])
            }
        })
    };
    let subscription = coordinator.request(key.clone(), fetcher);

    // Only cancel once the fetch is actually running.
    while calls.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    assert!(matches!(coordinator.state(&key), KeyState::Loading(_)));
    assert!(!dropped.load(Ordering::SeqCst));

    assert_eq!(
        coordinator.cancel(&key, subscription.waiter()),
        CancelOutcome::FetchCancelled
    );
    assert_eq!(coordinator.state(&key), KeyState::Idle);
    assert_eq!(coordinator.in_flight_count(), 0);

    let err = subscription.wait().await.unwrap_err();
    assert!(err.is_cancelled());

    tokio::time::timeout(Duration::from_secs(5), async {
        while !dropped.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("running fetch future should be dropped after cancel");

    gate.add_permits(1);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!coordinator.cache().memory().contains(&key));
    assert_eq!(coordinator.stats().cancellations, 1);

    // A later request starts a fresh episode.
    let retry = coordinator.request(
        key.clone(),
        gated_fetcher(Arc::clone(&calls), Arc::clone(&gate), vec![2]),
    );
    assert_eq!(retry.wait().await.unwrap(), vec![2]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn detaching_one_of_several_waiters_keeps_the_fetch_running() {
    let coordinator = coordinator();
    let calls = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(Semaphore::new(0));
    let key = CacheKey::new("frame-00:12:00");

    let leaving = coordinator.request(
        key.clone(),
        gated_fetcher(Arc::clone(&calls), Arc::clone(&gate), vec![3; 3]),
    );
    let staying = coordinator.request(
        key.clone(),
        gated_fetcher(Arc::clone(&calls), Arc::clone(&gate), vec![4; 3]),
    );

    assert_eq!(
        coordinator.cancel(&key, leaving.waiter()),
        CancelOutcome::Detached
    );
    assert_eq!(coordinator.waiter_count(&key), 1);
    assert!(matches!(coordinator.state(&key), KeyState::Loading(_)));

    gate.add_permits(1);
    assert_eq!(staying.wait().await.unwrap(), vec![3; 3]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(coordinator.state(&key), KeyState::Idle);
    assert_eq!(coordinator.stats().cancellations, 0);
}
