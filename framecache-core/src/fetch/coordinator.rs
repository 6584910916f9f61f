//! Per-key request coalescing.
//!
//! The first request for a key becomes the leader and spawns the fetch;
//! later requests attach to the same episode and share its progress and
//! terminal state through a watch channel. Each key walks
//! `Idle -> Loading -> {Loaded, Failed}` and returns to `Idle` once the
//! terminal state has been broadcast.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::SystemTime,
};

use anyhow::anyhow;
use futures::{FutureExt, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::fetcher::{FetchContext, Fetcher, ProgressReporter};
use crate::{
    cache::{Tiers, UnifiedCache},
    error::CacheError,
    key::CacheKey,
    value::CacheValue,
};

#[derive(Debug, Clone)]
pub enum FetchStatus<V> {
    Loading(f32),
    Loaded(V),
    Failed(Arc<CacheError>),
}

impl<V> FetchStatus<V> {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Loading(_))
    }

    pub fn progress(&self) -> Option<f32> {
        match self {
            Self::Loading(p) => Some(*p),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeyState {
    Idle,
    Loading(f32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaiterId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The waiter left; the fetch keeps running for the others.
    Detached,
    /// The waiter was the last one, so the fetch was cancelled.
    FetchCancelled,
    /// No such waiter on a running fetch for this key.
    NotAttached,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStatsSnapshot {
    pub leaders: u64,
    pub waiters: u64,
    pub completions: u64,
    pub failures: u64,
    pub cancellations: u64,
}

#[derive(Debug, Default)]
struct CoordinatorStats {
    leaders: AtomicU64,
    waiters: AtomicU64,
    completions: AtomicU64,
    failures: AtomicU64,
    cancellations: AtomicU64,
}

impl CoordinatorStats {
    fn snapshot(&self) -> CoordinatorStatsSnapshot {
        CoordinatorStatsSnapshot {
            leaders: self.leaders.load(Ordering::Relaxed),
            waiters: self.waiters.load(Ordering::Relaxed),
            completions: self.completions.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
        }
    }
}

type StatusSender<V> = Arc<watch::Sender<FetchStatus<V>>>;

struct InFlight<V> {
    episode: u64,
    status: StatusSender<V>,
    waiters: HashSet<WaiterId>,
    cancellation: CancellationToken,
}

struct Shared<V> {
    cache: Arc<UnifiedCache<V>>,
    write_tiers: Tiers,
    in_flight: Mutex<HashMap<CacheKey, InFlight<V>>>,
    next_waiter: AtomicU64,
    next_episode: AtomicU64,
    stats: CoordinatorStats,
}

impl<V> Shared<V> {
    /// Drops the record if it still belongs to `episode`.
    fn finish(&self, key: &CacheKey, episode: u64) -> bool {
        let mut map = self.in_flight.lock();
        if map.get(key).is_some_and(|r| r.episode == episode) {
            map.remove(key);
            true
        } else {
            false
        }
    }
}

/// One fetch per key at a time, shared by every caller that asks for it.
///
/// Cloning is cheap and clones share all state. Successful results are
/// written to the cache before they are broadcast.
pub struct RequestCoordinator<V> {
    shared: Arc<Shared<V>>,
}

impl<V> Clone for RequestCoordinator<V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<V> fmt::Debug for RequestCoordinator<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.shared.stats.snapshot();
        f.debug_struct("RequestCoordinator")
            .field("in_flight", &self.shared.in_flight.lock().len())
            .field("write_tiers", &self.shared.write_tiers)
            .field("leaders", &stats.leaders)
            .field("waiters", &stats.waiters)
            .finish()
    }
}

impl<V> RequestCoordinator<V>
where
    V: CacheValue,
{
    pub fn new(cache: Arc<UnifiedCache<V>>, write_tiers: Tiers) -> Self {
        Self {
            shared: Arc::new(Shared {
                cache,
                write_tiers,
                in_flight: Mutex::new(HashMap::new()),
                next_waiter: AtomicU64::new(1),
                next_episode: AtomicU64::new(1),
                stats: CoordinatorStats::default(),
            }),
        }
    }

    pub fn cache(&self) -> &Arc<UnifiedCache<V>> {
        &self.shared.cache
    }

    /// Attaches to the running fetch for `key`, or starts one with `fetcher`.
    ///
    /// Must be called from within a tokio runtime. Dropping the returned
    /// subscription does not detach it; use [`Self::cancel`].
    pub fn request<F>(&self, key: CacheKey, fetcher: F) -> Subscription<V>
    where
        F: Fetcher<V> + 'static,
    {
        let shared = &self.shared;
        let waiter = WaiterId(shared.next_waiter.fetch_add(1, Ordering::Relaxed));

        let mut map = shared.in_flight.lock();
        if let Some(record) = map.get_mut(&key) {
            record.waiters.insert(waiter);
            let receiver = record.status.subscribe();
            let attached = record.waiters.len();
            drop(map);

            let waiters = shared.stats.waiters.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(
                "fetch coalesced: key={}, attached={}, waiters={}",
                key, attached, waiters
            );
            return Subscription {
                key,
                waiter,
                receiver,
            };
        }

        let episode = shared.next_episode.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = watch::channel(FetchStatus::Loading(0.0));
        let status = Arc::new(sender);
        let cancellation = CancellationToken::new();
        map.insert(
            key.clone(),
            InFlight {
                episode,
                status: Arc::clone(&status),
                waiters: HashSet::from([waiter]),
                cancellation: cancellation.clone(),
            },
        );
        drop(map);

        let leaders = shared.stats.leaders.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("fetch lead: key={}, episode={}, leaders={}", key, episode, leaders);

        tokio::spawn(run_episode(
            Arc::clone(shared),
            key.clone(),
            episode,
            fetcher,
            status,
            cancellation,
        ));

        Subscription {
            key,
            waiter,
            receiver,
        }
    }

    /// Detaches `waiter`. Detaching the last waiter cancels the fetch and
    /// returns the key to idle.
    pub fn cancel(&self, key: &CacheKey, waiter: WaiterId) -> CancelOutcome {
        let mut map = self.shared.in_flight.lock();
        let Some(record) = map.get_mut(key) else {
            return CancelOutcome::NotAttached;
        };
        if !record.waiters.remove(&waiter) {
            return CancelOutcome::NotAttached;
        }
        if !record.waiters.is_empty() {
            debug!(
                "fetch waiter detached: key={}, remaining={}",
                key,
                record.waiters.len()
            );
            return CancelOutcome::Detached;
        }

        let record = map.remove(key);
        drop(map);
        if let Some(record) = record {
            record.cancellation.cancel();
        }
        self.shared.stats.cancellations.fetch_add(1, Ordering::Relaxed);
        debug!("fetch cancelled: key={}", key);
        CancelOutcome::FetchCancelled
    }

    pub fn state(&self, key: &CacheKey) -> KeyState {
        let map = self.shared.in_flight.lock();
        match map.get(key) {
            Some(record) => {
                KeyState::Loading(record.status.borrow().progress().unwrap_or(1.0))
            }
            None => KeyState::Idle,
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.shared.in_flight.lock().len()
    }

    pub fn waiter_count(&self, key: &CacheKey) -> usize {
        self.shared
            .in_flight
            .lock()
            .get(key)
            .map_or(0, |r| r.waiters.len())
    }

    pub fn stats(&self) -> CoordinatorStatsSnapshot {
        self.shared.stats.snapshot()
    }
}

async fn run_episode<V, F>(
    shared: Arc<Shared<V>>,
    key: CacheKey,
    episode: u64,
    fetcher: F,
    status: StatusSender<V>,
    cancellation: CancellationToken,
) where
    V: CacheValue,
    F: Fetcher<V>,
{
    let progress_status = Arc::clone(&status);
    let reporter = ProgressReporter::new(move |progress| {
        progress_status.send_if_modified(|current| match current {
            FetchStatus::Loading(last) if progress > *last => {
                *last = progress;
                true
            }
            _ => false,
        });
    });
    let ctx = FetchContext::new(key.clone(), reporter, cancellation.clone());

    // A panicking fetcher must still clear the record and release waiters.
    let fetch = AssertUnwindSafe(fetcher.fetch(ctx)).catch_unwind();
    let outcome = tokio::select! {
        biased;
        _ = cancellation.cancelled() => Err(CacheError::Cancelled),
        result = fetch => result.unwrap_or_else(|_| {
            warn!("fetcher panicked; key={}, episode={}", key, episode);
            Err(CacheError::fetch_failed(anyhow!("fetcher panicked")))
        }),
    };

    match outcome {
        Ok(value) => {
            if let Err(err) = shared
                .cache
                .store(value.clone(), key.clone(), shared.write_tiers, SystemTime::now())
                .await
            {
                warn!("fetch write-through failed; key={}, err={}", key, err);
            }
            shared.finish(&key, episode);
            shared.stats.completions.fetch_add(1, Ordering::Relaxed);
            status.send_replace(FetchStatus::Loaded(value));
            debug!("fetch complete: key={}, episode={}", key, episode);
        }
        Err(err) if cancellation.is_cancelled() => {
            shared.finish(&key, episode);
            status.send_replace(FetchStatus::Failed(Arc::new(CacheError::Cancelled)));
            debug!("fetch stopped after cancel: key={}, err={}", key, err);
        }
        Err(err) => {
            shared.finish(&key, episode);
            shared.stats.failures.fetch_add(1, Ordering::Relaxed);
            debug!("fetch failed: key={}, err={}", key, err);
            status.send_replace(FetchStatus::Failed(Arc::new(err)));
        }
    }
}

/// A waiter's view of one fetch episode.
#[derive(Debug)]
pub struct Subscription<V> {
    key: CacheKey,
    waiter: WaiterId,
    receiver: watch::Receiver<FetchStatus<V>>,
}

impl<V> Subscription<V>
where
    V: CacheValue,
{
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn waiter(&self) -> WaiterId {
        self.waiter
    }

    /// Latest status, without waiting.
    pub fn status(&self) -> FetchStatus<V> {
        self.receiver.borrow().clone()
    }

    /// Progress updates followed by exactly one terminal status. The stream
    /// ends right after the terminal item.
    pub fn into_stream(self) -> impl Stream<Item = FetchStatus<V>> + Send + 'static {
        futures::stream::unfold(
            Some(WatchStream::new(self.receiver)),
            |state| async move {
                let mut updates = state?;
                let status = updates.next().await?;
                let rest = if status.is_terminal() { None } else { Some(updates) };
                Some((status, rest))
            },
        )
    }

    /// Resolves with the terminal state of the episode.
    pub async fn wait(self) -> Result<V, Arc<CacheError>> {
        let mut receiver = self.receiver;
        loop {
            let terminal = match &*receiver.borrow_and_update() {
                FetchStatus::Loaded(value) => Some(Ok(value.clone())),
                FetchStatus::Failed(err) => Some(Err(Arc::clone(err))),
                FetchStatus::Loading(_) => None,
            };
            if let Some(terminal) = terminal {
                return terminal;
            }
            if receiver.changed().await.is_err() {
                return Err(Arc::new(CacheError::Cancelled));
            }
        }
    }
}
