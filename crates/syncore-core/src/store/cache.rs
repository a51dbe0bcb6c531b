// ── Process-wide query cache ──
//
// Entries live in a `DashMap` keyed by `CacheKey`. Each slot owns a
// `watch::Sender<CacheEntry>`: the published value *is* the canonical
// entry state, so every mutation goes through `send_modify` and views
// only ever receive whole snapshots.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::entry::{CacheEntry, FetchFailure, QueryStatus, RequestId};
use super::fetcher::Fetcher;
use super::key::CacheKey;
use super::matcher::KeyMatcher;
use super::rollback::{Layer, OptimisticStack, RollbackToken, SavedEntry, UpdateFn};
use crate::config::{CacheConfig, QueryOptions, RetryPolicy};
use crate::error::CoreError;
use crate::stream::Subscription;

/// A fetch that must be spawned once map locks are released.
struct FetchJob {
    key: CacheKey,
    id: RequestId,
    fetcher: Arc<dyn Fetcher>,
    retry: RetryPolicy,
}

struct Slot {
    state: watch::Sender<CacheEntry>,
    /// Most recently registered fetcher; used for invalidation refetches.
    fetcher: Arc<dyn Fetcher>,
    retry: RetryPolicy,
    /// An invalidation arrived while a fetch was in flight.
    refetch_queued: bool,
    /// Bumped on every subscribe and on every drop to zero subscribers.
    /// A GC timer only evicts if the epoch it captured is still current.
    gc_epoch: u64,
    /// Optimistic writes not yet superseded by fetched data.
    optimistic: Option<OptimisticStack>,
}

impl Slot {
    fn new(key: CacheKey, options: &QueryOptions, fetcher: Arc<dyn Fetcher>) -> Self {
        let (state, _) = watch::channel(CacheEntry::idle(key, options.stale_after));
        Self {
            state,
            fetcher,
            retry: options.retry.clone(),
            refetch_queued: false,
            gc_epoch: 0,
            optimistic: None,
        }
    }

    /// Move the entry to `Pending` under a fresh request id and return the
    /// job to spawn.
    fn begin_fetch(&self, key: &CacheKey) -> FetchJob {
        let id = RequestId::new();
        self.state.send_modify(|e| mark_pending(e, id));
        self.job(key, id)
    }

    fn job(&self, key: &CacheKey, id: RequestId) -> FetchJob {
        FetchJob {
            key: key.clone(),
            id,
            fetcher: Arc::clone(&self.fetcher),
            retry: self.retry.clone(),
        }
    }
}

fn mark_pending(entry: &mut CacheEntry, id: RequestId) {
    debug_assert!(entry.status.can_transition_to(QueryStatus::Pending));
    entry.status = QueryStatus::Pending;
    entry.in_flight = Some(id);
    entry.error = None;
    entry.failure_count = 0;
}

pub(crate) struct CacheInner {
    config: CacheConfig,
    slots: DashMap<CacheKey, Slot>,
    next_layer: AtomicU64,
    cancel: CancellationToken,
}

/// Keyed store of asynchronous fetch results shared by every view.
///
/// Cheaply cloneable; clones share the same entries. Create one per
/// application, hand it to consumers, and call [`shutdown`](Self::shutdown)
/// when the application stops.
///
/// Methods that schedule fetches spawn Tokio tasks and must be called from
/// within a Tokio runtime.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<CacheInner>,
}

impl QueryCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                config,
                slots: DashMap::new(),
                next_layer: AtomicU64::new(1),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Default query options from the cache configuration.
    pub fn options(&self) -> QueryOptions {
        self.inner.config.defaults.clone()
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Register interest in `key`.
    ///
    /// Schedules exactly one fetch when the entry is missing, idle, failed,
    /// or stale and not already pending; otherwise attaches to the current
    /// state (including an in-flight fetch). Returns immediately.
    pub fn subscribe<F: Fetcher>(
        &self,
        key: impl Into<CacheKey>,
        fetcher: F,
        options: QueryOptions,
    ) -> Subscription {
        self.subscribe_shared(key, Arc::new(fetcher), options)
    }

    /// [`subscribe`](Self::subscribe) with an already shared fetcher.
    pub fn subscribe_shared(
        &self,
        key: impl Into<CacheKey>,
        fetcher: Arc<dyn Fetcher>,
        options: QueryOptions,
    ) -> Subscription {
        let key = key.into();

        if self.inner.cancel.is_cancelled() {
            warn!(key = %key, "subscribe after shutdown; returning a detached subscription");
            let (_, receiver) = watch::channel(CacheEntry::idle(key.clone(), options.stale_after));
            return Subscription::new(key, receiver, std::sync::Weak::new());
        }

        let now = Instant::now();
        let mut slot = self
            .inner
            .slots
            .entry(key.clone())
            .or_insert_with(|| Slot::new(key.clone(), &options, Arc::clone(&fetcher)));

        slot.fetcher = fetcher;
        slot.retry = options.retry.clone();
        slot.gc_epoch += 1;

        let mut start = None;
        slot.state.send_modify(|e| {
            e.subscriber_count += 1;
            e.stale_after = options.stale_after;
            let needs_fetch = match e.status {
                QueryStatus::Idle | QueryStatus::Error => true,
                QueryStatus::Success => e.is_stale_at(now),
                QueryStatus::Pending => false,
            };
            if needs_fetch && e.in_flight.is_none() {
                let id = RequestId::new();
                mark_pending(e, id);
                start = Some(id);
            } else if e.in_flight.is_some() {
                debug!(key = %e.key, "attached to in-flight fetch");
            }
        });

        let receiver = slot.state.subscribe();
        let job = start.map(|id| slot.job(&key, id));
        drop(slot);

        if let Some(job) = job {
            self.inner.spawn_fetch(job);
        }

        Subscription::new(key, receiver, Arc::downgrade(&self.inner))
    }

    /// One-shot read: subscribe, wait for the entry to settle, dispose.
    pub async fn fetch<F: Fetcher>(
        &self,
        key: impl Into<CacheKey>,
        fetcher: F,
        options: QueryOptions,
    ) -> Result<Arc<Value>, CoreError> {
        self.fetch_shared(key, Arc::new(fetcher), options).await
    }

    /// [`fetch`](Self::fetch) with an already shared fetcher.
    pub async fn fetch_shared(
        &self,
        key: impl Into<CacheKey>,
        fetcher: Arc<dyn Fetcher>,
        options: QueryOptions,
    ) -> Result<Arc<Value>, CoreError> {
        let mut sub = self.subscribe_shared(key, fetcher, options);
        let entry = sub.settled().await.ok_or_else(|| {
            if self.inner.cancel.is_cancelled() {
                CoreError::ShutDown
            } else {
                CoreError::QueryEvicted {
                    key: sub.key().to_string(),
                }
            }
        })?;
        sub.dispose();

        match (entry.data, entry.error) {
            (_, Some(failure)) => Err(CoreError::fetch(failure.to_string())),
            (Some(data), None) => Ok(data),
            (None, None) => Err(CoreError::Internal(format!(
                "entry '{}' settled without data",
                entry.key
            ))),
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Current snapshot of `key`, without side effects.
    pub fn get_snapshot(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.inner
            .slots
            .get(key)
            .map(|slot| slot.state.borrow().clone())
    }

    /// Snapshots of every entry, in no particular order.
    pub fn entries(&self) -> Vec<CacheEntry> {
        self.inner
            .slots
            .iter()
            .map(|slot| slot.state.borrow().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.slots.is_empty()
    }

    // ── Invalidation ─────────────────────────────────────────────────

    /// Mark matching entries stale, keeping their data.
    ///
    /// Entries with subscribers refetch immediately (or right after the
    /// fetch already in flight); unobserved entries refetch on their next
    /// subscription. Returns the number of matching entries.
    pub fn invalidate(&self, matcher: impl Into<KeyMatcher>) -> usize {
        let matcher = matcher.into();
        let mut matched = 0;
        let mut jobs = Vec::new();

        for mut slot in self.inner.slots.iter_mut() {
            let key = slot.key().clone();
            if !matcher.matches(&key) {
                continue;
            }
            matched += 1;

            let (status, subscribed, fetching) = {
                let e = slot.state.borrow();
                (e.status, e.subscriber_count > 0, e.in_flight.is_some())
            };

            if fetching {
                // Covers failed attempts waiting out their backoff too.
                slot.refetch_queued = true;
                continue;
            }
            match status {
                QueryStatus::Idle | QueryStatus::Pending => {}
                QueryStatus::Success | QueryStatus::Error => {
                    slot.state.send_modify(|e| {
                        if e.status == QueryStatus::Success {
                            e.invalidated = true;
                        }
                    });
                    if subscribed {
                        jobs.push(slot.begin_fetch(&key));
                    }
                }
            }
        }

        debug!(matcher = ?matcher, matched, refetching = jobs.len(), "invalidated");
        for job in jobs {
            self.inner.spawn_fetch(job);
        }
        matched
    }

    // ── Optimistic writes ────────────────────────────────────────────

    /// Replace the data of every matching entry that currently holds data
    /// with `update(current)`. Entries without data are skipped.
    ///
    /// Status, freshness and in-flight fetches are left untouched. The
    /// returned token removes this write again via
    /// [`rollback`](Self::rollback); dropping it keeps the write until the
    /// next successful fetch replaces the data.
    pub fn set_query_data(
        &self,
        matcher: impl Into<KeyMatcher>,
        update: impl Fn(&Value) -> Value + Send + Sync + 'static,
    ) -> RollbackToken {
        let matcher = matcher.into();
        let update: UpdateFn = Arc::new(update);
        let layer = self.inner.next_layer.fetch_add(1, Ordering::Relaxed);
        let mut token = RollbackToken::empty();

        for mut slot in self.inner.slots.iter_mut() {
            let key = slot.key().clone();
            if !matcher.matches(&key) {
                continue;
            }
            let current = slot.state.borrow().clone();
            let Some(data) = current.data.clone() else {
                continue;
            };

            let slot = &mut *slot;
            slot.optimistic
                .get_or_insert_with(|| OptimisticStack::new(current))
                .layers
                .push(Layer {
                    id: layer,
                    update: Arc::clone(&update),
                });
            slot.state.send_modify(|e| {
                e.data = Some(Arc::new(update(&data)));
                e.updated_at = Some(Utc::now());
                e.data_version += 1;
            });
            token.saved.push(SavedEntry { key, layer });
        }

        debug!(matcher = ?matcher, layer, entries = token.len(), "optimistic write applied");
        token
    }

    /// Undo an optimistic write.
    ///
    /// The write's layer is removed and any other outstanding optimistic
    /// writes are replayed over the pre-write data; with none left the
    /// entry is restored exactly. If fetched data has landed since the
    /// write, that data wins and the entry is left alone. Returns the
    /// number of entries restored.
    pub fn rollback(&self, token: RollbackToken) -> usize {
        let mut restored = 0;
        for saved in token.saved.into_iter().rev() {
            let Some(mut slot) = self.inner.slots.get_mut(&saved.key) else {
                continue;
            };
            let slot = &mut *slot;
            let Some(stack) = slot.optimistic.as_mut() else {
                debug!(key = %saved.key, "newer data landed; keeping it over rollback");
                continue;
            };
            if !stack.remove(saved.layer) {
                debug!(key = %saved.key, "newer data landed; keeping it over rollback");
                continue;
            }

            if stack.layers.is_empty() {
                let Some(OptimisticStack { base, .. }) = slot.optimistic.take() else {
                    continue;
                };
                slot.state.send_modify(|e| {
                    e.data = base.data;
                    e.updated_at = base.updated_at;
                    e.data_version = base.data_version;
                });
            } else {
                let data = stack.replay();
                debug!(key = %saved.key, remaining = stack.layers.len(), "replaying outstanding optimistic writes");
                slot.state.send_modify(|e| {
                    e.data = data.map(Arc::new);
                    e.updated_at = Some(Utc::now());
                    e.data_version += 1;
                });
            }
            restored += 1;
        }
        restored
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Abandon in-flight fetches, cancel timers and evict every entry.
    /// Open subscriptions observe their channel closing.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        let evicted = self.inner.slots.len();
        self.inner.slots.clear();
        info!(evicted, "query cache shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

// ── Internal state transitions ───────────────────────────────────────

impl CacheInner {
    fn spawn_fetch(self: &Arc<Self>, job: FetchJob) {
        debug!(key = %job.key, request = %job.id, "fetch scheduled");
        let inner = Arc::clone(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(key = %job.key, "fetch abandoned on shutdown");
                }
                () = inner.run_fetch(&job) => {}
            }
        });
    }

    async fn run_fetch(self: &Arc<Self>, job: &FetchJob) {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match job.fetcher.fetch(&job.key).await {
                Ok(value) => {
                    self.settle(&job.key, job.id, Ok(value));
                    return;
                }
                Err(e) if job.retry.should_retry(attempts) => {
                    warn!(key = %job.key, attempt = attempts, error = %e, "fetch attempt failed; retrying");
                    let failure = FetchFailure {
                        message: e.to_string(),
                        attempts,
                    };
                    if !self.record_failure(&job.key, job.id, failure) {
                        return;
                    }
                    tokio::time::sleep(job.retry.backoff.delay(attempts)).await;
                    if !self.resume(&job.key, job.id) {
                        return;
                    }
                }
                Err(e) => {
                    warn!(key = %job.key, attempts, error = %e, "fetch failed; retries exhausted");
                    let failure = FetchFailure {
                        message: e.to_string(),
                        attempts,
                    };
                    self.settle(&job.key, job.id, Err(failure));
                    return;
                }
            }
        }
    }

    /// Publish an intermediate failure while keeping the fetch in flight,
    /// so subscribers see `Error` and new subscribers still attach to it.
    /// Returns `false` if the fetch no longer owns the entry.
    fn record_failure(&self, key: &CacheKey, id: RequestId, failure: FetchFailure) -> bool {
        let Some(slot) = self.slots.get(key) else {
            return false;
        };
        slot.state.send_if_modified(|e| {
            if e.in_flight != Some(id) {
                return false;
            }
            e.status = QueryStatus::Error;
            e.failure_count = failure.attempts;
            e.error = Some(failure);
            true
        })
    }

    /// Move a failed entry back to `Pending` before the next attempt.
    fn resume(&self, key: &CacheKey, id: RequestId) -> bool {
        let Some(slot) = self.slots.get(key) else {
            return false;
        };
        slot.state.send_if_modified(|e| {
            if e.in_flight != Some(id) {
                return false;
            }
            debug_assert!(e.status.can_transition_to(QueryStatus::Pending));
            e.status = QueryStatus::Pending;
            e.error = None;
            true
        })
    }

    /// Apply a fetch outcome to every attached subscriber at once.
    fn settle(self: &Arc<Self>, key: &CacheKey, id: RequestId, outcome: Result<Value, FetchFailure>) {
        let Some(mut slot) = self.slots.get_mut(key) else {
            debug!(key = %key, "fetch settled after eviction; result dropped");
            return;
        };

        let queued = std::mem::take(&mut slot.refetch_queued);
        let landed = outcome.is_ok();
        let mut owned = false;
        let mut subscribers = 0;
        slot.state.send_if_modified(|e| {
            if e.in_flight != Some(id) {
                return false;
            }
            owned = true;
            e.in_flight = None;
            match &outcome {
                Ok(value) => {
                    e.status = QueryStatus::Success;
                    e.data = Some(Arc::new(value.clone()));
                    e.error = None;
                    e.last_updated_at = Some(Instant::now());
                    e.updated_at = Some(Utc::now());
                    e.data_version += 1;
                    e.failure_count = 0;
                    // Data requested before a concurrent invalidation is
                    // already outdated.
                    e.invalidated = queued;
                }
                Err(failure) => {
                    e.status = QueryStatus::Error;
                    e.error = Some(failure.clone());
                    e.failure_count = failure.attempts;
                }
            }
            subscribers = e.subscriber_count;
            true
        });

        if !owned {
            slot.refetch_queued = queued;
            return;
        }
        if landed && slot.optimistic.take().is_some() {
            debug!(key = %key, "fetched data superseded optimistic writes");
        }
        debug!(key = %key, ok = outcome.is_ok(), subscribers, "fetch settled");

        if queued && subscribers > 0 {
            let job = slot.begin_fetch(key);
            drop(slot);
            self.spawn_fetch(job);
        } else if subscribers == 0 {
            let epoch = slot.gc_epoch;
            drop(slot);
            self.schedule_gc(key.clone(), epoch);
        }
    }

    /// Drop one subscriber. Called by [`Subscription::dispose`].
    pub(crate) fn release(self: &Arc<Self>, key: &CacheKey) {
        let Some(mut slot) = self.slots.get_mut(key) else {
            return;
        };
        let mut remaining = 0;
        slot.state.send_modify(|e| {
            e.subscriber_count = e.subscriber_count.saturating_sub(1);
            remaining = e.subscriber_count;
        });
        if remaining == 0 {
            slot.gc_epoch += 1;
            let epoch = slot.gc_epoch;
            drop(slot);
            self.schedule_gc(key.clone(), epoch);
        }
    }

    fn schedule_gc(self: &Arc<Self>, key: CacheKey, epoch: u64) {
        if self.cancel.is_cancelled() {
            return;
        }
        // Subscriptions may be dropped outside a runtime (e.g. during
        // teardown); the entry then simply stays until shutdown.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let inner = Arc::clone(self);
        let grace = self.config.gc_grace;
        let cancel = self.cancel.clone();
        handle.spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(grace) => inner.collect(&key, epoch),
            }
        });
    }

    fn collect(&self, key: &CacheKey, epoch: u64) {
        let evicted = self.slots.remove_if(key, |_, slot| {
            let e = slot.state.borrow();
            slot.gc_epoch == epoch && e.subscriber_count == 0 && e.in_flight.is_none()
        });
        if evicted.is_some() {
            debug!(key = %key, "evicted unobserved entry");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::sync::Semaphore;

    use super::*;
    use crate::config::Backoff;

    fn options(stale_after: Duration) -> QueryOptions {
        QueryOptions {
            stale_after,
            retry: RetryPolicy::never(),
        }
    }

    fn cache(gc_grace: Duration) -> QueryCache {
        QueryCache::new(CacheConfig {
            gc_grace,
            defaults: options(Duration::from_secs(60)),
        })
    }

    /// Fetcher returning `value`, counting invocations.
    fn counting(value: Value) -> (impl Fetcher, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let fetcher = move |_key: CacheKey| {
            counter.fetch_add(1, Ordering::SeqCst);
            let value = value.clone();
            async move { Ok::<_, CoreError>(value) }
        };
        (fetcher, calls)
    }

    #[tokio::test]
    async fn concurrent_subscribers_share_one_fetch() {
        let qc = cache(Duration::from_secs(300));
        let gate = Arc::new(Semaphore::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let fetcher: Arc<dyn Fetcher> = {
            let (gate, calls, active, peak) =
                (gate.clone(), calls.clone(), active.clone(), peak.clone());
            Arc::new(move |_key: CacheKey| {
                let (gate, calls, active, peak) =
                    (gate.clone(), calls.clone(), active.clone(), peak.clone());
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    gate.acquire().await.unwrap().forget();
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, CoreError>(json!([{"id": 1, "code": "USD"}]))
                }
            })
        };

        let key = CacheKey::named("devises");
        let mut subs: Vec<Subscription> = (0..8)
            .map(|_| qc.subscribe_shared(key.clone(), Arc::clone(&fetcher), qc.options()))
            .collect();

        tokio::task::yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(qc.get_snapshot(&key).unwrap().subscriber_count, 8);
        assert!(qc.get_snapshot(&key).unwrap().in_flight.is_some());

        gate.add_permits(1);
        for sub in &mut subs {
            let entry = sub.settled().await.unwrap();
            assert_eq!(entry.status, QueryStatus::Success);
            assert_eq!(*entry.data.unwrap(), json!([{"id": 1, "code": "USD"}]));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fresh_entry_is_served_without_refetch() {
        let qc = cache(Duration::from_secs(300));
        let (fetcher, calls) = counting(json!(1));
        let fetcher: Arc<dyn Fetcher> = Arc::new(fetcher);

        let mut first = qc.subscribe_shared("pays", Arc::clone(&fetcher), qc.options());
        first.settled().await.unwrap();

        let second = qc.subscribe_shared("pays", fetcher, qc.options());
        assert_eq!(second.current().status, QueryStatus::Success);
        assert_eq!(second.current().subscriber_count, 2);
        tokio::task::yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_stale_window_refetches_on_every_subscription() {
        let qc = cache(Duration::from_secs(300));
        let (fetcher, calls) = counting(json!("x"));
        let fetcher: Arc<dyn Fetcher> = Arc::new(fetcher);

        let mut a = qc.subscribe_shared("q", Arc::clone(&fetcher), options(Duration::ZERO));
        a.settled().await.unwrap();
        let mut b = qc.subscribe_shared("q", fetcher, options(Duration::ZERO));
        assert_eq!(b.current().status, QueryStatus::Pending);
        b.settled().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidating_unobserved_entry_keeps_data_and_defers_fetch() {
        let qc = cache(Duration::from_secs(300));
        let (fetcher, calls) = counting(json!(["EUR"]));
        let fetcher: Arc<dyn Fetcher> = Arc::new(fetcher);
        let key = CacheKey::named("devises");

        let mut sub = qc.subscribe_shared(key.clone(), Arc::clone(&fetcher), qc.options());
        sub.settled().await.unwrap();
        drop(sub);

        assert_eq!(qc.invalidate(key.clone()), 1);
        tokio::task::yield_now().await;

        let entry = qc.get_snapshot(&key).unwrap();
        assert_eq!(entry.status, QueryStatus::Success);
        assert!(entry.invalidated);
        assert!(entry.is_stale());
        assert_eq!(*entry.data.unwrap(), json!(["EUR"]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let mut again = qc.subscribe_shared(key.clone(), fetcher, qc.options());
        assert_eq!(again.current().status, QueryStatus::Pending);
        let settled = again.settled().await.unwrap();
        assert!(!settled.invalidated);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidating_observed_entry_refetches_immediately() {
        let qc = cache(Duration::from_secs(300));
        let (fetcher, calls) = counting(json!(1));
        let key = CacheKey::named("devises");

        let mut sub = qc.subscribe(key.clone(), fetcher, qc.options());
        sub.settled().await.unwrap();

        qc.invalidate(KeyMatcher::query("devises"));
        let entry = qc.get_snapshot(&key).unwrap();
        assert_eq!(entry.status, QueryStatus::Pending);
        assert_eq!(*entry.data.unwrap(), json!(1));

        sub.settled().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidation_during_fetch_queues_one_refetch() {
        let qc = cache(Duration::from_secs(300));
        let gate = Arc::new(Semaphore::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = {
            let (gate, calls) = (gate.clone(), calls.clone());
            move |_key: CacheKey| {
                let (gate, calls) = (gate.clone(), calls.clone());
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    gate.acquire().await.unwrap().forget();
                    Ok::<_, CoreError>(json!(n))
                }
            }
        };
        let key = CacheKey::named("stock");
        let mut sub = qc.subscribe(key.clone(), fetcher, qc.options());
        tokio::task::yield_now().await;

        qc.invalidate(key.clone());
        qc.invalidate(key.clone());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        gate.add_permits(2);
        // First completion immediately starts the queued refetch.
        loop {
            let entry = sub.changed().await.unwrap();
            if entry.status == QueryStatus::Success && entry.data.as_deref() == Some(&json!(2)) {
                break;
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidating_missing_key_is_a_noop() {
        let qc = cache(Duration::from_secs(300));
        assert_eq!(qc.invalidate(CacheKey::named("nope")), 0);
        assert!(qc.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failures_retry_with_backoff_then_succeed() {
        let qc = cache(Duration::from_secs(300));
        let gate = Arc::new(Semaphore::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher: Arc<dyn Fetcher> = {
            let (gate, calls) = (gate.clone(), calls.clone());
            Arc::new(move |_key: CacheKey| {
                let (gate, calls) = (gate.clone(), calls.clone());
                async move {
                    gate.acquire().await.unwrap().forget();
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(CoreError::fetch("gateway timeout"))
                    } else {
                        Ok(json!("ok"))
                    }
                }
            })
        };
        let opts = QueryOptions {
            stale_after: Duration::from_secs(60),
            retry: RetryPolicy {
                max_attempts: 3,
                backoff: Backoff::Fixed(Duration::from_secs(1)),
            },
        };
        let key = CacheKey::named("flaky");

        let mut sub = qc.subscribe_shared(key.clone(), Arc::clone(&fetcher), opts.clone());
        assert_eq!(sub.current().status, QueryStatus::Pending);

        // pending -> error (retry scheduled) -> pending -> error -> pending -> success
        gate.add_permits(1);
        let failed = sub.changed().await.unwrap();
        assert_eq!(failed.status, QueryStatus::Error);
        assert!(failed.is_retrying());
        assert_eq!(failed.failure_count, 1);
        assert!(failed.error.unwrap().message.contains("gateway timeout"));

        // A subscriber arriving mid-retry attaches instead of fetching again.
        let attached = qc.subscribe_shared(key.clone(), Arc::clone(&fetcher), opts);
        assert!(attached.current().is_retrying());
        let seen = sub.changed().await.unwrap();
        assert!(seen.is_retrying());
        assert_eq!(seen.subscriber_count, 2);

        let retrying = sub.changed().await.unwrap();
        assert_eq!(retrying.status, QueryStatus::Pending);
        assert!(retrying.error.is_none());
        assert_eq!(retrying.failure_count, 1);

        gate.add_permits(1);
        let failed = sub.changed().await.unwrap();
        assert_eq!(failed.status, QueryStatus::Error);
        assert_eq!(failed.failure_count, 2);
        assert_eq!(sub.changed().await.unwrap().status, QueryStatus::Pending);

        gate.add_permits(1);
        let entry = sub.settled().await.unwrap();
        assert_eq!(entry.status, QueryStatus::Success);
        assert!(entry.in_flight.is_none());
        assert_eq!(entry.failure_count, 0);
        assert_eq!(*entry.data.unwrap(), json!("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn settled_skips_intermediate_failures() {
        let qc = cache(Duration::from_secs(300));
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = {
            let calls = calls.clone();
            move |_key: CacheKey| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 2 {
                        Err(CoreError::fetch("reset by peer"))
                    } else {
                        Ok(json!(n))
                    }
                }
            }
        };
        let opts = QueryOptions {
            stale_after: Duration::from_secs(60),
            retry: RetryPolicy {
                max_attempts: 2,
                backoff: Backoff::Fixed(Duration::from_millis(250)),
            },
        };

        let mut sub = qc.subscribe("flaky", fetcher, opts);
        let entry = sub.settled().await.unwrap();
        assert_eq!(entry.status, QueryStatus::Success);
        assert_eq!(*entry.data.unwrap(), json!(2));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_error_until_next_subscription() {
        let qc = cache(Duration::from_secs(300));
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher: Arc<dyn Fetcher> = {
            let calls = calls.clone();
            Arc::new(move |_key: CacheKey| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<Value, _>(CoreError::fetch("connection refused")) }
            })
        };
        let opts = QueryOptions {
            stale_after: Duration::from_secs(60),
            retry: RetryPolicy {
                max_attempts: 2,
                backoff: Backoff::Fixed(Duration::from_millis(500)),
            },
        };

        let mut a = qc.subscribe_shared("down", Arc::clone(&fetcher), opts.clone());
        let mut b = qc.subscribe_shared("down", Arc::clone(&fetcher), opts.clone());
        let ea = a.settled().await.unwrap();
        let eb = b.settled().await.unwrap();
        assert_eq!(ea, eb);
        assert_eq!(ea.status, QueryStatus::Error);
        let failure = ea.error.unwrap();
        assert_eq!(failure.attempts, 2);
        assert!(failure.message.contains("connection refused"));
        assert!(ea.data.is_none());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let mut c = qc.subscribe_shared("down", fetcher, opts);
        assert_eq!(c.current().status, QueryStatus::Pending);
        c.settled().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn remount_within_grace_reuses_entry_then_evicts() {
        let qc = cache(Duration::from_secs(5));
        let (fetcher, calls) = counting(json!({"total": 3}));
        let fetcher: Arc<dyn Fetcher> = Arc::new(fetcher);
        let key = CacheKey::new("factures", json!({"page": 1}));
        let opts = options(Duration::from_secs(60));

        let mut sub = qc.subscribe_shared(key.clone(), Arc::clone(&fetcher), opts.clone());
        sub.settled().await.unwrap();
        drop(sub);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let remount = qc.subscribe_shared(key.clone(), Arc::clone(&fetcher), opts.clone());
        assert_eq!(remount.current().status, QueryStatus::Success);
        tokio::task::yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // The timer armed by the first drop must not evict the remounted entry.
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(qc.get_snapshot(&key).is_some());

        drop(remount);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(qc.get_snapshot(&key).is_none());

        let mut fresh = qc.subscribe_shared(key.clone(), fetcher, opts);
        assert_eq!(fresh.current().status, QueryStatus::Pending);
        assert!(fresh.current().data.is_none());
        fresh.settled().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn last_dispose_during_fetch_still_caches_result() {
        let qc = cache(Duration::from_secs(5));
        let gate = Arc::new(Semaphore::new(0));
        let fetcher = {
            let gate = gate.clone();
            move |_key: CacheKey| {
                let gate = gate.clone();
                async move {
                    gate.acquire().await.unwrap().forget();
                    Ok::<_, CoreError>(json!("late"))
                }
            }
        };
        let key = CacheKey::named("slow");
        let sub = qc.subscribe(key.clone(), fetcher, qc.options());
        tokio::task::yield_now().await;
        drop(sub);

        // Grace elapses while the fetch is still pending: the entry stays.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(qc.get_snapshot(&key).unwrap().is_pending());

        gate.add_permits(1);
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        let entry = qc.get_snapshot(&key).unwrap();
        assert_eq!(entry.status, QueryStatus::Success);
        assert_eq!(entry.subscriber_count, 0);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(qc.get_snapshot(&key).is_none());
    }

    #[tokio::test]
    async fn double_dispose_never_goes_negative() {
        let qc = cache(Duration::from_secs(300));
        let (fetcher, _) = counting(json!(null));
        let fetcher: Arc<dyn Fetcher> = Arc::new(fetcher);
        let key = CacheKey::named("q");

        let mut a = qc.subscribe_shared(key.clone(), Arc::clone(&fetcher), qc.options());
        let _b = qc.subscribe_shared(key.clone(), fetcher, qc.options());
        a.dispose();
        a.dispose();
        drop(a);
        assert_eq!(qc.get_snapshot(&key).unwrap().subscriber_count, 1);
    }

    #[tokio::test]
    async fn optimistic_write_rolls_back_exactly() {
        let qc = cache(Duration::from_secs(300));
        let (fetcher, _) = counting(json!([{"id": 1, "code": "USD"}]));
        let key = CacheKey::named("devises");
        let mut sub = qc.subscribe(key.clone(), fetcher, qc.options());
        sub.settled().await.unwrap();

        let before = qc.get_snapshot(&key).unwrap();
        let token = qc.set_query_data(key.clone(), |current| {
            let mut list = current.as_array().cloned().unwrap_or_default();
            list.push(json!({"id": 2, "code": "EUR"}));
            Value::Array(list)
        });
        assert_eq!(token.len(), 1);
        let during = qc.get_snapshot(&key).unwrap();
        assert_eq!(during.data.as_deref().unwrap().as_array().unwrap().len(), 2);

        assert_eq!(qc.rollback(token), 1);
        assert_eq!(qc.get_snapshot(&key).unwrap(), before);
    }

    #[tokio::test]
    async fn rollback_yields_to_newer_server_data() {
        let qc = cache(Duration::from_secs(300));
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = {
            let calls = calls.clone();
            move |_key: CacheKey| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Ok::<_, CoreError>(json!(n)) }
            }
        };
        let key = CacheKey::named("compteur");
        let mut sub = qc.subscribe(key.clone(), fetcher, qc.options());
        sub.settled().await.unwrap();

        let token = qc.set_query_data(key.clone(), |_| json!(100));
        qc.invalidate(key.clone());
        sub.settled().await.unwrap();
        assert_eq!(qc.rollback(token), 0);
        assert_eq!(*qc.get_snapshot(&key).unwrap().data.unwrap(), json!(2));
    }

    #[tokio::test]
    async fn rolling_back_writes_out_of_order_restores_base() {
        let qc = cache(Duration::from_secs(300));
        let (fetcher, _) = counting(json!(["USD"]));
        let key = CacheKey::named("devises");
        let mut sub = qc.subscribe(key.clone(), fetcher, qc.options());
        sub.settled().await.unwrap();
        let before = qc.get_snapshot(&key).unwrap();

        let append = |code: &'static str| {
            move |rows: &Value| {
                let mut rows = rows.as_array().cloned().unwrap_or_default();
                rows.push(json!(code));
                Value::Array(rows)
            }
        };
        let eur = qc.set_query_data(key.clone(), append("EUR"));
        let xof = qc.set_query_data(key.clone(), append("XOF"));
        assert_eq!(
            *qc.get_snapshot(&key).unwrap().data.unwrap(),
            json!(["USD", "EUR", "XOF"])
        );

        // The older write is removed from under the newer one.
        assert_eq!(qc.rollback(eur), 1);
        assert_eq!(*qc.get_snapshot(&key).unwrap().data.unwrap(), json!(["USD", "XOF"]));

        assert_eq!(qc.rollback(xof), 1);
        assert_eq!(qc.get_snapshot(&key).unwrap(), before);
    }

    #[tokio::test]
    async fn optimistic_write_skips_entries_without_data() {
        let qc = cache(Duration::from_secs(300));
        let token = qc.set_query_data(KeyMatcher::All, |_| json!(1));
        assert!(token.is_empty());
    }

    #[tokio::test]
    async fn shutdown_evicts_and_closes_subscriptions() {
        let qc = cache(Duration::from_secs(300));
        let (fetcher, _) = counting(json!(1));
        let mut sub = qc.subscribe("q", fetcher, qc.options());
        sub.settled().await.unwrap();

        qc.shutdown();
        assert!(qc.is_empty());
        assert!(qc.is_shut_down());
        assert!(sub.changed().await.is_none());

        let (fetcher, calls) = counting(json!(2));
        let detached = qc.subscribe("q", fetcher, qc.options());
        assert_eq!(detached.current().status, QueryStatus::Idle);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn one_shot_fetch_reports_errors() {
        let qc = cache(Duration::from_secs(300));
        let ok = qc
            .fetch("q", |_k: CacheKey| async { Ok::<_, CoreError>(json!("v")) }, qc.options())
            .await
            .unwrap();
        assert_eq!(*ok, json!("v"));

        let err = qc
            .fetch(
                "bad",
                |_k: CacheKey| async { Err::<Value, _>(CoreError::fetch("boom")) },
                qc.options(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Fetch { .. }));
    }
}
