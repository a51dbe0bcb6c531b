// ── Reactive query subscriptions ──
//
// Handle types for consuming cache entry changes. A subscription counts
// toward its entry's subscriber total until it is disposed or dropped.

use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;

use crate::store::{CacheEntry, CacheInner, CacheKey};

/// Holds one unit of the entry's subscriber count.
struct Lease {
    key: CacheKey,
    cache: Weak<CacheInner>,
    released: bool,
}

impl Lease {
    fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        if let Some(cache) = self.cache.upgrade() {
            cache.release(&self.key);
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.release();
    }
}

/// A view's interest in one cache entry.
///
/// Provides point-in-time snapshot access and change notification via
/// [`changed`](Self::changed), [`settled`](Self::settled) or by converting
/// into a `Stream`. Notifications coalesce: a slow consumer sees the most
/// recent snapshot, never a torn one.
///
/// Dropping the subscription disposes it.
pub struct Subscription {
    current: CacheEntry,
    receiver: watch::Receiver<CacheEntry>,
    lease: Lease,
}

impl Subscription {
    pub(crate) fn new(
        key: CacheKey,
        receiver: watch::Receiver<CacheEntry>,
        cache: Weak<CacheInner>,
    ) -> Self {
        let current = receiver.borrow().clone();
        // A detached subscription (no cache behind it) has nothing to release.
        let released = cache.strong_count() == 0;
        Self {
            current,
            receiver,
            lease: Lease {
                key,
                cache,
                released,
            },
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.lease.key
    }

    /// Snapshot captured at creation or at the last `changed()`.
    pub fn current(&self) -> &CacheEntry {
        &self.current
    }

    /// Latest published snapshot (may have changed since `current`).
    pub fn latest(&self) -> CacheEntry {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change, returning the new snapshot.
    /// Returns `None` once the entry has been evicted or the cache shut down.
    pub async fn changed(&mut self) -> Option<CacheEntry> {
        self.receiver.changed().await.ok()?;
        let snap = self.receiver.borrow_and_update().clone();
        self.current = snap.clone();
        Some(snap)
    }

    /// Wait until the entry is `Success` or `Error` with no retry
    /// outstanding (returns immediately if it already is).
    pub async fn settled(&mut self) -> Option<CacheEntry> {
        let snap = self
            .receiver
            .wait_for(CacheEntry::is_final)
            .await
            .ok()?
            .clone();
        self.current = snap.clone();
        Some(snap)
    }

    /// Stop counting toward the entry's subscribers. Idempotent.
    pub fn dispose(&mut self) {
        self.lease.release();
    }

    pub fn is_disposed(&self) -> bool {
        self.lease.released
    }

    /// Convert into a `Stream` that yields the current snapshot first, then
    /// every subsequent change. The stream keeps the subscription alive.
    pub fn into_stream(self) -> EntryStream {
        EntryStream {
            inner: WatchStream::new(self.receiver),
            _lease: self.lease,
        }
    }

    /// Invoke `callback` with the current snapshot and after every change,
    /// on a background task. Aborting the returned handle disposes the
    /// subscription.
    pub fn listen<F>(mut self, mut callback: F) -> JoinHandle<()>
    where
        F: FnMut(&CacheEntry) + Send + 'static,
    {
        tokio::spawn(async move {
            callback(&self.current);
            while let Some(snap) = self.changed().await {
                callback(&snap);
            }
        })
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.lease.key.to_string())
            .field("status", &self.current.status)
            .field("disposed", &self.lease.released)
            .finish()
    }
}

/// `Stream` adapter backed by a `watch::Receiver`.
pub struct EntryStream {
    inner: WatchStream<CacheEntry>,
    _lease: Lease,
}

impl Stream for EntryStream {
    type Item = Arc<CacheEntry>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        // Both fields are Unpin.
        Pin::new(&mut self.inner)
            .poll_next(cx)
            .map(|item| item.map(Arc::new))
    }
}
