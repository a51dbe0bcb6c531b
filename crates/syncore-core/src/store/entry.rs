// ── Cache entry snapshots ──

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::time::Instant;
use uuid::Uuid;

use super::key::CacheKey;

/// Lifecycle status of a cache entry.
///
/// Legal transitions: `Idle -> Pending`, `Pending -> Success | Error`,
/// `Success -> Pending` (refetch) and `Error -> Pending` (retry). A failed
/// attempt publishes `Error` even when another attempt will follow; the
/// fetch cycle is over only once `in_flight` is cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum QueryStatus {
    Idle,
    Pending,
    Success,
    Error,
}

impl QueryStatus {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: QueryStatus) -> bool {
        matches!(
            (self, next),
            (Self::Idle | Self::Success | Self::Error, Self::Pending)
                | (Self::Pending, Self::Success | Self::Error)
        )
    }

    /// `Success` or `Error`.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

/// Token identifying one fetch cycle. At most one is set per entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fetch failure surfaced on an entry after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (after {attempts} attempt(s))")]
pub struct FetchFailure {
    pub message: String,
    pub attempts: u32,
}

/// Point-in-time view of one cache entry.
///
/// Snapshots are published as a whole, so a view never observes a
/// partially applied update.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub status: QueryStatus,
    /// Last successfully fetched (or optimistically written) value. Kept
    /// while a refetch is pending so views can keep rendering it.
    pub data: Option<Arc<Value>>,
    /// Present iff `status == Error`. While `in_flight` is still set the
    /// failure is intermediate and a retry is scheduled.
    pub error: Option<FetchFailure>,
    pub last_updated_at: Option<Instant>,
    /// Wall-clock time of the last data change, for display.
    pub updated_at: Option<DateTime<Utc>>,
    pub stale_after: Duration,
    /// Set by invalidation; cleared when fresh data lands.
    pub invalidated: bool,
    pub subscriber_count: usize,
    pub in_flight: Option<RequestId>,
    /// Failed attempts in the current fetch cycle.
    pub failure_count: u32,
    /// Bumped on every data change.
    pub data_version: u64,
}

impl CacheEntry {
    pub(crate) fn idle(key: CacheKey, stale_after: Duration) -> Self {
        Self {
            key,
            status: QueryStatus::Idle,
            data: None,
            error: None,
            last_updated_at: None,
            updated_at: None,
            stale_after,
            invalidated: false,
            subscriber_count: 0,
            in_flight: None,
            failure_count: 0,
            data_version: 0,
        }
    }

    /// Whether the entry's data is past its freshness window at `now`.
    ///
    /// Only successful entries can be stale; idle, pending and failed
    /// entries are governed by their status instead.
    pub fn is_stale_at(&self, now: Instant) -> bool {
        if self.status != QueryStatus::Success {
            return false;
        }
        if self.invalidated || self.stale_after.is_zero() {
            return true;
        }
        self.last_updated_at
            .is_none_or(|at| now.saturating_duration_since(at) > self.stale_after)
    }

    pub fn is_stale(&self) -> bool {
        self.is_stale_at(Instant::now())
    }

    pub fn is_pending(&self) -> bool {
        self.status == QueryStatus::Pending
    }

    /// Settled with no retry outstanding: the fetch cycle has ended.
    pub fn is_final(&self) -> bool {
        self.status.is_settled() && self.in_flight.is_none()
    }

    /// Failed attempt with a retry still scheduled.
    pub fn is_retrying(&self) -> bool {
        self.status == QueryStatus::Error && self.in_flight.is_some()
    }

    /// Deserialize the cached data into `T`.
    pub fn data_as<T: serde::de::DeserializeOwned>(&self) -> Option<Result<T, serde_json::Error>> {
        self.data
            .as_deref()
            .map(|value| T::deserialize(value))
    }
}
