// ── Runtime cache configuration ──
//
// These types describe *how* the query cache behaves: freshness windows,
// retry policy and eviction grace. They never touch disk; `syncore-config`
// builds them from TOML and hands them in.

use std::time::Duration;

use rand::Rng;

/// Delay strategy between failed fetch attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// Retry immediately.
    None,
    /// Wait the same duration before every retry.
    Fixed(Duration),
    /// `initial * multiplier^(n-1)`, capped at `max`. With `jitter`, the
    /// actual delay is drawn uniformly from the upper half of that window.
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f64,
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl Backoff {
    /// Delay to wait after the `failures`-th consecutive failure (1-based).
    pub fn delay(&self, failures: u32) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Fixed(d) => *d,
            Self::Exponential {
                initial,
                max,
                multiplier,
                jitter,
            } => {
                let exponent = i32::try_from(failures.saturating_sub(1)).unwrap_or(i32::MAX);
                let factor = multiplier.max(1.0).powi(exponent);
                let scaled = initial.as_secs_f64() * factor;
                let capped = if scaled.is_finite() && scaled < max.as_secs_f64() {
                    initial.mul_f64(factor)
                } else {
                    *max
                };
                if *jitter && !capped.is_zero() {
                    let half = capped / 2;
                    let spread = rand::thread_rng().gen_range(0.0..=1.0);
                    half + half.mul_f64(spread)
                } else {
                    capped
                }
            }
        }
    }
}

/// Automatic retry policy for failed fetches.
///
/// `max_attempts` counts every fetcher invocation for one fetch cycle, so
/// `1` disables retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    /// A policy that surfaces the first failure.
    pub fn never() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::None,
        }
    }

    /// Whether another attempt is allowed after `attempts` failures.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts.max(1)
    }
}

/// Per-subscription query options.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    /// Freshness window. Zero means data is stale as soon as it lands.
    pub stale_after: Duration,
    /// Retry policy applied to each fetch cycle.
    pub retry: RetryPolicy,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            stale_after: Duration::ZERO,
            retry: RetryPolicy::default(),
        }
    }
}

impl QueryOptions {
    pub fn stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Configuration for a [`QueryCache`](crate::QueryCache) instance.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// How long an unobserved entry survives before eviction.
    pub gc_grace: Duration,
    /// Options used by [`QueryCache::options`](crate::QueryCache::options).
    pub defaults: QueryOptions,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            gc_grace: Duration::from_secs(300),
            defaults: QueryOptions::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_grows_and_caps() {
        let backoff = Backoff::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(350),
            multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(350));
        assert_eq!(backoff.delay(40), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_upper_half() {
        let backoff = Backoff::Exponential {
            initial: Duration::from_millis(400),
            max: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        };
        for _ in 0..50 {
            let d = backoff.delay(1);
            assert!(d >= Duration::from_millis(200) && d <= Duration::from_millis(400));
        }
    }

    #[test]
    fn retry_policy_counts_total_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: Backoff::None,
        };
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!RetryPolicy::never().should_retry(1));
    }
}
