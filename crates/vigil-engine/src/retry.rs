//! Bounded retry with backoff for transient storage faults.
//!
//! Only `StoreError::Transient` is retried. A conditional update that lost
//! its race returns `Ok(false)` and therefore never reaches the retry loop:
//! that is a semantic conflict the caller must resolve by re-reading state,
//! not a fault to hammer on.

use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};

use vigil_kernel::{
    MetricDataRow, MetricRecord, MetricStats, MetricStatus, MetricUpdate, NewMetric, StoreError,
};

use super::repository::MetricRepository;

/// Retry tuning knobs. Delay for attempt `n` is
/// `min(cap, backoff_base_ms * 2^n)`.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 50,
            backoff_cap_ms: Some(2_000),
        }
    }
}

impl RetryPolicy {
    fn delay_ms(&self, attempt: u32) -> u64 {
        let exp = self
            .backoff_base_ms
            .saturating_mul(2_u64.saturating_pow(attempt));
        match self.backoff_cap_ms {
            Some(cap) => exp.min(cap),
            None => exp,
        }
    }

    /// Runs `f`, repeating on transient faults until it succeeds, fails with
    /// a non-transient error, or `max_retries` is exhausted.
    pub fn run<T>(
        &self,
        op: &str,
        mut f: impl FnMut() -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut attempt = 0;
        loop {
            match f() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    let delay = self.delay_ms(attempt);
                    tracing::warn!(
                        op,
                        attempt,
                        delay_ms = delay,
                        error = %err,
                        "transient storage fault, retrying"
                    );
                    thread::sleep(Duration::from_millis(delay));
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Repository decorator applying [RetryPolicy] to every operation.
#[derive(Clone)]
pub struct RetryingRepository<R> {
    inner: R,
    policy: RetryPolicy,
}

impl<R: MetricRepository> RetryingRepository<R> {
    pub fn new(inner: R, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl<R: MetricRepository> MetricRepository for RetryingRepository<R> {
    fn insert_metric(&self, metric: &NewMetric) -> Result<MetricRecord, StoreError> {
        self.policy
            .run("insert_metric", || self.inner.insert_metric(metric))
    }

    fn get_metric(&self, uid: &str) -> Result<MetricRecord, StoreError> {
        self.policy.run("get_metric", || self.inner.get_metric(uid))
    }

    fn compare_and_set_status(
        &self,
        uid: &str,
        expected: MetricStatus,
        next: MetricStatus,
        message: Option<&str>,
    ) -> Result<bool, StoreError> {
        self.policy.run("compare_and_set_status", || {
            self.inner.compare_and_set_status(uid, expected, next, message)
        })
    }

    fn update_for_ref_status(
        &self,
        uid: &str,
        expected: MetricStatus,
        update: &MetricUpdate,
    ) -> Result<bool, StoreError> {
        self.policy.run("update_for_ref_status", || {
            self.inner.update_for_ref_status(uid, expected, update)
        })
    }

    fn append_metric_data(
        &self,
        uid: &str,
        rows: &[(DateTime<Utc>, f64)],
    ) -> Result<Vec<i64>, StoreError> {
        self.policy.run("append_metric_data", || {
            self.inner.append_metric_data(uid, rows)
        })
    }

    fn get_metric_data(
        &self,
        uid: &str,
        from_rowid: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<MetricDataRow>, StoreError> {
        self.policy.run("get_metric_data", || {
            self.inner.get_metric_data(uid, from_rowid, limit)
        })
    }

    fn count_metric_data(&self, uid: &str) -> Result<u64, StoreError> {
        self.policy
            .run("count_metric_data", || self.inner.count_metric_data(uid))
    }

    fn metric_data_stats(&self, uid: &str) -> Result<MetricStats, StoreError> {
        self.policy
            .run("metric_data_stats", || self.inner.metric_data_stats(uid))
    }

    fn set_anomaly_score(&self, uid: &str, rowid: i64, score: f64) -> Result<(), StoreError> {
        self.policy.run("set_anomaly_score", || {
            self.inner.set_anomaly_score(uid, rowid, score)
        })
    }

    fn delete_metric(&self, uid: &str) -> Result<(), StoreError> {
        self.policy
            .run("delete_metric", || self.inner.delete_metric(uid))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff_base_ms: 1,
            backoff_cap_ms: Some(4),
        }
    }

    #[test]
    fn transient_faults_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(3).run("op", || {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(StoreError::Transient("db locked".into()))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn non_transient_faults_fail_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(3).run("op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::NotFound("m-1".into()))
        });
        assert!(matches!(result.unwrap_err(), StoreError::NotFound(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn exhausted_retries_surface_the_transient_fault() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(2).run("op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Transient("deadlock".into()))
        });
        assert!(matches!(result.unwrap_err(), StoreError::Transient(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            backoff_base_ms: 50,
            backoff_cap_ms: Some(300),
        };
        assert_eq!(policy.delay_ms(0), 50);
        assert_eq!(policy.delay_ms(1), 100);
        assert_eq!(policy.delay_ms(2), 200);
        assert_eq!(policy.delay_ms(3), 300);
        assert_eq!(policy.delay_ms(8), 300);
    }
}
