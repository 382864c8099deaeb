//! Storage contract for metric rows and metric data.
//!
//! Implementations are responsible for making conditional-write outcomes
//! explicit:
//! - `compare_and_set_status` and `update_for_ref_status` must apply the
//!   write only if the row's status still equals `expected` at commit time,
//!   return `Ok(false)` on a status mismatch, and report a missing row as
//!   `StoreError::NotFound` rather than folding it into the mismatch case.
//! - `append_metric_data` must assign strictly increasing per-metric rowids
//!   and advance the metric's `last_rowid`/`last_timestamp` in the same
//!   atomic step.
//! - `get_metric_data` must return rows ordered by rowid ascending; rowid is
//!   the authoritative resumption cursor, wall-clock timestamps are not.

use chrono::{DateTime, Utc};

use vigil_kernel::{
    MetricDataRow, MetricRecord, MetricStats, MetricStatus, MetricUpdate, NewMetric, StoreError,
};

pub trait MetricRepository: Send + Sync {
    /// Registers a metric in the `Unmonitored` state.
    fn insert_metric(&self, metric: &NewMetric) -> Result<MetricRecord, StoreError>;

    /// Point read by uid.
    fn get_metric(&self, uid: &str) -> Result<MetricRecord, StoreError>;

    /// Conditionally transitions the status, optionally replacing the
    /// message. `Ok(true)` means the write was applied.
    fn compare_and_set_status(
        &self,
        uid: &str,
        expected: MetricStatus,
        next: MetricStatus,
        message: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Conditionally applies a status transition together with the other
    /// columns in `update`.
    fn update_for_ref_status(
        &self,
        uid: &str,
        expected: MetricStatus,
        update: &MetricUpdate,
    ) -> Result<bool, StoreError>;

    /// Appends data rows and returns the assigned rowids.
    fn append_metric_data(
        &self,
        uid: &str,
        rows: &[(DateTime<Utc>, f64)],
    ) -> Result<Vec<i64>, StoreError>;

    /// Range read ordered by rowid ascending. `from_rowid` is inclusive;
    /// `limit` of `None` reads to the end.
    fn get_metric_data(
        &self,
        uid: &str,
        from_rowid: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<MetricDataRow>, StoreError>;

    fn count_metric_data(&self, uid: &str) -> Result<u64, StoreError>;

    /// Min/max over the stored values; both bounds are `None` while the
    /// metric has no data.
    fn metric_data_stats(&self, uid: &str) -> Result<MetricStats, StoreError>;

    /// Attaches an anomaly score to a previously appended row. The only
    /// mutation a data row accepts after being written.
    fn set_anomaly_score(&self, uid: &str, rowid: i64, score: f64) -> Result<(), StoreError>;

    /// Removes the metric row and its data.
    fn delete_metric(&self, uid: &str) -> Result<(), StoreError>;
}
