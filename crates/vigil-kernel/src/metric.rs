//! Metric and metric-data records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a monitored metric.
///
/// `Unmonitored` is the initial state. `Error` is a sink reachable from
/// `PendingData`, `CreatePending` and `Active`; nothing leaves `Error`
/// automatically, recovery requires external re-registration.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MetricStatus {
    Unmonitored,
    PendingData,
    CreatePending,
    Active,
    Error,
}

impl MetricStatus {
    /// Storage form of the status, as persisted in the `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricStatus::Unmonitored => "unmonitored",
            MetricStatus::PendingData => "pending_data",
            MetricStatus::CreatePending => "create_pending",
            MetricStatus::Active => "active",
            MetricStatus::Error => "error",
        }
    }

    /// Parses the storage form. Unknown text is `None`; a lifecycle state
    /// machine must not invent states from corrupt rows.
    pub fn parse(value: &str) -> Option<MetricStatus> {
        match value {
            "unmonitored" => Some(MetricStatus::Unmonitored),
            "pending_data" => Some(MetricStatus::PendingData),
            "create_pending" => Some(MetricStatus::CreatePending),
            "active" => Some(MetricStatus::Active),
            "error" => Some(MetricStatus::Error),
            _ => None,
        }
    }
}

/// A metric row. The row is the single source of truth for lifecycle state;
/// it is mutated only through conditional updates keyed on an expected prior
/// status.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricRecord {
    pub uid: String,
    pub name: String,
    pub datasource: String,
    pub status: MetricStatus,
    /// Serialized [crate::params::TrainingParams], set when activation begins.
    pub model_params: Option<String>,
    pub poll_interval_sec: Option<u32>,
    /// Rowid of the most recently appended data row, -1 before any data.
    pub last_rowid: i64,
    pub last_timestamp: Option<DateTime<Utc>>,
    /// Latest human-readable failure detail while status is `Error`.
    pub message: Option<String>,
}

/// A single metric data row. Rowids are strictly increasing per metric and
/// serve as the resumption cursor for backlog delivery. After being appended
/// a row is never mutated except to attach an anomaly score.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricDataRow {
    pub uid: String,
    pub rowid: i64,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub anomaly_score: Option<f64>,
}

/// Registration request for a new metric. The uid is generated when not
/// supplied.
#[derive(Clone, Debug)]
pub struct NewMetric {
    pub uid: Option<String>,
    pub name: String,
    pub datasource: String,
    pub poll_interval_sec: Option<u32>,
}

impl NewMetric {
    pub fn new(name: impl Into<String>, datasource: impl Into<String>) -> Self {
        Self {
            uid: None,
            name: name.into(),
            datasource: datasource.into(),
            poll_interval_sec: None,
        }
    }

    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    pub fn with_poll_interval(mut self, seconds: u32) -> Self {
        self.poll_interval_sec = Some(seconds);
        self
    }
}

/// Columns applied together with a conditional status transition.
/// `None` leaves the column untouched.
#[derive(Clone, Debug)]
pub struct MetricUpdate {
    pub status: MetricStatus,
    pub model_params: Option<String>,
    pub message: Option<String>,
}

/// Summary statistics over a metric's accumulated data.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct MetricStats {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub min_resolution: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_storage_form_round_trips() {
        for status in [
            MetricStatus::Unmonitored,
            MetricStatus::PendingData,
            MetricStatus::CreatePending,
            MetricStatus::Active,
            MetricStatus::Error,
        ] {
            assert_eq!(MetricStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn unknown_status_text_is_rejected() {
        assert_eq!(MetricStatus::parse("monitored"), None);
        assert_eq!(MetricStatus::parse(""), None);
    }

    #[test]
    fn new_metric_builder() {
        let m = NewMetric::new("cpu.user", "custom")
            .with_uid("m-1")
            .with_poll_interval(300);
        assert_eq!(m.uid.as_deref(), Some("m-1"));
        assert_eq!(m.poll_interval_sec, Some(300));
    }
}
