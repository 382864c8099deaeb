//! Contract to the model-execution subsystem.
//!
//! The subsystem is an external collaborator reached through a queue-like
//! interface; it trains and runs the anomaly models and reports model status
//! asynchronously through its own channel.
//!
//! Implementations must tolerate duplicate input rows: backlog delivery is
//! at-least-once, so after a crash the full row sequence may be replayed
//! from the start. Duplicates always arrive as an ordered prefix replay,
//! never as a reorder; batches for one model carry non-decreasing rowids.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RunnerError;
use crate::params::TrainingParams;

/// One input row streamed to a model, tagged with its resumption cursor.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ModelInputRow {
    pub rowid: i64,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Result of a cancellation request. Cancelling a model that is already
/// gone reports `NotFound`, which callers treat as success.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    NotFound,
}

pub trait ModelRunner: Send + Sync {
    /// Requests creation of a model keyed by the metric uid.
    fn create_model(&self, model_id: &str, params: &TrainingParams) -> Result<(), RunnerError>;

    /// Streams one batch of input rows to an existing model.
    fn send_input_batch(&self, model_id: &str, rows: &[ModelInputRow]) -> Result<(), RunnerError>;

    /// Requests cancellation of a model.
    fn cancel_model(&self, model_id: &str) -> Result<CancelOutcome, RunnerError>;
}
