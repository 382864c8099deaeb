//! Domain types and contracts for the vigil metric engine.
//!
//! This crate carries no I/O: metric records and lifecycle statuses,
//! the error taxonomy, training-parameter generation, and the contract
//! to the external model-execution subsystem.

pub mod error;
pub mod metric;
pub mod params;
pub mod runner;

pub use error::{EngineError, ParamValidationError, RunnerError, StoreError};
pub use metric::{
    MetricDataRow, MetricRecord, MetricStats, MetricStatus, MetricUpdate, NewMetric,
};
pub use params::{
    params_from_complete_spec, params_from_stats, CompleteModelParams, FieldKind, FieldRole,
    FieldSpec, InferenceArgs, ModelSpec, TrainingParams,
};
pub use runner::{CancelOutcome, ModelInputRow, ModelRunner};
