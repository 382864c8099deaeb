//! Error taxonomy.
//!
//! Conditional-update races are deliberately absent here: losing a race is
//! an expected outcome and is reported through the lifecycle outcome enums,
//! not raised as an error. Errors cover faults: missing rows, storage
//! trouble, malformed parameter bundles, caller-contract violations, and
//! model-runner failures.

/// Storage-layer error.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("metric not found: {0}")]
    NotFound(String),
    /// Connectivity-class fault (busy, locked, lost connection). Eligible
    /// for bounded retry; every other variant is not.
    #[error("transient storage error: {0}")]
    Transient(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Validation failure for a complete model-parameter bundle. Surfaced
/// verbatim to the caller with the offending field named, never defaulted.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParamValidationError {
    #[error("specify either modelParams or completeModelParams but not both")]
    MutuallyExclusiveFields,
    #[error("{0} must be specified in completeModelParams")]
    MissingField(&'static str),
    #[error("inference args' predictedField must match completeModelParams' valueFieldName")]
    InconsistentFieldName,
}

/// Failure reported by the model-execution subsystem.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("model runner rejected request: {0}")]
    Rejected(String),
    #[error("model runner unavailable: {0}")]
    Unavailable(String),
}

/// Engine-level error, aggregating the per-concern taxonomies.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Params(#[from] ParamValidationError),
    #[error("model runner failure: {0}")]
    Runner(#[from] RunnerError),
    /// Caller-contract violation. Fatal to the call and never retried.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}
