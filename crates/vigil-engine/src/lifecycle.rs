//! Metric lifecycle control: state transitions and model activation.
//!
//! Every status mutation is conditioned on an expected prior value fetched
//! moments earlier; the row store evaluates the condition at commit time.
//! That is the only protection against concurrent workers promoting the same
//! metric, so each step here tolerates "someone else already did this" and
//! reports it as an idempotent no-op or an explicit conflict, never a crash.

use vigil_kernel::{
    params_from_stats, CancelOutcome, EngineError, MetricRecord, MetricStatus, MetricUpdate,
    ModelRunner, TrainingParams,
};

use super::config::EngineConfig;
use super::dispatcher;
use super::repository::MetricRepository;

/// Result of a model activation attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivationOutcome {
    /// This call created the model.
    Started,
    /// A model already exists (status was `CreatePending` or `Active`);
    /// duplicate triggers from concurrent callers land here.
    AlreadyActive,
    /// Another actor mutated the metric between our read and the
    /// conditional write. Nothing was changed; re-read and decide afresh.
    Conflict { observed: MetricStatus },
}

impl ActivationOutcome {
    pub fn started(&self) -> bool {
        matches!(self, ActivationOutcome::Started)
    }
}

/// Result of `start_monitoring`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitoringOutcome {
    /// Enough statistics were available; the model was started synchronously.
    ModelStarted,
    /// Not enough statistics yet; the metric waits in `PendingData`.
    PendingData,
    AlreadyActive,
    Conflict { observed: MetricStatus },
}

impl MonitoringOutcome {
    pub fn model_started(&self) -> bool {
        matches!(self, MonitoringOutcome::ModelStarted)
    }
}

/// Orchestrates metric state transitions and model activation.
///
/// The conditional-update guard only protects against other processes. Do
/// not overlap two status-mutating calls for the same metric on one
/// controller without serializing them; that is a logic bug this type cannot
/// detect.
pub struct LifecycleController<R, M> {
    repository: R,
    runner: M,
    config: EngineConfig,
}

impl<R: MetricRepository, M: ModelRunner> LifecycleController<R, M> {
    pub fn new(repository: R, runner: M, config: EngineConfig) -> Self {
        Self {
            repository,
            runner,
            config,
        }
    }

    /// Starts monitoring an `Unmonitored` metric.
    ///
    /// With training parameters the model is started immediately; without,
    /// the metric is parked in `PendingData` until enough data accumulates.
    /// Calling this for a metric in any other state is a caller-contract
    /// violation.
    pub fn start_monitoring(
        &self,
        metric_id: &str,
        params: Option<&TrainingParams>,
    ) -> Result<MonitoringOutcome, EngineError> {
        let metric = self.repository.get_metric(metric_id)?;
        if metric.status != MetricStatus::Unmonitored {
            return Err(EngineError::InvariantViolation(format!(
                "start_monitoring: metric {} is already monitored; status={:?}",
                metric_id, metric.status
            )));
        }

        match params {
            Some(params) => {
                let outcome = self.activate(&metric, params)?;
                if outcome.started() {
                    self.send_backlog(metric_id)?;
                }
                Ok(match outcome {
                    ActivationOutcome::Started => MonitoringOutcome::ModelStarted,
                    ActivationOutcome::AlreadyActive => MonitoringOutcome::AlreadyActive,
                    ActivationOutcome::Conflict { observed } => {
                        MonitoringOutcome::Conflict { observed }
                    }
                })
            }
            None => {
                self.repository.compare_and_set_status(
                    metric_id,
                    MetricStatus::Unmonitored,
                    MetricStatus::PendingData,
                    None,
                )?;
                // The refreshed row decides; the metric row is the single
                // source of truth, not our write's fate.
                let observed = self.repository.get_metric(metric_id)?.status;
                if observed == MetricStatus::PendingData {
                    tracing::info!(metric = %metric_id, "metric deferred to pending-data state");
                    Ok(MonitoringOutcome::PendingData)
                } else {
                    tracing::warn!(
                        metric = %metric_id,
                        ?observed,
                        "metric status changed while deferring model creation"
                    );
                    Ok(MonitoringOutcome::Conflict { observed })
                }
            }
        }
    }

    /// Starts the model and catches it up on buffered history.
    ///
    /// Activation and backlog delivery are separate steps so that retries of
    /// this operation stay idempotent: a duplicate trigger observes
    /// `AlreadyActive` instead of failing, and re-sent backlog is the
    /// model runner's documented at-least-once contract.
    pub fn start_model(
        &self,
        metric_id: &str,
        params: &TrainingParams,
    ) -> Result<ActivationOutcome, EngineError> {
        let metric = self.repository.get_metric(metric_id)?;
        let outcome = self.activate(&metric, params)?;
        if outcome.started() {
            self.send_backlog(metric_id)?;
        }
        Ok(outcome)
    }

    /// Promotes a `PendingData` metric once enough rows have accumulated to
    /// derive training parameters from its value range. Returns `None` while
    /// the metric stays pending.
    pub fn evaluate_pending_metric(
        &self,
        metric_id: &str,
    ) -> Result<Option<ActivationOutcome>, EngineError> {
        let metric = self.repository.get_metric(metric_id)?;
        if metric.status != MetricStatus::PendingData {
            return Ok(None);
        }

        let rows = self.repository.count_metric_data(metric_id)?;
        if rows < self.config.model_creation_record_threshold {
            tracing::debug!(
                metric = %metric_id,
                rows,
                threshold = self.config.model_creation_record_threshold,
                "not enough data to train yet"
            );
            return Ok(None);
        }

        let stats = self.repository.metric_data_stats(metric_id)?;
        let params = match params_from_stats(&stats) {
            Some(params) => params,
            None => return Ok(None),
        };

        let outcome = self.activate(&metric, &params)?;
        if outcome.started() {
            self.send_backlog(metric_id)?;
        }
        Ok(Some(outcome))
    }

    /// Streams the metric's buffered rows to its model. See
    /// [dispatcher::send_backlog].
    pub fn send_backlog(&self, metric_id: &str) -> Result<usize, EngineError> {
        dispatcher::send_backlog(
            &self.repository,
            &self.runner,
            metric_id,
            self.config.chunk_size,
        )
    }

    /// Records the model-execution side's asynchronous "model is live"
    /// report. Returns whether the transition was applied.
    pub fn mark_model_active(&self, metric_id: &str) -> Result<bool, EngineError> {
        let applied = self.repository.compare_and_set_status(
            metric_id,
            MetricStatus::CreatePending,
            MetricStatus::Active,
            None,
        )?;
        if applied {
            tracing::info!(metric = %metric_id, "model is active");
        }
        Ok(applied)
    }

    /// Moves a monitored metric into the `Error` sink with the failure
    /// detail recorded. No-op for metrics that are unmonitored or already
    /// in error.
    pub fn mark_model_error(&self, metric_id: &str, message: &str) -> Result<bool, EngineError> {
        let metric = self.repository.get_metric(metric_id)?;
        match metric.status {
            MetricStatus::PendingData | MetricStatus::CreatePending | MetricStatus::Active => {
                let applied = self.repository.compare_and_set_status(
                    metric_id,
                    metric.status,
                    MetricStatus::Error,
                    Some(message),
                )?;
                if applied {
                    tracing::error!(metric = %metric_id, detail = message, "metric moved to error state");
                }
                Ok(applied)
            }
            MetricStatus::Unmonitored | MetricStatus::Error => Ok(false),
        }
    }

    /// Stops monitoring: cancels the model (a model that is already gone
    /// counts as cancelled) and removes the metric row with its data.
    pub fn unmonitor_metric(&self, metric_id: &str) -> Result<(), EngineError> {
        let metric = self.repository.get_metric(metric_id)?;
        match self.runner.cancel_model(metric_id)? {
            CancelOutcome::Cancelled => {
                tracing::debug!(metric = %metric_id, "model cancelled")
            }
            CancelOutcome::NotFound => {
                tracing::debug!(metric = %metric_id, "no model to cancel")
            }
        }
        self.repository.delete_metric(metric_id)?;
        tracing::info!(metric = %metric_id, name = %metric.name, "metric unmonitored");
        Ok(())
    }

    /// The atomicity-critical path: conditionally claim the metric, confirm
    /// the claim, then ask the runner for the model.
    fn activate(
        &self,
        metric: &MetricRecord,
        params: &TrainingParams,
    ) -> Result<ActivationOutcome, EngineError> {
        match metric.status {
            MetricStatus::CreatePending | MetricStatus::Active => {
                tracing::debug!(metric = %metric.uid, status = ?metric.status, "model already started");
                return Ok(ActivationOutcome::AlreadyActive);
            }
            MetricStatus::Unmonitored | MetricStatus::PendingData => {}
            MetricStatus::Error => {
                return Err(EngineError::InvariantViolation(format!(
                    "start_model: unexpected status for metric {}: {:?}",
                    metric.uid, metric.status
                )));
            }
        }

        let ref_status = metric.status;
        let encoded = serde_json::to_string(params).map_err(|e| {
            EngineError::InvariantViolation(format!(
                "encode model params for metric {}: {}",
                metric.uid, e
            ))
        })?;
        let update = MetricUpdate {
            status: MetricStatus::CreatePending,
            model_params: Some(encoded),
            message: None,
        };
        if !self
            .repository
            .update_for_ref_status(&metric.uid, ref_status, &update)?
        {
            let observed = self.repository.get_metric(&metric.uid)?.status;
            tracing::warn!(
                metric = %metric.uid,
                expected = ?ref_status,
                ?observed,
                "lost the activation race"
            );
            return Ok(ActivationOutcome::Conflict { observed });
        }

        // Confirm against the row itself before involving the runner.
        let observed = self.repository.get_metric(&metric.uid)?.status;
        if observed != MetricStatus::CreatePending {
            tracing::warn!(
                metric = %metric.uid,
                ?observed,
                "metric status morphed before model creation"
            );
            return Ok(ActivationOutcome::Conflict { observed });
        }

        if let Err(err) = self.runner.create_model(&metric.uid, params) {
            tracing::error!(metric = %metric.uid, error = %err, "model creation failed");
            let detail = err.to_string();
            if let Err(store_err) = self.repository.compare_and_set_status(
                &metric.uid,
                MetricStatus::CreatePending,
                MetricStatus::Error,
                Some(&detail),
            ) {
                tracing::error!(
                    metric = %metric.uid,
                    error = %store_err,
                    "failed to record model creation failure"
                );
            }
            return Err(EngineError::Runner(err));
        }

        tracing::info!(metric = %metric.uid, name = %metric.name, "model started");
        Ok(ActivationOutcome::Started)
    }
}
