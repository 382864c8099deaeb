//! End-to-end scenarios against the real SQLite repository.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};

use vigil_kernel::{
    params_from_stats, CancelOutcome, MetricStats, MetricStatus, ModelInputRow, ModelRunner,
    NewMetric, RunnerError, TrainingParams,
};

use super::config::EngineConfig;
use super::lifecycle::{ActivationOutcome, LifecycleController, MonitoringOutcome};
use super::repository::MetricRepository;
use super::retry::{RetryPolicy, RetryingRepository};
use super::sqlite_repository::SqliteMetricRepository;

fn ts(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 10, minute, 0).unwrap()
}

fn stats_params(min: f64, max: f64) -> TrainingParams {
    params_from_stats(&MetricStats {
        min: Some(min),
        max: Some(max),
        min_resolution: None,
    })
    .unwrap()
}

#[derive(Clone, Default)]
struct RecordingRunner {
    created: Arc<Mutex<Vec<String>>>,
    batches: Arc<Mutex<Vec<(String, Vec<ModelInputRow>)>>>,
    cancelled: Arc<Mutex<Vec<String>>>,
}

impl ModelRunner for RecordingRunner {
    fn create_model(&self, model_id: &str, _params: &TrainingParams) -> Result<(), RunnerError> {
        self.created.lock().unwrap().push(model_id.to_string());
        Ok(())
    }

    fn send_input_batch(&self, model_id: &str, rows: &[ModelInputRow]) -> Result<(), RunnerError> {
        self.batches
            .lock()
            .unwrap()
            .push((model_id.to_string(), rows.to_vec()));
        Ok(())
    }

    fn cancel_model(&self, model_id: &str) -> Result<CancelOutcome, RunnerError> {
        self.cancelled.lock().unwrap().push(model_id.to_string());
        Ok(CancelOutcome::NotFound)
    }
}

fn engine() -> (
    SqliteMetricRepository,
    RecordingRunner,
    LifecycleController<RetryingRepository<SqliteMetricRepository>, RecordingRunner>,
) {
    let repo = SqliteMetricRepository::in_memory().unwrap();
    let runner = RecordingRunner::default();
    let config = EngineConfig {
        chunk_size: 100,
        model_creation_record_threshold: 5,
        ..EngineConfig::default()
    };
    let controller = LifecycleController::new(
        RetryingRepository::new(repo.clone(), RetryPolicy::default()),
        runner.clone(),
        config,
    );
    (repo, runner, controller)
}

#[test]
fn metric_with_stats_goes_straight_to_model() {
    let (repo, runner, controller) = engine();
    repo.insert_metric(&NewMetric::new("cpu.user", "custom").with_uid("m1"))
        .unwrap();
    repo.append_metric_data("m1", &[(ts(0), 10.0), (ts(5), 20.0), (ts(10), 30.0)])
        .unwrap();

    let outcome = controller
        .start_monitoring("m1", Some(&stats_params(0.0, 100.0)))
        .unwrap();
    assert!(outcome.model_started());

    let metric = repo.get_metric("m1").unwrap();
    assert_eq!(metric.status, MetricStatus::CreatePending);
    assert!(metric.model_params.is_some());
    assert_eq!(runner.created.lock().unwrap().as_slice(), ["m1"]);

    // activation already flushed history once; an explicit re-send replays
    // the same three rows in one ascending batch
    runner.batches.lock().unwrap().clear();
    let sent = controller.send_backlog("m1").unwrap();
    assert_eq!(sent, 3);
    let batches = runner.batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].0, "m1");
    let rowids: Vec<i64> = batches[0].1.iter().map(|r| r.rowid).collect();
    assert_eq!(rowids, [0, 1, 2]);
}

#[test]
fn metric_without_stats_waits_for_data() {
    let (repo, runner, controller) = engine();
    repo.insert_metric(&NewMetric::new("net.rx", "custom").with_uid("m2"))
        .unwrap();

    let outcome = controller.start_monitoring("m2", None).unwrap();
    assert_eq!(outcome, MonitoringOutcome::PendingData);
    assert_eq!(
        repo.get_metric("m2").unwrap().status,
        MetricStatus::PendingData
    );
    assert!(runner.created.lock().unwrap().is_empty());
    assert!(runner.batches.lock().unwrap().is_empty());
}

#[test]
fn activation_of_an_active_metric_is_a_no_op() {
    let (repo, runner, controller) = engine();
    repo.insert_metric(&NewMetric::new("disk.io", "custom").with_uid("m3"))
        .unwrap();

    // drive m3 to Active through the ordinary path
    controller
        .start_monitoring("m3", Some(&stats_params(0.0, 50.0)))
        .unwrap();
    assert!(controller.mark_model_active("m3").unwrap());
    runner.created.lock().unwrap().clear();
    runner.batches.lock().unwrap().clear();

    let outcome = controller
        .start_model("m3", &stats_params(0.0, 50.0))
        .unwrap();
    assert_eq!(outcome, ActivationOutcome::AlreadyActive);
    assert!(!outcome.started());
    assert!(runner.created.lock().unwrap().is_empty());
    assert!(runner.batches.lock().unwrap().is_empty());
}

#[test]
fn pending_metric_promotes_itself_once_data_accumulates() {
    let (repo, runner, controller) = engine();
    repo.insert_metric(&NewMetric::new("queue.depth", "custom").with_uid("m4"))
        .unwrap();
    controller.start_monitoring("m4", None).unwrap();

    repo.append_metric_data("m4", &[(ts(0), 1.0), (ts(5), 7.0), (ts(10), 3.0), (ts(15), 2.0)])
        .unwrap();
    assert!(controller.evaluate_pending_metric("m4").unwrap().is_none());

    repo.append_metric_data("m4", &[(ts(20), 5.0)]).unwrap();
    let outcome = controller.evaluate_pending_metric("m4").unwrap();
    assert_eq!(outcome, Some(ActivationOutcome::Started));

    let metric = repo.get_metric("m4").unwrap();
    assert_eq!(metric.status, MetricStatus::CreatePending);
    let batches = runner.batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].1.len(), 5);
}

#[test]
fn conflict_detected_when_status_changes_between_read_and_write() {
    let (repo, runner, controller) = engine();
    repo.insert_metric(&NewMetric::new("mem.used", "custom").with_uid("m5"))
        .unwrap();

    // simulate another worker winning the race after our read
    let snapshot = repo.get_metric("m5").unwrap();
    assert_eq!(snapshot.status, MetricStatus::Unmonitored);
    repo.compare_and_set_status(
        "m5",
        MetricStatus::Unmonitored,
        MetricStatus::PendingData,
        None,
    )
    .unwrap();

    // our conditional write with the stale expectation must lose cleanly
    let applied = repo
        .compare_and_set_status(
            "m5",
            snapshot.status,
            MetricStatus::CreatePending,
            None,
        )
        .unwrap();
    assert!(!applied);
    assert_eq!(
        repo.get_metric("m5").unwrap().status,
        MetricStatus::PendingData
    );

    // a later caller holding the old assumption gets the contract fault
    let err = controller.start_monitoring("m5", None).unwrap_err();
    assert!(matches!(
        err,
        vigil_kernel::EngineError::InvariantViolation(_)
    ));
    assert!(runner.created.lock().unwrap().is_empty());
}

#[test]
fn unmonitoring_is_idempotent_about_the_model() {
    let (repo, runner, controller) = engine();
    repo.insert_metric(&NewMetric::new("cpu.sys", "custom").with_uid("m6"))
        .unwrap();
    repo.append_metric_data("m6", &[(ts(0), 1.0)]).unwrap();
    controller.start_monitoring("m6", None).unwrap();

    // the runner reports NotFound for the cancellation; still a success
    controller.unmonitor_metric("m6").unwrap();
    assert_eq!(runner.cancelled.lock().unwrap().as_slice(), ["m6"]);
    assert!(repo.get_metric("m6").is_err());
    assert_eq!(repo.count_metric_data("m6").unwrap(), 0);
}

#[test]
fn scoring_pipeline_round_trip() {
    let (repo, _runner, controller) = engine();
    repo.insert_metric(&NewMetric::new("latency.p99", "custom").with_uid("m7"))
        .unwrap();
    repo.append_metric_data("m7", &[(ts(0), 120.0), (ts(5), 4000.0)])
        .unwrap();
    controller
        .start_monitoring("m7", Some(&stats_params(0.0, 5000.0)))
        .unwrap();

    // the model-execution side reports results asynchronously
    assert!(controller.mark_model_active("m7").unwrap());
    repo.set_anomaly_score("m7", 1, 0.98).unwrap();

    let rows = repo.get_metric_data("m7", Some(1), None).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].anomaly_score, Some(0.98));
    assert_eq!(
        repo.get_metric("m7").unwrap().status,
        MetricStatus::Active
    );
}
