//! Backlog delivery to the model-execution subsystem.
//!
//! Delivery is at-least-once: no watermark is persisted, so a re-run after a
//! crash replays the full row sequence from rowid zero. The model runner
//! contract requires tolerating such prefix replays (see
//! [vigil_kernel::runner]).

use vigil_kernel::{EngineError, MetricStatus, ModelInputRow, ModelRunner};

use super::repository::MetricRepository;

/// Streams every buffered data row of the metric to its model in
/// rowid-ascending batches of `chunk_size`. Returns the number of rows sent.
///
/// The metric must already have passed model activation; calling this while
/// it is still `Unmonitored` or `PendingData` is a caller bug, since the
/// model-execution side has nothing to receive data yet.
pub fn send_backlog<R, M>(
    repository: &R,
    runner: &M,
    metric_id: &str,
    chunk_size: usize,
) -> Result<usize, EngineError>
where
    R: MetricRepository,
    M: ModelRunner,
{
    let metric = repository.get_metric(metric_id)?;
    if matches!(
        metric.status,
        MetricStatus::Unmonitored | MetricStatus::PendingData
    ) {
        return Err(EngineError::InvariantViolation(format!(
            "send_backlog: model for metric {} has not been started; status={:?}",
            metric_id, metric.status
        )));
    }

    let rows = repository.get_metric_data(metric_id, None, None)?;
    if rows.is_empty() {
        tracing::debug!(metric = %metric_id, "no backlog to send");
        return Ok(0);
    }

    let chunk = chunk_size.max(1);
    for batch_rows in rows.chunks(chunk) {
        let batch: Vec<ModelInputRow> = batch_rows
            .iter()
            .map(|row| ModelInputRow {
                rowid: row.rowid,
                timestamp: row.timestamp,
                value: row.value,
            })
            .collect();
        runner.send_input_batch(metric_id, &batch)?;
    }

    tracing::info!(metric = %metric_id, rows = rows.len(), "sent backlog data rows to model");
    Ok(rows.len())
}
