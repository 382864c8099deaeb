//! SQLite-backed metric repository.
//!
//! Conditional writes are plain `UPDATE ... WHERE uid = ? AND status = ?`
//! statements; the affected-row count decides the outcome, and a zero count
//! is disambiguated with a follow-up existence check so that "row missing"
//! and "status mismatch" stay distinct results.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use vigil_kernel::{
    MetricDataRow, MetricRecord, MetricStats, MetricStatus, MetricUpdate, NewMetric, StoreError,
};

use super::repository::MetricRepository;

#[derive(Clone)]
pub struct SqliteMetricRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMetricRepository {
    pub fn new(db_path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)
            .map_err(|e| StoreError::Storage(format!("open metric db: {}", e)))?;
        Self::with_connection(conn)
    }

    /// In-memory database, private to this repository instance.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Storage(format!("open in-memory metric db: {}", e)))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        let repo = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        repo.ensure_schema()?;
        Ok(repo)
    }

    fn ensure_schema(&self) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS metric (
              uid TEXT PRIMARY KEY,
              name TEXT NOT NULL,
              datasource TEXT NOT NULL,
              status TEXT NOT NULL,
              model_params TEXT NULL,
              poll_interval_sec INTEGER NULL,
              last_rowid INTEGER NOT NULL DEFAULT -1,
              last_timestamp_ms INTEGER NULL,
              message TEXT NULL
            );
            CREATE TABLE IF NOT EXISTS metric_data (
              uid TEXT NOT NULL,
              row_id INTEGER NOT NULL,
              timestamp_ms INTEGER NOT NULL,
              metric_value REAL NOT NULL,
              anomaly_score REAL NULL,
              PRIMARY KEY (uid, row_id)
            );
            CREATE INDEX IF NOT EXISTS idx_metric_status ON metric(status);
            CREATE INDEX IF NOT EXISTS idx_metric_data_timestamp ON metric_data(uid, timestamp_ms);
            "#,
        )
        .map_err(|e| StoreError::Storage(format!("init metric schema: {}", e)))?;
        Ok(())
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Storage("metric db lock poisoned".to_string()))
    }

    fn metric_exists(conn: &Connection, uid: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM metric WHERE uid = ?1", params![uid], |r| {
                r.get(0)
            })
            .optional()
            .map_err(|e| store_err("check metric exists", e))?;
        Ok(found.is_some())
    }
}

impl MetricRepository for SqliteMetricRepository {
    fn insert_metric(&self, metric: &NewMetric) -> Result<MetricRecord, StoreError> {
        let uid = metric
            .uid
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        let conn = self.lock_conn()?;
        let inserted = conn.execute(
            "INSERT INTO metric (uid, name, datasource, status, poll_interval_sec)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                uid,
                metric.name,
                metric.datasource,
                MetricStatus::Unmonitored.as_str(),
                metric.poll_interval_sec
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                return Err(StoreError::Storage(format!(
                    "metric already registered: {}",
                    uid
                )));
            }
            Err(e) => return Err(store_err("insert metric", e)),
        }
        Ok(MetricRecord {
            uid,
            name: metric.name.clone(),
            datasource: metric.datasource.clone(),
            status: MetricStatus::Unmonitored,
            model_params: None,
            poll_interval_sec: metric.poll_interval_sec,
            last_rowid: -1,
            last_timestamp: None,
            message: None,
        })
    }

    fn get_metric(&self, uid: &str) -> Result<MetricRecord, StoreError> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                "SELECT uid, name, datasource, status, model_params, poll_interval_sec,
                        last_rowid, last_timestamp_ms, message
                 FROM metric WHERE uid = ?1",
                params![uid],
                map_row_to_metric,
            )
            .optional()
            .map_err(|e| store_err("get metric", e))?;
        match row {
            Some(record) => Ok(record),
            None => Err(StoreError::NotFound(uid.to_string())),
        }
    }

    fn compare_and_set_status(
        &self,
        uid: &str,
        expected: MetricStatus,
        next: MetricStatus,
        message: Option<&str>,
    ) -> Result<bool, StoreError> {
        let conn = self.lock_conn()?;
        let updated = match message {
            Some(message) => conn
                .execute(
                    "UPDATE metric SET status = ?3, message = ?4
                     WHERE uid = ?1 AND status = ?2",
                    params![uid, expected.as_str(), next.as_str(), message],
                )
                .map_err(|e| store_err("compare-and-set metric status", e))?,
            None => conn
                .execute(
                    "UPDATE metric SET status = ?3 WHERE uid = ?1 AND status = ?2",
                    params![uid, expected.as_str(), next.as_str()],
                )
                .map_err(|e| store_err("compare-and-set metric status", e))?,
        };
        if updated > 0 {
            return Ok(true);
        }
        if Self::metric_exists(&conn, uid)? {
            Ok(false)
        } else {
            Err(StoreError::NotFound(uid.to_string()))
        }
    }

    fn update_for_ref_status(
        &self,
        uid: &str,
        expected: MetricStatus,
        update: &MetricUpdate,
    ) -> Result<bool, StoreError> {
        let conn = self.lock_conn()?;
        let updated = conn
            .execute(
                "UPDATE metric
                 SET status = ?3,
                     model_params = COALESCE(?4, model_params),
                     message = COALESCE(?5, message)
                 WHERE uid = ?1 AND status = ?2",
                params![
                    uid,
                    expected.as_str(),
                    update.status.as_str(),
                    update.model_params,
                    update.message
                ],
            )
            .map_err(|e| store_err("conditional metric update", e))?;
        if updated > 0 {
            return Ok(true);
        }
        if Self::metric_exists(&conn, uid)? {
            Ok(false)
        } else {
            Err(StoreError::NotFound(uid.to_string()))
        }
    }

    fn append_metric_data(
        &self,
        uid: &str,
        rows: &[(DateTime<Utc>, f64)],
    ) -> Result<Vec<i64>, StoreError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.lock_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| store_err("begin append tx", e))?;
        if !Self::metric_exists(&tx, uid)? {
            return Err(StoreError::NotFound(uid.to_string()));
        }
        let next: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(row_id) + 1, 0) FROM metric_data WHERE uid = ?1",
                params![uid],
                |r| r.get(0),
            )
            .map_err(|e| store_err("read next rowid", e))?;
        let mut assigned = Vec::with_capacity(rows.len());
        for (offset, (timestamp, value)) in rows.iter().enumerate() {
            let rowid = next + offset as i64;
            tx.execute(
                "INSERT INTO metric_data (uid, row_id, timestamp_ms, metric_value)
                 VALUES (?1, ?2, ?3, ?4)",
                params![uid, rowid, dt_to_ms(*timestamp), value],
            )
            .map_err(|e| store_err("insert metric data", e))?;
            assigned.push(rowid);
        }
        let (last_timestamp, _) = rows[rows.len() - 1];
        tx.execute(
            "UPDATE metric SET last_rowid = ?2, last_timestamp_ms = ?3 WHERE uid = ?1",
            params![uid, assigned[assigned.len() - 1], dt_to_ms(last_timestamp)],
        )
        .map_err(|e| store_err("advance metric cursor", e))?;
        tx.commit().map_err(|e| store_err("commit append tx", e))?;
        Ok(assigned)
    }

    fn get_metric_data(
        &self,
        uid: &str,
        from_rowid: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<MetricDataRow>, StoreError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT uid, row_id, timestamp_ms, metric_value, anomaly_score
                 FROM metric_data
                 WHERE uid = ?1 AND row_id >= ?2
                 ORDER BY row_id ASC
                 LIMIT ?3",
            )
            .map_err(|e| store_err("prepare get metric data", e))?;
        let rows = stmt
            .query_map(
                params![
                    uid,
                    from_rowid.unwrap_or(0),
                    limit.map(|n| n as i64).unwrap_or(-1)
                ],
                |row| {
                    Ok(MetricDataRow {
                        uid: row.get(0)?,
                        rowid: row.get(1)?,
                        timestamp: ms_to_dt(row.get::<_, i64>(2)?),
                        value: row.get(3)?,
                        anomaly_score: row.get(4)?,
                    })
                },
            )
            .map_err(|e| store_err("query metric data", e))?;
        let mut out = Vec::new();
        for item in rows {
            out.push(item.map_err(|e| store_err("scan metric data", e))?);
        }
        Ok(out)
    }

    fn count_metric_data(&self, uid: &str) -> Result<u64, StoreError> {
        let conn = self.lock_conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM metric_data WHERE uid = ?1",
                params![uid],
                |r| r.get(0),
            )
            .map_err(|e| store_err("count metric data", e))?;
        Ok(count as u64)
    }

    fn metric_data_stats(&self, uid: &str) -> Result<MetricStats, StoreError> {
        let conn = self.lock_conn()?;
        let (min, max): (Option<f64>, Option<f64>) = conn
            .query_row(
                "SELECT MIN(metric_value), MAX(metric_value) FROM metric_data WHERE uid = ?1",
                params![uid],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .map_err(|e| store_err("read metric data stats", e))?;
        Ok(MetricStats {
            min,
            max,
            min_resolution: None,
        })
    }

    fn set_anomaly_score(&self, uid: &str, rowid: i64, score: f64) -> Result<(), StoreError> {
        let conn = self.lock_conn()?;
        let updated = conn
            .execute(
                "UPDATE metric_data SET anomaly_score = ?3 WHERE uid = ?1 AND row_id = ?2",
                params![uid, rowid, score],
            )
            .map_err(|e| store_err("attach anomaly score", e))?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!(
                "metric data row {}/{}",
                uid, rowid
            )));
        }
        Ok(())
    }

    fn delete_metric(&self, uid: &str) -> Result<(), StoreError> {
        let mut conn = self.lock_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| store_err("begin delete tx", e))?;
        tx.execute("DELETE FROM metric_data WHERE uid = ?1", params![uid])
            .map_err(|e| store_err("delete metric data", e))?;
        let deleted = tx
            .execute("DELETE FROM metric WHERE uid = ?1", params![uid])
            .map_err(|e| store_err("delete metric", e))?;
        if deleted == 0 {
            return Err(StoreError::NotFound(uid.to_string()));
        }
        tx.commit().map_err(|e| store_err("commit delete tx", e))?;
        Ok(())
    }
}

fn map_row_to_metric(row: &rusqlite::Row) -> rusqlite::Result<MetricRecord> {
    let status_text: String = row.get(3)?;
    let status = MetricStatus::parse(&status_text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown metric status in storage: {}", status_text).into(),
        )
    })?;
    let last_timestamp_ms: Option<i64> = row.get(7)?;
    Ok(MetricRecord {
        uid: row.get(0)?,
        name: row.get(1)?,
        datasource: row.get(2)?,
        status,
        model_params: row.get(4)?,
        poll_interval_sec: row.get(5)?,
        last_rowid: row.get(6)?,
        last_timestamp: last_timestamp_ms.map(ms_to_dt),
        message: row.get(8)?,
    })
}

fn dt_to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn ms_to_dt(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

fn store_err(context: &str, err: rusqlite::Error) -> StoreError {
    if is_transient(&err) {
        StoreError::Transient(format!("{}: {}", context, err))
    } else {
        StoreError::Storage(format!("{}: {}", context, err))
    }
}

fn is_transient(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::DatabaseBusy || failure.code == ErrorCode::DatabaseLocked
    )
}
