use std::sync::Arc;

use isoflow_core::{ListResult, ServiceError, now_rfc3339};
use isoflow_sql::{Row, SQLStore, Statement, Value};

use crate::model::{Batch, BatchListQuery, BatchRelease, BatchStatus, QcTestResult};

/// SQL schema for the production tables.
///
/// Entities are stored as a JSON `data` column plus the columns the
/// engine filters or guards on. `qc_results` rows are disjoint per test
/// so recording different tests of one batch never contends.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS batches (
    id          TEXT PRIMARY KEY,
    data        TEXT NOT NULL,
    product     TEXT NOT NULL,
    status      TEXT NOT NULL,
    create_at   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_batch_status ON batches(status);
CREATE INDEX IF NOT EXISTS idx_batch_product ON batches(product);

CREATE TABLE IF NOT EXISTS qc_results (
    id          TEXT PRIMARY KEY,
    data        TEXT NOT NULL,
    batch_id    TEXT NOT NULL,
    test_id     TEXT NOT NULL,
    completed   INTEGER NOT NULL DEFAULT 0,
    passed      INTEGER,
    UNIQUE (batch_id, test_id)
);
CREATE INDEX IF NOT EXISTS idx_qc_batch ON qc_results(batch_id);

CREATE TABLE IF NOT EXISTS batch_releases (
    id          TEXT PRIMARY KEY,
    data        TEXT NOT NULL,
    batch_id    TEXT NOT NULL UNIQUE,
    release_at  TEXT NOT NULL
);
";

/// Persistent storage for batches, QC results, and release records.
pub struct BatchStore {
    db: Arc<dyn SQLStore>,
}

impl BatchStore {
    /// Create a new BatchStore and initialise the schema.
    pub fn new(db: Arc<dyn SQLStore>) -> Result<Self, ServiceError> {
        db.exec_batch(SCHEMA)
            .map_err(|e| ServiceError::Storage(format!("production schema init: {e}")))?;
        Ok(Self { db })
    }

    // -----------------------------------------------------------------------
    // Batches
    // -----------------------------------------------------------------------

    /// Insert a new batch.
    pub fn create(&self, batch: &Batch) -> Result<(), ServiceError> {
        let data =
            serde_json::to_string(batch).map_err(|e| ServiceError::Internal(e.to_string()))?;

        self.db
            .exec(
                "INSERT INTO batches (id, data, product, status, create_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                &[
                    Value::Text(batch.id.clone()),
                    Value::Text(data),
                    Value::Text(batch.product.clone()),
                    Value::Text(batch.status.as_str().to_string()),
                    Value::Text(batch.created_at.clone()),
                ],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        Ok(())
    }

    /// Get a batch by ID.
    pub fn get(&self, id: &str) -> Result<Batch, ServiceError> {
        let rows = self
            .db
            .query(
                "SELECT data FROM batches WHERE id = ?1",
                &[Value::Text(id.to_string())],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        let row = rows
            .first()
            .ok_or_else(|| ServiceError::NotFound(format!("batch {id}")))?;

        row_to_json(row, "batch")
    }

    /// Conditionally update a batch: applies only if the stored status
    /// still equals `expected`. Returns false if the CAS missed.
    pub fn update_cas(&self, batch: &Batch, expected: BatchStatus) -> Result<bool, ServiceError> {
        let data =
            serde_json::to_string(batch).map_err(|e| ServiceError::Internal(e.to_string()))?;

        let affected = self
            .db
            .exec(
                "UPDATE batches SET data = ?1, status = ?2 WHERE id = ?3 AND status = ?4",
                &[
                    Value::Text(data),
                    Value::Text(batch.status.as_str().to_string()),
                    Value::Text(batch.id.clone()),
                    Value::Text(expected.as_str().to_string()),
                ],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        Ok(affected > 0)
    }

    /// Atomically release a batch: CAS QC_PASSED → RELEASED plus the
    /// insert of the single BatchRelease row, one transaction. The
    /// UNIQUE constraint on `batch_id` backs the at-most-once guarantee.
    pub fn release_cas(&self, batch: &Batch, release: &BatchRelease) -> Result<bool, ServiceError> {
        let batch_data =
            serde_json::to_string(batch).map_err(|e| ServiceError::Internal(e.to_string()))?;
        let release_data =
            serde_json::to_string(release).map_err(|e| ServiceError::Internal(e.to_string()))?;

        self.db
            .exec_txn(&[
                Statement::guard(
                    "UPDATE batches SET data = ?1, status = ?2 \
                     WHERE id = ?3 AND status = ?4",
                    vec![
                        Value::Text(batch_data),
                        Value::Text(BatchStatus::Released.as_str().to_string()),
                        Value::Text(batch.id.clone()),
                        Value::Text(BatchStatus::QcPassed.as_str().to_string()),
                    ],
                ),
                Statement::new(
                    "INSERT INTO batch_releases (id, data, batch_id, release_at) \
                     VALUES (?1, ?2, ?3, ?4)",
                    vec![
                        Value::Text(release.id.clone()),
                        Value::Text(release_data),
                        Value::Text(release.batch_id.clone()),
                        Value::Text(release.released_at.clone()),
                    ],
                ),
            ])
            .map_err(|e| ServiceError::Storage(e.to_string()))
    }

    /// Get the release record for a batch, if any.
    pub fn get_release(&self, batch_id: &str) -> Result<Option<BatchRelease>, ServiceError> {
        let rows = self
            .db
            .query(
                "SELECT data FROM batch_releases WHERE batch_id = ?1",
                &[Value::Text(batch_id.to_string())],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        match rows.first() {
            Some(row) => Ok(Some(row_to_json(row, "batch release")?)),
            None => Ok(None),
        }
    }

    /// List batches with optional filters.
    pub fn list(&self, query: &BatchListQuery) -> Result<ListResult<Batch>, ServiceError> {
        let limit = query.limit.unwrap_or(50);
        let offset = query.offset.unwrap_or(0);

        let mut where_clauses: Vec<String> = Vec::new();
        let mut params: Vec<Value> = Vec::new();
        let mut idx = 1;

        if let Some(ref p) = query.product {
            where_clauses.push(format!("product = ?{idx}"));
            params.push(Value::Text(p.clone()));
            idx += 1;
        }
        if let Some(ref s) = query.status {
            where_clauses.push(format!("status = ?{idx}"));
            params.push(Value::Text(s.clone()));
            idx += 1;
        }

        let where_sql = if where_clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", where_clauses.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) as cnt FROM batches {where_sql}");
        let count_rows = self
            .db
            .query(&count_sql, &params)
            .map_err(|e| ServiceError::Storage(e.to_string()))?;
        let total = count_rows
            .first()
            .and_then(|r| r.get_i64("cnt"))
            .unwrap_or(0) as usize;

        let select_sql = format!(
            "SELECT data FROM batches {where_sql} ORDER BY create_at DESC LIMIT ?{idx} OFFSET ?{}",
            idx + 1
        );
        let mut select_params = params;
        select_params.push(Value::Integer(limit as i64));
        select_params.push(Value::Integer(offset as i64));

        let rows = self
            .db
            .query(&select_sql, &select_params)
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        let items = rows
            .iter()
            .map(|r| row_to_json(r, "batch"))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ListResult { items, total })
    }

    // -----------------------------------------------------------------------
    // QC results
    // -----------------------------------------------------------------------

    /// Count QC result rows seeded for a batch.
    pub fn count_qc_results(&self, batch_id: &str) -> Result<u32, ServiceError> {
        let rows = self
            .db
            .query(
                "SELECT COUNT(*) as cnt FROM qc_results WHERE batch_id = ?1",
                &[Value::Text(batch_id.to_string())],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;
        Ok(rows.first().and_then(|r| r.get_i64("cnt")).unwrap_or(0) as u32)
    }

    /// Seed the QC result rows for a batch in one transaction.
    pub fn seed_qc_results(&self, results: &[QcTestResult]) -> Result<(), ServiceError> {
        let mut stmts = Vec::with_capacity(results.len());
        for r in results {
            let data =
                serde_json::to_string(r).map_err(|e| ServiceError::Internal(e.to_string()))?;
            stmts.push(Statement::new(
                "INSERT INTO qc_results (id, data, batch_id, test_id, completed, passed) \
                 VALUES (?1, ?2, ?3, ?4, 0, NULL)",
                vec![
                    Value::Text(r.id.clone()),
                    Value::Text(data),
                    Value::Text(r.batch_id.clone()),
                    Value::Text(r.test_id.clone()),
                ],
            ));
        }

        self.db
            .exec_txn(&stmts)
            .map_err(|e| ServiceError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Get one QC result row.
    pub fn get_qc_result(
        &self,
        batch_id: &str,
        test_id: &str,
    ) -> Result<QcTestResult, ServiceError> {
        let rows = self
            .db
            .query(
                "SELECT data FROM qc_results WHERE batch_id = ?1 AND test_id = ?2",
                &[
                    Value::Text(batch_id.to_string()),
                    Value::Text(test_id.to_string()),
                ],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        let row = rows.first().ok_or_else(|| {
            ServiceError::NotFound(format!("qc test {test_id} on batch {batch_id}"))
        })?;

        row_to_json(row, "qc result")
    }

    /// Commit one QC result row, guarded on the batch still sitting in
    /// `expected` at commit time. Rows are disjoint per test, so this
    /// never contends with updates to sibling tests — only with the
    /// batch's own status moves. Returns false, with nothing applied,
    /// if the batch had already left `expected`.
    pub fn record_qc_result_cas(
        &self,
        result: &QcTestResult,
        expected: BatchStatus,
    ) -> Result<bool, ServiceError> {
        let data =
            serde_json::to_string(result).map_err(|e| ServiceError::Internal(e.to_string()))?;

        self.db
            .exec_txn(&[
                // No-op write that matches only while the batch holds
                // the expected status; a miss rolls the row write back.
                Statement::guard(
                    "UPDATE batches SET status = status WHERE id = ?1 AND status = ?2",
                    vec![
                        Value::Text(result.batch_id.clone()),
                        Value::Text(expected.as_str().to_string()),
                    ],
                ),
                Statement::guard(
                    "UPDATE qc_results SET data = ?1, completed = ?2, passed = ?3 WHERE id = ?4",
                    vec![
                        Value::Text(data),
                        Value::Integer(if result.completed { 1 } else { 0 }),
                        match result.passed {
                            Some(true) => Value::Integer(1),
                            Some(false) => Value::Integer(0),
                            None => Value::Null,
                        },
                        Value::Text(result.id.clone()),
                    ],
                ),
            ])
            .map_err(|e| ServiceError::Storage(e.to_string()))
    }

    /// All QC result rows for a batch.
    pub fn qc_results(&self, batch_id: &str) -> Result<Vec<QcTestResult>, ServiceError> {
        let rows = self
            .db
            .query(
                "SELECT data FROM qc_results WHERE batch_id = ?1 ORDER BY test_id",
                &[Value::Text(batch_id.to_string())],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        rows.iter().map(|r| row_to_json(r, "qc result")).collect()
    }

    /// Aggregate completion/pass counters over the indexed columns.
    /// A point-in-time read; does not block result writers.
    pub fn qc_counters(&self, batch_id: &str) -> Result<(u32, u32, u32, u32), ServiceError> {
        let rows = self
            .db
            .query(
                "SELECT COUNT(*) as total, \
                        COALESCE(SUM(completed), 0) as completed, \
                        COALESCE(SUM(CASE WHEN passed = 1 THEN 1 ELSE 0 END), 0) as passed, \
                        COALESCE(SUM(CASE WHEN completed = 1 AND passed = 0 THEN 1 ELSE 0 END), 0) as failed \
                 FROM qc_results WHERE batch_id = ?1",
                &[Value::Text(batch_id.to_string())],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        let row = rows
            .first()
            .ok_or_else(|| ServiceError::Storage("empty aggregate".into()))?;

        Ok((
            row.get_i64("total").unwrap_or(0) as u32,
            row.get_i64("completed").unwrap_or(0) as u32,
            row.get_i64("passed").unwrap_or(0) as u32,
            row.get_i64("failed").unwrap_or(0) as u32,
        ))
    }

    /// Whether an actor recorded any QC result for a batch (the
    /// separation-of-duties check for release).
    pub fn actor_recorded_qc(&self, batch_id: &str, actor_id: &str) -> Result<bool, ServiceError> {
        let results = self.qc_results(batch_id)?;
        Ok(results
            .iter()
            .any(|r| r.recorded_by.as_deref() == Some(actor_id)))
    }

    /// Touch a batch's updated_at and rewrite its JSON unconditionally
    /// (non-status fields only; status changes go through CAS).
    pub fn update(&self, batch: &Batch) -> Result<(), ServiceError> {
        let data =
            serde_json::to_string(batch).map_err(|e| ServiceError::Internal(e.to_string()))?;

        let affected = self
            .db
            .exec(
                "UPDATE batches SET data = ?1, status = ?2 WHERE id = ?3",
                &[
                    Value::Text(data),
                    Value::Text(batch.status.as_str().to_string()),
                    Value::Text(batch.id.clone()),
                ],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        if affected == 0 {
            return Err(ServiceError::NotFound(format!("batch {}", batch.id)));
        }
        Ok(())
    }
}

/// Mark a batch struct as updated now.
pub fn touch(batch: &mut Batch) {
    batch.updated_at = Some(now_rfc3339());
}

/// Deserialize an entity from a row's `data` JSON column.
fn row_to_json<T: serde::de::DeserializeOwned>(row: &Row, what: &str) -> Result<T, ServiceError> {
    let json = row
        .get_str("data")
        .ok_or_else(|| ServiceError::Storage("missing data column".into()))?;
    serde_json::from_str(json).map_err(|e| ServiceError::Storage(format!("bad {what} json: {e}")))
}
