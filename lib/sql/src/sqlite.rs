use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;

use crate::error::SQLError;
use crate::traits::{Row, SQLStore, Statement, Value};

/// SqliteStore is a SQLStore implementation backed by rusqlite (bundled SQLite).
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self, SQLError> {
        let conn = Connection::open(path).map_err(|e| SQLError::Connection(e.to_string()))?;

        // WAL mode for better concurrent read performance.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| SQLError::Connection(e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite database (useful for tests).
    pub fn open_in_memory() -> Result<Self, SQLError> {
        let conn =
            Connection::open_in_memory().map_err(|e| SQLError::Connection(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

/// Convert our Value enum to rusqlite's ToSql.
fn bind_params(params: &[Value]) -> Vec<Box<dyn rusqlite::types::ToSql + '_>> {
    params
        .iter()
        .map(|v| -> Box<dyn rusqlite::types::ToSql + '_> {
            match v {
                Value::Null => Box::new(rusqlite::types::Null),
                Value::Integer(i) => Box::new(*i),
                Value::Real(f) => Box::new(*f),
                Value::Text(s) => Box::new(s.as_str()),
                Value::Blob(b) => Box::new(b.as_slice()),
            }
        })
        .collect()
}

impl SQLStore for SqliteStore {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, SQLError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SQLError::Query(e.to_string()))?;

        let bound = bind_params(params);
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            bound.iter().map(|b| b.as_ref()).collect();

        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| SQLError::Query(e.to_string()))?;

        let column_names: Vec<String> = stmt
            .column_names()
            .iter()
            .map(|s| s.to_string())
            .collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), |row| {
                let mut columns = Vec::new();
                for (i, name) in column_names.iter().enumerate() {
                    let val = row_value_at(row, i);
                    columns.push((name.clone(), val));
                }
                Ok(Row { columns })
            })
            .map_err(|e| SQLError::Query(e.to_string()))?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row.map_err(|e| SQLError::Query(e.to_string()))?);
        }
        Ok(result)
    }

    fn exec(&self, sql: &str, params: &[Value]) -> Result<u64, SQLError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SQLError::Execution(e.to_string()))?;

        let bound = bind_params(params);
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            bound.iter().map(|b| b.as_ref()).collect();

        let affected = conn
            .execute(sql, param_refs.as_slice())
            .map_err(|e| SQLError::Execution(e.to_string()))?;

        Ok(affected as u64)
    }

    fn exec_batch(&self, sql: &str) -> Result<(), SQLError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SQLError::Execution(e.to_string()))?;
        conn.execute_batch(sql)
            .map_err(|e| SQLError::Execution(e.to_string()))
    }

    fn exec_txn(&self, stmts: &[Statement]) -> Result<bool, SQLError> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| SQLError::Transaction(e.to_string()))?;

        let txn = conn
            .transaction()
            .map_err(|e| SQLError::Transaction(e.to_string()))?;

        for stmt in stmts {
            let bound = bind_params(&stmt.params);
            let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                bound.iter().map(|b| b.as_ref()).collect();

            let affected = txn
                .execute(&stmt.sql, param_refs.as_slice())
                .map_err(|e| SQLError::Execution(e.to_string()))?;

            if stmt.guard && affected == 0 {
                tracing::debug!(sql = %stmt.sql, "txn guard missed, rolling back");
                txn.rollback()
                    .map_err(|e| SQLError::Transaction(e.to_string()))?;
                return Ok(false);
            }
        }

        txn.commit()
            .map_err(|e| SQLError::Transaction(e.to_string()))?;
        Ok(true)
    }
}

/// Extract a Value from a rusqlite row at a given column index.
fn row_value_at(row: &rusqlite::Row, idx: usize) -> Value {
    // Try integer first, then real, then text, then blob, then null.
    if let Ok(i) = row.get::<_, i64>(idx) {
        return Value::Integer(i);
    }
    if let Ok(f) = row.get::<_, f64>(idx) {
        return Value::Real(f);
    }
    if let Ok(s) = row.get::<_, String>(idx) {
        return Value::Text(s);
    }
    if let Ok(b) = row.get::<_, Vec<u8>>(idx) {
        return Value::Blob(b);
    }
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteStore {
        let s = SqliteStore::open_in_memory().unwrap();
        s.exec(
            "CREATE TABLE t (id TEXT PRIMARY KEY, status TEXT NOT NULL, n INTEGER NOT NULL)",
            &[],
        )
        .unwrap();
        s
    }

    #[test]
    fn exec_and_query() {
        let s = store();
        s.exec(
            "INSERT INTO t (id, status, n) VALUES (?1, ?2, ?3)",
            &[
                Value::Text("a".into()),
                Value::Text("PENDING".into()),
                Value::Integer(1),
            ],
        )
        .unwrap();

        let rows = s
            .query("SELECT id, status, n FROM t", &[])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_str("id"), Some("a"));
        assert_eq!(rows[0].get_str("status"), Some("PENDING"));
        assert_eq!(rows[0].get_i64("n"), Some(1));
    }

    #[test]
    fn txn_commits_when_guards_hold() {
        let s = store();
        s.exec(
            "INSERT INTO t (id, status, n) VALUES ('a', 'PENDING', 0)",
            &[],
        )
        .unwrap();

        let applied = s
            .exec_txn(&[
                Statement::guard(
                    "UPDATE t SET status = 'DONE' WHERE id = 'a' AND status = 'PENDING'",
                    vec![],
                ),
                Statement::new(
                    "INSERT INTO t (id, status, n) VALUES ('b', 'NEW', 7)",
                    vec![],
                ),
            ])
            .unwrap();
        assert!(applied);

        let rows = s.query("SELECT status FROM t WHERE id = 'a'", &[]).unwrap();
        assert_eq!(rows[0].get_str("status"), Some("DONE"));
        let rows = s.query("SELECT n FROM t WHERE id = 'b'", &[]).unwrap();
        assert_eq!(rows[0].get_i64("n"), Some(7));
    }

    #[test]
    fn txn_rolls_back_everything_when_guard_misses() {
        let s = store();
        s.exec(
            "INSERT INTO t (id, status, n) VALUES ('a', 'DONE', 0)",
            &[],
        )
        .unwrap();

        let applied = s
            .exec_txn(&[
                // Insert runs first and would succeed on its own.
                Statement::new(
                    "INSERT INTO t (id, status, n) VALUES ('b', 'NEW', 7)",
                    vec![],
                ),
                // Guard misses: 'a' is no longer PENDING.
                Statement::guard(
                    "UPDATE t SET status = 'DONE' WHERE id = 'a' AND status = 'PENDING'",
                    vec![],
                ),
            ])
            .unwrap();
        assert!(!applied);

        // The earlier insert must have been rolled back too.
        let rows = s.query("SELECT id FROM t WHERE id = 'b'", &[]).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn txn_error_rolls_back() {
        let s = store();
        let result = s.exec_txn(&[
            Statement::new(
                "INSERT INTO t (id, status, n) VALUES ('x', 'NEW', 1)",
                vec![],
            ),
            Statement::new("INSERT INTO nonexistent VALUES (1)", vec![]),
        ]);
        assert!(result.is_err());

        // Dropping the failed transaction rolls back the first insert.
        let rows = s.query("SELECT id FROM t WHERE id = 'x'", &[]).unwrap();
        assert!(rows.is_empty());
    }
}
