//! SQLite store for the harvest harness.
//!
//! One connection, guarded by a mutex. A session holds the lock for its whole
//! transaction, so a second session opened while the first is alive fails with
//! `HarvestError::SessionBusy` instead of deadlocking.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use harvest_core::{
    command_tag, Dialect, HarvestError, HarvestResult, QueryResult, Row, Session, SqlValue, Store,
};
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql};

#[derive(Debug)]
pub struct SqliteStore {
    name: String,
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a database file
    pub fn open<P: AsRef<Path>>(path: P) -> HarvestResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .map_err(|e| HarvestError::Connection(format!("{}: {}", path.display(), e)))?;
        tracing::debug!(path = %path.display(), "opened sqlite store");
        Ok(Self::from_connection(format!("sqlite:{}", path.display()), conn))
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> HarvestResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| HarvestError::Connection(format!(":memory:: {}", e)))?;
        Ok(Self::from_connection("sqlite::memory:".to_string(), conn))
    }

    fn from_connection(name: String, conn: Connection) -> Self {
        Self {
            name,
            conn: Mutex::new(conn),
        }
    }

    /// Run a multi-statement script (DDL, fixtures) in its own transaction.
    pub fn execute_script(&self, sql: &str) -> HarvestResult<()> {
        harvest_core::with_session(self, |session| session.execute_raw(sql))
    }
}

impl Store for SqliteStore {
    fn store_name(&self) -> &str {
        &self.name
    }

    fn open_session(&self) -> HarvestResult<Box<dyn Session + '_>> {
        let conn = match self.conn.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => {
                return Err(HarvestError::SessionBusy(self.name.clone()))
            }
            // A panic inside an earlier session; its Drop already rolled back.
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        conn.execute_batch("BEGIN")
            .map_err(|e| HarvestError::Transaction(format!("begin: {}", e)))?;
        Ok(Box::new(SqliteSession {
            conn,
            committed: false,
        }))
    }
}

pub struct SqliteSession<'a> {
    conn: MutexGuard<'a, Connection>,
    committed: bool,
}

impl Session for SqliteSession<'_> {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> HarvestResult<QueryResult> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| HarvestError::query(sql, e))?;
        let bound = params_from_iter(params.iter().map(SqliteParam));

        if stmt.column_count() == 0 {
            let affected = stmt.execute(bound).map_err(|e| HarvestError::query(sql, e))? as u64;
            return Ok(QueryResult::without_rows(command_tag(sql, affected), affected));
        }

        let colnames: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let columns: Arc<[String]> = colnames.clone().into();
        let mut rows = Vec::new();
        let mut cursor = stmt.query(bound).map_err(|e| HarvestError::query(sql, e))?;
        while let Some(row) = cursor.next().map_err(|e| HarvestError::query(sql, e))? {
            let mut values = Vec::with_capacity(colnames.len());
            for (idx, name) in colnames.iter().enumerate() {
                let cell = row.get_ref(idx).map_err(|e| HarvestError::Decode {
                    column: name.clone(),
                    message: e.to_string(),
                })?;
                values.push(decode(name, cell)?);
            }
            rows.push(Row::new(Arc::clone(&columns), values));
        }

        let rowcount = rows.len() as u64;
        Ok(QueryResult {
            rows,
            colnames,
            status_message: command_tag(sql, rowcount),
            rowcount,
        })
    }

    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> HarvestResult<u64> {
        self.query(sql, params).map(|result| result.rowcount)
    }

    fn execute_raw(&mut self, sql: &str) -> HarvestResult<()> {
        self.conn
            .execute_batch(sql)
            .map_err(|e| HarvestError::query(sql, e))
    }

    fn commit(mut self: Box<Self>) -> HarvestResult<()> {
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| HarvestError::Transaction(format!("commit: {}", e)))?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for SqliteSession<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(err) = self.conn.execute_batch("ROLLBACK") {
            tracing::warn!(error = %err, "sqlite rollback failed");
        }
    }
}

fn decode(column: &str, cell: ValueRef<'_>) -> HarvestResult<SqlValue> {
    Ok(match cell {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(v) => SqlValue::Int(v),
        ValueRef::Real(v) => SqlValue::Float(v),
        ValueRef::Text(bytes) => {
            let text = std::str::from_utf8(bytes).map_err(|e| HarvestError::Decode {
                column: column.to_string(),
                message: e.to_string(),
            })?;
            SqlValue::Text(text.to_string())
        }
        ValueRef::Blob(bytes) => SqlValue::Bytes(bytes.to_vec()),
    })
}

/// Binds a `SqlValue`; timestamps and JSON are stored as text.
struct SqliteParam<'a>(&'a SqlValue);

impl ToSql for SqliteParam<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self.0 {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Bool(v) => ToSqlOutput::Owned(Value::Integer(i64::from(*v))),
            SqlValue::Int(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            SqlValue::Float(v) => ToSqlOutput::Owned(Value::Real(*v)),
            SqlValue::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            SqlValue::Bytes(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
            SqlValue::Timestamp(v) => ToSqlOutput::Owned(Value::Text(v.to_rfc3339())),
            SqlValue::Json(v) => ToSqlOutput::Owned(Value::Text(v.to_string())),
        })
    }
}

#[cfg(test)]
mod tests {
    use harvest_core::{insert_many, with_session};

    use super::*;

    fn store_with(sql: &str) -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.execute_script(sql).unwrap();
        store
    }

    #[test]
    fn test_statement_without_result_set() {
        let store = SqliteStore::open_in_memory().unwrap();
        let result = with_session(&store, |s| {
            s.query("CREATE TABLE t (id INTEGER PRIMARY KEY)", &[])
        })
        .unwrap();
        assert!(result.rows.is_empty());
        assert!(result.colnames.is_empty());
        assert_eq!(result.status_message, "CREATE");
    }

    #[test]
    fn test_values_roundtrip_through_columns() {
        let store = store_with("CREATE TABLE v (i INTEGER, f REAL, t TEXT, b BLOB, n TEXT)");
        let result = with_session(&store, |s| {
            s.execute(
                "INSERT INTO v VALUES (?1, ?2, ?3, ?4, ?5)",
                &[
                    SqlValue::Int(3),
                    SqlValue::Float(0.5),
                    SqlValue::from("x"),
                    SqlValue::Bytes(vec![1, 2]),
                    SqlValue::Null,
                ],
            )?;
            s.query("SELECT i, f, t, b, n FROM v", &[])
        })
        .unwrap();

        assert_eq!(result.colnames, vec!["i", "f", "t", "b", "n"]);
        assert_eq!(result.status_message, "SELECT 1");
        let row = result.first().unwrap();
        assert_eq!(row.get_i64("i"), Some(3));
        assert_eq!(row.get("f"), Some(&SqlValue::Float(0.5)));
        assert_eq!(row.get_str("t"), Some("x"));
        assert_eq!(row.get("b"), Some(&SqlValue::Bytes(vec![1, 2])));
        assert!(row.get("n").unwrap().is_null());
    }

    #[test]
    fn test_bool_and_json_bind_as_sqlite_types() {
        let store = store_with("CREATE TABLE j (flag INTEGER, doc TEXT)");
        let result = with_session(&store, |s| {
            s.execute(
                "INSERT INTO j VALUES (?1, ?2)",
                &[SqlValue::Bool(true), SqlValue::Json(serde_json::json!({"k": 7}))],
            )?;
            s.query("SELECT flag, json_extract(doc, '$.k') AS k FROM j", &[])
        })
        .unwrap();
        let row = result.first().unwrap();
        assert_eq!(row.get_i64("flag"), Some(1));
        assert_eq!(row.get_i64("k"), Some(7));
    }

    #[test]
    fn test_insert_many_counts_conflicts_as_skipped() {
        let store = store_with("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)");
        let template = "INSERT INTO users (id, name) VALUES %s ON CONFLICT DO NOTHING";
        let rows = vec![
            vec![SqlValue::Int(1), SqlValue::from("a")],
            vec![SqlValue::Int(2), SqlValue::from("b")],
        ];

        let first = with_session(&store, |s| insert_many(s, template, &rows)).unwrap();
        let second = with_session(&store, |s| insert_many(s, template, &rows)).unwrap();
        assert_eq!(first, 2);
        assert_eq!(second, 0);
    }

    #[test]
    fn test_returning_goes_through_query_path() {
        let store = store_with("CREATE TABLE r (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT)");
        let result = with_session(&store, |s| {
            s.query("INSERT INTO r (name) VALUES (?1) RETURNING id", &[SqlValue::from("a")])
        })
        .unwrap();
        assert_eq!(result.first().and_then(|r| r.get_i64("id")), Some(1));
        assert_eq!(result.status_message, "INSERT 0 1");
    }

    #[test]
    fn test_failed_session_rolls_back() {
        let store = store_with("CREATE TABLE t (id INTEGER PRIMARY KEY)");
        let result: HarvestResult<()> = with_session(&store, |s| {
            s.execute("INSERT INTO t VALUES (1)", &[])?;
            s.execute("INSERT INTO missing VALUES (1)", &[])?;
            Ok(())
        });
        assert!(matches!(result, Err(HarvestError::Query { .. })));

        let count = with_session(&store, |s| s.query("SELECT COUNT(*) AS n FROM t", &[])).unwrap();
        assert_eq!(count.first().and_then(|r| r.get_i64("n")), Some(0));
    }

    #[test]
    fn test_nested_session_is_busy() {
        let store = SqliteStore::open_in_memory().unwrap();
        let _outer = store.open_session().unwrap();
        match store.open_session() {
            Err(HarvestError::SessionBusy(name)) => assert_eq!(name, "sqlite::memory:"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("nested session should be refused"),
        };
    }

    #[test]
    fn test_session_released_after_drop() {
        let store = SqliteStore::open_in_memory().unwrap();
        drop(store.open_session().unwrap());
        assert!(store.open_session().is_ok());
    }
}
