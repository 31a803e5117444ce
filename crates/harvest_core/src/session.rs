//! Store sessions and the bulk insertion primitive.
//!
//! A `Store` hands out short-lived `Session`s. Each session is one transaction:
//! `with_session` commits when the closure succeeds and otherwise drops the
//! session, which rolls back and releases the connection. Backends must roll
//! back in `Drop` so panics and early returns never leave a transaction open.

use crate::batch::{check_arity, split_template};
use crate::error::{HarvestError, HarvestResult};
use crate::value::{QueryResult, SqlValue};

/// Placeholder syntax and bind-parameter ceiling of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `$1, $2, ...`
    Postgres,
    /// `?1, ?2, ...`
    Sqlite,
}

impl Dialect {
    /// Placeholder for the 1-based parameter `index`
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", index),
            Dialect::Sqlite => format!("?{}", index),
        }
    }

    /// Comma-separated placeholders `start..start + count`
    pub fn placeholders(&self, start: usize, count: usize) -> String {
        (start..start + count)
            .map(|i| self.placeholder(i))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Maximum bind parameters accepted in one statement
    pub fn max_params(&self) -> usize {
        match self {
            Dialect::Postgres => 65_535,
            Dialect::Sqlite => 32_766,
        }
    }
}

/// One transaction on one connection
pub trait Session {
    fn dialect(&self) -> Dialect;

    /// Execute a statement and fetch every result row.
    ///
    /// Statements without a result set return empty `rows` and `colnames`.
    fn query(&mut self, sql: &str, params: &[SqlValue]) -> HarvestResult<QueryResult>;

    /// Execute a statement, returning the number of rows affected.
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> HarvestResult<u64>;

    /// Execute parameterless transaction-control SQL (savepoints).
    fn execute_raw(&mut self, sql: &str) -> HarvestResult<()>;

    /// Commit and release the connection.
    fn commit(self: Box<Self>) -> HarvestResult<()>;
}

/// A source of sessions
pub trait Store {
    /// Human-readable name for logging
    fn store_name(&self) -> &str;

    /// Acquire a connection and begin a transaction.
    fn open_session(&self) -> HarvestResult<Box<dyn Session + '_>>;
}

/// Run `f` inside a fresh session, committing on success.
///
/// On error the session is dropped, which rolls back and releases it.
pub fn with_session<T, E, F>(store: &dyn Store, f: F) -> Result<T, E>
where
    F: FnOnce(&mut dyn Session) -> Result<T, E>,
    E: From<HarvestError>,
{
    let mut session = store.open_session()?;
    let value = f(session.as_mut())?;
    session.commit()?;
    Ok(value)
}

/// Run `f` inside a savepoint of the current session.
///
/// A failure rolls back to the savepoint, leaving the enclosing transaction
/// usable for the statements that follow.
pub fn with_savepoint<T, F>(session: &mut dyn Session, name: &str, f: F) -> HarvestResult<T>
where
    F: FnOnce(&mut dyn Session) -> HarvestResult<T>,
{
    session.execute_raw(&format!("SAVEPOINT {}", name))?;
    match f(&mut *session) {
        Ok(value) => {
            session.execute_raw(&format!("RELEASE SAVEPOINT {}", name))?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = session.execute_raw(&format!("ROLLBACK TO SAVEPOINT {}", name))
            {
                tracing::warn!(savepoint = name, error = %rollback_err, "rollback to savepoint failed");
            } else if let Err(release_err) =
                session.execute_raw(&format!("RELEASE SAVEPOINT {}", name))
            {
                tracing::warn!(savepoint = name, error = %release_err, "release savepoint failed");
            }
            Err(err)
        }
    }
}

/// Insert `rows` with a `... VALUES %s ...` template.
///
/// Empty `rows` issue no statement and return 0. Otherwise the placeholder is
/// expanded to one parameter tuple per row and the rows go out as a single
/// statement, split only where the dialect's bind-parameter ceiling forces it.
/// Returns the total number of rows the store reports as inserted; rows skipped
/// by an `ON CONFLICT DO NOTHING` clause are not counted.
pub fn insert_many(
    session: &mut dyn Session,
    template: &str,
    rows: &[Vec<SqlValue>],
) -> HarvestResult<u64> {
    let (head, tail) = split_template(template)?;
    if rows.is_empty() {
        return Ok(0);
    }
    check_arity(table_hint(head), rows)?;

    let arity = rows[0].len();
    let dialect = session.dialect();
    let rows_per_statement = (dialect.max_params() / arity).max(1);

    let mut inserted = 0u64;
    for chunk in rows.chunks(rows_per_statement) {
        let sql = expand_values(dialect, head, tail, arity, chunk.len());
        let params: Vec<SqlValue> = chunk.iter().flatten().cloned().collect();
        inserted += session.execute(&sql, &params)?;
    }
    Ok(inserted)
}

/// Render `head (p1, p2), (p3, p4) tail` for `row_count` rows of `arity` values.
pub fn expand_values(
    dialect: Dialect,
    head: &str,
    tail: &str,
    arity: usize,
    row_count: usize,
) -> String {
    let mut sql = String::with_capacity(head.len() + tail.len() + row_count * arity * 5);
    sql.push_str(head);
    for row in 0..row_count {
        if row > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        sql.push_str(&dialect.placeholders(row * arity + 1, arity));
        sql.push(')');
    }
    sql.push_str(tail);
    sql
}

/// Best-effort table name from `INSERT INTO <table> ...`, for error messages.
fn table_hint(head: &str) -> &str {
    let mut words = head.split_whitespace();
    while let Some(word) = words.next() {
        if word.eq_ignore_ascii_case("into") {
            if let Some(table) = words.next() {
                return table.split('(').next().unwrap_or(table);
            }
        }
    }
    "<unknown>"
}


#[cfg(test)]
mod tests {
    use super::testing::{Call, RecordingStore};
    use super::*;

    #[test]
    fn test_placeholders_by_dialect() {
        assert_eq!(Dialect::Postgres.placeholders(1, 3), "$1, $2, $3");
        assert_eq!(Dialect::Sqlite.placeholders(4, 2), "?4, ?5");
    }

    #[test]
    fn test_expand_values() {
        let sql = expand_values(
            Dialect::Postgres,
            "INSERT INTO users (id, name) VALUES ",
            " ON CONFLICT DO NOTHING",
            2,
            3,
        );
        assert_eq!(
            sql,
            "INSERT INTO users (id, name) VALUES ($1, $2), ($3, $4), ($5, $6) ON CONFLICT DO NOTHING"
        );
    }

    #[test]
    fn test_insert_many_empty_issues_no_statement() {
        let store = RecordingStore::new();
        let inserted = with_session(&store, |session| {
            insert_many(session, "INSERT INTO logs (line) VALUES %s", &[])
        })
        .unwrap();

        assert_eq!(inserted, 0);
        assert!(store.executes().is_empty());
    }

    #[test]
    fn test_insert_many_sends_single_statement() {
        let store = RecordingStore::new();
        let rows = vec![
            vec![SqlValue::Int(1), SqlValue::from("a")],
            vec![SqlValue::Int(2), SqlValue::from("b")],
        ];
        with_session(&store, |session| {
            insert_many(
                session,
                "INSERT INTO users (id, name) VALUES %s ON CONFLICT DO NOTHING",
                &rows,
            )
        })
        .unwrap();

        let executes = store.executes();
        assert_eq!(executes.len(), 1);
        assert_eq!(
            executes[0].0,
            "INSERT INTO users (id, name) VALUES ($1, $2), ($3, $4) ON CONFLICT DO NOTHING"
        );
        assert_eq!(executes[0].1.len(), 4);
    }

    #[test]
    fn test_insert_many_splits_at_param_ceiling() {
        let store = RecordingStore::new();
        let arity = 5;
        let rows_per_statement = Dialect::Postgres.max_params() / arity;
        let rows: Vec<Vec<SqlValue>> = (0..rows_per_statement + 1)
            .map(|i| vec![SqlValue::Int(i as i64); arity])
            .collect();

        with_session(&store, |session| {
            insert_many(session, "INSERT INTO t (a, b, c, d, e) VALUES %s", &rows)
        })
        .unwrap();

        let executes = store.executes();
        assert_eq!(executes.len(), 2);
        assert_eq!(executes[0].1.len(), rows_per_statement * arity);
        assert_eq!(executes[1].1.len(), arity);
    }

    #[test]
    fn test_insert_many_rejects_bad_template_even_when_empty() {
        let store = RecordingStore::new();
        let result = with_session(&store, |session| {
            insert_many(session, "INSERT INTO t (a) VALUES ($1)", &[])
        });
        assert!(matches!(result, Err(HarvestError::Template(_))));
    }

    #[test]
    fn test_insert_many_rejects_ragged_rows() {
        let store = RecordingStore::new();
        let rows = vec![vec![SqlValue::Int(1), SqlValue::Int(2)], vec![SqlValue::Int(3)]];
        let result = with_session(&store, |session| {
            insert_many(session, "INSERT INTO pairs (a, b) VALUES %s", &rows)
        });
        match result {
            Err(HarvestError::Arity { table, .. }) => assert_eq!(table, "pairs"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(store.executes().is_empty());
    }

    #[test]
    fn test_with_session_commits_on_success() {
        let store = RecordingStore::new();
        with_session(&store, |session| session.execute("SELECT 1", &[])).unwrap();
        assert_eq!(
            store.calls(),
            vec![
                Call::Open,
                Call::Execute("SELECT 1".to_string(), vec![]),
                Call::Commit
            ]
        );
    }

    #[test]
    fn test_with_session_rolls_back_on_error() {
        let store = RecordingStore::new();
        let result: HarvestResult<()> = with_session(&store, |_session| {
            Err(HarvestError::Config("boom".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(store.calls(), vec![Call::Open, Call::Rollback]);
    }

    #[test]
    fn test_with_session_propagates_connection_error() {
        let store = RecordingStore::new();
        store.fail_open_after(0);
        let result = with_session(&store, |session| session.execute("SELECT 1", &[]));
        assert!(matches!(result, Err(HarvestError::Connection(_))));
        assert!(store.calls().is_empty());
    }

    #[test]
    fn test_savepoint_rolls_back_only_failed_work() {
        let store = RecordingStore::new();
        store.fail_execute_containing("broken");
        with_session(&store, |session| {
            with_savepoint(session, "sp", |s| s.execute("INSERT INTO ok VALUES (1)", &[]))?;
            let failed = with_savepoint(session, "sp", |s| s.execute("INSERT INTO broken VALUES (1)", &[]));
            assert!(failed.is_err());
            Ok::<_, HarvestError>(())
        })
        .unwrap();

        let calls = store.calls();
        assert!(calls.contains(&Call::Raw("ROLLBACK TO SAVEPOINT sp".to_string())));
        assert_eq!(calls.last(), Some(&Call::Commit));
    }

    #[test]
    fn test_table_hint() {
        assert_eq!(table_hint("INSERT INTO users (id) VALUES "), "users");
        assert_eq!(table_hint("insert into logs(line) values "), "logs");
        assert_eq!(table_hint("VALUES "), "<unknown>");
    }
}
