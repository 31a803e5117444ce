use std::sync::Arc;

use harvest_core::{
    command_tag, Dialect, HarvestError, HarvestResult, QueryResult, Session, SqlValue, Store,
};
use postgres::{Client, NoTls};
use postgres_types::ToSql;

use crate::config::PgConfig;
use crate::params::{decode_row, PgParam};

/// PostgreSQL store: every session is a fresh connection running one transaction.
pub struct PostgresStore {
    config: PgConfig,
    client_config: postgres::Config,
    name: String,
}

impl PostgresStore {
    pub fn new(config: PgConfig) -> HarvestResult<Self> {
        config.validate()?;
        let client_config = config.to_client_config();
        let name = config.display_name();
        Ok(Self {
            config,
            client_config,
            name,
        })
    }

    pub fn config(&self) -> &PgConfig {
        &self.config
    }
}

impl Store for PostgresStore {
    fn store_name(&self) -> &str {
        &self.name
    }

    fn open_session(&self) -> HarvestResult<Box<dyn Session + '_>> {
        let mut client = self
            .client_config
            .connect(NoTls)
            .map_err(|e| HarvestError::Connection(format!("{}: {}", self.name, e)))?;
        client
            .batch_execute("BEGIN")
            .map_err(|e| HarvestError::Transaction(format!("begin: {}", e)))?;
        tracing::debug!(store = %self.name, "postgres session opened");
        Ok(Box::new(PostgresSession {
            client,
            committed: false,
        }))
    }
}

pub struct PostgresSession {
    client: Client,
    committed: bool,
}

impl Session for PostgresSession {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> HarvestResult<QueryResult> {
        let statement = self
            .client
            .prepare(sql)
            .map_err(|e| HarvestError::query(sql, e))?;
        let bound: Vec<PgParam<'_>> = params.iter().map(PgParam).collect();
        let refs: Vec<&(dyn ToSql + Sync)> =
            bound.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        if statement.columns().is_empty() {
            let affected = self
                .client
                .execute(&statement, &refs)
                .map_err(|e| HarvestError::query(sql, e))?;
            return Ok(QueryResult::without_rows(command_tag(sql, affected), affected));
        }

        let colnames: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let columns: Arc<[String]> = colnames.clone().into();
        let pg_rows = self
            .client
            .query(&statement, &refs)
            .map_err(|e| HarvestError::query(sql, e))?;
        let rows = pg_rows
            .iter()
            .map(|row| decode_row(row, &columns))
            .collect::<HarvestResult<Vec<_>>>()?;

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
        self.client
            .batch_execute(sql)
            .map_err(|e| HarvestError::query(sql, e))
    }

    fn commit(mut self: Box<Self>) -> HarvestResult<()> {
        self.client
            .batch_execute("COMMIT")
            .map_err(|e| HarvestError::Transaction(format!("commit: {}", e)))?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PostgresSession {
    fn drop(&mut self) {
        if self.committed || self.client.is_closed() {
            return;
        }
        if let Err(err) = self.client.batch_execute("ROLLBACK") {
            tracing::warn!(error = %err, "postgres rollback failed");
        }
    }
}
