//! Run-tracking harness.
//!
//! `Harness::run` drives one collector execution through
//! `NotStarted -> Running -> Finalizing -> Completed`, using three independent
//! sessions: one to register the run, one for the batch inserts, one to write
//! the outcome. A crash between the first and last leaves a run row with no
//! result row, which `recent_runs` reports as unfinished.

use std::panic::{self, AssertUnwindSafe};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::batch::Batch;
use crate::config::RunTables;
use crate::error::{HarvestError, HarvestResult};
use crate::run::{BatchPhase, CapturedError, RowsAddedEntry, Run, RunId, TableCounts};
use crate::session::{insert_many, with_savepoint, with_session, Session, Store};
use crate::value::{IntoRow, QueryResult, SqlValue};

const BATCH_SAVEPOINT: &str = "harvest_batch";

/// The pluggable fetch + transform step of a run
pub trait Collector {
    /// Stable identifier across versions
    fn name(&self) -> &str;

    /// Free-form version, stored verbatim on the run row
    fn version(&self) -> &str;

    /// Produce the batches to insert, in insertion order.
    fn collect(&mut self, ctx: &mut RunContext<'_>) -> anyhow::Result<Vec<Batch>>;
}

/// Transcript of a run: printed as it is written, persisted at finalization
#[derive(Debug, Clone)]
pub struct RunLog {
    collector: String,
    run_id: Option<RunId>,
    lines: Vec<String>,
}

impl RunLog {
    pub fn new(collector: impl Into<String>) -> Self {
        Self {
            collector: collector.into(),
            run_id: None,
            lines: Vec::new(),
        }
    }

    pub fn set_run_id(&mut self, run_id: RunId) {
        self.run_id = Some(run_id);
    }

    pub fn log(&mut self, message: impl AsRef<str>) {
        let message = message.as_ref();
        match self.run_id {
            Some(run_id) => {
                tracing::info!(collector = %self.collector, run_id = run_id.0, "{}", message)
            }
            None => tracing::info!(collector = %self.collector, "{}", message),
        }
        let stamp = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
        self.lines.push(format!("{} {}", stamp, message));
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Lines joined with newlines, as stored on the result row
    pub fn transcript(&self) -> String {
        self.lines.join("\n")
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

/// What a collector can reach while it runs
pub struct RunContext<'a> {
    store: &'a dyn Store,
    log: &'a mut RunLog,
}

impl<'a> RunContext<'a> {
    pub fn new(store: &'a dyn Store, log: &'a mut RunLog) -> Self {
        Self { store, log }
    }

    /// Append to the run transcript.
    pub fn log(&mut self, message: impl AsRef<str>) {
        self.log.log(message);
    }

    pub fn store(&self) -> &dyn Store {
        self.store
    }

    /// Run a read query in its own short-lived session.
    pub fn query(&self, sql: &str, params: &[SqlValue]) -> HarvestResult<QueryResult> {
        with_session(self.store, |session| session.query(sql, params))
    }
}

/// A finished run and its transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run: Run,
    pub logs: Vec<String>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.run.succeeded()
    }
}

/// Executes collectors against a store, recording each run
pub struct Harness<'s> {
    store: &'s dyn Store,
    tables: RunTables,
}

impl<'s> Harness<'s> {
    pub fn new(store: &'s dyn Store, tables: RunTables) -> HarvestResult<Self> {
        tables.validate()?;
        Ok(Self { store, tables })
    }

    pub fn tables(&self) -> &RunTables {
        &self.tables
    }

    /// Execute `collector` once.
    ///
    /// Failures while collecting or inserting are recorded on the run and do not
    /// surface here. Only run registration and finalization errors are returned.
    pub fn run(&self, collector: &mut dyn Collector) -> HarvestResult<RunReport> {
        let mut run = Run::new(collector.name(), collector.version());
        let mut log = RunLog::new(collector.name());

        let run_id = self.register_run(&run)?;
        run.mark_running(run_id)?;
        log.set_run_id(run_id);
        tracing::info!(
            collector = %run.collector_name,
            version = %run.collector_version,
            run_id = run_id.0,
            store = self.store.store_name(),
            "run started"
        );

        let phase = self.process_batches(collector, &mut log);
        if let Some(error) = phase.error() {
            tracing::error!(run_id = run_id.0, error = %error, "run failed; recording error");
            log.log(format!("Run failed: {}", error.message));
        }
        run.mark_finalizing(phase)?;

        self.finalize_run(&run, &log)?;
        run.mark_completed()?;
        tracing::info!(
            run_id = run_id.0,
            rows = run.rows_added.iter().map(|e| e.num_rows_added).sum::<u64>(),
            succeeded = run.succeeded(),
            duration_ms = run.duration_ms().unwrap_or(0),
            "run completed"
        );

        Ok(RunReport {
            run,
            logs: log.into_lines(),
        })
    }

    fn register_run(&self, run: &Run) -> HarvestResult<RunId> {
        with_session(self.store, |session| {
            let sql = format!(
                "INSERT INTO {} (collector_name, collector_version, start_time) VALUES ({}) RETURNING id",
                self.tables.runs,
                session.dialect().placeholders(1, 3)
            );
            let params = [
                SqlValue::from(run.collector_name.as_str()),
                SqlValue::from(run.collector_version.as_str()),
                SqlValue::Timestamp(run.start_time),
            ];
            let result = session.query(&sql, &params)?;
            result
                .first()
                .and_then(|row| row.get_i64("id"))
                .map(RunId)
                .ok_or(HarvestError::MissingRunId)
        })
    }

    fn process_batches(&self, collector: &mut dyn Collector, log: &mut RunLog) -> BatchPhase {
        let batches = match self.collect_batches(collector, log) {
            Ok(batches) => batches,
            Err(error) => {
                return BatchPhase::Failed {
                    error,
                    counts: TableCounts::new(),
                }
            }
        };

        let mut counts = TableCounts::new();
        let mut batch_error = None;
        let outcome = with_session(self.store, |session| {
            batch_error = insert_batches(session, &batches, &mut counts, log);
            Ok::<_, HarvestError>(())
        });

        match (outcome, batch_error) {
            (Ok(()), None) => BatchPhase::Succeeded { counts },
            (Ok(()), Some(error)) => BatchPhase::Failed { error, counts },
            // Session never opened or the commit failed: nothing was kept.
            (Err(err), first) => {
                let mut err = anyhow::Error::new(err).context("inserting batches");
                if let Some(first) = first {
                    err = err.context(first.message);
                }
                BatchPhase::Failed {
                    error: CapturedError::from_anyhow(&err),
                    counts: TableCounts::new(),
                }
            }
        }
    }

    fn collect_batches(
        &self,
        collector: &mut dyn Collector,
        log: &mut RunLog,
    ) -> Result<Vec<Batch>, CapturedError> {
        let mut ctx = RunContext::new(self.store, log);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| collector.collect(&mut ctx)));
        match outcome {
            Ok(Ok(batches)) => Ok(batches),
            Ok(Err(err)) => Err(CapturedError::from_anyhow(&err)),
            Err(payload) => Err(CapturedError::from_panic(payload.as_ref())),
        }
    }

    fn finalize_run(&self, run: &Run, log: &RunLog) -> HarvestResult<()> {
        let run_id = run.id.ok_or(HarvestError::MissingRunId)?;
        let end_time = run.end_time.unwrap_or_else(Utc::now);
        let errors = SqlValue::from(run.error.as_ref().map(|e| e.detail.clone()));

        with_session(self.store, |session| {
            let sql = format!(
                "INSERT INTO {} (run_id, logs, errors, end_time) VALUES ({})",
                self.tables.results,
                session.dialect().placeholders(1, 4)
            );
            session.execute(
                &sql,
                &[
                    SqlValue::Int(run_id.0),
                    SqlValue::Text(log.transcript()),
                    errors,
                    SqlValue::Timestamp(end_time),
                ],
            )?;

            let rows: Vec<Vec<SqlValue>> = run
                .rows_added
                .iter()
                .map(|e| (run_id.0, e.table_name.as_str(), e.num_rows_added as i64).into_row())
                .collect();
            let template = format!(
                "INSERT INTO {} (run_id, table_name, num_rows_added) VALUES %s",
                self.tables.rows_added
            );
            insert_many(session, &template, &rows)?;
            Ok(())
        })
    }
}

/// Insert each batch under its own savepoint, stopping at the first failure.
fn insert_batches(
    session: &mut dyn Session,
    batches: &[Batch],
    counts: &mut TableCounts,
    log: &mut RunLog,
) -> Option<CapturedError> {
    for batch in batches {
        log.log(format!(
            "Inserting {} rows into {}.",
            batch.len(),
            batch.table()
        ));
        let inserted = with_savepoint(session, BATCH_SAVEPOINT, |s| {
            insert_many(s, batch.template(), batch.rows())
        });
        match inserted {
            Ok(rows) => {
                counts.record(batch.table(), rows);
                log.log(format!("{} rows inserted into {}.", rows, batch.table()));
            }
            Err(err) => {
                let err = anyhow::Error::new(err).context(format!("inserting into {}", batch.table()));
                log.log(format!("Insert into {} failed.", batch.table()));
                return Some(CapturedError::from_anyhow(&err));
            }
        }
    }
    None
}

/// A past run as read back from the tracking tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: RunId,
    pub collector_name: String,
    pub collector_version: String,
    pub start_time: Option<DateTime<Utc>>,
    /// `None` when the run never reached finalization
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub rows_added: Vec<RowsAddedEntry>,
}

impl RunSummary {
    pub fn finished(&self) -> bool {
        self.end_time.is_some()
    }

    pub fn status(&self) -> &'static str {
        match (self.finished(), self.error.is_some()) {
            (false, _) => "unfinished",
            (true, true) => "failed",
            (true, false) => "succeeded",
        }
    }
}

/// Latest `limit` runs, newest first.
pub fn recent_runs(
    store: &dyn Store,
    tables: &RunTables,
    limit: usize,
) -> HarvestResult<Vec<RunSummary>> {
    tables.validate()?;
    with_session(store, |session| {
        let sql = format!(
            "SELECT r.id, r.collector_name, r.collector_version, r.start_time, \
             res.end_time, res.errors \
             FROM {} r LEFT JOIN {} res ON res.run_id = r.id \
             ORDER BY r.id DESC LIMIT {}",
            tables.runs,
            tables.results,
            session.dialect().placeholder(1)
        );
        let result = session.query(&sql, &[SqlValue::Int(limit as i64)])?;

        let mut summaries = Vec::with_capacity(result.rows.len());
        for row in &result.rows {
            let id = row.get_i64("id").ok_or(HarvestError::MissingRunId)?;
            summaries.push(RunSummary {
                id: RunId(id),
                collector_name: row.get_str("collector_name").unwrap_or_default().to_string(),
                collector_version: row
                    .get_str("collector_version")
                    .unwrap_or_default()
                    .to_string(),
                start_time: row.get("start_time").and_then(timestamp_of),
                end_time: row.get("end_time").and_then(timestamp_of),
                error: row.get_str("errors").map(str::to_string),
                rows_added: Vec::new(),
            });
        }
        if summaries.is_empty() {
            return Ok(summaries);
        }

        let dialect = session.dialect();
        let ids: Vec<SqlValue> = summaries.iter().map(|s| SqlValue::Int(s.id.0)).collect();
        let sql = format!(
            "SELECT run_id, table_name, num_rows_added FROM {} WHERE run_id IN ({}) ORDER BY run_id, table_name",
            tables.rows_added,
            dialect.placeholders(1, ids.len())
        );
        let counts = session.query(&sql, &ids)?;
        for row in &counts.rows {
            let (Some(run_id), Some(table)) = (row.get_i64("run_id"), row.get_str("table_name"))
            else {
                continue;
            };
            let rows = row.get_i64("num_rows_added").unwrap_or(0).max(0) as u64;
            if let Some(summary) = summaries.iter_mut().find(|s| s.id.0 == run_id) {
                summary.rows_added.push(RowsAddedEntry::new(table, rows));
            }
        }
        Ok(summaries)
    })
}

/// Timestamps come back typed from Postgres and as RFC 3339 text from SQLite.
fn timestamp_of(value: &SqlValue) -> Option<DateTime<Utc>> {
    match value {
        SqlValue::Timestamp(ts) => Some(*ts),
        SqlValue::Text(text) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|ts| ts.with_timezone(&Utc)),
        _ => None,
    }
}
