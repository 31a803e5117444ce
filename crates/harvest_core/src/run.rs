use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, HarvestResult};

/// Store-assigned run identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub i64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a collector run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Nothing written yet
    NotStarted,

    /// Run row registered; collecting and inserting batches
    Running,

    /// Batch phase over; outcome being written
    Finalizing,

    /// Outcome written; the run is immutable
    Completed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::NotStarted => write!(f, "not_started"),
            RunState::Running => write!(f, "running"),
            RunState::Finalizing => write!(f, "finalizing"),
            RunState::Completed => write!(f, "completed"),
        }
    }
}

/// Rows added to one table during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowsAddedEntry {
    pub table_name: String,
    pub num_rows_added: u64,
}

impl RowsAddedEntry {
    pub fn new(table_name: impl Into<String>, num_rows_added: u64) -> Self {
        Self {
            table_name: table_name.into(),
            num_rows_added,
        }
    }
}

/// Per-table insert counts in first-seen table order.
///
/// Recording the same table twice adds to its existing entry, so the result
/// holds exactly one entry per distinct table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableCounts {
    entries: Vec<RowsAddedEntry>,
}

impl TableCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, table: &str, rows: u64) {
        match self.entries.iter_mut().find(|e| e.table_name == table) {
            Some(entry) => entry.num_rows_added += rows,
            None => self.entries.push(RowsAddedEntry::new(table, rows)),
        }
    }

    pub fn entries(&self) -> &[RowsAddedEntry] {
        &self.entries
    }

    pub fn total(&self) -> u64 {
        self.entries.iter().map(|e| e.num_rows_added).sum()
    }

    pub fn into_entries(self) -> Vec<RowsAddedEntry> {
        self.entries
    }
}

/// A failure captured during the batch phase, stored as the run's error text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedError {
    /// One-line message with the cause chain
    pub message: String,

    /// Message, cause chain and backtrace (when one was captured)
    pub detail: String,
}

impl CapturedError {
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        Self {
            message: format!("{:#}", err),
            detail: format!("{:?}", err),
        }
    }

    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let text = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        let message = format!("collector panicked: {}", text);
        Self {
            detail: message.clone(),
            message,
        }
    }
}

impl fmt::Display for CapturedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Outcome of collecting and inserting batches
#[derive(Debug, Clone, PartialEq)]
pub enum BatchPhase {
    /// Every batch was inserted
    Succeeded { counts: TableCounts },

    /// Stopped at a failure; `counts` covers the batches inserted before it
    Failed {
        error: CapturedError,
        counts: TableCounts,
    },
}

impl BatchPhase {
    pub fn counts(&self) -> &TableCounts {
        match self {
            BatchPhase::Succeeded { counts } | BatchPhase::Failed { counts, .. } => counts,
        }
    }

    pub fn error(&self) -> Option<&CapturedError> {
        match self {
            BatchPhase::Succeeded { .. } => None,
            BatchPhase::Failed { error, .. } => Some(error),
        }
    }
}

/// One execution of a collector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Option<RunId>,
    pub collector_name: String,
    pub collector_version: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<CapturedError>,
    pub rows_added: Vec<RowsAddedEntry>,
    pub state: RunState,
}

impl Run {
    /// Create a run in `NotStarted` state, stamped with the current time
    pub fn new(collector_name: impl Into<String>, collector_version: impl Into<String>) -> Self {
        Self {
            id: None,
            collector_name: collector_name.into(),
            collector_version: collector_version.into(),
            start_time: Utc::now(),
            end_time: None,
            error: None,
            rows_added: Vec::new(),
            state: RunState::NotStarted,
        }
    }

    /// NotStarted -> Running, once the store has assigned an id
    pub fn mark_running(&mut self, id: RunId) -> HarvestResult<()> {
        self.transition(RunState::NotStarted, RunState::Running)?;
        self.id = Some(id);
        Ok(())
    }

    /// Running -> Finalizing, absorbing the batch phase outcome
    pub fn mark_finalizing(&mut self, phase: BatchPhase) -> HarvestResult<()> {
        self.transition(RunState::Running, RunState::Finalizing)?;
        let (error, counts) = match phase {
            BatchPhase::Succeeded { counts } => (None, counts),
            BatchPhase::Failed { error, counts } => (Some(error), counts),
        };
        self.error = error;
        self.rows_added = counts.into_entries();
        self.end_time = Some(Utc::now());
        Ok(())
    }

    /// Finalizing -> Completed, after the outcome has been written
    pub fn mark_completed(&mut self) -> HarvestResult<()> {
        self.transition(RunState::Finalizing, RunState::Completed)
    }

    fn transition(&mut self, from: RunState, to: RunState) -> HarvestResult<()> {
        if self.state != from {
            return Err(HarvestError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    pub fn succeeded(&self) -> bool {
        self.state == RunState::Completed && self.error.is_none()
    }

    /// Get duration in milliseconds (if finished)
    pub fn duration_ms(&self) -> Option<u64> {
        let end = self.end_time?;
        let millis = end.signed_duration_since(self.start_time).num_milliseconds();
        Some(millis.max(0) as u64)
    }
}
