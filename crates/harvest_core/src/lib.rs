mod batch;
mod config;
mod error;
mod harness;
mod run;
pub mod session;
mod value;

pub use batch::{Batch, VALUES_PLACEHOLDER};
pub use config::{is_identifier, RunTables};
pub use error::{HarvestError, HarvestResult};
pub use harness::{recent_runs, Collector, Harness, RunContext, RunLog, RunReport, RunSummary};
pub use run::{
    BatchPhase, CapturedError, RowsAddedEntry, Run, RunId, RunState, TableCounts,
};
pub use session::{
    expand_values, insert_many, with_savepoint, with_session, Dialect, Session, Store,
};
pub use value::{command_tag, IntoRow, QueryResult, Row, SqlValue};
