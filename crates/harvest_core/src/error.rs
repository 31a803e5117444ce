use crate::run::RunState;

/// Result type for store and harness operations
pub type HarvestResult<T> = Result<T, HarvestError>;

/// Error type for store and harness operations
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    /// The store could not be reached or rejected the credentials.
    #[error("connection failed: {0}")]
    Connection(String),

    /// A statement failed to execute.
    #[error("query failed: {message} (sql: {sql})")]
    Query { sql: String, message: String },

    /// A result column could not be decoded into a `SqlValue`.
    #[error("cannot decode column '{column}': {message}")]
    Decode { column: String, message: String },

    /// An insert template does not carry exactly one `VALUES %s` placeholder.
    #[error("invalid insert template: {0}")]
    Template(String),

    /// A row's arity differs from the other rows in its batch.
    #[error("row {row_index} for table '{table}' has {found} values, expected {expected}")]
    Arity {
        table: String,
        row_index: usize,
        expected: usize,
        found: usize,
    },

    /// Transaction control (begin/commit/savepoint) failed.
    #[error("transaction failed: {0}")]
    Transaction(String),

    /// A session was requested while another one still holds the connection.
    #[error("store '{0}' already has an open session")]
    SessionBusy(String),

    /// A run lifecycle transition was attempted out of order.
    #[error("invalid run transition from {from} to {to}")]
    InvalidTransition { from: RunState, to: RunState },

    /// The store did not return the generated run id.
    #[error("run registration returned no id")]
    MissingRunId,

    /// Configuration is incomplete or malformed.
    #[error("configuration error: {0}")]
    Config(String),
}

impl HarvestError {
    pub fn query(sql: &str, err: impl std::fmt::Display) -> Self {
        Self::Query {
            sql: sql.to_string(),
            message: err.to_string(),
        }
    }

    /// Whether the error means the store itself is unavailable.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}
