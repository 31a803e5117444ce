use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, HarvestResult};

/// Names of the run-tracking tables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunTables {
    /// `(id generated, collector_name, collector_version, start_time)`
    pub runs: String,
    /// `(run_id, logs, errors, end_time)`
    pub results: String,
    /// `(run_id, table_name, num_rows_added)`
    pub rows_added: String,
}

impl Default for RunTables {
    fn default() -> Self {
        Self {
            runs: "collector_run".to_string(),
            results: "collector_run_result".to_string(),
            rows_added: "collector_run_rows_added".to_string(),
        }
    }
}

impl RunTables {
    /// Reject names that cannot be spliced into SQL as bare identifiers.
    pub fn validate(&self) -> HarvestResult<()> {
        for name in [&self.runs, &self.results, &self.rows_added] {
            if !is_identifier(name) {
                return Err(HarvestError::Config(format!(
                    "invalid run-tracking table name '{}'",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`, optionally schema-qualified with one dot
pub fn is_identifier(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.is_empty() || parts.len() > 2 {
        return false;
    }
    parts.iter().all(|part| {
        let mut chars = part.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            _ => false,
        }
    })
}
