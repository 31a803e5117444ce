//! Table-scoped units of work produced by collectors.

use crate::error::{HarvestError, HarvestResult};
use crate::value::{IntoRow, SqlValue};

/// Multi-row placeholder expanded by `insert_many`.
pub const VALUES_PLACEHOLDER: &str = "%s";

/// A group of rows destined for one table, with the statement that inserts them.
///
/// Checked at construction:
/// - the template carries exactly one `%s` placeholder after `VALUES`
/// - every row has the same number of values
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    table: String,
    template: String,
    rows: Vec<Vec<SqlValue>>,
}

impl Batch {
    pub fn new<R, I>(
        table: impl Into<String>,
        template: impl Into<String>,
        rows: I,
    ) -> HarvestResult<Self>
    where
        R: IntoRow,
        I: IntoIterator<Item = R>,
    {
        let table = table.into();
        let template = template.into();
        validate_template(&template)?;
        let rows: Vec<Vec<SqlValue>> = rows.into_iter().map(IntoRow::into_row).collect();
        check_arity(&table, &rows)?;
        Ok(Self {
            table,
            template,
            rows,
        })
    }

    /// A batch with no rows; still reported in the run's per-table counts.
    pub fn empty(table: impl Into<String>, template: impl Into<String>) -> HarvestResult<Self> {
        Self::new(table, template, Vec::<Vec<SqlValue>>::new())
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn rows(&self) -> &[Vec<SqlValue>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of values per row, `None` for an empty batch
    pub fn arity(&self) -> Option<usize> {
        self.rows.first().map(Vec::len)
    }
}

/// Split a template around its single `VALUES %s` placeholder.
pub(crate) fn split_template(template: &str) -> HarvestResult<(&str, &str)> {
    let mut matches = template.match_indices(VALUES_PLACEHOLDER);
    let (idx, _) = matches.next().ok_or_else(|| {
        HarvestError::Template(format!("missing '{}' placeholder: {}", VALUES_PLACEHOLDER, template))
    })?;
    if matches.next().is_some() {
        return Err(HarvestError::Template(format!(
            "more than one '{}' placeholder: {}",
            VALUES_PLACEHOLDER, template
        )));
    }
    let (head, tail) = template.split_at(idx);
    let values_kw = head.trim_end().to_ascii_uppercase();
    if !values_kw.ends_with("VALUES") {
        return Err(HarvestError::Template(format!(
            "placeholder must follow VALUES: {}",
            template
        )));
    }
    Ok((head, &tail[VALUES_PLACEHOLDER.len()..]))
}

pub(crate) fn validate_template(template: &str) -> HarvestResult<()> {
    split_template(template).map(|_| ())
}

pub(crate) fn check_arity(table: &str, rows: &[Vec<SqlValue>]) -> HarvestResult<()> {
    let Some(expected) = rows.first().map(Vec::len) else {
        return Ok(());
    };
    if expected == 0 {
        return Err(HarvestError::Arity {
            table: table.to_string(),
            row_index: 0,
            expected: 1,
            found: 0,
        });
    }
    for (row_index, row) in rows.iter().enumerate() {
        if row.len() != expected {
            return Err(HarvestError::Arity {
                table: table.to_string(),
                row_index,
                expected,
                found: row.len(),
            });
        }
    }
    Ok(())
}
