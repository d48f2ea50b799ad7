use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::ExecError;

/// Raw positional rows: row index -> column index -> value.
pub type RawRows = BTreeMap<usize, BTreeMap<usize, Value>>;

/// Tabular rows with a stable column order.
///
/// Columns are recorded in the order keys are first seen across the rows.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
}

impl RowSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push(&mut self, row: Map<String, Value>) {
        for key in row.keys() {
            if !self.columns.iter().any(|c| c == key) {
                self.columns.push(key.clone());
            }
        }
        self.rows.push(row);
    }

    /// Appends a JSON value: objects become one row, arrays one row per element,
    /// scalars a single row under the column `value`.
    pub fn push_value(&mut self, value: Value) {
        match value {
            Value::Object(row) => self.push(row),
            Value::Array(items) => {
                for item in items {
                    self.push_value(item);
                }
            }
            Value::Null => {}
            scalar => {
                let mut row = Map::new();
                row.insert("value".to_string(), scalar);
                self.push(row);
            }
        }
    }

    /// Positional view of the rows, following `columns`.
    pub fn to_raw(&self) -> RawRows {
        self.rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let cells = self
                    .columns
                    .iter()
                    .enumerate()
                    .map(|(j, col)| (j, row.get(col).cloned().unwrap_or(Value::Null)))
                    .collect();
                (i, cells)
            })
            .collect()
    }
}

impl FromIterator<Map<String, Value>> for RowSet {
    fn from_iter<T: IntoIterator<Item = Map<String, Value>>>(iter: T) -> Self {
        let mut rows = RowSet::new();
        for row in iter {
            rows.push(row);
        }
        rows
    }
}

/// The uniform result of executing a task, a graph or a plan.
///
/// The output layer only ever looks at this shape.
#[derive(Clone, Debug, Default)]
pub struct ExecutorOutput {
    pub rows: Option<RowSet>,
    pub body: Option<Value>,
    pub raw_rows: Option<RawRows>,
    pub messages: Vec<String>,
    pub error: Option<Arc<ExecError>>,
}

impl ExecutorOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn erroneous(err: impl Into<Arc<ExecError>>) -> Self {
        Self {
            error: Some(err.into()),
            ..Self::default()
        }
    }

    pub fn from_body(body: Value) -> Self {
        Self {
            body: Some(body),
            ..Self::default()
        }
    }

    pub fn from_rows(rows: RowSet) -> Self {
        Self {
            raw_rows: Some(rows.to_raw()),
            rows: Some(rows),
            ..Self::default()
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_messages<I, S>(mut self, messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.messages.extend(messages.into_iter().map(Into::into));
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error(&self) -> Option<&ExecError> {
        self.error.as_deref()
    }

    pub fn row_count(&self) -> usize {
        self.rows.as_ref().map_or(0, RowSet::len)
    }
}

impl From<ExecError> for ExecutorOutput {
    fn from(err: ExecError) -> Self {
        Self::erroneous(err)
    }
}
