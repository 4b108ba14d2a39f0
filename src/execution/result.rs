//! Query Result - tagged outcome of one query execution
//!
//! "Zero matching rows" and "the engine rejected the query" are different
//! values here. Callers that want the old behaviour collapse both to an empty
//! frame with [`QueryOutcome::into_frame_or_empty`].

use crate::error::{Result, SmartQueryError};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Rows produced by a successful query
#[derive(Debug, Clone)]
pub struct ResultTable {
    frame: DataFrame,
}

impl ResultTable {
    pub fn new(frame: DataFrame) -> Self {
        Self { frame }
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn into_frame(self) -> DataFrame {
        self.frame
    }

    pub fn columns(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    pub fn row_count(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    /// Rows as JSON objects, column name -> scalar
    pub fn to_json_rows(&self) -> Result<Vec<serde_json::Map<String, serde_json::Value>>> {
        let mut rows = Vec::with_capacity(self.frame.height());
        let columns = self.frame.get_columns();

        for row_idx in 0..self.frame.height() {
            let mut row = serde_json::Map::new();
            for series in columns {
                row.insert(series.name().to_string(), series_to_json_value(series, row_idx)?);
            }
            rows.push(row);
        }

        Ok(rows)
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({
            "columns": self.columns(),
            "rows": self.to_json_rows()?,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Nothing was executed (blank question, etc.)
    InvalidInput,
    /// Parse, planning or execution error from the engine
    Execution,
    /// Execution exceeded its time budget
    Timeout,
    /// The execution worker died before producing a result
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryFailure {
    pub kind: FailureKind,
    pub reason: String,
}

impl QueryFailure {
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for QueryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.reason)
    }
}

impl From<SmartQueryError> for QueryFailure {
    fn from(err: SmartQueryError) -> Self {
        let kind = match err {
            SmartQueryError::Timeout(_) => FailureKind::Timeout,
            SmartQueryError::InvalidInput(_) => FailureKind::InvalidInput,
            _ => FailureKind::Execution,
        };
        QueryFailure::new(kind, err.to_string())
    }
}

#[derive(Debug, Clone)]
pub enum QueryOutcome {
    Success(ResultTable),
    Failure(QueryFailure),
}

impl QueryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, QueryOutcome::Success(_))
    }

    pub fn table(&self) -> Option<&ResultTable> {
        match self {
            QueryOutcome::Success(table) => Some(table),
            QueryOutcome::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&QueryFailure> {
        match self {
            QueryOutcome::Success(_) => None,
            QueryOutcome::Failure(failure) => Some(failure),
        }
    }

    /// Zero rows, whether from a selective filter or a failure
    pub fn is_empty(&self) -> bool {
        self.table().map_or(true, |t| t.is_empty())
    }

    /// Result frame, or an empty frame when the query failed
    pub fn into_frame_or_empty(self) -> DataFrame {
        match self {
            QueryOutcome::Success(table) => table.into_frame(),
            QueryOutcome::Failure(_) => DataFrame::empty(),
        }
    }
}

fn series_to_json_value(series: &Series, row_idx: usize) -> Result<serde_json::Value> {
    let any_val = series
        .get(row_idx)
        .map_err(|e| SmartQueryError::Execution(format!("Failed to get value: {}", e)))?;

    let value = match any_val {
        AnyValue::Null => serde_json::Value::Null,
        AnyValue::Boolean(b) => serde_json::Value::Bool(b),
        AnyValue::String(s) => serde_json::Value::String(s.to_string()),
        AnyValue::Int8(i) => serde_json::Value::Number(i.into()),
        AnyValue::Int16(i) => serde_json::Value::Number(i.into()),
        AnyValue::Int32(i) => serde_json::Value::Number(i.into()),
        AnyValue::Int64(i) => serde_json::Value::Number(i.into()),
        AnyValue::UInt8(u) => serde_json::Value::Number(u.into()),
        AnyValue::UInt16(u) => serde_json::Value::Number(u.into()),
        AnyValue::UInt32(u) => serde_json::Value::Number(u.into()),
        AnyValue::UInt64(u) => serde_json::Value::Number(u.into()),
        AnyValue::Float32(f) => serde_json::Number::from_f64(f as f64)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        AnyValue::Float64(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        other => match other.get_str() {
            Some(s) => serde_json::Value::String(s.to_string()),
            None => serde_json::Value::String(other.to_string()),
        },
    };

    Ok(value)
}
