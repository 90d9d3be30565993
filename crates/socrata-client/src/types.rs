//! Wire types for the Socrata views API.
//!
//! These types mirror the request and response structures of the
//! `columns.json` and inline `rows.json` endpoints.

use crate::error::{ClientError, Result};
use crate::expr::ResolvedFilter;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Substring the server puts in `message` when a request uses column ids
/// that no longer exist in the view.
pub const STALE_SCHEMA_MARKER: &str = "Cannot find column";

/// Label sent as the `name` of every inline filter.
pub const INLINE_FILTER_NAME: &str = "SoClient Inline Filter";

/// A result row keyed by column `fieldName`.
pub type Record = Map<String, Value>;

/// Column metadata from `/api/views/{id}/columns.json`.
///
/// Only `id` and `fieldName` are interpreted; every other key is kept in
/// `extra` and sent back verbatim with row queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Server-assigned column id
    pub id: i64,
    /// API field name used as the record key
    #[serde(rename = "fieldName")]
    pub field_name: String,
    /// Remaining column metadata, passed through unmodified
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ColumnDescriptor {
    /// Create a descriptor with no extra metadata.
    pub fn new(id: i64, field_name: impl Into<String>) -> Self {
        Self {
            id,
            field_name: field_name.into(),
            extra: Map::new(),
        }
    }
}

/// The ordered column list of a view at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaSnapshot {
    columns: Vec<ColumnDescriptor>,
    by_field: HashMap<String, usize>,
}

impl SchemaSnapshot {
    /// Build a snapshot from columns in server order.
    pub fn new(columns: Vec<ColumnDescriptor>) -> Self {
        let by_field = columns
            .iter()
            .enumerate()
            .map(|(idx, col)| (col.field_name.clone(), idx))
            .collect();
        Self { columns, by_field }
    }

    /// Columns in server order.
    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    /// Look up the column id for a field name.
    pub fn column_id(&self, field_name: &str) -> Option<i64> {
        self.by_field
            .get(field_name)
            .map(|&idx| self.columns[idx].id)
    }

    /// Field names in server order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.field_name.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Body of `POST /api/views/INLINE/rows.json?method=index`.
#[derive(Debug, Clone, Serialize)]
pub struct InlineQueryRequest<'a> {
    #[serde(rename = "originalViewId")]
    pub original_view_id: &'a str,
    pub name: &'static str,
    pub columns: &'a [ColumnDescriptor],
    pub query: InlineQuery,
}

#[derive(Debug, Clone, Serialize)]
pub struct InlineQuery {
    #[serde(rename = "filterCondition")]
    pub filter_condition: ResolvedFilter,
}

/// Response of the inline rows endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RowsResponse {
    /// Error or status message, if any
    #[serde(default)]
    pub message: Option<String>,
    /// Raw rows; each row ends with one value per column
    #[serde(default)]
    pub data: Option<Vec<Vec<Value>>>,
}

impl RowsResponse {
    /// Returns true if the server rejected the request's column ids.
    pub fn is_stale_schema(&self) -> bool {
        self.message
            .as_deref()
            .is_some_and(|m| m.contains(STALE_SCHEMA_MARKER))
    }

    /// Key each raw row by the snapshot's field names.
    ///
    /// Rows may carry server metadata before the column values. The prefix
    /// length is taken from the first row and every other row must have the
    /// same length.
    pub fn into_records(self, schema: &SchemaSnapshot) -> Result<Vec<Record>> {
        let rows = match self.data {
            Some(rows) if !rows.is_empty() => rows,
            _ => return Ok(Vec::new()),
        };

        let width = rows[0].len();
        if width < schema.len() {
            return Err(ClientError::RaggedRows {
                row: 0,
                expected: schema.len(),
                actual: width,
            });
        }
        let start = width - schema.len();

        rows.into_iter()
            .enumerate()
            .map(|(idx, row)| {
                if row.len() != width {
                    return Err(ClientError::RaggedRows {
                        row: idx,
                        expected: width,
                        actual: row.len(),
                    });
                }
                Ok(schema
                    .field_names()
                    .map(str::to_string)
                    .zip(row.into_iter().skip(start))
                    .collect())
            })
            .collect()
    }
}

/// Error body returned with non-success statuses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    /// Error code (e.g., "query.execution.queryTimeout")
    pub code: Option<String>,
    /// Human-readable message
    pub message: Option<String>,
    /// Some endpoints put the message here instead of `message`
    pub error: Option<Value>,
}

impl ApiErrorBody {
    /// Best available description of the failure.
    pub fn description(&self) -> Option<String> {
        self.message.clone().or_else(|| match &self.error {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        })
    }
}
