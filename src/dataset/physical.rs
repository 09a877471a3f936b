//! Physical table view
//!
//! Read-only access to a dataset's physical tables: the binding to a
//! concrete source schema/table and its raw input columns. The engine
//! never mutates these; it only reads identity and column types.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A raw input column of a relational physical table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputColumn {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Type")]
    pub data_type: String,
    /// Unmodeled attributes (e.g. SubType), round-tripped unchanged
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The relational-source descriptor of a physical table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationalTable {
    #[serde(rename = "DataSourceArn", skip_serializing_if = "Option::is_none")]
    pub data_source_arn: Option<String>,
    #[serde(rename = "Schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(rename = "Name", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "InputColumns", default, skip_serializing_if = "Vec::is_empty")]
    pub input_columns: Vec<InputColumn>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A physical table of the dataset
///
/// Only relational tables are interpreted; any other source kind
/// (custom SQL, S3, ...) is carried opaquely in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalTable {
    #[serde(rename = "RelationalTable", skip_serializing_if = "Option::is_none")]
    pub relational_table: Option<RelationalTable>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PhysicalTable {
    pub fn is_relational(&self) -> bool {
        self.relational_table.is_some()
    }

    pub fn data_source_arn(&self) -> Option<&str> {
        self.relational_table
            .as_ref()
            .and_then(|r| r.data_source_arn.as_deref())
    }

    pub fn schema_name(&self) -> Option<&str> {
        self.relational_table
            .as_ref()
            .and_then(|r| r.schema.as_deref())
    }

    pub fn table_name(&self) -> Option<&str> {
        self.relational_table.as_ref().and_then(|r| r.name.as_deref())
    }

    /// Input columns of the relational source, empty for other source kinds
    pub fn columns(&self) -> &[InputColumn] {
        self.relational_table
            .as_ref()
            .map(|r| r.input_columns.as_slice())
            .unwrap_or(&[])
    }

    /// Declared type of a physical column
    pub fn column_type(&self, column_name: &str) -> AppResult<&str> {
        self.columns()
            .iter()
            .find(|c| c.name == column_name)
            .map(|c| c.data_type.as_str())
            .ok_or_else(|| AppError::ColumnNotFound(column_name.to_string()))
    }
}
