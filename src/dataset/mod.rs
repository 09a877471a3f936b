//! QuickSight dataset model
//!
//! In-memory model of a dataset describe response: physical tables, logical
//! tables and field folders in an explicit registry keyed by id, plus a
//! pass-through bag for every attribute the engine does not interpret.
//! The descriptor is built fresh from one describe call, mutated in place,
//! and consumed by one update call; nothing persists across runs.

pub mod folder;
pub mod logical;
pub mod physical;

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

pub use folder::{normalize_path, FieldFolder};
pub use logical::LogicalTable;
pub use physical::PhysicalTable;

/// Keys accepted by the vendor's UpdateDataSet call. Everything else on the
/// describe response is computed or read-only and must not be sent back.
const UPDATE_DATA_SET_INPUT_KEYS: [&str; 13] = [
    "AwsAccountId",
    "DataSetId",
    "Name",
    "PhysicalTableMap",
    "LogicalTableMap",
    "ImportMode",
    "ColumnGroups",
    "FieldFolders",
    "RowLevelPermissionDataSet",
    "RowLevelPermissionTagConfiguration",
    "ColumnLevelPermissionRules",
    "DataSetUsageConfiguration",
    "DatasetParameters",
];

/// Aggregate root over one dataset describe response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSet {
    #[serde(rename = "DataSetId")]
    data_set_id: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "ImportMode", skip_serializing_if = "Option::is_none")]
    import_mode: Option<String>,
    #[serde(rename = "PhysicalTableMap", default)]
    physical_table_map: BTreeMap<String, PhysicalTable>,
    #[serde(rename = "LogicalTableMap", default)]
    logical_table_map: BTreeMap<String, LogicalTable>,
    #[serde(rename = "FieldFolders", default, skip_serializing_if = "BTreeMap::is_empty")]
    field_folders: BTreeMap<String, FieldFolder>,
    /// Unmodeled attributes, round-tripped byte-for-byte into the payload
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl DataSet {
    /// Build the model from the `DataSet` object of a describe response.
    /// Folder paths are normalized on entry so later lookups agree on keys.
    pub fn from_value(value: Value) -> AppResult<Self> {
        let mut data_set: Self = serde_json::from_value(value)?;
        data_set.field_folders = std::mem::take(&mut data_set.field_folders)
            .into_iter()
            .map(|(path, folder)| (normalize_path(&path).to_string(), folder))
            .collect();
        Ok(data_set)
    }

    /// Serialize the current state. Empty folders are dropped, as are the
    /// computed-only `OutputColumns` and `LastUpdatedTime` attributes.
    pub fn to_value(&self) -> AppResult<Value> {
        let mut trimmed = self.clone();
        trimmed.field_folders.retain(|_, folder| !folder.is_empty());
        trimmed.extra.remove("OutputColumns");
        trimmed.extra.remove("LastUpdatedTime");
        Ok(serde_json::to_value(trimmed)?)
    }

    pub fn data_set_id(&self) -> &str {
        &self.data_set_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn physical_table(&self, physical_table_id: &str) -> Option<&PhysicalTable> {
        self.physical_table_map.get(physical_table_id)
    }

    /// Physical tables backed by a relational source, with their ids
    pub fn find_relational_tables(&self) -> impl Iterator<Item = (&str, &PhysicalTable)> {
        self.physical_table_map
            .iter()
            .filter(|(_, table)| table.is_relational())
            .map(|(id, table)| (id.as_str(), table))
    }

    /// All logical tables sourced from the given physical table. Usually
    /// one, but the model allows fan-out; mutations apply to every match.
    pub fn find_logical_by_physical(
        &self,
        physical_table_id: &str,
    ) -> impl Iterator<Item = &LogicalTable> {
        let physical_table_id = physical_table_id.to_string();
        self.logical_table_map
            .values()
            .filter(move |t| t.related_physical_table_id() == Some(physical_table_id.as_str()))
    }

    fn find_logical_by_physical_mut(
        &mut self,
        physical_table_id: &str,
    ) -> impl Iterator<Item = &mut LogicalTable> {
        let physical_table_id = physical_table_id.to_string();
        self.logical_table_map
            .values_mut()
            .filter(move |t| t.related_physical_table_id() == Some(physical_table_id.as_str()))
    }

    pub fn set_alias(&mut self, physical_table_id: &str, alias: &str) {
        for logical_table in self.find_logical_by_physical_mut(physical_table_id) {
            logical_table.set_alias(alias);
        }
    }

    pub fn set_rename_column_operation(
        &mut self,
        physical_table_id: &str,
        physical_column_name: &str,
        logical_column_name: &str,
    ) {
        debug!(
            physical_table_id,
            column = physical_column_name,
            new_name = logical_column_name,
            "upsert rename operation"
        );
        for logical_table in self.find_logical_by_physical_mut(physical_table_id) {
            logical_table.set_rename_column_operation(physical_column_name, logical_column_name);
        }
    }

    pub fn set_tag_column_description_operation(
        &mut self,
        physical_table_id: &str,
        physical_column_name: &str,
        description: &str,
    ) {
        debug!(
            physical_table_id,
            column = physical_column_name,
            "upsert description tag"
        );
        for logical_table in self.find_logical_by_physical_mut(physical_table_id) {
            logical_table
                .set_tag_column_description_operation(physical_column_name, description);
        }
    }

    pub fn set_tag_column_geographic_role_operation(
        &mut self,
        physical_table_id: &str,
        physical_column_name: &str,
        geographic_role: &str,
    ) {
        debug!(
            physical_table_id,
            column = physical_column_name,
            role = geographic_role,
            "upsert geographic role tag"
        );
        for logical_table in self.find_logical_by_physical_mut(physical_table_id) {
            logical_table
                .set_tag_column_geographic_role_operation(physical_column_name, geographic_role);
        }
    }

    /// Upsert a cast, unless the requested type equals the declared physical
    /// type (case-insensitive): a cast that matches reality carries no
    /// information, so any existing cast is removed instead.
    pub fn set_cast_column_type_operation(
        &mut self,
        physical_table_id: &str,
        physical_column_name: &str,
        column_type: &str,
    ) -> AppResult<()> {
        let physical_table = self
            .physical_table_map
            .get(physical_table_id)
            .ok_or_else(|| AppError::PhysicalTableNotFound(physical_table_id.to_string()))?;
        let physical_column_type = physical_table.column_type(physical_column_name)?;
        if physical_column_type.eq_ignore_ascii_case(column_type) {
            debug!(
                physical_table_id,
                column = physical_column_name,
                "cast matches physical type, removing"
            );
            self.remove_cast_column_type_operation(physical_table_id, physical_column_name);
            return Ok(());
        }
        debug!(
            physical_table_id,
            column = physical_column_name,
            new_type = column_type,
            "upsert cast operation"
        );
        for logical_table in self.find_logical_by_physical_mut(physical_table_id) {
            logical_table.set_cast_column_type_operation(physical_column_name, column_type);
        }
        Ok(())
    }

    pub fn remove_cast_column_type_operation(
        &mut self,
        physical_table_id: &str,
        physical_column_name: &str,
    ) {
        for logical_table in self.find_logical_by_physical_mut(physical_table_id) {
            logical_table.remove_cast_column_type_operation(physical_column_name);
        }
    }

    pub fn add_to_projected_columns(
        &mut self,
        physical_table_id: &str,
        physical_column_name: &str,
    ) {
        for logical_table in self.find_logical_by_physical_mut(physical_table_id) {
            logical_table.add_to_projected_columns(physical_column_name);
        }
    }

    pub fn remove_from_projected_columns(
        &mut self,
        physical_table_id: &str,
        physical_column_name: &str,
    ) {
        for logical_table in self.find_logical_by_physical_mut(physical_table_id) {
            logical_table.remove_from_projected_columns(physical_column_name);
        }
    }

    /// Register a folder and/or set its description
    pub fn add_field_folder(&mut self, field_folder_path: &str, description: Option<&str>) {
        let path = normalize_path(field_folder_path).to_string();
        let folder = self.field_folders.entry(path).or_default();
        if let Some(description) = description {
            folder.description = Some(description.to_string());
        }
    }

    /// Move a column into a folder: the column's output name is removed
    /// from every other folder, added to the target (created when absent),
    /// and the column is made visible in the projection.
    pub fn add_to_field_folder(
        &mut self,
        physical_table_id: &str,
        physical_column_name: &str,
        field_folder_path: &str,
    ) {
        let path = normalize_path(field_folder_path).to_string();
        self.field_folders.entry(path.clone()).or_default();
        self.add_to_projected_columns(physical_table_id, physical_column_name);
        let output_names: Vec<String> = self
            .find_logical_by_physical(physical_table_id)
            .map(|t| t.output_column_name(physical_column_name))
            .collect();
        for column_name in output_names {
            debug!(
                physical_table_id,
                column = column_name.as_str(),
                folder = path.as_str(),
                "move column into folder"
            );
            for (folder_path, folder) in &mut self.field_folders {
                if folder_path == &path {
                    folder.add_column(&column_name);
                } else {
                    folder.remove_column(&column_name);
                }
            }
        }
    }

    /// The folder currently holding a column's output name, if any
    pub fn field_folder_path(
        &self,
        physical_table_id: &str,
        physical_column_name: &str,
    ) -> Option<&str> {
        for logical_table in self.find_logical_by_physical(physical_table_id) {
            let column_name = logical_table.output_column_name(physical_column_name);
            for (path, folder) in &self.field_folders {
                if folder.contains_column(&column_name) {
                    return Some(path);
                }
            }
        }
        None
    }

    pub fn field_folders(&self) -> &BTreeMap<String, FieldFolder> {
        &self.field_folders
    }

    /// Build the UpdateDataSet input: current state filtered down to the
    /// vendor's accepted key set, with the caller's account id injected.
    /// Deterministic: unchanged state yields an identical payload.
    pub fn generate_update_data_set_input(&self, aws_account_id: &str) -> AppResult<Value> {
        let Value::Object(mut state) = self.to_value()? else {
            unreachable!("a dataset always serializes to an object");
        };
        state.insert(
            "AwsAccountId".to_string(),
            Value::String(aws_account_id.to_string()),
        );
        state.retain(|key, _| UPDATE_DATA_SET_INPUT_KEYS.contains(&key.as_str()));
        Ok(Value::Object(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const PHYSICAL_TABLE_ID: &str = "12345678-9abc-def0-1234-56789abcdef0";

    fn fixture_value() -> Value {
        json!({
            "DataSetId": "00000000-0000-0000-0000-000000000000",
            "Name": "cities",
            "ImportMode": "SPICE",
            "PhysicalTableMap": {
                PHYSICAL_TABLE_ID: {
                    "RelationalTable": {
                        "DataSourceArn": "arn:aws:quicksight:ap-northeast-1:123456789012:datasource/00000000-0000-0000-0000-000000000000",
                        "Schema": "public",
                        "Name": "my_first_dbt_model",
                        "InputColumns": [
                            {"Name": "id", "Type": "INTEGER"},
                            {"Name": "name", "Type": "STRING"},
                            {"Name": "geo", "Type": "STRING"},
                            {"Name": "latitude", "Type": "DECIMAL"},
                            {"Name": "rate", "Type": "DECIMAL"},
                            {"Name": "updated_at", "Type": "DATETIME"}
                        ]
                    }
                }
            },
            "LogicalTableMap": {
                "deadbeef-0000-0000-0000-000000000000": {
                    "Alias": "my_first_dbt_model",
                    "Source": {"PhysicalTableId": PHYSICAL_TABLE_ID},
                    "DataTransforms": [
                        {"RenameColumnOperation": {"ColumnName": "id", "NewColumnName": "RowId"}},
                        {"TagColumnOperation": {
                            "ColumnName": "RowId",
                            "Tags": [{"ColumnDescription": {"Text": "Row ID"}}]
                        }},
                        {"TagColumnOperation": {
                            "ColumnName": "geo",
                            "Tags": [{"ColumnGeographicRole": "STATE"}]
                        }},
                        {"CastColumnTypeOperation": {"ColumnName": "rate", "NewColumnType": "STRING"}},
                        {"ProjectOperation": {"ProjectedColumns": ["RowId", "name", "geo", "latitude", "updated_at"]}}
                    ]
                }
            },
            "FieldFolders": {
                "Key": {"description": "key columns", "columns": ["RowId"]}
            },
            "DataSetUsageConfiguration": {
                "DisableUseAsDirectQuerySource": false,
                "DisableUseAsImportedSource": false
            }
        })
    }

    fn fixture() -> DataSet {
        DataSet::from_value(fixture_value()).unwrap()
    }

    #[test]
    fn test_no_modify_round_trips() {
        assert_eq!(fixture().to_value().unwrap(), fixture_value());
    }

    #[test]
    fn test_find_logical_by_physical() {
        let data_set = fixture();
        assert_eq!(data_set.find_logical_by_physical(PHYSICAL_TABLE_ID).count(), 1);
        assert_eq!(data_set.find_logical_by_physical("missing").count(), 0);
    }

    #[test]
    fn test_set_cast_same_type_removes_existing_cast() {
        let mut data_set = fixture();
        // rate is DECIMAL physically and currently cast to STRING
        data_set
            .set_cast_column_type_operation(PHYSICAL_TABLE_ID, "rate", "DECIMAL")
            .unwrap();
        let logical = data_set
            .find_logical_by_physical(PHYSICAL_TABLE_ID)
            .next()
            .unwrap();
        assert_eq!(logical.cast_column_type("rate"), None);
    }

    #[test]
    fn test_set_cast_different_type_replaces() {
        let mut data_set = fixture();
        data_set
            .set_cast_column_type_operation(PHYSICAL_TABLE_ID, "rate", "Integer")
            .unwrap();
        let logical = data_set
            .find_logical_by_physical(PHYSICAL_TABLE_ID)
            .next()
            .unwrap();
        assert_eq!(logical.cast_column_type("rate"), Some("INTEGER"));
    }

    #[test]
    fn test_set_cast_unknown_column_fails() {
        let mut data_set = fixture();
        let err = data_set
            .set_cast_column_type_operation(PHYSICAL_TABLE_ID, "missing", "STRING")
            .unwrap_err();
        assert!(matches!(err, AppError::ColumnNotFound(_)));
    }

    #[test]
    fn test_add_to_field_folder_moves_column() {
        let mut data_set = fixture();
        data_set.add_to_field_folder(PHYSICAL_TABLE_ID, "id", "Dimensions");
        assert!(data_set.field_folders["Dimensions"].contains_column("RowId"));
        assert!(!data_set.field_folders["Key"].contains_column("RowId"));
        assert_eq!(
            data_set.field_folder_path(PHYSICAL_TABLE_ID, "id"),
            Some("Dimensions")
        );
    }

    #[test]
    fn test_add_to_field_folder_same_folder_is_idempotent() {
        let mut data_set = fixture();
        data_set.add_to_field_folder(PHYSICAL_TABLE_ID, "id", "Key/");
        let key = &data_set.field_folders["Key"];
        assert_eq!(key.columns.iter().filter(|c| *c == "RowId").count(), 1);
    }

    #[test]
    fn test_add_to_field_folder_ensures_projection() {
        let mut data_set = fixture();
        // rate is not projected in the fixture
        data_set.add_to_field_folder(PHYSICAL_TABLE_ID, "rate", "Measures");
        let logical = data_set
            .find_logical_by_physical(PHYSICAL_TABLE_ID)
            .next()
            .unwrap();
        assert!(logical.contains_projected_columns("rate"));
    }

    #[test]
    fn test_empty_folder_dropped_from_serialized_map() {
        let mut data_set = fixture();
        data_set.add_to_field_folder(PHYSICAL_TABLE_ID, "id", "Dimensions");
        let value = data_set.to_value().unwrap();
        // Key lost its only member and must disappear
        assert!(value["FieldFolders"].get("Key").is_none());
        assert_eq!(value["FieldFolders"]["Dimensions"]["columns"], json!(["RowId"]));
    }

    #[test]
    fn test_generate_update_input_filters_and_injects() {
        let mut raw = fixture_value();
        let obj = raw.as_object_mut().unwrap();
        obj.insert("Arn".to_string(), json!("arn:aws:quicksight:..."));
        obj.insert("CreatedTime".to_string(), json!("2023-01-01T00:00:00Z"));
        obj.insert("LastUpdatedTime".to_string(), json!("2023-01-02T00:00:00Z"));
        obj.insert("OutputColumns".to_string(), json!([{"Name": "RowId", "Type": "INTEGER"}]));
        let data_set = DataSet::from_value(raw).unwrap();

        let input = data_set.generate_update_data_set_input("123456789012").unwrap();
        let input = input.as_object().unwrap();
        assert_eq!(input["AwsAccountId"], json!("123456789012"));
        // pass-through attribute preserved byte-for-byte
        assert_eq!(
            input["DataSetUsageConfiguration"],
            fixture_value()["DataSetUsageConfiguration"]
        );
        // computed and read-only fields never reach the update call
        for forbidden in ["Arn", "CreatedTime", "LastUpdatedTime", "OutputColumns"] {
            assert!(!input.contains_key(forbidden), "{forbidden} must be dropped");
        }
    }

    #[test]
    fn test_generate_update_input_is_deterministic() {
        let data_set = fixture();
        let first = data_set.generate_update_data_set_input("123456789012").unwrap();
        let second = data_set.generate_update_data_set_input("123456789012").unwrap();
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_folder_paths_normalized_on_load() {
        let mut raw = fixture_value();
        let folders = raw["FieldFolders"].as_object_mut().unwrap();
        let key = folders.remove("Key").unwrap();
        folders.insert("Key/".to_string(), key);
        let data_set = DataSet::from_value(raw).unwrap();
        assert!(data_set.field_folders.contains_key("Key"));
    }
}
