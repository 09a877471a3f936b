//! dbt manifest access
//!
//! Loads a compiled dbt manifest (`target/manifest.json`) and exposes the
//! slice of it this tool cares about: model nodes, their columns, and the
//! `meta.quicksight` blocks that declare the intended dataset structure.
//! The manifest is read-only input; unknown fields are ignored.

use crate::error::{AppError, AppResult};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A dataset binding declared on a model:
/// `meta.quicksight.data_sets: [{id, data_source}]`
#[derive(Debug, Clone, Deserialize)]
pub struct DataSetBinding {
    pub id: String,
    /// Optional data-source filter; `data_source_arn` is accepted as an
    /// alias since generated fragments historically used that key
    #[serde(default, alias = "data_source_arn")]
    pub data_source: Option<String>,
}

/// A folder declaration: `meta.quicksight.folders: [{name, description}]`
#[derive(Debug, Clone, Deserialize)]
pub struct FolderMeta {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Table-level `meta.quicksight` block
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuickSightMeta {
    #[serde(default)]
    pub logical_table_name: Option<String>,
    #[serde(default)]
    pub folders: Vec<FolderMeta>,
    #[serde(default)]
    pub data_sets: Vec<DataSetBinding>,
}

/// Column-level `meta.quicksight` block
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ColumnQuickSightMeta {
    #[serde(default)]
    pub field_name: Option<String>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub geographic_role: Option<String>,
    #[serde(default)]
    pub data_type: Option<String>,
    #[serde(default)]
    pub folder: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct NodeMeta {
    #[serde(default)]
    quicksight: Option<QuickSightMeta>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ColumnMeta {
    #[serde(default)]
    quicksight: Option<ColumnQuickSightMeta>,
}

/// One column entry of a model node
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ColumnInfo {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    meta: ColumnMeta,
}

/// One node of the manifest graph. Only model nodes are interpreted, but
/// the type deserializes any node kind (tests, seeds, ...) tolerantly.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestNode {
    pub resource_type: String,
    #[serde(default)]
    pub language: Option<String>,
    pub schema: String,
    pub name: String,
    #[serde(default)]
    alias: Option<String>,
    #[serde(default)]
    pub patch_path: Option<String>,
    #[serde(default)]
    columns: BTreeMap<String, ColumnInfo>,
    #[serde(default)]
    meta: NodeMeta,
}

impl ManifestNode {
    /// A node participates in reconciliation iff it is a SQL model
    pub fn is_sql_model(&self) -> bool {
        self.resource_type == "model" && self.language.as_deref() == Some("sql")
    }

    /// The relation alias: explicit alias, else the model name
    pub fn alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn quicksight(&self) -> Option<&QuickSightMeta> {
        self.meta.quicksight.as_ref()
    }

    /// Dataset bindings declared on this model
    pub fn data_set_bindings(&self) -> &[DataSetBinding] {
        self.quicksight()
            .map(|q| q.data_sets.as_slice())
            .unwrap_or(&[])
    }

    pub fn declared_folders(&self) -> &[FolderMeta] {
        self.quicksight()
            .map(|q| q.folders.as_slice())
            .unwrap_or(&[])
    }

    pub fn logical_table_name(&self) -> Option<&str> {
        self.quicksight().and_then(|q| q.logical_table_name.as_deref())
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    fn column_quicksight(&self, column_name: &str) -> Option<&ColumnQuickSightMeta> {
        self.columns
            .get(column_name)?
            .meta
            .quicksight
            .as_ref()
    }

    /// Column description; empty strings (dbt's default) count as absent
    pub fn column_description(&self, column_name: &str) -> Option<&str> {
        self.columns
            .get(column_name)?
            .description
            .as_deref()
            .filter(|d| !d.is_empty())
    }

    pub fn field_name(&self, column_name: &str) -> Option<&str> {
        self.column_quicksight(column_name)
            .and_then(|q| q.field_name.as_deref())
    }

    pub fn geographic_role(&self, column_name: &str) -> Option<&str> {
        self.column_quicksight(column_name)
            .and_then(|q| q.geographic_role.as_deref())
    }

    pub fn data_type(&self, column_name: &str) -> Option<&str> {
        self.column_quicksight(column_name)
            .and_then(|q| q.data_type.as_deref())
    }

    pub fn folder(&self, column_name: &str) -> Option<&str> {
        self.column_quicksight(column_name)
            .and_then(|q| q.folder.as_deref())
    }

    pub fn is_hidden(&self, column_name: &str) -> bool {
        self.column_quicksight(column_name)
            .map(|q| q.hidden)
            .unwrap_or(false)
    }

    /// The schema file this node was patched from, relative to the project
    /// root (`patch_path` is `package://relative/path.yml`)
    pub fn patch_file(&self) -> Option<&str> {
        let patch_path = self.patch_path.as_deref()?;
        patch_path
            .split_once("://")
            .map(|(_package, path)| path)
            .or(Some(patch_path))
    }
}

/// The compiled dbt manifest, reduced to its node graph
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub nodes: BTreeMap<String, ManifestNode>,
}

/// Loads a manifest from an explicit path or a dbt project directory
#[derive(Debug, Clone, Default)]
pub struct ManifestLoader {
    pub manifest_path: Option<PathBuf>,
    pub project_dir: Option<PathBuf>,
}

impl ManifestLoader {
    pub fn load(&self) -> AppResult<Manifest> {
        let path = match &self.manifest_path {
            Some(path) => path.clone(),
            None => {
                let project_dir = self.project_dir.clone().unwrap_or_else(|| PathBuf::from("."));
                project_dir.join("target").join("manifest.json")
            }
        };
        debug!(path = %path.display(), "loading dbt manifest");
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => {}
            other => {
                return Err(AppError::UnsupportedManifestFormat(
                    other.unwrap_or("<none>").to_string(),
                ))
            }
        }
        Self::load_json(&path)
    }

    fn load_json(path: &Path) -> AppResult<Manifest> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn fixture() -> Manifest {
        serde_json::from_value(json!({
            "nodes": {
                "model.test_project.my_first_dbt_model": {
                    "resource_type": "model",
                    "language": "sql",
                    "schema": "public",
                    "name": "my_first_dbt_model",
                    "alias": "my_first_dbt_model",
                    "patch_path": "test_project://models/schema.yml",
                    "columns": {
                        "id": {
                            "name": "id",
                            "description": "The primary key",
                            "meta": {
                                "quicksight": {"field_name": "ID", "folder": "Key/"}
                            }
                        },
                        "updated_at": {"name": "updated_at", "description": ""}
                    },
                    "meta": {
                        "quicksight": {
                            "logical_table_name": "My First DBT Model",
                            "data_sets": [
                                {"id": "00000000-0000-0000-0000-000000000000",
                                 "data_source": "arn:aws:quicksight:ap-northeast-1:123456789012:datasource/00000000-0000-0000-0000-000000000000"},
                                {"id": "11111111-1111-1111-1111-111111111111"}
                            ]
                        }
                    }
                },
                "test.test_project.not_null_my_first_dbt_model_id": {
                    "resource_type": "test",
                    "schema": "public_dbt_test__audit",
                    "name": "not_null_my_first_dbt_model_id"
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_model_detection() {
        let manifest = fixture();
        let model = &manifest.nodes["model.test_project.my_first_dbt_model"];
        assert!(model.is_sql_model());
        let test = &manifest.nodes["test.test_project.not_null_my_first_dbt_model_id"];
        assert!(!test.is_sql_model());
    }

    #[test]
    fn test_column_meta_accessors() {
        let manifest = fixture();
        let model = &manifest.nodes["model.test_project.my_first_dbt_model"];
        assert_eq!(model.field_name("id"), Some("ID"));
        assert_eq!(model.folder("id"), Some("Key/"));
        assert_eq!(model.column_description("id"), Some("The primary key"));
        assert!(!model.is_hidden("id"));
        // dbt's empty-string default counts as no description
        assert_eq!(model.column_description("updated_at"), None);
        assert_eq!(model.field_name("updated_at"), None);
    }

    #[test]
    fn test_data_set_bindings() {
        let manifest = fixture();
        let model = &manifest.nodes["model.test_project.my_first_dbt_model"];
        let bindings = model.data_set_bindings();
        assert_eq!(bindings.len(), 2);
        assert!(bindings[0].data_source.is_some());
        assert!(bindings[1].data_source.is_none());
    }

    #[test]
    fn test_patch_file_strips_package_prefix() {
        let manifest = fixture();
        let model = &manifest.nodes["model.test_project.my_first_dbt_model"];
        assert_eq!(model.patch_file(), Some("models/schema.yml"));
    }

    #[test]
    fn test_loader_rejects_unknown_extension() {
        let loader = ManifestLoader {
            manifest_path: Some(PathBuf::from("target/partial_parse.msgpack")),
            project_dir: None,
        };
        let err = loader.load().unwrap_err();
        assert!(matches!(err, AppError::UnsupportedManifestFormat(_)));
    }
}
