//! Reconciliation engine
//!
//! Drives both sync directions between dbt models and a QuickSight
//! dataset. Matching pairs a model node with a physical table by
//! (schema, alias); in push mode the node must additionally declare a
//! binding to the target dataset. When several nodes or logical tables
//! match one physical table, the mutation is applied to every match.

use crate::client::QuickSightApi;
use crate::dataset::DataSet;
use crate::error::{AppError, AppResult};
use crate::manifest::{Manifest, ManifestNode};
use serde_json::Value;
use serde_yaml::{Mapping, Value as Yaml};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

fn ykey(key: &str) -> Yaml {
    Yaml::String(key.to_string())
}

/// Insert an empty `meta` key into a schema.yml mapping, directly after
/// `description` if present, else after `name`, else at the end. Keeps the
/// rewritten document close to what the author laid out.
fn ensure_meta_key(target: &mut Mapping) {
    if target.get("meta").is_some() {
        return;
    }
    let mut name_pos = None;
    let mut description_pos = None;
    for (i, (key, _)) in target.iter().enumerate() {
        match key.as_str() {
            Some("name") => name_pos = Some(i),
            Some("description") => description_pos = Some(i),
            _ => {}
        }
    }
    let insert_pos = description_pos
        .or(name_pos)
        .map(|p| p + 1)
        .unwrap_or(target.len());
    let entries: Vec<(Yaml, Yaml)> = std::mem::take(target).into_iter().collect();
    for (i, (key, value)) in entries.into_iter().enumerate() {
        if i == insert_pos {
            target.insert(ykey("meta"), Yaml::Mapping(Mapping::new()));
        }
        target.insert(key, value);
    }
    if target.get("meta").is_none() {
        target.insert(ykey("meta"), Yaml::Mapping(Mapping::new()));
    }
}

/// Shallow-merge `fragment` into `target`: top-level keys are added or
/// overwritten, nothing is deleted.
fn merge_meta(target: &mut Mapping, fragment: &Mapping) {
    for (key, value) in fragment {
        target.insert(key.clone(), value.clone());
    }
}

/// Merge one generated model fragment into a loaded schema.yml document.
/// Existing keys survive; column descriptions are only filled in when the
/// document has none.
pub fn merge_model_fragment(doc: &mut Yaml, fragment: &Mapping) {
    let Some(fragment_name) = fragment.get("name").and_then(Yaml::as_str) else {
        return;
    };
    let fragment_name = fragment_name.to_string();
    let Some(models) = doc.get_mut("models").and_then(Yaml::as_sequence_mut) else {
        return;
    };
    for model in models.iter_mut() {
        let Some(model) = model.as_mapping_mut() else {
            continue;
        };
        if model.get("name").and_then(Yaml::as_str) != Some(fragment_name.as_str()) {
            continue;
        }
        ensure_meta_key(model);
        if let (Some(meta), Some(fragment_meta)) = (
            model.get_mut("meta").and_then(Yaml::as_mapping_mut),
            fragment.get("meta").and_then(Yaml::as_mapping),
        ) {
            merge_meta(meta, fragment_meta);
        }
        let Some(fragment_columns) = fragment.get("columns").and_then(Yaml::as_sequence) else {
            continue;
        };
        let Some(columns) = model.get_mut("columns").and_then(Yaml::as_sequence_mut) else {
            continue;
        };
        for fragment_column in fragment_columns {
            let Some(fragment_column) = fragment_column.as_mapping() else {
                continue;
            };
            let Some(column_name) = fragment_column.get("name").and_then(Yaml::as_str) else {
                continue;
            };
            for column in columns.iter_mut() {
                let Some(column) = column.as_mapping_mut() else {
                    continue;
                };
                if column.get("name").and_then(Yaml::as_str) != Some(column_name) {
                    continue;
                }
                ensure_meta_key(column);
                if let (Some(meta), Some(fragment_meta)) = (
                    column.get_mut("meta").and_then(Yaml::as_mapping_mut),
                    fragment_column.get("meta").and_then(Yaml::as_mapping),
                ) {
                    merge_meta(meta, fragment_meta);
                }
                if let Some(description) = fragment_column.get("description") {
                    if column.get("description").is_none() {
                        column.insert(ykey("description"), description.clone());
                    }
                }
            }
        }
    }
}

/// The application: one manifest, one vendor client, one account
pub struct App<'a, C: QuickSightApi> {
    manifest: &'a Manifest,
    client: &'a C,
    aws_account_id: String,
}

impl<'a, C: QuickSightApi> App<'a, C> {
    /// Resolves the account id through the client when not given explicitly
    pub fn new(
        manifest: &'a Manifest,
        client: &'a C,
        aws_account_id: Option<String>,
    ) -> AppResult<Self> {
        let aws_account_id = match aws_account_id {
            Some(id) => id,
            None => client.caller_account_id()?,
        };
        Ok(Self {
            manifest,
            client,
            aws_account_id,
        })
    }

    pub fn aws_account_id(&self) -> &str {
        &self.aws_account_id
    }

    /// Pull direction: read the dataset and merge generated metadata
    /// fragments into the matching models' schema.yml files.
    pub fn init(
        &self,
        data_set_id: &str,
        data_source_arn: Option<&str>,
        project_dir: Option<&Path>,
    ) -> AppResult<()> {
        let data_set = self.describe(data_set_id)?;
        info!(name = data_set.name(), "describe data set");
        for (physical_table_id, node) in self.detect_related_nodes(&data_set, data_source_arn) {
            self.update_schema_yaml(&data_set, &physical_table_id, node, project_dir)?;
        }
        Ok(())
    }

    /// Push direction: apply declared metadata to the dataset and send the
    /// update call. On dry run the computed payload is returned instead.
    pub fn update_data_set(
        &self,
        data_set_id: &str,
        dry_run: bool,
    ) -> AppResult<(Option<Value>, Value)> {
        let mut data_set = self.describe(data_set_id)?;
        info!(name = data_set.name(), "describe data set");
        let targets = self.detect_modify_targets(&data_set);
        for (physical_table_id, node) in targets {
            self.apply_node(&mut data_set, &physical_table_id, node)?;
        }
        let input = data_set.generate_update_data_set_input(&self.aws_account_id)?;
        if dry_run {
            return Ok((None, input));
        }
        let output = self.client.update_data_set(&input)?;
        if output.status != 200 {
            return Err(AppError::UpdateFailed(output.status));
        }
        info!(data_set_id, "update data set");
        Ok((Some(output.raw), input))
    }

    fn describe(&self, data_set_id: &str) -> AppResult<DataSet> {
        let output = self
            .client
            .describe_data_set(&self.aws_account_id, data_set_id)?;
        if output.status != 200 {
            return Err(AppError::DescribeFailed(output.status));
        }
        DataSet::from_value(output.data_set)
    }

    fn sql_models(&self) -> impl Iterator<Item = &'a ManifestNode> {
        self.manifest
            .nodes
            .values()
            .filter(|node| node.is_sql_model())
    }

    /// SQL models declaring a binding to the dataset, honoring each
    /// binding's optional data-source filter
    fn models_bound_to(&self, data_set_id: &str, data_source_arn: &str) -> Vec<&'a ManifestNode> {
        self.sql_models()
            .filter(|node| {
                node.data_set_bindings().iter().any(|binding| {
                    binding.id == data_set_id
                        && binding
                            .data_source
                            .as_deref()
                            .map(|arn| arn == data_source_arn)
                            .unwrap_or(true)
                })
            })
            .collect()
    }

    /// Push-mode matching: relational physical tables paired with bound
    /// model nodes by (schema, alias). Every match is returned; fan-out is
    /// applied, not rejected.
    fn detect_modify_targets(&self, data_set: &DataSet) -> Vec<(String, &'a ManifestNode)> {
        let mut targets = Vec::new();
        for (physical_table_id, physical_table) in data_set.find_relational_tables() {
            let (Some(data_source_arn), Some(schema), Some(identifier)) = (
                physical_table.data_source_arn(),
                physical_table.schema_name(),
                physical_table.table_name(),
            ) else {
                continue;
            };
            debug!(physical_table_id, schema, identifier, "check physical table");
            for node in self.models_bound_to(data_set.data_set_id(), data_source_arn) {
                if node.schema == schema && node.alias() == identifier {
                    info!(physical_table_id, model = node.name.as_str(), "match found");
                    targets.push((physical_table_id.to_string(), node));
                }
            }
        }
        targets
    }

    /// Pull-mode matching: same (schema, alias) predicate but without the
    /// binding requirement, optionally restricted to one data source
    fn detect_related_nodes(
        &self,
        data_set: &DataSet,
        data_source_arn: Option<&str>,
    ) -> Vec<(String, &'a ManifestNode)> {
        let mut related = Vec::new();
        for (physical_table_id, physical_table) in data_set.find_relational_tables() {
            if let Some(filter) = data_source_arn {
                if physical_table.data_source_arn() != Some(filter) {
                    continue;
                }
            }
            let (Some(schema), Some(identifier)) =
                (physical_table.schema_name(), physical_table.table_name())
            else {
                continue;
            };
            debug!(physical_table_id, schema, identifier, "check physical table");
            for node in self.sql_models() {
                if node.schema == schema && node.alias() == identifier {
                    info!(physical_table_id, model = node.name.as_str(), "match found");
                    related.push((physical_table_id.to_string(), node));
                }
            }
        }
        related
    }

    /// Apply one node's declared metadata to the pipelines derived from one
    /// physical table. Idempotent: a second application changes nothing.
    fn apply_node(
        &self,
        data_set: &mut DataSet,
        physical_table_id: &str,
        node: &ManifestNode,
    ) -> AppResult<()> {
        let alias = node.logical_table_name().unwrap_or_else(|| node.alias());
        data_set.set_alias(physical_table_id, alias);
        for folder in node.declared_folders() {
            data_set.add_field_folder(&folder.name, folder.description.as_deref());
        }
        for column_name in node.column_names() {
            if let Some(field_name) = node.field_name(column_name) {
                data_set.set_rename_column_operation(physical_table_id, column_name, field_name);
            }
            if let Some(description) = node.column_description(column_name) {
                data_set.set_tag_column_description_operation(
                    physical_table_id,
                    column_name,
                    description,
                );
            }
            if let Some(role) = node.geographic_role(column_name) {
                data_set.set_tag_column_geographic_role_operation(
                    physical_table_id,
                    column_name,
                    role,
                );
            }
            if let Some(data_type) = node.data_type(column_name) {
                data_set.set_cast_column_type_operation(
                    physical_table_id,
                    column_name,
                    data_type,
                )?;
            }
            if node.is_hidden(column_name) {
                data_set.remove_from_projected_columns(physical_table_id, column_name);
            } else {
                data_set.add_to_projected_columns(physical_table_id, column_name);
            }
            if let Some(folder) = node.folder(column_name) {
                data_set.add_to_field_folder(physical_table_id, column_name, folder);
            }
        }
        Ok(())
    }

    /// Generate the schema.yml fragment for one model from the dataset's
    /// current state. Only the first matching logical table is read.
    pub fn generate_schema_fragment(
        &self,
        model_name: &str,
        data_set: &DataSet,
        physical_table_id: &str,
    ) -> Option<Mapping> {
        let physical_table = data_set.physical_table(physical_table_id)?;
        let logical_table = data_set.find_logical_by_physical(physical_table_id).next()?;

        let mut quicksight = Mapping::new();
        let logical_table_name = if logical_table.alias.is_empty() {
            model_name
        } else {
            logical_table.alias.as_str()
        };
        quicksight.insert(
            ykey("logical_table_name"),
            Yaml::String(logical_table_name.to_string()),
        );
        let mut binding = Mapping::new();
        binding.insert(ykey("id"), Yaml::String(data_set.data_set_id().to_string()));
        if let Some(arn) = physical_table.data_source_arn() {
            binding.insert(ykey("data_source_arn"), Yaml::String(arn.to_string()));
        }
        quicksight.insert(
            ykey("data_sets"),
            Yaml::Sequence(vec![Yaml::Mapping(binding)]),
        );
        let mut folders = Vec::new();
        for (path, folder) in data_set.field_folders() {
            if let Some(description) = &folder.description {
                let mut entry = Mapping::new();
                entry.insert(ykey("name"), Yaml::String(path.clone()));
                entry.insert(ykey("description"), Yaml::String(description.clone()));
                folders.push(Yaml::Mapping(entry));
            }
        }
        if !folders.is_empty() {
            quicksight.insert(ykey("folders"), Yaml::Sequence(folders));
        }

        let mut columns = Vec::new();
        for physical_column in physical_table.columns() {
            let name = physical_column.name.as_str();
            let mut column_quicksight = Mapping::new();
            if let Some(field_name) = logical_table.logical_column_name(name) {
                column_quicksight
                    .insert(ykey("field_name"), Yaml::String(field_name.to_string()));
            }
            if !logical_table.contains_projected_columns(name) {
                column_quicksight.insert(ykey("hidden"), Yaml::Bool(true));
            }
            if let Some(role) = logical_table.tag_column_geographic_role(name) {
                column_quicksight
                    .insert(ykey("geographic_role"), Yaml::String(role.to_lowercase()));
            }
            if let Some(cast_type) = logical_table.cast_column_type(name) {
                column_quicksight
                    .insert(ykey("data_type"), Yaml::String(cast_type.to_lowercase()));
            }
            if let Some(folder) = data_set.field_folder_path(physical_table_id, name) {
                column_quicksight.insert(ykey("folder"), Yaml::String(folder.to_string()));
            }
            let description = logical_table.tag_column_description(name);
            if column_quicksight.is_empty() && description.is_none() {
                continue;
            }
            let mut column = Mapping::new();
            column.insert(ykey("name"), Yaml::String(name.to_string()));
            if !column_quicksight.is_empty() {
                let mut meta = Mapping::new();
                meta.insert(ykey("quicksight"), Yaml::Mapping(column_quicksight));
                column.insert(ykey("meta"), Yaml::Mapping(meta));
            }
            if let Some(description) = description {
                column.insert(ykey("description"), Yaml::String(description.to_string()));
            }
            columns.push(Yaml::Mapping(column));
        }

        let mut meta = Mapping::new();
        meta.insert(ykey("quicksight"), Yaml::Mapping(quicksight));
        let mut model = Mapping::new();
        model.insert(ykey("name"), Yaml::String(model_name.to_string()));
        model.insert(ykey("meta"), Yaml::Mapping(meta));
        model.insert(ykey("columns"), Yaml::Sequence(columns));
        Some(model)
    }

    fn update_schema_yaml(
        &self,
        data_set: &DataSet,
        physical_table_id: &str,
        node: &ManifestNode,
        project_dir: Option<&Path>,
    ) -> AppResult<()> {
        let Some(patch_file) = node.patch_file() else {
            warn!(model = node.name.as_str(), "model has no schema file, skipping");
            return Ok(());
        };
        let path = match project_dir {
            Some(dir) => dir.join(patch_file),
            None => PathBuf::from(patch_file),
        };
        let Some(fragment) = self.generate_schema_fragment(&node.name, data_set, physical_table_id)
        else {
            warn!(physical_table_id, "no logical table, skipping");
            return Ok(());
        };
        let raw = fs::read_to_string(&path)?;
        let mut doc: Yaml = serde_yaml::from_str(&raw)?;
        merge_model_fragment(&mut doc, &fragment);
        fs::write(&path, serde_yaml::to_string(&doc)?)?;
        info!(path = %path.display(), "updated schema yaml");
        Ok(())
    }
}
