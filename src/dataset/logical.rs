//! Logical table transform pipeline
//!
//! A logical table applies an ordered pipeline of transform operations to
//! one physical table. The pipeline invariant: Rename/Tag/Cast operations
//! come first, the single ProjectOperation (if any) comes last. Operations
//! other than Rename address columns by their *output* name, i.e. the name
//! after the most recent rename, so every rename must cascade through the
//! rest of the pipeline.
//!
//! All mutations are idempotent and minimal: applying the same declaration
//! twice never grows the pipeline, and no-op operations are never emitted.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Renames a physical column to a new output name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenameColumnOperation {
    #[serde(rename = "ColumnName")]
    pub column_name: String,
    #[serde(rename = "NewColumnName")]
    pub new_column_name: String,
}

/// Column description payload of a tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescription {
    #[serde(rename = "Text")]
    pub text: String,
}

/// One tag entry; carries either a description or a geographic role
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnTag {
    #[serde(rename = "ColumnDescription", skip_serializing_if = "Option::is_none")]
    pub column_description: Option<ColumnDescription>,
    #[serde(rename = "ColumnGeographicRole", skip_serializing_if = "Option::is_none")]
    pub column_geographic_role: Option<String>,
}

/// Attaches tags to an output column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagColumnOperation {
    #[serde(rename = "ColumnName")]
    pub column_name: String,
    #[serde(rename = "Tags")]
    pub tags: Vec<ColumnTag>,
}

/// Casts an output column to a new type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CastColumnTypeOperation {
    #[serde(rename = "ColumnName")]
    pub column_name: String,
    #[serde(rename = "NewColumnType")]
    pub new_column_type: String,
    /// Unmodeled attributes (e.g. Format), round-tripped unchanged
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Selects the output columns of the logical table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectOperation {
    #[serde(rename = "ProjectedColumns")]
    pub projected_columns: Vec<String>,
}

/// One step of a logical table's pipeline
///
/// The wire format is a dynamically-tagged union: a map with exactly one
/// key naming the operation kind. Unknown kinds are carried opaquely so
/// the update payload round-trips them unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataTransform {
    Rename {
        #[serde(rename = "RenameColumnOperation")]
        op: RenameColumnOperation,
    },
    Tag {
        #[serde(rename = "TagColumnOperation")]
        op: TagColumnOperation,
    },
    Cast {
        #[serde(rename = "CastColumnTypeOperation")]
        op: CastColumnTypeOperation,
    },
    Project {
        #[serde(rename = "ProjectOperation")]
        op: ProjectOperation,
    },
    Other(Value),
}

impl DataTransform {
    fn is_project(&self) -> bool {
        matches!(self, DataTransform::Project { .. })
    }
}

/// Reference from a logical table to its physical source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalTableSource {
    #[serde(rename = "PhysicalTableId", skip_serializing_if = "Option::is_none")]
    pub physical_table_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A logical table: display alias plus the transform pipeline over one
/// physical table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalTable {
    #[serde(rename = "Alias")]
    pub alias: String,
    #[serde(rename = "Source")]
    pub source: LogicalTableSource,
    /// An empty pipeline serializes as an absent key, even when the
    /// describe response carried an explicit `"DataTransforms": []`; the
    /// vendor treats the two the same
    #[serde(rename = "DataTransforms", default, skip_serializing_if = "Vec::is_empty")]
    pub data_transforms: Vec<DataTransform>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LogicalTable {
    pub fn related_physical_table_id(&self) -> Option<&str> {
        self.source.physical_table_id.as_deref()
    }

    pub fn set_alias(&mut self, alias: &str) {
        self.alias = alias.to_string();
    }

    /// Insertion position for Rename/Tag/Cast upserts: immediately before
    /// the ProjectOperation, or at the end when no projection exists
    fn upsert_position(&self) -> usize {
        self.data_transforms
            .iter()
            .position(DataTransform::is_project)
            .unwrap_or(self.data_transforms.len())
    }

    /// The rename target for a physical column, if a rename exists
    pub fn logical_column_name(&self, physical_column_name: &str) -> Option<&str> {
        self.data_transforms.iter().find_map(|t| match t {
            DataTransform::Rename { op } if op.column_name == physical_column_name => {
                Some(op.new_column_name.as_str())
            }
            _ => None,
        })
    }

    /// The output name of a physical column: its rename target, or the
    /// physical name when no rename exists
    pub fn output_column_name(&self, physical_column_name: &str) -> String {
        self.logical_column_name(physical_column_name)
            .unwrap_or(physical_column_name)
            .to_string()
    }

    /// Upsert the rename for a physical column, then rewrite every other
    /// reference to its previous output name
    pub fn set_rename_column_operation(
        &mut self,
        physical_column_name: &str,
        logical_column_name: &str,
    ) {
        let mut old_column_name = physical_column_name.to_string();
        let mut replaced = false;
        for t in &mut self.data_transforms {
            if let DataTransform::Rename { op } = t {
                if op.column_name == physical_column_name {
                    old_column_name = std::mem::replace(
                        &mut op.new_column_name,
                        logical_column_name.to_string(),
                    );
                    replaced = true;
                    break;
                }
            }
        }
        if !replaced {
            let pos = self.upsert_position();
            self.data_transforms.insert(
                pos,
                DataTransform::Rename {
                    op: RenameColumnOperation {
                        column_name: physical_column_name.to_string(),
                        new_column_name: logical_column_name.to_string(),
                    },
                },
            );
        }
        self.cascade_rename(
            &[physical_column_name, &old_column_name],
            logical_column_name,
        );
    }

    /// Rewrite every non-rename reference to an old output name. Required
    /// because Tag/Cast/Project operations address columns by output name.
    fn cascade_rename(&mut self, old_names: &[&str; 2], new_name: &str) {
        for t in &mut self.data_transforms {
            match t {
                DataTransform::Rename { .. } => {}
                DataTransform::Tag { op } => {
                    if old_names.contains(&op.column_name.as_str()) {
                        op.column_name = new_name.to_string();
                    }
                }
                DataTransform::Cast { op } => {
                    if old_names.contains(&op.column_name.as_str()) {
                        op.column_name = new_name.to_string();
                    }
                }
                DataTransform::Project { op } => {
                    for column in &mut op.projected_columns {
                        if old_names.contains(&column.as_str()) {
                            *column = new_name.to_string();
                        }
                    }
                }
                DataTransform::Other(value) => {
                    let Value::Object(map) = value else { continue };
                    for payload in map.values_mut() {
                        let Value::Object(inner) = payload else { continue };
                        let renames = matches!(
                            inner.get("ColumnName"),
                            Some(Value::String(name)) if old_names.contains(&name.as_str())
                        );
                        if renames {
                            inner.insert(
                                "ColumnName".to_string(),
                                Value::String(new_name.to_string()),
                            );
                        }
                    }
                }
            }
        }
    }

    /// The description tag currently attached to a physical column
    pub fn tag_column_description(&self, physical_column_name: &str) -> Option<&str> {
        let target = self.output_column_name(physical_column_name);
        self.data_transforms.iter().find_map(|t| match t {
            DataTransform::Tag { op } if op.column_name == target => op
                .tags
                .iter()
                .find_map(|tag| tag.column_description.as_ref().map(|d| d.text.as_str())),
            _ => None,
        })
    }

    /// Upsert the description tag for a physical column. Text is stored
    /// verbatim.
    pub fn set_tag_column_description_operation(
        &mut self,
        physical_column_name: &str,
        description: &str,
    ) {
        let target = self.output_column_name(physical_column_name);
        for t in &mut self.data_transforms {
            if let DataTransform::Tag { op } = t {
                if op.column_name != target {
                    continue;
                }
                for tag in &mut op.tags {
                    if tag.column_description.is_some() {
                        tag.column_description = Some(ColumnDescription {
                            text: description.to_string(),
                        });
                        return;
                    }
                }
            }
        }
        let pos = self.upsert_position();
        self.data_transforms.insert(
            pos,
            DataTransform::Tag {
                op: TagColumnOperation {
                    column_name: target,
                    tags: vec![ColumnTag {
                        column_description: Some(ColumnDescription {
                            text: description.to_string(),
                        }),
                        column_geographic_role: None,
                    }],
                },
            },
        );
    }

    /// The geographic-role tag currently attached to a physical column
    pub fn tag_column_geographic_role(&self, physical_column_name: &str) -> Option<&str> {
        let target = self.output_column_name(physical_column_name);
        self.data_transforms.iter().find_map(|t| match t {
            DataTransform::Tag { op } if op.column_name == target => op
                .tags
                .iter()
                .find_map(|tag| tag.column_geographic_role.as_deref()),
            _ => None,
        })
    }

    /// Upsert the geographic-role tag for a physical column. Roles are
    /// normalized to uppercase.
    pub fn set_tag_column_geographic_role_operation(
        &mut self,
        physical_column_name: &str,
        geographic_role: &str,
    ) {
        let target = self.output_column_name(physical_column_name);
        let role = geographic_role.to_uppercase();
        for t in &mut self.data_transforms {
            if let DataTransform::Tag { op } = t {
                if op.column_name != target {
                    continue;
                }
                for tag in &mut op.tags {
                    if tag.column_geographic_role.is_some() {
                        tag.column_geographic_role = Some(role);
                        return;
                    }
                }
            }
        }
        let pos = self.upsert_position();
        self.data_transforms.insert(
            pos,
            DataTransform::Tag {
                op: TagColumnOperation {
                    column_name: target,
                    tags: vec![ColumnTag {
                        column_description: None,
                        column_geographic_role: Some(role),
                    }],
                },
            },
        );
    }

    /// The cast target type currently set for a physical column
    pub fn cast_column_type(&self, physical_column_name: &str) -> Option<&str> {
        let target = self.output_column_name(physical_column_name);
        self.data_transforms.iter().find_map(|t| match t {
            DataTransform::Cast { op } if op.column_name == target => {
                Some(op.new_column_type.as_str())
            }
            _ => None,
        })
    }

    /// Upsert the cast for a physical column. Types are normalized to
    /// uppercase. Whether the cast is a no-op against the declared physical
    /// type is decided by the dataset, which owns the column-type lookup.
    pub fn set_cast_column_type_operation(
        &mut self,
        physical_column_name: &str,
        column_type: &str,
    ) {
        let target = self.output_column_name(physical_column_name);
        let new_type = column_type.to_uppercase();
        for t in &mut self.data_transforms {
            if let DataTransform::Cast { op } = t {
                if op.column_name == target {
                    op.new_column_type = new_type;
                    return;
                }
            }
        }
        let pos = self.upsert_position();
        self.data_transforms.insert(
            pos,
            DataTransform::Cast {
                op: CastColumnTypeOperation {
                    column_name: target,
                    new_column_type: new_type,
                    extra: Map::new(),
                },
            },
        );
    }

    /// Remove the cast for a physical column, if any
    pub fn remove_cast_column_type_operation(&mut self, physical_column_name: &str) {
        let target = self.output_column_name(physical_column_name);
        let found = self.data_transforms.iter().position(|t| {
            matches!(t, DataTransform::Cast { op } if op.column_name == target)
        });
        if let Some(index) = found {
            self.data_transforms.remove(index);
        }
    }

    /// Add a column to the projection, creating the ProjectOperation at the
    /// end of the pipeline when absent
    pub fn add_to_projected_columns(&mut self, physical_column_name: &str) {
        let target = self.output_column_name(physical_column_name);
        for t in &mut self.data_transforms {
            if let DataTransform::Project { op } = t {
                if !op.projected_columns.contains(&target) {
                    op.projected_columns.push(target);
                }
                return;
            }
        }
        self.data_transforms.push(DataTransform::Project {
            op: ProjectOperation {
                projected_columns: vec![target],
            },
        });
    }

    pub fn contains_projected_columns(&self, physical_column_name: &str) -> bool {
        let target = self.output_column_name(physical_column_name);
        self.data_transforms.iter().any(|t| {
            matches!(t, DataTransform::Project { op } if op.projected_columns.contains(&target))
        })
    }

    /// Remove a column from the projection. Removing the last member deletes
    /// the ProjectOperation node entirely; whether QuickSight then treats
    /// the table as "project everything" is its own ambiguous contract, so
    /// this mirrors the observed behavior exactly.
    pub fn remove_from_projected_columns(&mut self, physical_column_name: &str) {
        let target = self.output_column_name(physical_column_name);
        let Some(index) = self
            .data_transforms
            .iter()
            .position(DataTransform::is_project)
        else {
            return;
        };
        let DataTransform::Project { op } = &mut self.data_transforms[index] else {
            return;
        };
        if !op.projected_columns.contains(&target) {
            return;
        }
        op.projected_columns.retain(|c| c != &target);
        if op.projected_columns.is_empty() {
            self.data_transforms.remove(index);
        }
    }
}
