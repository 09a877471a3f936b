//! Field folders
//!
//! A field folder groups output columns for presentation. Membership is
//! exclusive: a column belongs to at most one folder at a time, and a
//! folder with no members is dropped from the serialized map.

use serde::{Deserialize, Serialize};

/// Strip trailing path separators so `Key/` and `Key` name the same folder.
pub fn normalize_path(path: &str) -> &str {
    path.trim_end_matches('/')
}

/// A named grouping of output column names
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldFolder {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub columns: Vec<String>,
}

impl FieldFolder {
    pub fn contains_column(&self, column_name: &str) -> bool {
        self.columns.iter().any(|c| c == column_name)
    }

    pub fn add_column(&mut self, column_name: &str) {
        if !self.contains_column(column_name) {
            self.columns.push(column_name.to_string());
        }
    }

    pub fn remove_column(&mut self, column_name: &str) {
        self.columns.retain(|c| c != column_name);
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_normalize_path_strips_trailing_separators() {
        assert_eq!(normalize_path("Key/"), "Key");
        assert_eq!(normalize_path("Key"), "Key");
        assert_eq!(normalize_path("a/b//"), "a/b");
    }

    #[test]
    fn test_add_column_is_idempotent() {
        let mut folder = FieldFolder::default();
        folder.add_column("id");
        folder.add_column("id");
        assert_eq!(folder.columns, vec!["id"]);
    }

    #[test]
    fn test_remove_column_empties_folder() {
        let mut folder = FieldFolder {
            description: Some("keys".to_string()),
            columns: vec!["id".to_string()],
        };
        folder.remove_column("id");
        assert!(folder.is_empty());
    }
}
