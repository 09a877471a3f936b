//! Error handling module
//!
//! Provides unified error types for the entire application.

use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("describe data set failed status: {0}")]
    DescribeFailed(u16),

    #[error("update data set failed status: {0}")]
    UpdateFailed(u16),

    #[error("column not found: {0}")]
    ColumnNotFound(String),

    #[error("physical table not found: {0}")]
    PhysicalTableNotFound(String),

    #[error("unsupported manifest format: {0}")]
    UnsupportedManifestFormat(String),

    #[error("could not resolve AWS account id: {0}")]
    NoAccountId(String),

    #[error("QuickSight client error: {0}")]
    Client(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias used throughout the crate
pub type AppResult<T> = Result<T, AppError>;
