//! Catalog error types

use thiserror::Error;

/// Result type alias for catalog operations
pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

#[derive(Error, Debug)]
pub enum CatalogError {
    /// A header lacks one of the fields ingestion cannot proceed without
    #[error("RINEX header is missing {0}")]
    MissingHeaderField(&'static str),

    #[error("Invalid timestamp '{value}': {reason}")]
    InvalidTimestamp { value: String, reason: String },

    #[error("Invalid ECEF coordinates ({x}, {y}, {z}): {reason}")]
    InvalidCoordinates {
        x: f64,
        y: f64,
        z: f64,
        reason: String,
    },

    /// A file record exists but its bytes are gone from the byte store
    #[error("Stored bytes missing for file {file_id} at '{path}'")]
    StorageInconsistency { file_id: uuid::Uuid, path: String },

    #[error("Cannot determine file kind of '{0}'")]
    UnknownFileKind(String),

    #[error("{resource} '{id}' not found")]
    NotFound { resource: &'static str, id: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage error: {0:#}")]
    Storage(anyhow::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("KML error: {0}")]
    Kml(String),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Common(#[from] monument_common::CommonError),
}

impl CatalogError {
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    pub fn invalid_timestamp(value: &str, reason: impl Into<String>) -> Self {
        Self::InvalidTimestamp {
            value: value.trim().to_string(),
            reason: reason.into(),
        }
    }
}

impl From<anyhow::Error> for CatalogError {
    fn from(err: anyhow::Error) -> Self {
        Self::Storage(err)
    }
}
