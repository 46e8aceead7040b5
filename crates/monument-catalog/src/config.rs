//! Configuration management
//!
//! Everything comes from environment variables (optionally seeded from a
//! `.env` file) over the defaults below.

use crate::db::DbConfig;
use crate::rinex::DEFAULT_HEADER_LINE_LIMIT;
use crate::storage::config::StorageConfig;
use serde::{Deserialize, Serialize};

// ============================================================================
// Ingestion Defaults
// ============================================================================

/// Maximum planar distance at which two stations are the same monument.
pub const DEFAULT_MERGE_RADIUS_M: f64 = 7.0;

/// Radius used to attach KML placemarks to catalog points.
pub const DEFAULT_KML_MATCH_RADIUS_M: f64 = 3.0;

/// Candidate count above which a merge is flagged for review.
pub const DEFAULT_MERGE_AUDIT_THRESHOLD: usize = 2;

/// Attempts per upload group after a lost race or deadlock.
pub const DEFAULT_MERGE_CONFLICT_RETRIES: u32 = 3;

/// Key prefix under which uploaded bytes are stored.
pub const DEFAULT_UPLOAD_PREFIX: &str = "uploads";

/// Top-level configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DbConfig,
    pub storage: StorageConfig,
    pub ingest: IngestConfig,
}

/// Tunables for RINEX ingestion and KML enrichment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub merge_radius_m: f64,
    pub kml_match_radius_m: f64,
    pub header_line_limit: usize,
    pub merge_audit_threshold: usize,
    pub merge_conflict_retries: u32,
    pub upload_prefix: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            merge_radius_m: DEFAULT_MERGE_RADIUS_M,
            kml_match_radius_m: DEFAULT_KML_MATCH_RADIUS_M,
            header_line_limit: DEFAULT_HEADER_LINE_LIMIT,
            merge_audit_threshold: DEFAULT_MERGE_AUDIT_THRESHOLD,
            merge_conflict_retries: DEFAULT_MERGE_CONFLICT_RETRIES,
            upload_prefix: DEFAULT_UPLOAD_PREFIX.to_string(),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl IngestConfig {
    /// Read `MERGE_RADIUS_M`, `KML_MATCH_RADIUS_M`, `HEADER_LINE_LIMIT`,
    /// `MERGE_AUDIT_THRESHOLD`, `MERGE_CONFLICT_RETRIES` and `UPLOAD_PREFIX`.
    pub fn from_env() -> Self {
        Self {
            merge_radius_m: env_or("MERGE_RADIUS_M", DEFAULT_MERGE_RADIUS_M),
            kml_match_radius_m: env_or("KML_MATCH_RADIUS_M", DEFAULT_KML_MATCH_RADIUS_M),
            header_line_limit: env_or("HEADER_LINE_LIMIT", DEFAULT_HEADER_LINE_LIMIT),
            merge_audit_threshold: env_or("MERGE_AUDIT_THRESHOLD", DEFAULT_MERGE_AUDIT_THRESHOLD),
            merge_conflict_retries: env_or("MERGE_CONFLICT_RETRIES", DEFAULT_MERGE_CONFLICT_RETRIES),
            upload_prefix: std::env::var("UPLOAD_PREFIX")
                .unwrap_or_else(|_| DEFAULT_UPLOAD_PREFIX.to_string()),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.merge_radius_m.is_finite() && self.merge_radius_m > 0.0) {
            anyhow::bail!("MERGE_RADIUS_M must be a positive number of meters");
        }
        if !(self.kml_match_radius_m.is_finite() && self.kml_match_radius_m > 0.0) {
            anyhow::bail!("KML_MATCH_RADIUS_M must be a positive number of meters");
        }
        if self.header_line_limit == 0 {
            anyhow::bail!("HEADER_LINE_LIMIT must be greater than 0");
        }
        if self.merge_conflict_retries == 0 {
            anyhow::bail!("MERGE_CONFLICT_RETRIES must be at least 1");
        }
        if self.upload_prefix.contains("..") || self.upload_prefix.starts_with('/') {
            anyhow::bail!("UPLOAD_PREFIX must be a relative key prefix");
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            database: DbConfig::from_env()?,
            storage: StorageConfig::from_env()?,
            ingest: IngestConfig::from_env(),
        };

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }
        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }
        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        self.ingest.validate()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_ingest_defaults() {
        let config = IngestConfig::default();
        assert_eq!(config.merge_radius_m, 7.0);
        assert_eq!(config.kml_match_radius_m, 3.0);
        assert_eq!(config.header_line_limit, 250);
        assert_eq!(config.merge_audit_threshold, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ingest_validation() {
        let mut config = IngestConfig {
            merge_radius_m: 0.0,
            ..IngestConfig::default()
        };
        assert!(config.validate().is_err());

        config.merge_radius_m = f64::NAN;
        assert!(config.validate().is_err());

        config.merge_radius_m = 7.0;
        config.upload_prefix = "../escape".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pool_bounds_validated() {
        let config = Config {
            database: DbConfig {
                min_connections: 30,
                max_connections: 10,
                ..DbConfig::default()
            },
            storage: StorageConfig::default(),
            ingest: IngestConfig::default(),
        };
        assert!(config.validate().is_err());
    }
}
