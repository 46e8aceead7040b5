use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Default directory for the local byte store
pub const DEFAULT_MEDIA_ROOT: &str = "./mediafiles";

/// Which byte store holds uploaded files
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    Local { media_root: PathBuf },
    S3(S3Config),
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Local {
            media_root: PathBuf::from(DEFAULT_MEDIA_ROOT),
        }
    }
}

impl StorageConfig {
    /// `STORAGE_BACKEND=local` (default, rooted at `MEDIA_ROOT`) or `s3`
    pub fn from_env() -> anyhow::Result<Self> {
        let backend = env::var("STORAGE_BACKEND").unwrap_or_else(|_| "local".to_string());
        match backend.to_lowercase().as_str() {
            "local" | "fs" => Ok(StorageConfig::Local {
                media_root: env::var("MEDIA_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(DEFAULT_MEDIA_ROOT)),
            }),
            "s3" => Ok(StorageConfig::S3(S3Config::from_env())),
            other => anyhow::bail!("Unknown STORAGE_BACKEND '{}', expected local or s3", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    #[serde(skip_serializing)]
    pub secret_key: String,
    pub path_style: bool,
}

impl S3Config {
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var("S3_ENDPOINT").ok(),
            region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            bucket: env::var("S3_BUCKET").unwrap_or_else(|_| "monument-uploads".to_string()),
            access_key: env::var("S3_ACCESS_KEY")
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .unwrap_or_else(|_| "minioadmin".to_string()),
            secret_key: env::var("S3_SECRET_KEY")
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .unwrap_or_else(|_| "minioadmin".to_string()),
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        }
    }

    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            region: "us-east-1".to_string(),
            bucket: bucket.into(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
            path_style: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_minio() {
        let config = S3Config::for_minio("http://localhost:9000", "test-bucket");
        assert_eq!(config.endpoint, Some("http://localhost:9000".to_string()));
        assert_eq!(config.bucket, "test-bucket");
        assert!(config.path_style);
    }

    #[test]
    fn test_default_is_local_media_root() {
        match StorageConfig::default() {
            StorageConfig::Local { media_root } => {
                assert_eq!(media_root, PathBuf::from("./mediafiles"))
            },
            StorageConfig::S3(_) => panic!("expected local backend"),
        }
    }
}
