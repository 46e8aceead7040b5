//! Byte storage for uploaded files
//!
//! File records in the database point at keys in a [`ByteStore`]. Two
//! backends exist: a local directory (the default) and an S3-compatible
//! bucket.

use crate::rinex::HeaderSource;
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

pub mod config;
pub mod local;
pub mod s3;

pub use local::LocalStore;
pub use s3::S3Store;

/// Content storage keyed by relative, slash separated paths
#[async_trait]
pub trait ByteStore: Send + Sync + std::fmt::Debug {
    /// Write `data` under `key`, replacing anything already there
    async fn save(&self, key: &str, data: &[u8]) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn read(&self, key: &str) -> Result<Vec<u8>>;

    /// Remove `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// A source for header parsing that avoids loading the whole object
    async fn header_source(&self, key: &str) -> Result<HeaderSource>;
}

/// Build the store selected by configuration
pub async fn open_store(config: &config::StorageConfig) -> Result<Arc<dyn ByteStore>> {
    Ok(match config {
        config::StorageConfig::Local { media_root } => Arc::new(LocalStore::new(media_root).await?),
        config::StorageConfig::S3(s3) => Arc::new(S3Store::new(s3.clone()).await?),
    })
}

/// Reject keys that could escape the store root
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        bail!("storage key is empty");
    }
    if key.starts_with('/') || key.contains('\\') || key.contains('\0') {
        bail!("storage key '{}' must be a relative slash separated path", key);
    }
    if key.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
        bail!("storage key '{}' contains an empty or relative component", key);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("uploads/STA10690.25o").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("uploads/../../etc").is_err());
        assert!(validate_key("uploads//x").is_err());
        assert!(validate_key("uploads\\x").is_err());
    }
}
