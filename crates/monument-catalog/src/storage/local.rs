use super::{validate_key, ByteStore};
use crate::rinex::HeaderSource;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Byte store rooted at a local directory
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create media root {}", root.display()))?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ByteStore for LocalStore {
    #[instrument(skip(self, data), fields(size = data.len()))]
    async fn save(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // write then rename so readers never see a partial file
        let partial = path.with_extension(format!(
            "{}.partial",
            path.extension().and_then(|e| e.to_str()).unwrap_or("")
        ));
        tokio::fs::write(&partial, data)
            .await
            .with_context(|| format!("Failed to write {}", partial.display()))?;
        tokio::fs::rename(&partial, &path)
            .await
            .with_context(|| format!("Failed to move upload into {}", path.display()))?;

        debug!(path = %path.display(), "stored bytes");
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
        }
    }

    async fn header_source(&self, key: &str) -> Result<HeaderSource> {
        Ok(HeaderSource::Path(self.path_for(key)?))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_read_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().join("media")).await.unwrap();

        store.save("uploads/STA10690.25o", b"header").await.unwrap();
        assert!(store.exists("uploads/STA10690.25o").await.unwrap());
        assert_eq!(store.read("uploads/STA10690.25o").await.unwrap(), b"header");

        store.save("uploads/STA10690.25o", b"replaced").await.unwrap();
        assert_eq!(store.read("uploads/STA10690.25o").await.unwrap(), b"replaced");

        store.delete("uploads/STA10690.25o").await.unwrap();
        assert!(!store.exists("uploads/STA10690.25o").await.unwrap());
        // second delete is a no-op
        store.delete("uploads/STA10690.25o").await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).await.unwrap();
        assert!(store.save("../outside.25o", b"x").await.is_err());
        assert!(store.read("/etc/hostname").await.is_err());
    }

    #[tokio::test]
    async fn test_header_source_is_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).await.unwrap();
        match store.header_source("uploads/a.25o").await.unwrap() {
            HeaderSource::Path(path) => assert_eq!(path, dir.path().join("uploads/a.25o")),
            other => panic!("unexpected source {:?}", other),
        }
    }
}
