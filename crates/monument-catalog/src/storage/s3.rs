use super::config::S3Config;
use super::{validate_key, ByteStore};
use crate::rinex::HeaderSource;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client,
};
use tracing::{debug, info, instrument};

/// Bytes fetched for header parsing; 250 records of 80 columns fit easily
const HEADER_PREFIX_BYTES: u64 = 64 * 1024;

/// Byte store backed by an S3-compatible bucket
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl std::fmt::Debug for S3Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Store").field("bucket", &self.bucket).finish()
    }
}

impl S3Store {
    pub async fn new(config: S3Config) -> Result<Self> {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "monument-storage",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(builder.build());

        info!(bucket = %config.bucket, "S3 byte store initialized");

        Ok(Self {
            client,
            bucket: config.bucket,
        })
    }

    async fn get(&self, key: &str, range: Option<String>) -> Result<Vec<u8>> {
        validate_key(key)?;
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .set_range(range)
            .send()
            .await
            .with_context(|| format!("Failed to download s3://{}/{}", self.bucket, key))?;

        let data = response
            .body
            .collect()
            .await
            .context("Failed to read S3 response body")?
            .into_bytes()
            .to_vec();

        Ok(data)
    }
}

#[async_trait]
impl ByteStore for S3Store {
    #[instrument(skip(self, data), fields(size = data.len()))]
    async fn save(&self, key: &str, data: &[u8]) -> Result<()> {
        validate_key(key)?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data.to_vec()))
            .content_type("application/octet-stream")
            .send()
            .await
            .with_context(|| format!("Failed to upload s3://{}/{}", self.bucket, key))?;

        debug!("uploaded s3://{}/{}", self.bucket, key);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn exists(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(anyhow!("Failed to check s3://{}/{}: {}", self.bucket, key, e)),
        }
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        self.get(key, None).await
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to delete s3://{}/{}", self.bucket, key))?;

        debug!("deleted s3://{}/{}", self.bucket, key);
        Ok(())
    }

    async fn header_source(&self, key: &str) -> Result<HeaderSource> {
        let range = format!("bytes=0-{}", HEADER_PREFIX_BYTES - 1);
        Ok(HeaderSource::Bytes(self.get(key, Some(range)).await?))
    }
}
