//! MinIO/S3 artifact storage for finished reports

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::StorageConfig;
use crate::submission::FileReference;

/// A finished file ready for upload
#[derive(Debug, Clone)]
pub struct Artifact {
    pub file_name: String,
    pub content: Vec<u8>,
    pub content_type: String,
    /// Hex digest of the deterministic part of the content
    pub digest: String,
}

impl Artifact {
    /// `digest` keys the stored object; it may cover less than `content`
    pub fn new(
        file_name: impl Into<String>,
        content: Vec<u8>,
        content_type: impl Into<String>,
        digest: impl Into<String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content,
            content_type: content_type.into(),
            digest: digest.into(),
        }
    }

    /// Content-addressed object key: identical reports map to the same object
    pub fn key(&self) -> String {
        let prefix = self.digest.get(..16).unwrap_or(&self.digest);
        format!("reports/{}/{}", prefix, self.file_name)
    }
}

pub fn sha256_hex(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Accepts a finished artifact and returns a reference usable as an attachment
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn store(&self, artifact: &Artifact) -> Result<FileReference>;
}

/// S3/MinIO storage client
#[derive(Clone)]
pub struct StorageClient {
    client: Client,
    bucket: String,
    public_url: String,
}

impl StorageClient {
    /// Create a new storage client from configuration
    pub fn new(config: &StorageConfig) -> Self {
        let protocol = if config.use_ssl { "https" } else { "http" };
        let endpoint_url = format!("{}://{}:{}", protocol, config.endpoint, config.port);

        info!("Connecting to MinIO at {}", endpoint_url);

        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "minio",
        );

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(&endpoint_url)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        let public_url = config
            .public_url
            .clone()
            .unwrap_or(endpoint_url)
            .trim_end_matches('/')
            .to_string();

        Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
            public_url,
        }
    }

    /// Upload an object
    pub async fn upload(&self, key: &str, content: &[u8], content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(content.to_vec()))
            .send()
            .await
            .with_context(|| format!("Failed to upload {}", key))?;
        Ok(())
    }

    /// Check if a file exists
    pub async fn exists(&self, key: &str) -> bool {
        self.client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .is_ok()
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.public_url, self.bucket, key)
    }
}

#[async_trait]
impl ArtifactStore for StorageClient {
    async fn store(&self, artifact: &Artifact) -> Result<FileReference> {
        let key = artifact.key();

        if self.exists(&key).await {
            debug!("Artifact {} already stored", key);
        } else {
            self.upload(&key, &artifact.content, &artifact.content_type)
                .await?;
            info!("Uploaded {} ({} bytes)", key, artifact.content.len());
        }

        Ok(FileReference {
            url: self.object_url(&key),
            key,
            title: artifact.file_name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_key_is_content_addressed() {
        let artifact = |content: &[u8], digested: &[u8]| {
            Artifact::new("Lab_SOLUTION.md", content.to_vec(), "text/markdown", sha256_hex(digested))
        };
        let a = artifact(b"Generated: 10:00\nbody", b"body").key();
        let b = artifact(b"Generated: 11:30\nbody", b"body").key();
        let c = artifact(b"Generated: 10:00\nother", b"other").key();

        // only the digested part decides the key
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("reports/"));
        assert!(a.ends_with("/Lab_SOLUTION.md"));
    }

    #[tokio::test]
    async fn test_object_url_uses_public_url() {
        let config = StorageConfig {
            endpoint: "minio".into(),
            port: "9000".into(),
            access_key: "k".into(),
            secret_key: "s".into(),
            bucket: "reports-bucket".into(),
            use_ssl: false,
            public_url: Some("https://files.example.edu/".into()),
        };
        let client = StorageClient::new(&config);
        assert_eq!(
            client.object_url("reports/ab/x.md"),
            "https://files.example.edu/reports-bucket/reports/ab/x.md"
        );
    }
}
