//! Object storage trait and the S3/MinIO implementation.

use crate::{StorageError, StorageResult};
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client,
};
use serde::{Deserialize, Serialize};

/// S3/MinIO configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// S3 bucket name
    pub bucket: String,

    /// AWS region (e.g. "us-west-2") or "us-east-1" for `MinIO`
    pub region: String,

    /// S3 endpoint (custom for `MinIO`, empty for AWS S3)
    pub endpoint: Option<String>,

    /// AWS access key ID
    pub access_key_id: String,

    /// AWS secret access key
    pub secret_access_key: String,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: "pdf-remediation".to_string(),
            region: "us-west-2".to_string(),
            endpoint: None,
            access_key_id: std::env::var("AWS_ACCESS_KEY_ID").unwrap_or_default(),
            secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY").unwrap_or_default(),
        }
    }
}

/// Object storage trait.
///
/// Implementations are bound to one bucket; the pipeline's derived keys are
/// used verbatim.
#[async_trait::async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store an object from bytes, returning the key it was written to
    async fn store_file(&self, key: &str, data: &[u8]) -> StorageResult<String>;

    /// Retrieve an object as bytes
    async fn retrieve_file(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// List keys with the given prefix
    async fn list_files(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Delete an object
    async fn delete_file(&self, key: &str) -> StorageResult<()>;

    /// Check if an object exists
    async fn file_exists(&self, key: &str) -> StorageResult<bool>;
}

/// S3/MinIO object storage implementation
pub struct S3ObjectStorage {
    client: Client,
    bucket: String,
}

impl S3ObjectStorage {
    /// Create a new S3 object storage client
    pub async fn new(config: S3Config) -> StorageResult<Self> {
        if config.bucket.is_empty() {
            return Err(StorageError::InvalidConfig(
                "bucket name must not be empty".to_string(),
            ));
        }

        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "remediate-storage",
        );

        let region = Region::new(config.region.clone());

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(region)
            .behavior_version_latest();

        // Set custom endpoint for MinIO
        if let Some(endpoint) = config.endpoint {
            s3_config_builder = s3_config_builder
                .endpoint_url(endpoint)
                .force_path_style(true); // Required for MinIO
        }

        let s3_config = s3_config_builder.build();
        let client = Client::from_conf(s3_config);

        Ok(Self {
            client,
            bucket: config.bucket,
        })
    }
}

#[async_trait::async_trait]
impl ObjectStorage for S3ObjectStorage {
    async fn store_file(&self, key: &str, data: &[u8]) -> StorageResult<String> {
        let byte_stream = ByteStream::from(data.to_vec());

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(byte_stream)
            .send()
            .await
            .map_err(|e| StorageError::S3Error(e.to_string()))?;

        Ok(key.to_string())
    }

    async fn retrieve_file(&self, key: &str) -> StorageResult<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.to_string().contains("NoSuchKey") {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::S3Error(e.to_string())
                }
            })?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::S3Error(e.to_string()))?;

        Ok(bytes.to_vec())
    }

    async fn list_files(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .send()
            .await
            .map_err(|e| StorageError::S3Error(e.to_string()))?;

        let keys = response
            .contents()
            .iter()
            .filter_map(|obj| obj.key().map(std::string::ToString::to_string))
            .collect();

        Ok(keys)
    }

    async fn delete_file(&self, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::S3Error(e.to_string()))?;

        Ok(())
    }

    async fn file_exists(&self, key: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.to_string().contains("NotFound") {
                    Ok(false)
                } else {
                    Err(StorageError::S3Error(e.to_string()))
                }
            }
        }
    }
}
