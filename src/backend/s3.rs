//! S3 backend: blobs in a single bucket via aws-sdk-s3.
//!
//! Credentials come from the standard AWS provider chain; `endpoint` and
//! `force_path_style` cover MinIO-style S3-compatible services.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::Client;
use uuid::Uuid;

use super::{BackendError, BackendKey, StorageBackend};
use crate::codec::Wrapper;

#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: Option<String>,
    /// Custom endpoint URL (e.g. for MinIO or localstack).
    pub endpoint: Option<String>,
    /// Required by some S3-compatible services.
    pub force_path_style: bool,
    /// Key namespace inside the bucket.
    pub prefix: String,
    pub max_resource_size: u64,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: None,
            endpoint: None,
            force_path_style: false,
            prefix: "resources".to_string(),
            max_resource_size: 100_000_000,
        }
    }
}

#[derive(Clone)]
pub struct S3Backend {
    client: Client,
    config: S3Config,
}

impl S3Backend {
    pub async fn new(bucket: impl Into<String>) -> Result<Self, BackendError> {
        Self::with_config(S3Config {
            bucket: bucket.into(),
            ..Default::default()
        })
        .await
    }

    pub async fn with_config(config: S3Config) -> Result<Self, BackendError> {
        if config.bucket.is_empty() {
            return Err(BackendError::Rejected("bucket name cannot be empty".into()));
        }
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let aws_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&aws_config);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }
        Ok(Self {
            client: Client::from_conf(builder.build()),
            config,
        })
    }

    fn classify<E>(err: SdkError<E>) -> BackendError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        match &err {
            SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => {
                BackendError::Unavailable(err.to_string())
            }
            SdkError::ResponseError(_) => BackendError::Unavailable(err.to_string()),
            _ => BackendError::Rejected(err.to_string()),
        }
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn identifier(&self) -> &str {
        "s3"
    }

    fn max_resource_size(&self) -> u64 {
        self.config.max_resource_size
    }

    fn required_wrapper(&self) -> Wrapper {
        Wrapper::Identity
    }

    async fn put(&self, data: &[u8]) -> Result<BackendKey, BackendError> {
        let key = format!("{}/{}", self.config.prefix, Uuid::new_v4().simple());
        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .body(data.to_vec().into())
            .send()
            .await
            .map_err(Self::classify)?;
        Ok(key)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BackendError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match &e {
                SdkError::ServiceError(svc) if svc.err().is_no_such_key() => {
                    BackendError::NotFound(key.to_string())
                }
                _ => Self::classify(e),
            })?;
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        Ok(bytes.into_bytes().to_vec())
    }

    async fn list(&self) -> Result<Vec<BackendKey>, BackendError> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.config.bucket)
                .prefix(format!("{}/", self.config.prefix));
            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }
            let output = request.send().await.map_err(Self::classify)?;
            keys.extend(
                output
                    .contents()
                    .iter()
                    .filter_map(|o| o.key().map(str::to_string)),
            );
            match output.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        self.client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
            .map_err(Self::classify)?;
        Ok(())
    }
}
