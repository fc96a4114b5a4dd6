//! S3 object store backend
//!
//! Talks to Amazon S3 or any S3-compatible server (MinIO, LocalStack, ...)
//! with static credentials and path-style addressing.

use std::sync::Arc;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials as StaticCredentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use super::{Credentials, ObjectStore, StoreConnector, StoreError};

/// Region sent with every request; MinIO ignores it unless configured otherwise
pub const DEFAULT_REGION: &str = "us-east-1";

/// S3 bucket operations on top of the AWS SDK client
pub struct S3Store {
    client: Client,
}

impl S3Store {
    /// Build a client for the given credentials without contacting the server
    pub fn new(credentials: &Credentials) -> Self {
        let static_credentials = StaticCredentials::new(
            credentials.access_key.clone(),
            credentials.secret_key.clone(),
            None,
            None,
            "miniovol",
        );

        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(DEFAULT_REGION))
            .endpoint_url(credentials.endpoint())
            .credentials_provider(static_credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(config),
        }
    }

    /// Check that the server is reachable and accepts the credentials
    async fn verify(&self) -> Result<(), StoreError> {
        self.client
            .list_buckets()
            .send()
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Connect(DisplayErrorContext(&e).to_string()))
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError> {
        debug!("HeadBucket {}", bucket);

        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(StoreError::Request {
                operation: "HeadBucket",
                bucket: bucket.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            }),
        }
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        debug!("CreateBucket {}", bucket);

        match self.client.create_bucket().bucket(bucket).send().await {
            Ok(_) => {
                info!("Created bucket {}", bucket);
                Ok(())
            }
            // Lost a race with ourselves; the bucket is there and ours
            Err(e)
                if e
                    .as_service_error()
                    .is_some_and(|se| se.is_bucket_already_owned_by_you()) =>
            {
                Ok(())
            }
            Err(e) => Err(StoreError::Request {
                operation: "CreateBucket",
                bucket: bucket.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            }),
        }
    }
}

/// Connector producing [`S3Store`] sessions
#[derive(Debug, Default, Clone)]
pub struct S3Connector;

#[async_trait]
impl StoreConnector for S3Connector {
    async fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn ObjectStore>, StoreError> {
        info!("Connecting to object store at {}", credentials.endpoint());
        let s3 = S3Store::new(credentials);
        s3.verify().await?;
        info!("Connected to {} as {}", credentials.endpoint(), credentials.access_key);
        let store: Arc<dyn ObjectStore> = Arc::new(s3);
        Ok(store)
    }
}
