//! Object store abstraction
//!
//! The driver only needs two bucket operations from the remote store plus a
//! way to open an authenticated session. `s3` is the production backend;
//! `memory` keeps buckets in a set and is used for tests and dry runs.

pub mod memory;
pub mod s3;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::VolumeError;

/// Connection parameters for the remote store
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Server address, `host:port` or a full URL
    pub server: String,
    pub access_key: String,
    pub secret_key: String,
    /// Use https when `server` carries no scheme
    pub secure: bool,
}

impl Credentials {
    pub fn new(
        server: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        secure: bool,
    ) -> Self {
        Self {
            server: server.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            secure,
        }
    }

    /// Server URL including scheme
    pub fn endpoint(&self) -> String {
        if self.server.contains("://") {
            return self.server.trim_end_matches('/').to_string();
        }
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}", scheme, self.server.trim_end_matches('/'))
    }

    /// Remote path of a bucket as understood by the minfs mount helper
    pub fn bucket_url(&self, bucket: &str) -> String {
        format!("{}/{}", self.endpoint(), bucket)
    }
}

// Keep the secret out of logs
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("server", &self.server)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("secure", &self.secure)
            .finish()
    }
}

/// Errors from the remote store.
///
/// Cloneable so a single failed handshake can be handed to every caller that
/// was waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("{0}")]
    Connect(String),

    #[error("{operation} failed for bucket {bucket}: {message}")]
    Request {
        operation: &'static str,
        bucket: String,
        message: String,
    },
}

impl From<StoreError> for VolumeError {
    fn from(err: StoreError) -> Self {
        VolumeError::BackingStore(err.to_string())
    }
}

/// Bucket operations needed by the driver
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError>;

    async fn create_bucket(&self, bucket: &str) -> Result<(), StoreError>;
}

/// Opens an authenticated [`ObjectStore`] session.
///
/// Implementations should fail here, not on the first bucket call, when the
/// server is unreachable or the credentials are rejected.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn ObjectStore>, StoreError>;
}
