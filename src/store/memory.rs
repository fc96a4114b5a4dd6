//! In-memory object store
//!
//! Buckets are names in a set. Useful for tests and for running the plugin
//! without a server.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Credentials, ObjectStore, StoreConnector, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    buckets: Mutex<HashSet<String>>,
    creates: AtomicUsize,
    reject_creates: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that already holds the given buckets
    pub fn with_buckets<I, S>(buckets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            buckets: Mutex::new(buckets.into_iter().map(Into::into).collect()),
            creates: AtomicUsize::new(0),
            reject_creates: Mutex::new(None),
        }
    }

    pub fn contains(&self, bucket: &str) -> bool {
        self.buckets.lock().contains(bucket)
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().len()
    }

    /// Number of successful `create_bucket` calls
    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    /// Make subsequent `create_bucket` calls fail with `message`
    pub fn set_create_failure(&self, message: Option<&str>) {
        *self.reject_creates.lock() = message.map(str::to_string);
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError> {
        Ok(self.contains(bucket))
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        let failure = self.reject_creates.lock().clone();
        if let Some(message) = failure {
            return Err(StoreError::Request {
                operation: "CreateBucket",
                bucket: bucket.to_string(),
                message,
            });
        }
        self.buckets.lock().insert(bucket.to_string());
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Connector handing out one shared [`MemoryStore`].
///
/// Connections can be made to fail to exercise handshake errors.
pub struct MemoryConnector {
    store: Arc<MemoryStore>,
    fail_with: Mutex<Option<String>>,
    connects: AtomicUsize,
}

impl MemoryConnector {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            fail_with: Mutex::new(None),
            connects: AtomicUsize::new(0),
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Make subsequent connects fail with `message` (or succeed with `None`)
    pub fn set_failure(&self, message: Option<&str>) {
        *self.fail_with.lock() = message.map(str::to_string);
    }

    /// Number of connect attempts so far
    pub fn connect_calls(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn connect(&self, _credentials: &Credentials) -> Result<Arc<dyn ObjectStore>, StoreError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let failure = self.fail_with.lock().clone();
        if let Some(message) = failure {
            return Err(StoreError::Connect(message));
        }
        let store: Arc<dyn ObjectStore> = self.store.clone();
        Ok(store)
    }
}
