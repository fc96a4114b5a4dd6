//! Registry of known volumes
//!
//! All state lives behind a single readers-writer lock. Single-step calls
//! (`insert`, `lookup`, `delete`, `snapshot`) take the lock for exactly one
//! operation. Multi-step sequences such as "look up, mount, then bump the
//! connection count" must go through [`VolumeRegistry::write`], whose guard
//! keeps the writer lock for as long as it is alive. Records are only ever
//! handed out as copies.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Result, VolumeError};

/// One named volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeRecord {
    pub name: String,
    /// Local directory the bucket is mounted on
    pub mountpoint: PathBuf,
    /// Backing bucket
    pub bucket: String,
    /// Consumers currently holding the volume mounted
    pub connections: u32,
}

impl VolumeRecord {
    pub fn new(name: impl Into<String>, mountpoint: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mountpoint: mountpoint.into(),
            bucket: bucket.into(),
            connections: 0,
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.connections > 0
    }
}

type VolumeMap = HashMap<String, VolumeRecord>;

#[derive(Debug, Default)]
pub struct VolumeRegistry {
    volumes: RwLock<VolumeMap>,
}

impl VolumeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared access for consistent multi-field reads
    pub async fn read(&self) -> RegistryReadGuard<'_> {
        RegistryReadGuard {
            volumes: self.volumes.read().await,
        }
    }

    /// Exclusive access held until the guard is dropped
    pub async fn write(&self) -> RegistryWriteGuard<'_> {
        RegistryWriteGuard {
            volumes: self.volumes.write().await,
        }
    }

    /// Add a record; fails if the name is taken
    pub async fn insert(&self, record: VolumeRecord) -> Result<()> {
        self.write().await.insert(record)
    }

    pub async fn lookup(&self, name: &str) -> Option<VolumeRecord> {
        self.read().await.lookup(name)
    }

    /// Remove an unmounted record
    pub async fn delete(&self, name: &str) -> Result<VolumeRecord> {
        self.write().await.delete(name)
    }

    /// Point-in-time copy of every record, in no particular order
    pub async fn snapshot(&self) -> Vec<VolumeRecord> {
        self.read().await.snapshot()
    }
}

pub struct RegistryReadGuard<'a> {
    volumes: RwLockReadGuard<'a, VolumeMap>,
}

impl RegistryReadGuard<'_> {
    pub fn lookup(&self, name: &str) -> Option<VolumeRecord> {
        self.volumes.get(name).cloned()
    }

    pub fn snapshot(&self) -> Vec<VolumeRecord> {
        self.volumes.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }
}

pub struct RegistryWriteGuard<'a> {
    volumes: RwLockWriteGuard<'a, VolumeMap>,
}

impl RegistryWriteGuard<'_> {
    pub fn contains(&self, name: &str) -> bool {
        self.volumes.contains_key(name)
    }

    pub fn lookup(&self, name: &str) -> Option<VolumeRecord> {
        self.volumes.get(name).cloned()
    }

    /// Add a record; never overwrites an existing one
    pub fn insert(&mut self, record: VolumeRecord) -> Result<()> {
        if self.volumes.contains_key(&record.name) {
            return Err(VolumeError::AlreadyExists(record.name));
        }
        self.volumes.insert(record.name.clone(), record);
        Ok(())
    }

    /// Overwrite the connection count of an existing record
    pub fn set_connections(&mut self, name: &str, connections: u32) -> Result<()> {
        let record = self
            .volumes
            .get_mut(name)
            .ok_or_else(|| VolumeError::NotFound(name.to_string()))?;
        record.connections = connections;
        Ok(())
    }

    /// Remove a record; refuses while it is mounted
    pub fn delete(&mut self, name: &str) -> Result<VolumeRecord> {
        let mounted = match self.volumes.get(name) {
            Some(record) => record.is_mounted(),
            None => return Err(VolumeError::NotFound(name.to_string())),
        };
        if mounted {
            return Err(VolumeError::VolumeInUse(name.to_string()));
        }
        self.volumes
            .remove(name)
            .ok_or_else(|| VolumeError::NotFound(name.to_string()))
    }

    pub fn snapshot(&self) -> Vec<VolumeRecord> {
        self.volumes.values().cloned().collect()
    }
}
