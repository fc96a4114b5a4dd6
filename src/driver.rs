//! Volume lifecycle driver
//!
//! Implements the Docker volume operations on top of the registry. Each
//! volume moves through `absent -> created (0 connections) <-> mounted
//! (n > 0) -> absent`. The OS-level mount only happens on the first Mount and
//! the OS-level unmount only on the last Unmount; in between the driver just
//! counts consumers.
//!
//! Every check-then-act sequence runs under the registry's writer lock,
//! including the external mount and unmount calls. Volumes therefore never
//! observe each other's half-finished transitions, at the cost of
//! serializing mounts across volumes.

use std::collections::HashMap;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::bootstrap::Bootstrap;
use crate::config::{Config, ConnectionDefaults};
use crate::error::{Result, VolumeError};
use crate::mount::{ExecError, MountExecutor};
use crate::naming::{generate_name, BUCKET_PREFIX, VOLUME_PREFIX};
use crate::provision::ConfigProvisioner;
use crate::registry::{VolumeRecord, VolumeRegistry};
use crate::store::{Credentials, ObjectStore, StoreConnector, StoreError};

/// Create option names understood by the driver
pub mod opts {
    pub const SERVER: &str = "server";
    pub const ACCESS_KEY: &str = "accessKey";
    pub const SECRET_KEY: &str = "secretKey";
    pub const SECURE: &str = "secure";
    pub const BUCKET: &str = "bucket";
}

/// How many fresh mountpoint names to try before giving up
const MOUNTPOINT_ATTEMPTS: usize = 8;

/// Scope reported to Docker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Volumes only exist on this host
    Local,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Local => "local",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capability {
    pub scope: Scope,
}

/// Driver settings (resolved from [`Config`])
#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub mount_root: PathBuf,
    pub volume_prefix: String,
    pub bucket_prefix: String,
    /// Version written into the minfs descriptor
    pub minfs_version: String,
    pub connection: ConnectionDefaults,
}

impl DriverSettings {
    pub fn new(mount_root: impl Into<PathBuf>) -> Self {
        Self {
            mount_root: mount_root.into(),
            volume_prefix: VOLUME_PREFIX.to_string(),
            bucket_prefix: BUCKET_PREFIX.to_string(),
            minfs_version: crate::config::DEFAULT_MINFS_VERSION.to_string(),
            connection: ConnectionDefaults::default(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            mount_root: config.volumes.mount_root.clone(),
            volume_prefix: config.volumes.volume_prefix.clone(),
            bucket_prefix: config.volumes.bucket_prefix.clone(),
            minfs_version: config.minfs.version.clone(),
            connection: config.connection.clone(),
        }
    }
}

/// Established object store session and the credentials that opened it
pub struct Connection {
    pub credentials: Credentials,
    pub store: Arc<dyn ObjectStore>,
}

pub struct Driver {
    settings: DriverSettings,
    registry: VolumeRegistry,
    connection: Bootstrap<Connection, StoreError>,
    connector: Arc<dyn StoreConnector>,
    provisioner: ConfigProvisioner,
    executor: Arc<dyn MountExecutor>,
}

impl Driver {
    pub fn new(
        settings: DriverSettings,
        connector: Arc<dyn StoreConnector>,
        provisioner: ConfigProvisioner,
        executor: Arc<dyn MountExecutor>,
    ) -> Self {
        Self {
            settings,
            registry: VolumeRegistry::new(),
            connection: Bootstrap::new(),
            connector,
            provisioner,
            executor,
        }
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    /// Register a new volume backed by a bucket.
    ///
    /// Connects to the object store on first use. The bucket named by the
    /// `bucket` option is bound if it exists and created otherwise; without
    /// the option a fresh bucket is generated.
    pub async fn create(&self, name: &str, options: &HashMap<String, String>) -> Result<()> {
        let credentials = self.resolve_credentials(options)?;

        let mut volumes = self.registry.write().await;
        if volumes.contains(name) {
            return Err(VolumeError::AlreadyExists(name.to_string()));
        }

        let connection = self.connect(credentials).await?;

        // Mountpoint before bucket: a directory failure leaves no bucket behind
        let used: Vec<PathBuf> = volumes.snapshot().into_iter().map(|r| r.mountpoint).collect();
        let mountpoint = self.create_mountpoint(&used)?;

        let bucket = match self
            .bind_bucket(connection.store.as_ref(), option(options, opts::BUCKET))
            .await
        {
            Ok(bucket) => bucket,
            Err(e) => {
                if let Err(cleanup) = std::fs::remove_dir(&mountpoint) {
                    warn!("Failed to remove mountpoint {:?}: {}", mountpoint, cleanup);
                }
                return Err(e);
            }
        };

        volumes.insert(VolumeRecord::new(name, &mountpoint, &bucket))?;
        info!("Created volume {} at {:?} (bucket {})", name, mountpoint, bucket);
        Ok(())
    }

    /// Attach a volume for one more consumer and return its mountpoint
    pub async fn mount(&self, name: &str) -> Result<PathBuf> {
        let mut volumes = self.registry.write().await;
        let record = volumes
            .lookup(name)
            .ok_or_else(|| VolumeError::NotFound(name.to_string()))?;

        if record.is_mounted() {
            let connections = record.connections.saturating_add(1);
            volumes.set_connections(name, connections)?;
            debug!("Volume {} already mounted, {} connections", name, connections);
            return Ok(record.mountpoint);
        }

        let mount_error = |reason: String| VolumeError::Mount {
            name: name.to_string(),
            reason,
        };

        let connection = self
            .connection
            .get()
            .ok_or_else(|| mount_error("no object store connection".to_string()))?;
        let credentials = &connection.credentials;

        // The helper reads this file, so it must be complete before it runs
        self.provisioner
            .provision(
                &credentials.access_key,
                &credentials.secret_key,
                &self.settings.minfs_version,
            )
            .map_err(|e| {
                mount_error(format!(
                    "failed to provision {:?}: {}",
                    self.provisioner.path(),
                    e
                ))
            })?;

        self.executor
            .mount(&credentials.bucket_url(&record.bucket), &record.mountpoint)
            .await
            .map_err(|e| mount_error(e.to_string()))?;

        volumes.set_connections(name, 1)?;
        info!("Mounted volume {} at {:?}", name, record.mountpoint);
        Ok(record.mountpoint)
    }

    /// Release one consumer; unmounts when the last one leaves
    pub async fn unmount(&self, name: &str) -> Result<()> {
        let mut volumes = self.registry.write().await;
        let record = volumes
            .lookup(name)
            .ok_or_else(|| VolumeError::NotFound(name.to_string()))?;

        if record.connections > 1 {
            let connections = record.connections - 1;
            volumes.set_connections(name, connections)?;
            debug!("Volume {} still has {} connections", name, connections);
            return Ok(());
        }

        match self.executor.unmount(&record.mountpoint).await {
            Ok(()) => {}
            Err(ExecError::NotMounted(path)) => {
                debug!("Volume {} was not mounted at {:?}", name, path);
            }
            Err(e) => {
                return Err(VolumeError::Unmount {
                    name: name.to_string(),
                    reason: e.to_string(),
                })
            }
        }

        volumes.set_connections(name, 0)?;
        info!("Unmounted volume {}", name);
        Ok(())
    }

    /// Delete an unmounted volume and its mountpoint directory
    pub async fn remove(&self, name: &str) -> Result<()> {
        let mut volumes = self.registry.write().await;
        let record = volumes
            .lookup(name)
            .ok_or_else(|| VolumeError::NotFound(name.to_string()))?;

        if record.is_mounted() {
            return Err(VolumeError::VolumeInUse(name.to_string()));
        }

        match std::fs::remove_dir_all(&record.mountpoint) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Mountpoint {:?} already gone", record.mountpoint);
            }
            Err(source) => {
                return Err(VolumeError::Directory {
                    path: record.mountpoint,
                    source,
                })
            }
        }

        volumes.delete(name)?;
        info!("Removed volume {}", name);
        Ok(())
    }

    /// Copy of a volume's record
    pub async fn get(&self, name: &str) -> Result<VolumeRecord> {
        self.registry
            .lookup(name)
            .await
            .ok_or_else(|| VolumeError::NotFound(name.to_string()))
    }

    pub async fn path(&self, name: &str) -> Result<PathBuf> {
        self.get(name).await.map(|record| record.mountpoint)
    }

    /// Copies of every record, in no particular order
    pub async fn list(&self) -> Vec<VolumeRecord> {
        self.registry.snapshot().await
    }

    pub fn capabilities(&self) -> Capability {
        Capability {
            scope: Scope::Local,
        }
    }

    /// Unmount every mounted volume, skipping individual failures.
    ///
    /// Used on shutdown; returns how many volumes were unmounted. A volume
    /// whose unmount fails keeps its connection count.
    pub async fn unmount_all(&self) -> usize {
        let mut volumes = self.registry.write().await;
        let mut unmounted = 0;

        for record in volumes.snapshot().into_iter().filter(|r| r.is_mounted()) {
            match self.executor.unmount(&record.mountpoint).await {
                Ok(()) | Err(ExecError::NotMounted(_)) => {}
                Err(e) => {
                    // Still mounted; the count must keep saying so
                    warn!("Failed to unmount volume {}: {}", record.name, e);
                    continue;
                }
            }
            match volumes.set_connections(&record.name, 0) {
                Ok(()) => unmounted += 1,
                Err(e) => warn!("Failed to reset volume {}: {}", record.name, e),
            }
        }

        unmounted
    }

    /// Credentials from the Create options, falling back to configured defaults
    fn resolve_credentials(&self, options: &HashMap<String, String>) -> Result<Credentials> {
        let defaults = &self.settings.connection;

        let required = |key: &str, fallback: &Option<String>| -> Result<String> {
            option(options, key)
                .map(str::to_string)
                .or_else(|| fallback.clone())
                .ok_or_else(|| VolumeError::MissingParameter(key.to_string()))
        };

        let server = required(opts::SERVER, &defaults.server)?;
        let access_key = required(opts::ACCESS_KEY, &defaults.access_key)?;
        let secret_key = required(opts::SECRET_KEY, &defaults.secret_key)?;

        let secure = match option(options, opts::SECURE) {
            Some(value) => parse_bool(value).ok_or_else(|| VolumeError::InvalidParameter {
                option: opts::SECURE.to_string(),
                value: value.to_string(),
            })?,
            None => defaults.secure.unwrap_or(false),
        };

        Ok(Credentials::new(server, access_key, secret_key, secure))
    }

    async fn connect(&self, credentials: Credentials) -> Result<Arc<Connection>> {
        let connector = self.connector.clone();
        let requested = credentials.clone();

        let connection = self
            .connection
            .get_or_try_init(|| async move {
                let store = connector.connect(&credentials).await?;
                Ok::<_, StoreError>(Arc::new(Connection { credentials, store }))
            })
            .await?;

        if connection.credentials != requested {
            warn!(
                "Ignoring connection options for {}; already connected to {}",
                requested.server, connection.credentials.server
            );
        }

        Ok(connection)
    }

    async fn bind_bucket(&self, store: &dyn ObjectStore, requested: Option<&str>) -> Result<String> {
        let bucket = match requested {
            Some(bucket) => bucket.to_string(),
            None => generate_name(&self.settings.bucket_prefix),
        };

        if store.bucket_exists(&bucket).await? {
            debug!("Binding existing bucket {}", bucket);
        } else {
            store.create_bucket(&bucket).await?;
        }

        Ok(bucket)
    }

    /// Pick an unused directory under the mount root and create it
    fn create_mountpoint(&self, used: &[PathBuf]) -> Result<PathBuf> {
        let mut last = None;
        for _ in 0..MOUNTPOINT_ATTEMPTS {
            let candidate = self
                .settings
                .mount_root
                .join(generate_name(&self.settings.volume_prefix));
            if used.contains(&candidate) || candidate.exists() {
                last = Some(candidate);
                continue;
            }
            make_dir(&candidate)?;
            return Ok(candidate);
        }

        Err(VolumeError::Directory {
            path: last.unwrap_or_else(|| self.settings.mount_root.clone()),
            source: io::Error::new(io::ErrorKind::AlreadyExists, "no free mountpoint name"),
        })
    }
}

/// Non-empty option value
fn option<'a>(options: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    options.get(key).map(String::as_str).filter(|v| !v.is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn make_dir(path: &Path) -> Result<()> {
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(path)
        .map_err(|source| VolumeError::Directory {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{MemoryConnector, MemoryStore};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    /// Records calls; failures can be injected per operation
    #[derive(Default)]
    struct RecordingExecutor {
        mounts: Mutex<Vec<(String, PathBuf)>>,
        unmounts: Mutex<Vec<PathBuf>>,
        fail_mount: Mutex<bool>,
        fail_unmount: Mutex<bool>,
        report_not_mounted: Mutex<bool>,
    }

    impl RecordingExecutor {
        fn mount_calls(&self) -> usize {
            self.mounts.lock().len()
        }

        fn unmount_calls(&self) -> usize {
            self.unmounts.lock().len()
        }
    }

    #[async_trait]
    impl MountExecutor for RecordingExecutor {
        async fn mount(&self, remote: &str, local: &Path) -> std::result::Result<(), ExecError> {
            if *self.fail_mount.lock() {
                return Err(ExecError::Failed {
                    program: "mount".to_string(),
                    status: "exit status: 32".to_string(),
                    output: "mount failed".to_string(),
                });
            }
            self.mounts.lock().push((remote.to_string(), local.to_path_buf()));
            Ok(())
        }

        async fn unmount(&self, local: &Path) -> std::result::Result<(), ExecError> {
            if *self.fail_unmount.lock() {
                return Err(ExecError::Failed {
                    program: "umount".to_string(),
                    status: "exit status: 32".to_string(),
                    output: "target is busy".to_string(),
                });
            }
            self.unmounts.lock().push(local.to_path_buf());
            if *self.report_not_mounted.lock() {
                return Err(ExecError::NotMounted(local.to_path_buf()));
            }
            Ok(())
        }
    }

    struct Fixture {
        _tmp: TempDir,
        root: PathBuf,
        config_path: PathBuf,
        connector: Arc<MemoryConnector>,
        executor: Arc<RecordingExecutor>,
        driver: Driver,
    }

    fn fixture() -> Fixture {
        fixture_with_store(MemoryStore::new())
    }

    fn fixture_with_store(store: MemoryStore) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("mnt");
        let config_path = tmp.path().join("minfs/config.json");
        let connector = Arc::new(MemoryConnector::new(Arc::new(store)));
        let executor = Arc::new(RecordingExecutor::default());
        let driver = Driver::new(
            DriverSettings::new(&root),
            connector.clone(),
            ConfigProvisioner::new(&config_path),
            executor.clone(),
        );
        Fixture {
            _tmp: tmp,
            root,
            config_path,
            connector,
            executor,
            driver,
        }
    }

    fn connection_opts() -> HashMap<String, String> {
        HashMap::from([
            ("server".to_string(), "s3.local:9000".to_string()),
            ("accessKey".to_string(), "AK".to_string()),
            ("secretKey".to_string(), "SK".to_string()),
        ])
    }

    async fn connections(driver: &Driver, name: &str) -> u32 {
        driver.get(name).await.unwrap().connections
    }

    #[tokio::test]
    async fn test_create_generates_bucket_and_mountpoint() {
        let f = fixture();
        f.driver.create("v1", &connection_opts()).await.unwrap();

        let record = f.driver.get("v1").await.unwrap();
        assert_eq!(record.connections, 0);
        assert!(record.bucket.starts_with("miniobucket-"));
        assert!(record.mountpoint.starts_with(&f.root));
        assert!(record
            .mountpoint
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("miniovol-"));
        assert!(record.mountpoint.is_dir());
        assert!(f.connector.store().contains(&record.bucket));
    }

    #[tokio::test]
    async fn test_create_missing_server() {
        let f = fixture();
        let mut opts = connection_opts();
        opts.remove("server");

        let err = f.driver.create("v1", &opts).await.unwrap_err();
        assert!(matches!(err, VolumeError::MissingParameter(ref o) if o == "server"));
        assert_eq!(err.to_string(), "server option is required");
        assert!(f.driver.list().await.is_empty());
        assert_eq!(f.connector.connect_calls(), 0);
    }

    #[tokio::test]
    async fn test_create_empty_option_counts_as_missing() {
        let f = fixture();
        let mut opts = connection_opts();
        opts.insert("secretKey".to_string(), String::new());

        let err = f.driver.create("v1", &opts).await.unwrap_err();
        assert_eq!(err.code(), "MissingParameter");
    }

    #[tokio::test]
    async fn test_create_uses_configured_defaults() {
        let tmp = TempDir::new().unwrap();
        let mut settings = DriverSettings::new(tmp.path().join("mnt"));
        settings.connection = ConnectionDefaults {
            server: Some("s3.local:9000".to_string()),
            access_key: Some("AK".to_string()),
            secret_key: Some("SK".to_string()),
            secure: Some(true),
        };
        let driver = Driver::new(
            settings,
            Arc::new(MemoryConnector::new(Arc::new(MemoryStore::new()))),
            ConfigProvisioner::new(tmp.path().join("config.json")),
            Arc::new(RecordingExecutor::default()),
        );

        driver.create("v1", &HashMap::new()).await.unwrap();
        assert!(driver.get("v1").await.is_ok());
    }

    #[tokio::test]
    async fn test_create_invalid_secure() {
        let f = fixture();
        let mut opts = connection_opts();
        opts.insert("secure".to_string(), "maybe".to_string());

        let err = f.driver.create("v1", &opts).await.unwrap_err();
        assert_eq!(err.code(), "InvalidParameter");
    }

    #[tokio::test]
    async fn test_create_duplicate_name() {
        let f = fixture();
        f.driver.create("v1", &connection_opts()).await.unwrap();
        let original = f.driver.get("v1").await.unwrap();

        let err = f.driver.create("v1", &connection_opts()).await.unwrap_err();
        assert!(matches!(err, VolumeError::AlreadyExists(_)));
        assert_eq!(f.driver.get("v1").await.unwrap(), original);
        assert_eq!(f.connector.store().bucket_count(), 1);
    }

    #[tokio::test]
    async fn test_create_binds_existing_bucket() {
        let f = fixture_with_store(MemoryStore::with_buckets(["shared"]));
        let mut opts = connection_opts();
        opts.insert("bucket".to_string(), "shared".to_string());

        f.driver.create("v1", &opts).await.unwrap();

        assert_eq!(f.driver.get("v1").await.unwrap().bucket, "shared");
        assert_eq!(f.connector.store().create_calls(), 0);
    }

    #[tokio::test]
    async fn test_create_named_bucket_created_once() {
        let f = fixture();
        let mut opts = connection_opts();
        opts.insert("bucket".to_string(), "data".to_string());

        f.driver.create("v1", &opts).await.unwrap();
        f.driver.create("v2", &opts).await.unwrap();

        assert_eq!(f.connector.store().create_calls(), 1);
        assert_eq!(f.driver.get("v2").await.unwrap().bucket, "data");
    }

    #[tokio::test]
    async fn test_create_connect_failure_then_retry() {
        let f = fixture();
        f.connector.set_failure(Some("connection refused"));

        let err = f.driver.create("v1", &connection_opts()).await.unwrap_err();
        assert_eq!(err.code(), "BackingStoreError");
        assert_eq!(err.to_string(), "error creating client: connection refused");
        assert!(f.driver.list().await.is_empty());

        f.connector.set_failure(None);
        f.driver.create("v1", &connection_opts()).await.unwrap();
        assert_eq!(f.connector.connect_calls(), 2);
    }

    #[tokio::test]
    async fn test_connection_reused() {
        let f = fixture();
        f.driver.create("a", &connection_opts()).await.unwrap();
        f.driver.create("b", &connection_opts()).await.unwrap();
        assert_eq!(f.connector.connect_calls(), 1);
    }

    #[tokio::test]
    async fn test_create_directory_error() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let store = Arc::new(MemoryStore::new());
        let driver = Driver::new(
            DriverSettings::new(&blocker),
            Arc::new(MemoryConnector::new(store.clone())),
            ConfigProvisioner::new(tmp.path().join("config.json")),
            Arc::new(RecordingExecutor::default()),
        );

        let err = driver.create("v1", &connection_opts()).await.unwrap_err();
        assert_eq!(err.code(), "DirectoryError");
        assert!(driver.list().await.is_empty());

        // Retries must not pile up orphaned buckets
        driver.create("v1", &connection_opts()).await.unwrap_err();
        assert_eq!(store.bucket_count(), 0);
    }

    #[tokio::test]
    async fn test_create_bucket_failure_removes_mountpoint() {
        let f = fixture();
        f.connector.store().set_create_failure(Some("quota exceeded"));

        let err = f.driver.create("v1", &connection_opts()).await.unwrap_err();
        assert_eq!(err.code(), "BackingStoreError");
        assert!(f.driver.list().await.is_empty());

        let leftovers = std::fs::read_dir(&f.root).map(|dir| dir.count()).unwrap_or(0);
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_mount_refcounting() {
        let f = fixture();
        f.driver.create("v1", &connection_opts()).await.unwrap();
        let record = f.driver.get("v1").await.unwrap();

        let path = f.driver.mount("v1").await.unwrap();
        assert_eq!(path, record.mountpoint);
        assert_eq!(connections(&f.driver, "v1").await, 1);
        assert_eq!(f.executor.mount_calls(), 1);

        f.driver.mount("v1").await.unwrap();
        assert_eq!(connections(&f.driver, "v1").await, 2);
        assert_eq!(f.executor.mount_calls(), 1);

        let (remote, local) = f.executor.mounts.lock()[0].clone();
        assert_eq!(remote, format!("http://s3.local:9000/{}", record.bucket));
        assert_eq!(local, record.mountpoint);
    }

    #[tokio::test]
    async fn test_mount_provisions_config_first() {
        let f = fixture();
        f.driver.create("v1", &connection_opts()).await.unwrap();
        assert!(!f.config_path.exists());

        f.driver.mount("v1").await.unwrap();

        let content: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&f.config_path).unwrap()).unwrap();
        assert_eq!(
            content,
            serde_json::json!({"version": "1", "accessKey": "AK", "secretKey": "SK"})
        );
    }

    #[tokio::test]
    async fn test_mount_unknown_volume() {
        let f = fixture();
        let err = f.driver.mount("ghost").await.unwrap_err();
        assert_eq!(err.to_string(), "volume ghost not found");
    }

    #[tokio::test]
    async fn test_mount_failure_keeps_count() {
        let f = fixture();
        f.driver.create("v1", &connection_opts()).await.unwrap();
        *f.executor.fail_mount.lock() = true;

        let err = f.driver.mount("v1").await.unwrap_err();
        assert_eq!(err.code(), "MountError");
        assert_eq!(connections(&f.driver, "v1").await, 0);

        // Retrying after the helper recovers works
        *f.executor.fail_mount.lock() = false;
        f.driver.mount("v1").await.unwrap();
        assert_eq!(connections(&f.driver, "v1").await, 1);
    }

    #[tokio::test]
    async fn test_unmount_refcounting() {
        let f = fixture();
        f.driver.create("v1", &connection_opts()).await.unwrap();
        f.driver.mount("v1").await.unwrap();
        f.driver.mount("v1").await.unwrap();

        f.driver.unmount("v1").await.unwrap();
        assert_eq!(connections(&f.driver, "v1").await, 1);
        assert_eq!(f.executor.unmount_calls(), 0);

        f.driver.unmount("v1").await.unwrap();
        assert_eq!(connections(&f.driver, "v1").await, 0);
        assert_eq!(f.executor.unmount_calls(), 1);
    }

    #[tokio::test]
    async fn test_unmount_failure_keeps_count() {
        let f = fixture();
        f.driver.create("v1", &connection_opts()).await.unwrap();
        f.driver.mount("v1").await.unwrap();
        *f.executor.fail_unmount.lock() = true;

        let err = f.driver.unmount("v1").await.unwrap_err();
        assert_eq!(err.code(), "UnmountError");
        assert_eq!(connections(&f.driver, "v1").await, 1);
    }

    #[tokio::test]
    async fn test_unmount_not_mounted_is_benign() {
        let f = fixture();
        f.driver.create("v1", &connection_opts()).await.unwrap();
        f.driver.mount("v1").await.unwrap();
        *f.executor.report_not_mounted.lock() = true;

        f.driver.unmount("v1").await.unwrap();
        assert_eq!(connections(&f.driver, "v1").await, 0);
    }

    #[tokio::test]
    async fn test_unmount_never_mounted() {
        let f = fixture();
        f.driver.create("v1", &connection_opts()).await.unwrap();

        f.driver.unmount("v1").await.unwrap();
        assert_eq!(connections(&f.driver, "v1").await, 0);
        assert_eq!(f.executor.unmount_calls(), 1);
    }

    #[tokio::test]
    async fn test_unmount_unknown_volume() {
        let f = fixture();
        let err = f.driver.unmount("ghost").await.unwrap_err();
        assert_eq!(err.code(), "NotFound");
    }

    #[tokio::test]
    async fn test_remove_deletes_entry_and_directory() {
        let f = fixture();
        f.driver.create("v1", &connection_opts()).await.unwrap();
        let mountpoint = f.driver.path("v1").await.unwrap();

        f.driver.remove("v1").await.unwrap();
        assert!(!mountpoint.exists());
        assert!(f.driver.get("v1").await.is_err());
    }

    #[tokio::test]
    async fn test_remove_in_use() {
        let f = fixture();
        f.driver.create("v1", &connection_opts()).await.unwrap();
        f.driver.mount("v1").await.unwrap();
        let mountpoint = f.driver.path("v1").await.unwrap();

        let err = f.driver.remove("v1").await.unwrap_err();
        assert_eq!(err.to_string(), "volume v1 currently in use by container");
        assert!(mountpoint.is_dir());
        assert_eq!(connections(&f.driver, "v1").await, 1);
        assert_eq!(f.executor.unmount_calls(), 0);
    }

    #[tokio::test]
    async fn test_remove_missing_directory_succeeds() {
        let f = fixture();
        f.driver.create("v1", &connection_opts()).await.unwrap();
        std::fs::remove_dir(f.driver.path("v1").await.unwrap()).unwrap();

        f.driver.remove("v1").await.unwrap();
        assert!(f.driver.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_unknown() {
        let f = fixture();
        let err = f.driver.remove("ghost").await.unwrap_err();
        assert_eq!(err.code(), "NotFound");
    }

    #[tokio::test]
    async fn test_list_and_get_are_stable() {
        let f = fixture();
        f.driver.create("a", &connection_opts()).await.unwrap();
        f.driver.create("b", &connection_opts()).await.unwrap();

        let mut names: Vec<String> = f.driver.list().await.into_iter().map(|r| r.name).collect();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);

        let first = f.driver.get("a").await.unwrap();
        let second = f.driver.get("a").await.unwrap();
        assert_eq!(first, second);
        assert_ne!(first.mountpoint, f.driver.path("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_capabilities_local() {
        let f = fixture();
        assert_eq!(f.driver.capabilities().scope, Scope::Local);
        assert_eq!(f.driver.capabilities().scope.as_str(), "local");
    }

    #[tokio::test]
    async fn test_unmount_all() {
        let f = fixture();
        f.driver.create("a", &connection_opts()).await.unwrap();
        f.driver.create("b", &connection_opts()).await.unwrap();
        f.driver.mount("a").await.unwrap();
        f.driver.mount("a").await.unwrap();

        assert_eq!(f.driver.unmount_all().await, 1);
        assert_eq!(connections(&f.driver, "a").await, 0);
        assert_eq!(f.executor.unmount_calls(), 1);
    }

    #[tokio::test]
    async fn test_unmount_all_failure_keeps_volume_in_use() {
        let f = fixture();
        f.driver.create("v1", &connection_opts()).await.unwrap();
        f.driver.mount("v1").await.unwrap();
        let mountpoint = f.driver.path("v1").await.unwrap();
        *f.executor.fail_unmount.lock() = true;

        assert_eq!(f.driver.unmount_all().await, 0);
        assert_eq!(connections(&f.driver, "v1").await, 1);

        let err = f.driver.remove("v1").await.unwrap_err();
        assert_eq!(err.code(), "VolumeInUse");
        assert!(mountpoint.is_dir());
    }

    #[tokio::test]
    async fn test_concurrent_mounts_mount_once() {
        let f = fixture();
        f.driver.create("v1", &connection_opts()).await.unwrap();
        let driver = Arc::new(f.driver);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let driver = driver.clone();
            handles.push(tokio::spawn(async move { driver.mount("v1").await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(connections(&driver, "v1").await, 10);
        assert_eq!(f.executor.mount_calls(), 1);
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("nope"), None);
    }
}
