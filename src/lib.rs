//! miniovol: a Docker volume plugin backed by S3-compatible buckets
//!
//! Each Docker volume is a local directory onto which a remote bucket is
//! mounted with the minfs helper. The interesting part is the bookkeeping:
//! several containers may share one volume, so mounts are reference counted
//! and only the first Mount and the last Unmount touch the OS.
//!
//! # Architecture
//!
//! - **Driver**: the volume lifecycle (Create, Mount, Unmount, Remove, Get,
//!   Path, List, Capabilities) on top of a lock-protected **registry**.
//! - **Object store**: bucket lookup and creation behind the `ObjectStore`
//!   trait; `store::s3` talks to MinIO/S3 through the AWS SDK.
//! - **Mount executor**: runs `mount -t minfs` / `umount`, after the
//!   **provisioner** has written the credentials file minfs reads.
//! - **Plugin**: the Docker plugin HTTP protocol on a Unix socket.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use miniovol::config::Config;
//! use miniovol::driver::{Driver, DriverSettings};
//! use miniovol::mount::CommandMountExecutor;
//! use miniovol::provision::ConfigProvisioner;
//! use miniovol::store::s3::S3Connector;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_file(&"config.yaml".into())?;
//!
//! let driver = Arc::new(Driver::new(
//!     DriverSettings::from_config(&config),
//!     Arc::new(S3Connector),
//!     ConfigProvisioner::new(&config.minfs.config_path),
//!     Arc::new(CommandMountExecutor::default()),
//! ));
//!
//! let listener = miniovol::plugin::bind(&config.plugin.socket_path)?;
//! let (_tx, rx) = tokio::sync::watch::channel(false);
//! miniovol::plugin::serve(listener, driver, rx).await;
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod config;
pub mod driver;
pub mod env;
pub mod error;
pub mod mount;
pub mod naming;
pub mod plugin;
pub mod provision;
pub mod registry;
pub mod store;

pub use error::{Result, VolumeError};
