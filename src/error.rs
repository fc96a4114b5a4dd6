use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Main error type for volume lifecycle operations.
///
/// The display text of each variant is what the plugin reports to Docker in
/// the `Err` field, so existing tooling matching on those strings keeps
/// working. Programmatic callers should use [`VolumeError::code`].
#[derive(Error, Debug)]
pub enum VolumeError {
    #[error("{0} option is required")]
    MissingParameter(String),

    #[error("invalid value {value:?} for option {option}")]
    InvalidParameter { option: String, value: String },

    #[error("volume {0} not found")]
    NotFound(String),

    #[error("volume {0} already exists")]
    AlreadyExists(String),

    #[error("volume {0} currently in use by container")]
    VolumeInUse(String),

    #[error("error creating client: {0}")]
    BackingStore(String),

    #[error("failed to prepare mountpoint {path:?}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to mount volume {name}: {reason}")]
    Mount { name: String, reason: String },

    #[error("failed to unmount volume {name}: {reason}")]
    Unmount { name: String, reason: String },
}

impl VolumeError {
    /// Stable identifier for the error kind
    pub fn code(&self) -> &'static str {
        match self {
            VolumeError::MissingParameter(_) => "MissingParameter",
            VolumeError::InvalidParameter { .. } => "InvalidParameter",
            VolumeError::NotFound(_) => "NotFound",
            VolumeError::AlreadyExists(_) => "AlreadyExists",
            VolumeError::VolumeInUse(_) => "VolumeInUse",
            VolumeError::BackingStore(_) => "BackingStoreError",
            VolumeError::Directory { .. } => "DirectoryError",
            VolumeError::Mount { .. } => "MountError",
            VolumeError::Unmount { .. } => "UnmountError",
        }
    }
}

/// Result type alias for volume operations
pub type Result<T> = std::result::Result<T, VolumeError>;
