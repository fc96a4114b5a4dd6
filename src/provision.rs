//! minfs credentials descriptor provisioning
//!
//! The minfs mount helper reads its access and secret keys from a small JSON
//! file before it mounts a bucket. The file is replaced atomically so the
//! helper never sees a partially written descriptor.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

/// Contents of the minfs config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinfsDescriptor {
    pub version: String,
    pub access_key: String,
    pub secret_key: String,
}

impl MinfsDescriptor {
    pub fn new(access_key: &str, secret_key: &str, version: &str) -> Self {
        Self {
            version: version.to_string(),
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
        }
    }
}

/// Writes the minfs descriptor to a fixed path
#[derive(Debug, Clone)]
pub struct ConfigProvisioner {
    path: PathBuf,
}

impl ConfigProvisioner {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `{version, accessKey, secretKey}` to the descriptor path,
    /// replacing whatever was there.
    pub fn provision(&self, access_key: &str, secret_key: &str, version: &str) -> io::Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let descriptor = MinfsDescriptor::new(access_key, secret_key, version);
        let body = serde_json::to_vec(&descriptor)?;

        // Same directory so the rename stays on one filesystem
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&body)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        match std::fs::metadata(&self.path) {
            Ok(meta) => debug!("Provisioned {:?} ({} bytes)", self.path, meta.len()),
            Err(e) => debug!("Could not stat provisioned {:?}: {}", self.path, e),
        }

        Ok(())
    }
}
