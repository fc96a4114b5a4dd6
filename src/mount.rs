//! Attaching buckets to local directories
//!
//! The actual mount is done by an external helper (`mount -t minfs`), which
//! reads its credentials from the descriptor written by
//! [`crate::provision::ConfigProvisioner`].

use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

/// Filesystem type passed to `mount -t`
pub const MINFS_TYPE: &str = "minfs";

/// Failure of an external mount or unmount
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// Unmount target was not mounted; callers may treat this as success
    #[error("{0:?} is not mounted")]
    NotMounted(PathBuf),

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited with {status}: {output}")]
    Failed {
        program: String,
        status: String,
        output: String,
    },
}

/// Performs OS-level mounts of remote buckets
#[async_trait]
pub trait MountExecutor: Send + Sync {
    /// Mount `remote` (e.g. `http://minio:9000/bucket`) at `local`
    async fn mount(&self, remote: &str, local: &Path) -> Result<(), ExecError>;

    /// Unmount whatever is mounted at `local`
    async fn unmount(&self, local: &Path) -> Result<(), ExecError>;
}

/// Executor that shells out to the system mount helpers
#[derive(Debug, Clone)]
pub struct CommandMountExecutor {
    mount_program: String,
    unmount_program: String,
}

impl Default for CommandMountExecutor {
    fn default() -> Self {
        Self::new("mount", "umount")
    }
}

impl CommandMountExecutor {
    pub fn new(mount_program: impl Into<String>, unmount_program: impl Into<String>) -> Self {
        Self {
            mount_program: mount_program.into(),
            unmount_program: unmount_program.into(),
        }
    }

    async fn run<I, S>(&self, program: &str, args: I) -> Result<Output, ExecError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ExecError::Spawn {
                program: program.to_string(),
                source,
            })?;
        debug!("{} finished with {}", program, output.status);
        Ok(output)
    }
}

/// Combined, trimmed stdout and stderr of a finished command
fn captured_output(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    [stdout.trim(), stderr.trim()]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("\n")
}

/// Whether umount output says the target was not mounted to begin with
fn reports_not_mounted(output: &str) -> bool {
    let output = output.to_lowercase();
    output.contains("not mounted") || output.contains("not currently mounted")
}

#[async_trait]
impl MountExecutor for CommandMountExecutor {
    async fn mount(&self, remote: &str, local: &Path) -> Result<(), ExecError> {
        info!("Mounting {} at {:?}", remote, local);

        let output = self
            .run(
                &self.mount_program,
                [
                    OsStr::new("-t"),
                    OsStr::new(MINFS_TYPE),
                    OsStr::new(remote),
                    local.as_os_str(),
                ],
            )
            .await?;

        if !output.status.success() {
            return Err(ExecError::Failed {
                program: self.mount_program.clone(),
                status: output.status.to_string(),
                output: captured_output(&output),
            });
        }

        Ok(())
    }

    async fn unmount(&self, local: &Path) -> Result<(), ExecError> {
        info!("Unmounting {:?}", local);

        let output = self.run(&self.unmount_program, [local.as_os_str()]).await?;

        if !output.status.success() {
            let captured = captured_output(&output);
            if reports_not_mounted(&captured) {
                return Err(ExecError::NotMounted(local.to_path_buf()));
            }
            return Err(ExecError::Failed {
                program: self.unmount_program.clone(),
                status: output.status.to_string(),
                output: captured,
            });
        }

        Ok(())
    }
}
