//! Privilege fix-up for container-written output paths.
//!
//! A job container frequently runs as root and leaves its output files
//! unreadable for the non-root process that must collect them. After the
//! container exits, a single short-lived throwaway container bind-mounts
//! each affected path at a scratch location and recursively grants
//! read/write to everyone. There is no silent fallback: if the fix-up
//! cannot run, the caller gets an error naming the affected paths.

use std::path::PathBuf;
use std::process::Command;

use tracing::{debug, warn};

use crate::error::{JobwireError, Result};

/// Default container runtime binary.
pub const DEFAULT_RUNTIME: &str = "docker";

/// Default image for the throwaway container.
pub const DEFAULT_IMAGE: &str = "busybox:stable";

/// Runner for the throwaway permission fix-up container.
pub struct PrivilegeFixer {
    runtime: String,
    image: String,
}

impl Default for PrivilegeFixer {
    fn default() -> Self {
        Self::new()
    }
}

impl PrivilegeFixer {
    /// Fixer using the default runtime and image.
    pub fn new() -> Self {
        Self {
            runtime: DEFAULT_RUNTIME.to_string(),
            image: DEFAULT_IMAGE.to_string(),
        }
    }

    /// Override the container runtime binary (`docker`, `podman`, ...).
    pub fn runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = runtime.into();
        self
    }

    /// Override the throwaway container image.
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Build the `run --rm` invocation for the given paths.
    fn fix_command(&self, paths: &[PathBuf]) -> Command {
        let mut cmd = Command::new(&self.runtime);
        cmd.arg("run").arg("--rm");
        let mut targets = Vec::with_capacity(paths.len());
        for (i, path) in paths.iter().enumerate() {
            // Each path gets its own scratch mount point so duplicate
            // basenames cannot collide.
            let scratch = format!("/scratch/{i}");
            cmd.arg("-v").arg(format!("{}:{}", path.display(), scratch));
            targets.push(scratch);
        }
        cmd.arg(&self.image).arg("chmod").arg("-R").arg("a+rw");
        cmd.args(&targets);
        cmd
    }

    /// Make every path in `paths` readable and writable by all users.
    ///
    /// Paths must be absolute (they are bind-mounted verbatim into the
    /// throwaway container). A no-op for an empty list.
    pub fn make_writable(&self, paths: &[PathBuf]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        if let Some(relative) = paths.iter().find(|p| !p.is_absolute()) {
            return Err(JobwireError::PrivilegeFix {
                paths: paths.to_vec(),
                detail: format!("path {} is not absolute", relative.display()),
            });
        }

        debug!(?paths, runtime = %self.runtime, "running permission fix-up container");
        let output = self
            .fix_command(paths)
            .output()
            .map_err(|err| JobwireError::PrivilegeFix {
                paths: paths.to_vec(),
                detail: format!("failed to run {}: {err}", self.runtime),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = ?output.status, "permission fix-up container failed");
            return Err(JobwireError::PrivilegeFix {
                paths: paths.to_vec(),
                detail: format!("{} exited with {}: {}", self.runtime, output.status, stderr.trim()),
            });
        }
        Ok(())
    }
}

/// Fix permissions with the default runtime and image.
pub fn make_paths_writable(paths: &[PathBuf]) -> Result<()> {
    PrivilegeFixer::new().make_writable(paths)
}
