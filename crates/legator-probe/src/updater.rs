//! Atomic self-update with checksum verification.

use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{ProbeError, ProbeResult};

/// Hard cap on downloaded binary size.
const MAX_DOWNLOAD_BYTES: u64 = 100 * 1024 * 1024;

/// The outcome of an update attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    /// Whether the binary was swapped.
    pub success: bool,
    /// Path of the binary that was (or would have been) replaced.
    pub old_path: PathBuf,
    /// Version label of the attempted update.
    pub version: String,
    /// Failure description, when unsuccessful.
    pub error: Option<String>,
}

impl UpdateReport {
    fn failure(old_path: PathBuf, version: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            old_path,
            version: version.to_string(),
            error: Some(error.into()),
        }
    }
}

/// Downloads, verifies, and atomically swaps the running binary.
#[derive(Debug, Clone)]
pub struct Updater {
    /// Override of the running-executable path, for tests.
    target: Option<PathBuf>,
    /// Service unit restarted after a successful swap.
    service_unit: String,
}

impl Updater {
    /// Create an updater targeting the running executable.
    #[must_use]
    pub fn new(service_unit: impl Into<String>) -> Self {
        Self {
            target: None,
            service_unit: service_unit.into(),
        }
    }

    /// Target a specific binary path instead of the running executable.
    #[must_use]
    pub fn with_target(mut self, target: PathBuf) -> Self {
        self.target = Some(target);
        self
    }

    /// Download `url`, verify it, and swap it over the running binary.
    ///
    /// The download streams through a SHA-256 hasher into a temp file in the
    /// target's directory (same filesystem, so the final rename is atomic;
    /// the kernel keeps the old inode alive for the running process). A
    /// non-empty `checksum_hex` that does not match fails the update; the
    /// temp file is removed on every failure path. The candidate must also
    /// survive a `<binary> version` sanity run before the swap.
    ///
    /// # Errors
    ///
    /// Infrastructure failures (no resolvable executable path) error out;
    /// verification failures return a report with `success = false`.
    pub async fn apply(
        &self,
        url: &str,
        checksum_hex: &str,
        version: &str,
    ) -> ProbeResult<UpdateReport> {
        let target = self.resolve_target()?;
        let dir = target
            .parent()
            .ok_or_else(|| ProbeError::Update("executable has no parent directory".into()))?;

        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        let mut hasher = Sha256::new();
        let mut total: u64 = 0;

        let response = match reqwest::get(url).await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                return Ok(UpdateReport::failure(
                    target,
                    version,
                    format!("download failed: {}", response.status()),
                ));
            }
            Err(e) => {
                return Ok(UpdateReport::failure(
                    target,
                    version,
                    format!("download failed: {e}"),
                ));
            }
        };

        let mut response = response;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ProbeError::Update(e.to_string()))?
        {
            total = total.saturating_add(chunk.len() as u64);
            if total > MAX_DOWNLOAD_BYTES {
                return Ok(UpdateReport::failure(
                    target,
                    version,
                    "download exceeds size cap",
                ));
            }
            hasher.update(&chunk);
            temp.write_all(&chunk)?;
        }
        temp.flush()?;

        let digest = hex::encode(hasher.finalize());
        if !checksum_hex.is_empty() && !digest.eq_ignore_ascii_case(checksum_hex) {
            warn!(expected = checksum_hex, actual = %digest, "checksum mismatch");
            return Ok(UpdateReport::failure(
                target,
                version,
                format!("checksum mismatch: expected {checksum_hex}, got {digest}"),
            ));
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(temp.path(), std::fs::Permissions::from_mode(0o755))?;
        }

        if let Some(reason) = sanity_check(temp.path()).await {
            return Ok(UpdateReport::failure(target, version, reason));
        }

        swap(temp, &target)?;
        info!(target = %target.display(), version, "binary updated");
        Ok(UpdateReport {
            success: true,
            old_path: target,
            version: version.to_string(),
            error: None,
        })
    }

    /// Ask the service manager to restart the unit, fire-and-forget: the
    /// calling process is about to be replaced.
    pub fn restart(&self) {
        #[cfg(unix)]
        {
            let spawned = std::process::Command::new("systemctl")
                .args(["restart", &self.service_unit])
                .spawn();
            if let Err(e) = spawned {
                warn!(unit = %self.service_unit, error = %e, "restart request failed");
            }
        }
    }

    fn resolve_target(&self) -> ProbeResult<PathBuf> {
        if let Some(target) = &self.target {
            return Ok(target.clone());
        }
        let exe = std::env::current_exe()?;
        Ok(std::fs::canonicalize(&exe).unwrap_or(exe))
    }
}

/// Run `<candidate> version`; `Some(reason)` on any failure.
async fn sanity_check(candidate: &Path) -> Option<String> {
    match tokio::process::Command::new(candidate)
        .arg("version")
        .output()
        .await
    {
        Ok(output) if output.status.success() => None,
        Ok(output) => Some(format!(
            "candidate binary failed version check (exit {})",
            output.status.code().unwrap_or(-1)
        )),
        Err(e) => Some(format!("candidate binary failed to run: {e}")),
    }
}

/// Atomically move the candidate over the target.
#[cfg(unix)]
fn swap(temp: tempfile::NamedTempFile, target: &Path) -> ProbeResult<()> {
    temp.persist(target)
        .map_err(|e| ProbeError::Update(format!("rename failed: {e}")))?;
    Ok(())
}

/// Windows refuses to rename over a running binary; move it aside first.
#[cfg(not(unix))]
fn swap(temp: tempfile::NamedTempFile, target: &Path) -> ProbeResult<()> {
    let old = target.with_extension("old");
    std::fs::rename(target, &old)
        .map_err(|e| ProbeError::Update(format!("move aside failed: {e}")))?;
    temp.persist(target)
        .map_err(|e| ProbeError::Update(format!("rename failed: {e}")))?;
    Ok(())
}
