use anyhow::{Context, Result};
use log::{info, warn};
use std::path::{Path, PathBuf};

/// Hands out one private directory per job under a common root.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates (or reuses, after a crashed attempt) the job's directory.
    pub async fn acquire(&self, job_id: &str) -> Result<Workspace> {
        let path = self.root.join(encode_job_id(job_id));
        tokio::fs::create_dir_all(&path)
            .await
            .with_context(|| format!("Failed to create workspace {}", path.display()))?;
        Ok(Workspace {
            job_id: job_id.to_string(),
            path,
            released: false,
        })
    }
}

/// A job-private directory tree. `release` removes it; a workspace dropped
/// without being released is removed on drop.
#[derive(Debug)]
pub struct Workspace {
    job_id: String,
    path: PathBuf,
    released: bool,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.path.join(relative)
    }

    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => {
                info!("[{}] - Cleaned up temporary directory.", self.job_id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| {
                format!("Failed to remove workspace {}", self.path.display())
            }),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    "[{}] - Failed to remove abandoned workspace {}: {}",
                    self.job_id,
                    self.path.display(),
                    e
                );
            }
        }
    }
}

/// Maps an opaque job id to a single path component. Bytes outside
/// `[A-Za-z0-9_-]` become `%XX`, which keeps the mapping injective.
fn encode_job_id(job_id: &str) -> String {
    let mut out = String::with_capacity(job_id.len());
    for byte in job_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}
