use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::core::state::JobStatus;

/// Object storage holding job sources and generated output.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn download(&self, key: &str, dest: &Path) -> Result<()>;
    async fn upload(&self, source: &Path, key: &str) -> Result<()>;
}

/// Durable job status record, keyed by job id.
#[async_trait]
pub trait JobLedger: Send + Sync {
    async fn set_status(&self, job_id: &str, status: JobStatus) -> Result<()>;
    /// Marks the job FAILED and stores the reason.
    async fn set_failed(&self, job_id: &str, error_message: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub body: String,
    pub receipt_handle: String,
}

/// At-least-once work queue delivering job ids.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Long-polls for at most one message.
    async fn receive(&self) -> Result<Option<QueueMessage>>;
    async fn delete(&self, receipt_handle: &str) -> Result<()>;
}

/// Blob store backed by a local directory; keys map to relative paths.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        key.split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |path, part| path.join(part))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn download(&self, key: &str, dest: &Path) -> Result<()> {
        let source = self.path_for(key);
        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::copy(&source, dest)
            .await
            .with_context(|| format!("Object not found: {}", key))?;
        Ok(())
    }

    async fn upload(&self, source: &Path, key: &str) -> Result<()> {
        let target = self.path_for(key);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(source, &target)
            .await
            .with_context(|| format!("Failed to store {}", key))?;
        Ok(())
    }
}
