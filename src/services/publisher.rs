use anyhow::{Context, Result};
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::io::BlobStore;

/// Mirrors a local output tree into the blob store.
pub struct ResultPublisher {
    store: Arc<dyn BlobStore>,
}

impl ResultPublisher {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// Uploads every file below `local_root` to `<remote_prefix>/<relative path>`.
    /// Stops at the first failed upload; files already uploaded stay.
    pub async fn publish(&self, local_root: &Path, remote_prefix: &str) -> Result<usize> {
        info!("Uploading contents of '{}' to '{}'", local_root.display(), remote_prefix);

        let files = list_files(local_root).await?;
        for file in &files {
            let relative = file.strip_prefix(local_root)?;
            let key = object_key(remote_prefix, relative);
            debug!("  Uploading {} -> {}", file.display(), key);
            self.store
                .upload(file, &key)
                .await
                .with_context(|| format!("Failed to upload {} to {}", file.display(), key))?;
        }

        Ok(files.len())
    }
}

/// Joins a prefix and a relative path with `/`, whatever the local separator.
pub fn object_key(prefix: &str, relative: &Path) -> String {
    let mut parts: Vec<String> = Vec::new();
    let prefix = prefix.trim_end_matches('/');
    if !prefix.is_empty() {
        parts.push(prefix.to_string());
    }
    parts.extend(
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string()),
    );
    parts.join("/")
}

async fn list_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("Failed to read {}", dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStore {
        keys: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl BlobStore for RecordingStore {
        async fn download(&self, _key: &str, _dest: &Path) -> Result<()> {
            unimplemented!()
        }

        async fn upload(&self, _source: &Path, key: &str) -> Result<()> {
            if self.fail_on.as_deref() == Some(key) {
                return Err(anyhow!("AccessDenied"));
            }
            self.keys.lock().unwrap().push(key.to_string());
            Ok(())
        }
    }

    fn build_tree(root: &Path) -> Result<()> {
        std::fs::create_dir_all(root.join("0_Prologue"))?;
        std::fs::create_dir_all(root.join("1_Chapter_1"))?;
        std::fs::write(root.join("0_Prologue/metadata.json"), "{}")?;
        std::fs::write(root.join("0_Prologue/dialogue_0.mp3"), "a")?;
        std::fs::write(root.join("1_Chapter_1/metadata.json"), "{}")?;
        Ok(())
    }

    #[test]
    fn test_object_key() {
        assert_eq!(
            object_key("generated/job-1", Path::new("0_Intro/dialogue_0.mp3")),
            "generated/job-1/0_Intro/dialogue_0.mp3"
        );
        assert_eq!(object_key("generated/job-1/", Path::new("a.json")), "generated/job-1/a.json");
        assert_eq!(object_key("", Path::new("a.json")), "a.json");
    }

    #[tokio::test]
    async fn test_publish_mirrors_tree() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        build_tree(temp_dir.path())?;

        let store = Arc::new(RecordingStore::default());
        let publisher = ResultPublisher::new(store.clone());
        let count = publisher.publish(temp_dir.path(), "generated/job-1").await?;

        assert_eq!(count, 3);
        let mut keys = store.keys.lock().unwrap().clone();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "generated/job-1/0_Prologue/dialogue_0.mp3",
                "generated/job-1/0_Prologue/metadata.json",
                "generated/job-1/1_Chapter_1/metadata.json",
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_publish_aborts_on_first_failure() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        build_tree(temp_dir.path())?;

        let store = Arc::new(RecordingStore {
            keys: Mutex::new(Vec::new()),
            fail_on: Some("generated/job-1/0_Prologue/metadata.json".to_string()),
        });
        let publisher = ResultPublisher::new(store.clone());
        let err = publisher.publish(temp_dir.path(), "generated/job-1").await.unwrap_err();

        assert!(format!("{:#}", err).contains("AccessDenied"));
        assert_eq!(
            *store.keys.lock().unwrap(),
            vec!["generated/job-1/0_Prologue/dialogue_0.mp3"],
            "earlier uploads are not rolled back"
        );
        Ok(())
    }
}
