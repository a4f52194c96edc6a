use anyhow::Context;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Primary backend: one pretty-printed `<name>.json` file per document in a
/// private data directory.
#[derive(Debug, Clone)]
pub struct DirectoryBackend {
    root: PathBuf,
}

impl DirectoryBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.json", name))
    }

    fn staging_path(&self, name: &str) -> PathBuf {
        self.root.join(format!(".{}.json.tmp", name))
    }

    /// Creates and removes a throwaway marker file. Any failure means the
    /// directory cannot be used as a document store.
    pub async fn probe(&self) -> Result<(), anyhow::Error> {
        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to create data directory {}", self.root.display()))?;

        let marker = self.root.join(format!(".probe-{}", Uuid::new_v4()));
        fs::write(&marker, b"probe")
            .await
            .context("Failed to create probe marker")?;
        fs::remove_file(&marker)
            .await
            .context("Failed to remove probe marker")?;
        Ok(())
    }

    pub async fn read(&self, name: &str) -> Result<Option<Value>, anyhow::Error> {
        let path = self.document_path(name);
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };

        if text.trim().is_empty() {
            return Ok(None);
        }

        let value = serde_json::from_str(&text)
            .with_context(|| format!("{} is not valid JSON", path.display()))?;
        Ok(Some(value))
    }

    pub async fn write(&self, name: &str, value: &Value) -> Result<(), anyhow::Error> {
        let staged = self.stage(name, value).await?;
        self.commit(name, &staged).await
    }

    /// Stages every document before renaming any of them into place, so a
    /// serialization or disk-full failure leaves all documents untouched.
    pub async fn write_batch(&self, entries: &[(&str, Value)]) -> Result<(), anyhow::Error> {
        let mut staged = Vec::with_capacity(entries.len());
        for (name, value) in entries {
            match self.stage(name, value).await {
                Ok(path) => staged.push((*name, path)),
                Err(e) => {
                    for (_, path) in &staged {
                        let _ = fs::remove_file(path).await;
                    }
                    return Err(e);
                }
            }
        }
        for (name, path) in &staged {
            self.commit(name, path).await?;
        }
        Ok(())
    }

    async fn stage(&self, name: &str, value: &Value) -> Result<PathBuf, anyhow::Error> {
        fs::create_dir_all(&self.root)
            .await
            .context("Failed to create data directory")?;

        let text = serde_json::to_string_pretty(value)?;
        let staging = self.staging_path(name);
        let mut file = fs::File::create(&staging)
            .await
            .with_context(|| format!("Failed to create {}", staging.display()))?;
        file.write_all(text.as_bytes()).await?;
        file.sync_all().await?;
        Ok(staging)
    }

    async fn commit(&self, name: &str, staged: &Path) -> Result<(), anyhow::Error> {
        let target = self.document_path(name);
        fs::rename(staged, &target)
            .await
            .with_context(|| format!("Failed to move {} into place", target.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn probe_succeeds_on_writable_directory() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DirectoryBackend::new(dir.path().join("data"));
        backend.probe().await.unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(backend.root()).unwrap().collect();
        assert!(leftovers.is_empty(), "probe marker must be removed");
    }

    #[tokio::test]
    async fn probe_fails_when_root_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("data");
        std::fs::write(&blocker, "not a directory").unwrap();

        let backend = DirectoryBackend::new(&blocker);
        assert!(backend.probe().await.is_err());
    }

    #[tokio::test]
    async fn read_write_and_absence() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DirectoryBackend::new(dir.path());

        assert_eq!(backend.read("sessions").await.unwrap(), None);
        backend.write("sessions", &json!([{"id": "a"}])).await.unwrap();
        assert_eq!(
            backend.read("sessions").await.unwrap(),
            Some(json!([{"id": "a"}]))
        );

        let on_disk = std::fs::read_to_string(dir.path().join("sessions.json")).unwrap();
        assert!(on_disk.contains('\n'), "documents are pretty-printed");
        assert!(!dir.path().join(".sessions.json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_document_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("settings.json"), "{ not json").unwrap();
        let backend = DirectoryBackend::new(dir.path());
        assert!(backend.read("settings").await.is_err());
    }

    #[tokio::test]
    async fn batch_writes_all_documents() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DirectoryBackend::new(dir.path());
        backend
            .write_batch(&[("a", json!(1)), ("b", json!({"x": true}))])
            .await
            .unwrap();
        assert_eq!(backend.read("a").await.unwrap(), Some(json!(1)));
        assert_eq!(backend.read("b").await.unwrap(), Some(json!({"x": true})));
    }
}
