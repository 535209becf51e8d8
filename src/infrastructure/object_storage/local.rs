use super::ObjectStorage;
use crate::domain::error::{AppError, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

/// Directory-backed bucket for offline installs.
pub struct LocalObjectStorage {
    root: PathBuf,
}

impl LocalObjectStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            return Err(AppError::ValidationError(format!(
                "Invalid object path: {}",
                path
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    fn backend(&self) -> &str {
        "local"
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.object_path(path)?;
        match tokio::fs::read(&full_path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::NotFound(format!("Object not found: {}", path)))
            }
            Err(e) => Err(AppError::StorageError(format!(
                "Failed to read {}: {}",
                full_path.display(),
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_objects_under_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("protocol")).unwrap();
        std::fs::write(dir.path().join("protocol").join("p.xlsx"), b"PK").unwrap();

        let storage = LocalObjectStorage::new(dir.path());
        assert_eq!(storage.download("protocol/p.xlsx").await.unwrap(), b"PK");
        assert!(matches!(
            storage.download("protocol/missing.xlsx").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_parent_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalObjectStorage::new(dir.path());
        assert!(matches!(
            storage.download("../etc/passwd").await,
            Err(AppError::ValidationError(_))
        ));
    }
}
