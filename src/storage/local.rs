use super::{BlobStore, StorageError};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

/// Serves objects from a directory; the key is a relative path under it.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, key: &str) -> Option<PathBuf> {
        if key.is_empty() || key.contains('\\') {
            return None;
        }
        let relative = Path::new(key);
        let clean = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        clean.then(|| self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for LocalStore {
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self
            .resolve(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_nested_key() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("lectures")).unwrap();
        std::fs::write(dir.path().join("lectures/intro.pdf"), b"%PDF-1.4").unwrap();

        let store = LocalStore::new(dir.path());
        let bytes = store.fetch("lectures/intro.pdf").await.unwrap();
        assert_eq!(bytes, b"%PDF-1.4");
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        let err = store.fetch("nope.pdf").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_escaping_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().join("root"));
        for key in ["../secret.pdf", "/etc/passwd", "a/../../b.pdf", "a\\b.pdf", ""] {
            let err = store.fetch(key).await.unwrap_err();
            assert!(matches!(err, StorageError::NotFound(_)), "key {key:?}");
        }
    }
}
