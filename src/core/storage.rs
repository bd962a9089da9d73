//! Object storage abstraction
//!
//! The daemon persists three kinds of blobs: media assets (plugin icons),
//! uploaded plugin packages, and packages owned by at least one tenant.
//! Each lives in its own bucket behind the [`ObjectStore`] trait so tests
//! can run against a temp directory and deployments against anything that
//! speaks the same interface.

use crate::core::error::{HarborError, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Minimal key/value blob store
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn save(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Returns `HarborError::NotFound` when the key does not exist
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Filesystem-backed object store rooted at a directory
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)
            .map_err(|e| HarborError::StorageError(format!("failed to create {}: {}", root.display(), e)))?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn save(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        debug!(key, size = data.len(), "stored object");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(HarborError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.path_for(key)).await?)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Media bucket: content-addressed plugin assets (icons, images)
pub struct MediaBucket {
    store: Arc<dyn ObjectStore>,
}

impl MediaBucket {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Store one asset and return its content-addressed id
    pub async fn upload(&self, data: &[u8]) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let id = format!("{:x}", hasher.finalize());
        self.store.save(&id, data).await?;
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Result<Vec<u8>> {
        self.store.get(id).await
    }

    /// Upload every decoded asset, returning filename -> media id
    pub async fn remap_assets(
        &self,
        assets: &HashMap<String, Vec<u8>>,
    ) -> Result<HashMap<String, String>> {
        let mut remapped = HashMap::with_capacity(assets.len());
        for (name, data) in assets {
            let id = self.upload(data).await?;
            remapped.insert(name.clone(), id);
        }
        Ok(remapped)
    }
}

/// Package bucket: uploaded plugin packages keyed by unique identifier
pub struct PackageBucket {
    store: Arc<dyn ObjectStore>,
}

impl PackageBucket {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub async fn save(&self, identifier: &str, package: &[u8]) -> Result<()> {
        self.store.save(identifier, package).await
    }

    pub async fn get(&self, identifier: &str) -> Result<Vec<u8>> {
        self.store.get(identifier).await.map_err(|e| match e {
            HarborError::NotFound(_) => HarborError::NotFound(
                "plugin package not found, please upload it firstly".to_string(),
            ),
            other => other,
        })
    }

    pub async fn delete(&self, identifier: &str) -> Result<()> {
        self.store.delete(identifier).await
    }
}

/// Installed bucket: packages referenced by at least one installation row
pub struct InstalledBucket {
    store: Arc<dyn ObjectStore>,
}

impl InstalledBucket {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub async fn save(&self, identifier: &str, package: &[u8]) -> Result<()> {
        self.store.save(identifier, package).await
    }

    pub async fn get(&self, identifier: &str) -> Result<Vec<u8>> {
        self.store.get(identifier).await
    }

    pub async fn exists(&self, identifier: &str) -> Result<bool> {
        self.store.exists(identifier).await
    }

    pub async fn delete(&self, identifier: &str) -> Result<()> {
        self.store.delete(identifier).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> Arc<dyn ObjectStore> {
        Arc::new(LocalObjectStore::new(dir.path().join("bucket")).unwrap())
    }

    #[tokio::test]
    async fn test_save_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.save("alice/calc:1.0.0@abc", b"package-bytes").await.unwrap();
        let data = store.get("alice/calc:1.0.0@abc").await.unwrap();
        assert_eq!(data, b"package-bytes");
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let err = store.get("nope").await.unwrap_err();
        assert!(matches!(err, HarborError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.save("k", b"v").await.unwrap();
        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_media_bucket_content_addressing() {
        let dir = TempDir::new().unwrap();
        let media = MediaBucket::new(store(&dir));

        let id1 = media.upload(b"icon-bytes").await.unwrap();
        let id2 = media.upload(b"icon-bytes").await.unwrap();
        assert_eq!(id1, id2);
        assert_eq!(media.get(&id1).await.unwrap(), b"icon-bytes");
    }

    #[tokio::test]
    async fn test_remap_assets_keys_match_input() {
        let dir = TempDir::new().unwrap();
        let media = MediaBucket::new(store(&dir));

        let mut assets = HashMap::new();
        assets.insert("icon.svg".to_string(), b"svg".to_vec());
        assets.insert("icon-dark.svg".to_string(), b"dark-svg".to_vec());

        let remapped = media.remap_assets(&assets).await.unwrap();
        assert_eq!(remapped.len(), 2);
        assert!(remapped.contains_key("icon.svg"));
        assert!(remapped.contains_key("icon-dark.svg"));
    }

    #[tokio::test]
    async fn test_package_bucket_missing_message() {
        let dir = TempDir::new().unwrap();
        let packages = PackageBucket::new(store(&dir));

        let err = packages.get("alice/calc:1.0.0@abc").await.unwrap_err();
        assert!(err.to_string().contains("please upload it firstly"));
    }
}
