use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;

use mintforge_core::{Catalog, ImageComposite};

use crate::errors::StorageError;

/// Uniqueness scope of a generation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeScope {
    pub project_id: String,
    pub collection_id: String,
    pub composite_group_id: String,
}

impl CompositeScope {
    pub fn contains(&self, composite: &ImageComposite) -> bool {
        composite.project_id == self.project_id
            && composite.collection_id == self.collection_id
            && composite.composite_group_id == self.composite_group_id
    }
}

/// Source of collection catalogs.
#[async_trait]
pub trait CatalogReader: Send + Sync {
    /// Full catalog of a collection, unscoped.
    async fn load_catalog(
        &self,
        project_id: &str,
        collection_id: &str,
    ) -> Result<Catalog, StorageError>;
}

/// Object storage for source layers and rendered composites.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    /// Store bytes and return their public URL.
    async fn put(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError>;
}

/// Persistence for generated composites.
#[async_trait]
pub trait CompositeStore: Send + Sync {
    async fn create(&self, composite: ImageComposite) -> Result<(), StorageError>;

    /// Whether no composite in the scope carries this traits hash.
    async fn is_unique_hash(&self, hash: &str, scope: &CompositeScope)
    -> Result<bool, StorageError>;

    /// Trait value ids already referenced by composites in the scope.
    async fn consumed_trait_values(
        &self,
        scope: &CompositeScope,
    ) -> Result<BTreeSet<String>, StorageError>;
}

/// Catalogs held in memory, keyed by project and collection.
#[derive(Debug, Default)]
pub struct InMemoryCatalogReader {
    catalogs: BTreeMap<(String, String), Catalog>,
}

impl InMemoryCatalogReader {
    pub fn new(catalogs: impl IntoIterator<Item = Catalog>) -> Self {
        let catalogs = catalogs
            .into_iter()
            .map(|catalog| {
                (
                    (catalog.project_id.clone(), catalog.collection.id.clone()),
                    catalog,
                )
            })
            .collect();
        Self { catalogs }
    }
}

#[async_trait]
impl CatalogReader for InMemoryCatalogReader {
    async fn load_catalog(
        &self,
        project_id: &str,
        collection_id: &str,
    ) -> Result<Catalog, StorageError> {
        self.catalogs
            .get(&(project_id.to_string(), collection_id.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("{project_id}/{collection_id}")))
    }
}

/// Blob store backed by a local directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    base_url: String,
}

impl FsBlobStore {
    pub fn new(root: PathBuf, base_url: impl Into<String>) -> Self {
        Self {
            root,
            base_url: base_url.into(),
        }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path);
        if relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            return Err(StorageError::Backend(format!("invalid blob path '{path}'")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()))
            }
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    async fn put(
        &self,
        path: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, StorageError> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, bytes).await?;
        Ok(public_url(&self.base_url, path))
    }
}

/// Blob store held in memory.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<BTreeMap<String, (Vec<u8>, String)>>,
    base_url: String,
}

impl InMemoryBlobStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            blobs: RwLock::new(BTreeMap::new()),
            base_url: base_url.into(),
        }
    }

    pub fn insert(&self, path: &str, bytes: Vec<u8>) {
        if let Ok(mut blobs) = self.blobs.write() {
            blobs.insert(path.to_string(), (bytes, "application/octet-stream".to_string()));
        }
    }

    pub fn content_type(&self, path: &str) -> Option<String> {
        let blobs = self.blobs.read().ok()?;
        blobs.get(path).map(|(_, content_type)| content_type.clone())
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let blobs = self
            .blobs
            .read()
            .map_err(|_| StorageError::Backend("blob store poisoned".to_string()))?;
        blobs
            .get(path)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn put(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let mut blobs = self
            .blobs
            .write()
            .map_err(|_| StorageError::Backend("blob store poisoned".to_string()))?;
        blobs.insert(path.to_string(), (bytes, content_type.to_string()));
        Ok(public_url(&self.base_url, path))
    }
}

/// Composite store held in memory; can be seeded with earlier batches.
#[derive(Debug, Default)]
pub struct InMemoryCompositeStore {
    composites: Mutex<Vec<ImageComposite>>,
}

impl InMemoryCompositeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_composites(composites: Vec<ImageComposite>) -> Self {
        Self {
            composites: Mutex::new(composites),
        }
    }

    /// Snapshot of every stored composite, in creation order.
    pub fn composites(&self) -> Vec<ImageComposite> {
        self.composites
            .lock()
            .map(|composites| composites.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CompositeStore for InMemoryCompositeStore {
    async fn create(&self, composite: ImageComposite) -> Result<(), StorageError> {
        let mut composites = self
            .composites
            .lock()
            .map_err(|_| StorageError::Backend("composite store poisoned".to_string()))?;
        composites.push(composite);
        Ok(())
    }

    async fn is_unique_hash(
        &self,
        hash: &str,
        scope: &CompositeScope,
    ) -> Result<bool, StorageError> {
        let composites = self
            .composites
            .lock()
            .map_err(|_| StorageError::Backend("composite store poisoned".to_string()))?;
        Ok(!composites
            .iter()
            .any(|composite| scope.contains(composite) && composite.traits_hash == hash))
    }

    async fn consumed_trait_values(
        &self,
        scope: &CompositeScope,
    ) -> Result<BTreeSet<String>, StorageError> {
        let composites = self
            .composites
            .lock()
            .map_err(|_| StorageError::Backend("composite store poisoned".to_string()))?;
        Ok(composites
            .iter()
            .filter(|composite| scope.contains(composite))
            .flat_map(|composite| composite.trait_value_ids().map(str::to_string))
            .collect())
    }
}

fn public_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
