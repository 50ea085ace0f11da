//! Metadata store for containers, blobs, and blocks.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::models::{BlobModel, BlobRef, BlockModel, ContainerModel};
use crate::tags::TagFilter;

/// Tag query over base blobs, ordered by container then name.
#[derive(Debug, Clone)]
pub struct BlobQuery<'a> {
    pub account: &'a str,
    /// Restricts the query to one container.
    pub container: Option<&'a str>,
    pub filter: &'a TagFilter,
    /// Resume strictly after this `(container, name)`.
    pub after: Option<(&'a str, &'a str)>,
    pub limit: usize,
}

/// Trait for metadata storage operations.
///
/// Lookups report absence as `Ok(None)`; `Err` is reserved for typed
/// failures and store faults. Enumerations are ordered by name.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    // Container operations
    async fn get_container(&self, account: &str, name: &str)
        -> StorageResult<Option<ContainerModel>>;
    async fn put_container(&self, container: ContainerModel) -> StorageResult<()>;
    /// Deletes a container with all of its blobs, snapshots and staged
    /// blocks. Returns `false` if it did not exist.
    async fn delete_container(&self, account: &str, name: &str) -> StorageResult<bool>;
    /// Up to `limit` containers with names strictly after `after`.
    async fn list_containers(
        &self,
        account: &str,
        prefix: Option<&str>,
        after: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<ContainerModel>>;

    // Blob operations
    /// `snapshot` is empty for the base blob.
    async fn get_blob(&self, blob: &BlobRef, snapshot: &str) -> StorageResult<Option<BlobModel>>;
    /// Inserts or replaces a blob or snapshot. Fails with `ContainerNotFound`
    /// if the container does not exist.
    async fn put_blob(&self, blob: BlobModel) -> StorageResult<()>;
    /// Deleting the base blob also drops its staged blocks.
    async fn delete_blob(&self, blob: &BlobRef, snapshot: &str) -> StorageResult<bool>;
    /// Snapshots of one blob, oldest first.
    async fn list_snapshots(&self, blob: &BlobRef) -> StorageResult<Vec<BlobModel>>;
    /// Blobs with names strictly after `after`, covering at most `limit`
    /// distinct names. With `include_snapshots` every snapshot of a returned
    /// name is included alongside it.
    async fn list_blobs(
        &self,
        account: &str,
        container: &str,
        prefix: Option<&str>,
        after: Option<&str>,
        include_snapshots: bool,
        limit: usize,
    ) -> StorageResult<Vec<BlobModel>>;
    async fn query_blobs(&self, query: &BlobQuery<'_>) -> StorageResult<Vec<BlobModel>>;

    // Block operations
    /// Stages a block, replacing an uncommitted block with the same id in place.
    async fn put_block(&self, block: BlockModel) -> StorageResult<()>;
    /// Uncommitted blocks in staging order.
    async fn get_uncommitted_blocks(&self, blob: &BlobRef) -> StorageResult<Vec<BlockModel>>;
    /// Stores the committed blob and removes the `consumed` ids from its
    /// uncommitted partition in one step.
    async fn commit_block_list(&self, blob: BlobModel, consumed: &[String]) -> StorageResult<()>;

    /// Extent ids referenced by any blob, snapshot, or staged block.
    async fn referenced_extents(&self) -> StorageResult<HashSet<String>>;
}

type ContainerKey = (String, String);
type BlobKey = (String, String, String, String);

fn container_key(account: &str, name: &str) -> ContainerKey {
    (account.to_string(), name.to_string())
}

fn blob_key(blob: &BlobRef, snapshot: &str) -> BlobKey {
    (
        blob.account.clone(),
        blob.container.clone(),
        blob.name.clone(),
        snapshot.to_string(),
    )
}

fn model_key(blob: &BlobModel) -> BlobKey {
    (
        blob.account.clone(),
        blob.container.clone(),
        blob.name.clone(),
        blob.snapshot.clone(),
    )
}

#[derive(Debug, Default, Clone)]
struct Inner {
    containers: BTreeMap<ContainerKey, ContainerModel>,
    /// Base blob sorts first (empty snapshot), then snapshots by time.
    blobs: BTreeMap<BlobKey, BlobModel>,
    uncommitted: BTreeMap<BlobRef, Vec<BlockModel>>,
}

impl Inner {
    fn container_blob_range<'a>(
        &'a self,
        account: &str,
        container: &str,
        from: &str,
    ) -> impl Iterator<Item = (&'a BlobKey, &'a BlobModel)> + 'a {
        let start = (
            account.to_string(),
            container.to_string(),
            from.to_string(),
            String::new(),
        );
        let (account, container) = (account.to_string(), container.to_string());
        self.blobs
            .range((Bound::Included(start), Bound::Unbounded))
            .take_while(move |(key, _)| key.0 == account && key.1 == container)
    }

    fn to_file(&self) -> SnapshotFile {
        SnapshotFile {
            containers: self.containers.values().cloned().collect(),
            blobs: self.blobs.values().cloned().collect(),
            blocks: self.uncommitted.values().flatten().cloned().collect(),
        }
    }

    fn from_file(file: SnapshotFile) -> Self {
        let mut inner = Inner::default();
        for container in file.containers {
            inner
                .containers
                .insert(container_key(&container.account, &container.name), container);
        }
        for blob in file.blobs {
            inner.blobs.insert(model_key(&blob), blob);
        }
        for block in file.blocks {
            inner.uncommitted.entry(block.blob_ref()).or_default().push(block);
        }
        inner
    }
}

/// On-disk layout of the metadata snapshot.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SnapshotFile {
    containers: Vec<ContainerModel>,
    blobs: Vec<BlobModel>,
    blocks: Vec<BlockModel>,
}

#[derive(Debug)]
struct Persistence {
    path: PathBuf,
    /// Serializes snapshot writes so they land in mutation order.
    write_lock: Mutex<()>,
}

/// In-memory metadata store backed by ordered maps, optionally mirrored to a
/// JSON snapshot file after every mutation.
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    inner: RwLock<Inner>,
    persistence: Option<Persistence>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a store persisted at `path`, loading the existing snapshot if any.
    pub async fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let inner = match tokio::fs::read(&path).await {
            Ok(data) => {
                let file: SnapshotFile = serde_json::from_slice(&data)?;
                info!(
                    "Loaded {} containers and {} blobs from {}",
                    file.containers.len(),
                    file.blobs.len(),
                    path.display()
                );
                Inner::from_file(file)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Inner::default(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            inner: RwLock::new(inner),
            persistence: Some(Persistence {
                path,
                write_lock: Mutex::new(()),
            }),
        })
    }

    /// Applies `apply` and publishes the result only once the snapshot file
    /// holding it has been written. A failed write leaves the visible state
    /// untouched.
    async fn mutate<T, F>(&self, apply: F) -> StorageResult<T>
    where
        T: Send,
        F: FnOnce(&mut Inner) -> StorageResult<T> + Send,
    {
        let Some(persistence) = &self.persistence else {
            return apply(&mut self.inner.write());
        };
        let _write = persistence.write_lock.lock().await;

        let mut next = self.inner.read().clone();
        let value = apply(&mut next)?;
        let data = serde_json::to_vec(&next.to_file())?;

        let tmp = persistence.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &persistence.path).await?;
        debug!("Persisted metadata snapshot ({} bytes)", data.len());

        *self.inner.write() = next;
        Ok(value)
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn get_container(
        &self,
        account: &str,
        name: &str,
    ) -> StorageResult<Option<ContainerModel>> {
        Ok(self
            .inner
            .read()
            .containers
            .get(&container_key(account, name))
            .cloned())
    }

    async fn put_container(&self, container: ContainerModel) -> StorageResult<()> {
        self.mutate(move |inner| {
            inner
                .containers
                .insert(container_key(&container.account, &container.name), container);
            Ok(())
        })
        .await
    }

    async fn delete_container(&self, account: &str, name: &str) -> StorageResult<bool> {
        if !self
            .inner
            .read()
            .containers
            .contains_key(&container_key(account, name))
        {
            return Ok(false);
        }
        self.mutate(|inner| {
            if inner.containers.remove(&container_key(account, name)).is_none() {
                return Ok(false);
            }
            inner
                .blobs
                .retain(|key, _| !(key.0 == account && key.1 == name));
            inner
                .uncommitted
                .retain(|blob, _| !(blob.account == account && blob.container == name));
            Ok(true)
        })
        .await
    }

    async fn list_containers(
        &self,
        account: &str,
        prefix: Option<&str>,
        after: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<ContainerModel>> {
        let prefix = prefix.unwrap_or_default();
        let start = match after.filter(|a| !a.is_empty()) {
            Some(after) => Bound::Excluded(container_key(account, after)),
            None => Bound::Included(container_key(account, prefix)),
        };

        let inner = self.inner.read();
        Ok(inner
            .containers
            .range((start, Bound::Unbounded))
            .take_while(|(key, _)| key.0 == account)
            .skip_while(|(key, _)| key.1.as_str() < prefix)
            .take_while(|(key, _)| key.1.starts_with(prefix))
            .take(limit)
            .map(|(_, container)| container.clone())
            .collect())
    }

    async fn get_blob(&self, blob: &BlobRef, snapshot: &str) -> StorageResult<Option<BlobModel>> {
        Ok(self.inner.read().blobs.get(&blob_key(blob, snapshot)).cloned())
    }

    async fn put_blob(&self, blob: BlobModel) -> StorageResult<()> {
        self.mutate(move |inner| {
            if !inner
                .containers
                .contains_key(&container_key(&blob.account, &blob.container))
            {
                return Err(StorageError::new(ErrorCode::ContainerNotFound));
            }
            inner.blobs.insert(model_key(&blob), blob);
            Ok(())
        })
        .await
    }

    async fn delete_blob(&self, blob: &BlobRef, snapshot: &str) -> StorageResult<bool> {
        if !self.inner.read().blobs.contains_key(&blob_key(blob, snapshot)) {
            return Ok(false);
        }
        self.mutate(|inner| {
            if inner.blobs.remove(&blob_key(blob, snapshot)).is_none() {
                return Ok(false);
            }
            if snapshot.is_empty() {
                inner.uncommitted.remove(blob);
            }
            Ok(true)
        })
        .await
    }

    async fn list_snapshots(&self, blob: &BlobRef) -> StorageResult<Vec<BlobModel>> {
        let inner = self.inner.read();
        Ok(inner
            .container_blob_range(&blob.account, &blob.container, &blob.name)
            .take_while(|(key, _)| key.2 == blob.name)
            .filter(|(key, _)| !key.3.is_empty())
            .map(|(_, model)| model.clone())
            .collect())
    }

    async fn list_blobs(
        &self,
        account: &str,
        container: &str,
        prefix: Option<&str>,
        after: Option<&str>,
        include_snapshots: bool,
        limit: usize,
    ) -> StorageResult<Vec<BlobModel>> {
        let prefix = prefix.unwrap_or_default();
        let after = after.filter(|a| !a.is_empty());
        let from = match after {
            Some(after) if after > prefix => after,
            _ => prefix,
        };

        let inner = self.inner.read();
        let mut result: Vec<BlobModel> = Vec::new();
        let mut names = 0;
        let mut last_name: Option<&str> = None;

        for (key, model) in inner.container_blob_range(account, container, from) {
            let name = key.2.as_str();
            if after.is_some_and(|a| name <= a) {
                continue;
            }
            if !name.starts_with(prefix) {
                break;
            }
            if !include_snapshots && !key.3.is_empty() {
                continue;
            }
            if last_name != Some(name) {
                if names == limit {
                    break;
                }
                names += 1;
                last_name = Some(name);
            }
            result.push(model.clone());
        }
        Ok(result)
    }

    async fn query_blobs(&self, query: &BlobQuery<'_>) -> StorageResult<Vec<BlobModel>> {
        let inner = self.inner.read();
        Ok(inner
            .blobs
            .iter()
            .filter(|(key, _)| key.0 == query.account && key.3.is_empty())
            .filter(|(key, _)| query.container.map_or(true, |c| key.1 == c))
            .filter(|(key, _)| {
                query
                    .after
                    .map_or(true, |(c, n)| (key.1.as_str(), key.2.as_str()) > (c, n))
            })
            .filter(|(key, model)| query.filter.matches(&model.tags, Some(key.1.as_str())))
            .take(query.limit)
            .map(|(_, model)| model.clone())
            .collect())
    }

    async fn put_block(&self, block: BlockModel) -> StorageResult<()> {
        self.mutate(move |inner| {
            if !inner
                .containers
                .contains_key(&container_key(&block.account, &block.container))
            {
                return Err(StorageError::new(ErrorCode::ContainerNotFound));
            }
            let staged = inner.uncommitted.entry(block.blob_ref()).or_default();
            match staged.iter_mut().find(|b| b.block_id == block.block_id) {
                Some(existing) => *existing = block,
                None => staged.push(block),
            }
            Ok(())
        })
        .await
    }

    async fn get_uncommitted_blocks(&self, blob: &BlobRef) -> StorageResult<Vec<BlockModel>> {
        Ok(self
            .inner
            .read()
            .uncommitted
            .get(blob)
            .cloned()
            .unwrap_or_default())
    }

    async fn commit_block_list(&self, blob: BlobModel, consumed: &[String]) -> StorageResult<()> {
        self.mutate(move |inner| {
            if !inner
                .containers
                .contains_key(&container_key(&blob.account, &blob.container))
            {
                return Err(StorageError::new(ErrorCode::ContainerNotFound));
            }
            let blob_ref = blob.blob_ref();
            if let Some(staged) = inner.uncommitted.get_mut(&blob_ref) {
                staged.retain(|b| !consumed.contains(&b.block_id));
                if staged.is_empty() {
                    inner.uncommitted.remove(&blob_ref);
                }
            }
            inner.blobs.insert(model_key(&blob), blob);
            Ok(())
        })
        .await
    }

    async fn referenced_extents(&self) -> StorageResult<HashSet<String>> {
        let inner = self.inner.read();
        let from_blobs = inner
            .blobs
            .values()
            .flat_map(|blob| blob.extent_chunks.iter().map(|c| c.id.clone()));
        let from_blocks = inner
            .uncommitted
            .values()
            .flatten()
            .map(|block| block.extent_chunk.id.clone());
        Ok(from_blobs.chain(from_blocks).collect())
    }
}
