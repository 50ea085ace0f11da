//! Content store: append-only extents holding blob and block bytes.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::models::ExtentChunk;

/// Size at which the file store starts a new extent.
pub const MAX_EXTENT_SIZE: u64 = 64 * 1024 * 1024;

/// Description of one extent, for garbage collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtentInfo {
    pub id: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    /// Time of the latest append.
    pub last_append_at: DateTime<Utc>,
    /// Still receiving appends; never collected.
    pub active: bool,
}

/// Trait for content storage operations.
#[async_trait]
pub trait ExtentStore: Send + Sync {
    /// Appends data and returns a reference to it.
    async fn append(&self, data: Bytes) -> StorageResult<ExtentChunk>;

    /// Reads the bytes a chunk refers to.
    async fn read(&self, chunk: &ExtentChunk) -> StorageResult<Bytes>;

    /// Deletes a whole extent.
    async fn delete(&self, extent_id: &str) -> StorageResult<()>;

    /// Enumerates all extents.
    async fn list_extents(&self) -> StorageResult<Vec<ExtentInfo>>;

    /// Returns the total size of all extents.
    async fn total_size(&self) -> u64;
}

/// Streams `chunks` in order, concatenated.
pub fn read_chunks(
    store: Arc<dyn ExtentStore>,
    chunks: Vec<ExtentChunk>,
) -> BoxStream<'static, StorageResult<Bytes>> {
    stream::iter(chunks)
        .then(move |chunk| {
            let store = Arc::clone(&store);
            async move { store.read(&chunk).await }
        })
        .boxed()
}

fn missing_extent(id: &str) -> StorageError {
    StorageError::store_unavailable(format!("Extent {} is missing from the content store", id))
}

/// Number of shards for the extent store (must be power of 2).
const NUM_SHARDS: usize = 64;

#[derive(Debug, Clone)]
struct MemoryExtent {
    data: Bytes,
    created_at: DateTime<Utc>,
}

/// Sharded in-memory content store; every append is its own extent.
pub struct MemoryExtentStore {
    shards: Vec<DashMap<Arc<str>, MemoryExtent>>,
    /// Current total size in bytes.
    current_size: AtomicU64,
    /// Maximum size limit (0 = unlimited).
    size_limit: u64,
}

impl MemoryExtentStore {
    pub fn new() -> Self {
        Self::with_limit(0)
    }

    pub fn with_limit(limit: u64) -> Self {
        let shards = (0..NUM_SHARDS).map(|_| DashMap::new()).collect();
        Self {
            shards,
            current_size: AtomicU64::new(0),
            size_limit: limit,
        }
    }

    #[inline]
    fn get_shard(&self, extent_id: &str) -> &DashMap<Arc<str>, MemoryExtent> {
        let hash = extent_id
            .bytes()
            .take(8)
            .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
        &self.shards[hash % NUM_SHARDS]
    }
}

impl Default for MemoryExtentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExtentStore for MemoryExtentStore {
    async fn append(&self, data: Bytes) -> StorageResult<ExtentChunk> {
        let size = data.len() as u64;

        if self.size_limit > 0 {
            let current = self.current_size.load(Ordering::Relaxed);
            if current + size > self.size_limit {
                return Err(StorageError::with_message(
                    ErrorCode::RequestBodyTooLarge,
                    "In-memory content store limit exceeded",
                ));
            }
        }

        let extent_id = Uuid::new_v4().to_string();
        self.get_shard(&extent_id).insert(
            Arc::from(extent_id.as_str()),
            MemoryExtent {
                data,
                created_at: Utc::now(),
            },
        );
        self.current_size.fetch_add(size, Ordering::Relaxed);

        Ok(ExtentChunk::new(extent_id, 0, size))
    }

    async fn read(&self, chunk: &ExtentChunk) -> StorageResult<Bytes> {
        let extent = self
            .get_shard(&chunk.id)
            .get(chunk.id.as_str())
            .ok_or_else(|| missing_extent(&chunk.id))?;

        let start = chunk.offset as usize;
        let end = start + chunk.count as usize;
        if end > extent.data.len() {
            return Err(StorageError::store_unavailable(format!(
                "Chunk {}+{} is outside extent {}",
                chunk.offset, chunk.count, chunk.id
            )));
        }

        Ok(extent.data.slice(start..end))
    }

    async fn delete(&self, extent_id: &str) -> StorageResult<()> {
        if let Some((_, extent)) = self.get_shard(extent_id).remove(extent_id) {
            self.current_size
                .fetch_sub(extent.data.len() as u64, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn list_extents(&self) -> StorageResult<Vec<ExtentInfo>> {
        Ok(self
            .shards
            .iter()
            .flat_map(|shard| {
                shard
                    .iter()
                    .map(|entry| ExtentInfo {
                        id: entry.key().to_string(),
                        size: entry.value().data.len() as u64,
                        created_at: entry.value().created_at,
                        last_append_at: entry.value().created_at,
                        active: false,
                    })
                    .collect::<Vec<_>>()
            })
            .collect())
    }

    async fn total_size(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }
}

struct ActiveExtent {
    id: String,
    file: fs::File,
    size: u64,
}

#[derive(Debug, Clone)]
struct FsExtentMeta {
    size: u64,
    created_at: DateTime<Utc>,
    last_append_at: DateTime<Utc>,
}

/// File system content store. Appends go to the active extent file until it
/// reaches [`MAX_EXTENT_SIZE`], then a new file is started.
pub struct FsExtentStore {
    /// Base directory for extent files.
    base_path: PathBuf,
    extents: DashMap<Arc<str>, FsExtentMeta>,
    active: Mutex<Option<ActiveExtent>>,
    max_extent_size: u64,
    /// Current total size in bytes.
    current_size: AtomicU64,
}

impl FsExtentStore {
    /// Opens the store, picking up extent files left by a previous run.
    pub async fn new(base_path: PathBuf) -> StorageResult<Self> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::store_unavailable(format!("Failed to create extent directory: {}", e))
        })?;

        let extents = DashMap::new();
        let mut total = 0;
        let mut dir = fs::read_dir(&base_path).await?;
        while let Some(entry) = dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let Some(id) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            total += metadata.len();
            extents.insert(
                Arc::from(id.as_str()),
                FsExtentMeta {
                    size: metadata.len(),
                    created_at: modified,
                    last_append_at: modified,
                },
            );
        }
        debug!("Loaded {} extents from {}", extents.len(), base_path.display());

        Ok(Self {
            base_path,
            extents,
            active: Mutex::new(None),
            max_extent_size: MAX_EXTENT_SIZE,
            current_size: AtomicU64::new(total),
        })
    }

    /// Overrides the size at which a new extent is started.
    pub fn with_max_extent_size(mut self, size: u64) -> Self {
        self.max_extent_size = size;
        self
    }

    fn extent_path(&self, extent_id: &str) -> PathBuf {
        self.base_path.join(extent_id)
    }

    async fn open_extent(&self) -> StorageResult<ActiveExtent> {
        let id = Uuid::new_v4().to_string();
        let file = fs::OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(self.extent_path(&id))
            .await
            .map_err(|e| {
                StorageError::store_unavailable(format!("Failed to create extent file: {}", e))
            })?;
        let now = Utc::now();
        self.extents.insert(
            Arc::from(id.as_str()),
            FsExtentMeta {
                size: 0,
                created_at: now,
                last_append_at: now,
            },
        );
        Ok(ActiveExtent { id, file, size: 0 })
    }
}

#[async_trait]
impl ExtentStore for FsExtentStore {
    async fn append(&self, data: Bytes) -> StorageResult<ExtentChunk> {
        let size = data.len() as u64;
        let mut active = self.active.lock().await;

        let rotate = match active.as_ref() {
            Some(extent) => extent.size > 0 && extent.size + size > self.max_extent_size,
            None => true,
        };
        if rotate {
            *active = Some(self.open_extent().await?);
        }
        let Some(extent) = active.as_mut() else {
            return Err(StorageError::store_unavailable("No active extent"));
        };

        let written = match extent.file.write_all(&data).await {
            Ok(()) => extent.file.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            // The file may end in a partial write; the next append starts a new extent.
            *active = None;
            return Err(StorageError::store_unavailable(format!(
                "Failed to write extent data: {}",
                e
            )));
        }

        let offset = extent.size;
        extent.size += size;
        if let Some(mut meta) = self.extents.get_mut(extent.id.as_str()) {
            meta.size = extent.size;
            meta.last_append_at = Utc::now();
        }
        self.current_size.fetch_add(size, Ordering::Relaxed);

        Ok(ExtentChunk::new(extent.id.clone(), offset, size))
    }

    async fn read(&self, chunk: &ExtentChunk) -> StorageResult<Bytes> {
        if chunk.count == 0 {
            return Ok(Bytes::new());
        }
        let mut file = fs::File::open(self.extent_path(&chunk.id))
            .await
            .map_err(|_| missing_extent(&chunk.id))?;

        file.seek(std::io::SeekFrom::Start(chunk.offset)).await?;

        let mut buffer = vec![0u8; chunk.count as usize];
        file.read_exact(&mut buffer).await.map_err(|e| {
            StorageError::store_unavailable(format!("Failed to read extent data: {}", e))
        })?;

        Ok(Bytes::from(buffer))
    }

    async fn delete(&self, extent_id: &str) -> StorageResult<()> {
        {
            let active = self.active.lock().await;
            if active.as_ref().is_some_and(|a| a.id == extent_id) {
                return Ok(());
            }
        }

        if let Some((_, meta)) = self.extents.remove(extent_id) {
            self.current_size.fetch_sub(meta.size, Ordering::Relaxed);
        }
        match fs::remove_file(self.extent_path(extent_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_extents(&self) -> StorageResult<Vec<ExtentInfo>> {
        let active_id = self.active.lock().await.as_ref().map(|a| a.id.clone());
        Ok(self
            .extents
            .iter()
            .map(|entry| ExtentInfo {
                id: entry.key().to_string(),
                size: entry.value().size,
                created_at: entry.value().created_at,
                last_append_at: entry.value().last_append_at,
                active: active_id.as_deref() == Some(entry.key().as_ref()),
            })
            .collect())
    }

    async fn total_size(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }
}
