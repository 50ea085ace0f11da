//! Block data models for block blobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::blob::{BlobRef, ExtentChunk};

/// Where a commit list entry is looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSource {
    /// Only the committed list.
    Committed,
    /// Only the uncommitted partition.
    Uncommitted,
    /// Uncommitted first, then committed.
    Latest,
}

impl BlockSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockSource::Committed => "Committed",
            BlockSource::Uncommitted => "Uncommitted",
            BlockSource::Latest => "Latest",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Committed" => Some(BlockSource::Committed),
            "Uncommitted" => Some(BlockSource::Uncommitted),
            "Latest" => Some(BlockSource::Latest),
            _ => None,
        }
    }
}

/// One entry of a commit request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockListEntry {
    pub block_id: String,
    pub source: BlockSource,
}

impl BlockListEntry {
    pub fn new(block_id: impl Into<String>, source: BlockSource) -> Self {
        Self {
            block_id: block_id.into(),
            source,
        }
    }

    pub fn latest(block_id: impl Into<String>) -> Self {
        Self::new(block_id, BlockSource::Latest)
    }
}

/// Block list type for GetBlockList operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockListType {
    Committed,
    Uncommitted,
    #[default]
    All,
}

impl BlockListType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "committed" => Some(BlockListType::Committed),
            "uncommitted" => Some(BlockListType::Uncommitted),
            "all" => Some(BlockListType::All),
            _ => None,
        }
    }

    pub fn includes_committed(&self) -> bool {
        matches!(self, BlockListType::Committed | BlockListType::All)
    }

    pub fn includes_uncommitted(&self) -> bool {
        matches!(self, BlockListType::Uncommitted | BlockListType::All)
    }
}

/// A staged (uncommitted) block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockModel {
    /// Account name.
    pub account: String,
    /// Container name.
    pub container: String,
    /// Blob name.
    pub blob: String,
    /// Block ID (base64 encoded).
    pub block_id: String,
    /// Block size in bytes.
    pub size: u64,
    /// Reference to extent data.
    pub extent_chunk: ExtentChunk,
    /// When the block was staged.
    pub staged_time: DateTime<Utc>,
}

impl BlockModel {
    /// Creates a new block model.
    pub fn new(
        blob_ref: &BlobRef,
        block_id: String,
        extent_chunk: ExtentChunk,
        staged_time: DateTime<Utc>,
    ) -> Self {
        Self {
            account: blob_ref.account.clone(),
            container: blob_ref.container.clone(),
            blob: blob_ref.name.clone(),
            block_id,
            size: extent_chunk.count,
            extent_chunk,
            staged_time,
        }
    }

    pub fn blob_ref(&self) -> BlobRef {
        BlobRef::new(&self.account, &self.container, &self.blob)
    }
}

/// Block entry in a committed block list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedBlock {
    pub block_id: String,
    pub size: u64,
    pub extent_chunk: ExtentChunk,
}

impl From<&BlockModel> for CommittedBlock {
    fn from(block: &BlockModel) -> Self {
        Self {
            block_id: block.block_id.clone(),
            size: block.size,
            extent_chunk: block.extent_chunk.clone(),
        }
    }
}

/// Id and size of a block, as reported by GetBlockList.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub block_id: String,
    pub size: u64,
}

/// Partitioned block list of a blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockList {
    pub committed: Vec<BlockInfo>,
    pub uncommitted: Vec<BlockInfo>,
}
