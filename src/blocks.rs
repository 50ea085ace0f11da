//! Block staging and commit rules.
//!
//! Everything here is pure: the engine loads the blob and its staged blocks,
//! calls into this module, and persists the result.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use md5::{Digest, Md5};
use std::collections::{HashMap, HashSet};

use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::models::{
    BlockInfo, BlockList, BlockListEntry, BlockListType, BlockModel, BlockSource, CommittedBlock,
    ExtentChunk,
};

const MIB: u64 = 1024 * 1024;

/// Maximum decoded length of a block id.
pub const MAX_BLOCK_ID_LENGTH: usize = 64;
/// Maximum size of a single staged block.
pub const MAX_STAGE_BLOCK_SIZE: u64 = 4000 * MIB;
/// Maximum size of a single-shot upload.
pub const MAX_PUT_BLOB_SIZE: u64 = 5000 * MIB;
/// Maximum number of uncommitted blocks per blob.
pub const MAX_UNCOMMITTED_BLOCKS: usize = 100_000;
/// Maximum number of entries in a committed block list.
pub const MAX_COMMITTED_BLOCKS: usize = 50_000;
/// Maximum size of a committed block blob.
pub const MAX_BLOCK_BLOB_SIZE: u64 = MAX_COMMITTED_BLOCKS as u64 * MAX_STAGE_BLOCK_SIZE;
/// Maximum size of one append block.
pub const MAX_APPEND_BLOCK_SIZE: u64 = 4 * MIB;
/// Maximum number of blocks in an append blob.
pub const MAX_APPEND_BLOCKS: u32 = 50_000;

/// Validates that a block id is base64 and decodes to at most 64 bytes.
pub fn validate_block_id(block_id: &str) -> StorageResult<()> {
    let decoded = BASE64.decode(block_id).map_err(|_| {
        StorageError::with_message(
            ErrorCode::InvalidBlockId,
            format!("Block ID '{}' is not valid base64.", block_id),
        )
    })?;
    if decoded.is_empty() || decoded.len() > MAX_BLOCK_ID_LENGTH {
        return Err(StorageError::with_message(
            ErrorCode::InvalidBlockId,
            format!(
                "Block ID must decode to between 1 and {} bytes.",
                MAX_BLOCK_ID_LENGTH
            ),
        ));
    }
    Ok(())
}

/// Base64 MD5 of `content`.
pub fn content_md5(content: &[u8]) -> String {
    BASE64.encode(Md5::digest(content))
}

/// Computes the MD5 of `content` and compares it with the caller's value.
/// Returns the computed value.
pub fn verify_md5(content: &[u8], expected: Option<&str>) -> StorageResult<String> {
    let computed = content_md5(content);
    if let Some(expected) = expected {
        match BASE64.decode(expected) {
            Ok(decoded) if decoded.len() == 16 => {}
            _ => {
                return Err(StorageError::with_message(
                    ErrorCode::InvalidMd5,
                    format!("The MD5 value '{}' is not a valid base64 digest.", expected),
                ))
            }
        }
        if expected != computed {
            return Err(StorageError::new(ErrorCode::Md5Mismatch));
        }
    }
    Ok(computed)
}

/// Rejects a block id whose length differs from the blocks already staged
/// for the current commit generation. Re-staging an existing id is allowed.
pub fn check_block_id_length(block_id: &str, staged: &[BlockModel]) -> StorageResult<()> {
    let mismatched = staged
        .iter()
        .any(|b| b.block_id != block_id && b.block_id.len() != block_id.len());
    if mismatched {
        return Err(StorageError::with_message(
            ErrorCode::InvalidBlobOrBlock,
            "The specified blob or block content is invalid. All block IDs of a blob must have the same length.",
        ));
    }
    Ok(())
}

/// Ensures the uncommitted partition has room for `block_id`.
pub fn check_uncommitted_capacity(block_id: &str, staged: &[BlockModel]) -> StorageResult<()> {
    let replaces = staged.iter().any(|b| b.block_id == block_id);
    if !replaces && staged.len() >= MAX_UNCOMMITTED_BLOCKS {
        return Err(StorageError::with_message(
            ErrorCode::BlockCountExceedsLimit,
            format!(
                "The uncommitted block count cannot exceed {}.",
                MAX_UNCOMMITTED_BLOCKS
            ),
        ));
    }
    Ok(())
}

/// Outcome of resolving a commit request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommit {
    /// New committed list, in request order.
    pub blocks: Vec<CommittedBlock>,
    /// Uncommitted block ids that were consumed by the commit.
    pub consumed: Vec<String>,
    pub content_length: u64,
}

impl ResolvedCommit {
    pub fn extent_chunks(&self) -> Vec<ExtentChunk> {
        self.blocks.iter().map(|b| b.extent_chunk.clone()).collect()
    }
}

/// Resolves every entry of a commit request. Any unresolved id fails the
/// whole commit.
pub fn resolve_block_list(
    entries: &[BlockListEntry],
    committed: &[CommittedBlock],
    uncommitted: &[BlockModel],
) -> StorageResult<ResolvedCommit> {
    if entries.len() > MAX_COMMITTED_BLOCKS {
        return Err(StorageError::with_message(
            ErrorCode::InvalidBlockList,
            format!(
                "The block list may not contain more than {} blocks.",
                MAX_COMMITTED_BLOCKS
            ),
        ));
    }

    let committed_by_id: HashMap<&str, &CommittedBlock> = committed
        .iter()
        .map(|b| (b.block_id.as_str(), b))
        .collect();
    let uncommitted_by_id: HashMap<&str, &BlockModel> = uncommitted
        .iter()
        .map(|b| (b.block_id.as_str(), b))
        .collect();

    let mut blocks = Vec::with_capacity(entries.len());
    let mut consumed = Vec::new();
    let mut seen_uncommitted = HashSet::new();
    let mut content_length = 0u64;

    for entry in entries {
        let id = entry.block_id.as_str();
        let from_uncommitted = || uncommitted_by_id.get(id).map(|b| CommittedBlock::from(*b));
        let from_committed = || committed_by_id.get(id).map(|b| (*b).clone());

        let (block, was_uncommitted) = match entry.source {
            BlockSource::Committed => (from_committed(), false),
            BlockSource::Uncommitted => (from_uncommitted(), true),
            BlockSource::Latest => match from_uncommitted() {
                Some(block) => (Some(block), true),
                None => (from_committed(), false),
            },
        };

        let block = block.ok_or_else(|| {
            StorageError::with_message(
                ErrorCode::InvalidBlockList,
                format!(
                    "Block '{}' could not be found in the {} block list.",
                    id,
                    entry.source.as_str().to_lowercase()
                ),
            )
        })?;

        if was_uncommitted && seen_uncommitted.insert(id) {
            consumed.push(id.to_string());
        }
        content_length += block.size;
        blocks.push(block);
    }

    if content_length > MAX_BLOCK_BLOB_SIZE {
        return Err(StorageError::new(ErrorCode::EntityTooLarge));
    }

    Ok(ResolvedCommit {
        blocks,
        consumed,
        content_length,
    })
}

/// Projects committed and staged blocks into a block list, without reading
/// any content.
pub fn block_list(
    committed: &[CommittedBlock],
    uncommitted: &[BlockModel],
    list_type: BlockListType,
) -> BlockList {
    let mut list = BlockList::default();
    if list_type.includes_committed() {
        list.committed = committed
            .iter()
            .map(|b| BlockInfo {
                block_id: b.block_id.clone(),
                size: b.size,
            })
            .collect();
    }
    if list_type.includes_uncommitted() {
        list.uncommitted = uncommitted
            .iter()
            .map(|b| BlockInfo {
                block_id: b.block_id.clone(),
                size: b.size,
            })
            .collect();
    }
    list
}

/// Requested byte range; `end` is inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    /// Parses `bytes=start-[end]`.
    pub fn parse(value: &str) -> StorageResult<Self> {
        let invalid = || {
            StorageError::with_message(
                ErrorCode::InvalidHeaderValue,
                format!("The range header value '{}' is invalid.", value),
            )
        };
        let spec = value.strip_prefix("bytes=").ok_or_else(invalid)?;
        let (start, end) = spec.split_once('-').ok_or_else(invalid)?;
        let start: u64 = start.trim().parse().map_err(|_| invalid())?;
        let end = match end.trim() {
            "" => None,
            end => Some(end.parse::<u64>().map_err(|_| invalid())?),
        };
        if end.is_some_and(|end| end < start) {
            return Err(invalid());
        }
        Ok(Self { start, end })
    }

    /// Clamps the range to `content_length`, returning inclusive bounds.
    /// Ranges starting at or beyond the end of the content are rejected.
    pub fn resolve(&self, content_length: u64) -> StorageResult<(u64, u64)> {
        if self.start >= content_length {
            return Err(StorageError::invalid_range(content_length));
        }
        let last = content_length - 1;
        let end = self.end.map_or(last, |end| end.min(last));
        Ok((self.start, end))
    }
}

/// Maps an inclusive byte range of the concatenated content onto the chunks
/// that hold it.
pub fn plan_range(chunks: &[ExtentChunk], start: u64, end: u64) -> Vec<ExtentChunk> {
    let mut plan = Vec::new();
    let mut chunk_start = 0u64;
    for chunk in chunks {
        let chunk_end = chunk_start + chunk.count;
        if chunk.count > 0 && chunk_end > start && chunk_start <= end {
            let skip = start.saturating_sub(chunk_start);
            let take = (end + 1).min(chunk_end) - (chunk_start + skip);
            plan.push(ExtentChunk::new(chunk.id.clone(), chunk.offset + skip, take));
        }
        if chunk_start > end {
            break;
        }
        chunk_start = chunk_end;
    }
    plan
}
