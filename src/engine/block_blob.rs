//! Block staging and commit.

use bytes::Bytes;
use tracing::debug;

use super::{blob_target, validate_blob_name, AccessConditions, BlobCreateOptions, BlobEngine, OperationContext};
use crate::blocks::{
    block_list, check_block_id_length, check_uncommitted_capacity, resolve_block_list,
    validate_block_id, verify_md5, MAX_STAGE_BLOCK_SIZE,
};
use crate::conditions::{evaluate_write, ResourceKind};
use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::lease::LeaseTarget;
use crate::locks::EntityKey;
use crate::models::{BlobModel, BlobRef, BlobType, BlockList, BlockListEntry, BlockListType, BlockModel};

/// Block list of a blob together with the blob it belongs to. `blob` is
/// `None` while the blob only has staged blocks.
#[derive(Debug, Clone)]
pub struct BlockListing {
    pub blob: Option<BlobModel>,
    pub list: BlockList,
}

fn require_block_blob(blob: &BlobModel) -> StorageResult<()> {
    if blob.properties.blob_type != BlobType::BlockBlob {
        return Err(StorageError::with_message(
            ErrorCode::InvalidBlobType,
            "The blob type is invalid for this operation.",
        ));
    }
    Ok(())
}

impl BlobEngine {
    /// Stages `content` as an uncommitted block. A block already staged
    /// under the same id is replaced.
    pub async fn stage_block(
        &self,
        ctx: &OperationContext,
        blob_ref: &BlobRef,
        block_id: &str,
        content: Bytes,
        content_md5: Option<&str>,
        lease_id: Option<&str>,
    ) -> StorageResult<BlockModel> {
        validate_blob_name(&blob_ref.name)?;
        validate_block_id(block_id)?;
        if content.len() as u64 > MAX_STAGE_BLOCK_SIZE {
            return Err(StorageError::new(ErrorCode::RequestBodyTooLarge));
        }
        verify_md5(&content, content_md5)?;

        let chunk = self.extents.append(content).await?;

        let _guard = self.locks.lock(EntityKey::blob(blob_ref)).await;
        if let Some(blob) = self.find_blob(blob_ref, "").await? {
            require_block_blob(&blob)?;
            blob.lease
                .check_write_access(lease_id, LeaseTarget::Blob, ctx.now)?;
        }

        let staged = self.metadata.get_uncommitted_blocks(blob_ref).await?;
        if !self.loose {
            check_block_id_length(block_id, &staged)?;
        }
        check_uncommitted_capacity(block_id, &staged)?;

        let block = BlockModel::new(blob_ref, block_id.to_string(), chunk, ctx.now);
        self.metadata.put_block(block.clone()).await?;
        debug!(
            request_id = %ctx.request_id,
            "Staged block {} for {} ({} bytes)", block_id, blob_ref, block.size
        );
        Ok(block)
    }

    /// Makes the listed blocks the blob's content, in list order. Either
    /// every entry resolves and the blob is replaced, or nothing changes.
    /// Staged blocks the list does not reference stay staged.
    pub async fn commit_block_list(
        &self,
        ctx: &OperationContext,
        blob_ref: &BlobRef,
        entries: &[BlockListEntry],
        options: BlobCreateOptions,
    ) -> StorageResult<BlobModel> {
        validate_blob_name(&blob_ref.name)?;
        options.validate()?;

        let _guard = self.locks.lock(EntityKey::blob(blob_ref)).await;
        let existing = self.find_blob(blob_ref, "").await?;
        if let Some(existing) = &existing {
            require_block_blob(existing)?;
        }
        evaluate_write(
            &options.access.conditions,
            existing.as_ref().map(blob_target),
            ResourceKind::Blob,
        )?;
        if let Some(existing) = &existing {
            existing
                .lease
                .check_write_access(options.access.lease_id(), LeaseTarget::Blob, ctx.now)?;
        }

        let staged = self.metadata.get_uncommitted_blocks(blob_ref).await?;
        let committed = existing
            .as_ref()
            .map(|b| b.committed_blocks.as_slice())
            .unwrap_or_default();
        let resolved = resolve_block_list(entries, committed, &staged)?;

        let mut blob = BlobModel::new(blob_ref, BlobType::BlockBlob, ctx.now);
        if let Some(existing) = &existing {
            blob.properties.created_on = existing.properties.created_on;
            blob.lease = existing.lease.after_write(ctx.now);
        }
        blob.properties.content_length = resolved.content_length;
        blob.properties.http_headers = options.http_headers;
        blob.metadata = options.metadata;
        blob.tags = options.tags;
        blob.extent_chunks = resolved.extent_chunks();
        blob.committed_blocks = resolved.blocks;

        self.metadata
            .commit_block_list(blob.clone(), &resolved.consumed)
            .await?;
        debug!(
            request_id = %ctx.request_id,
            "Committed {} blocks to {} ({} bytes)",
            blob.committed_blocks.len(),
            blob_ref,
            blob.properties.content_length
        );
        Ok(blob)
    }

    /// Lists committed and/or uncommitted blocks without reading content.
    pub async fn get_block_list(
        &self,
        ctx: &OperationContext,
        blob_ref: &BlobRef,
        snapshot: &str,
        list_type: BlockListType,
        access: &AccessConditions,
    ) -> StorageResult<BlockListing> {
        let blob = self.find_blob(blob_ref, snapshot).await?;
        let staged = if snapshot.is_empty() {
            self.metadata.get_uncommitted_blocks(blob_ref).await?
        } else {
            Vec::new()
        };

        match &blob {
            Some(blob) => {
                require_block_blob(blob)?;
                blob.lease
                    .check_read_access(access.lease_id(), LeaseTarget::Blob, ctx.now)?;
            }
            None if staged.is_empty() => return Err(StorageError::new(ErrorCode::BlobNotFound)),
            None => {}
        }

        let committed = blob
            .as_ref()
            .map(|b| b.committed_blocks.as_slice())
            .unwrap_or_default();
        let list = block_list(committed, &staged, list_type);
        Ok(BlockListing { blob, list })
    }
}
