//! Append blob operations.

use bytes::Bytes;
use tracing::debug;

use super::{blob_target, validate_blob_name, AccessConditions, BlobCreateOptions, BlobEngine, OperationContext};
use crate::blocks::{verify_md5, MAX_APPEND_BLOCKS, MAX_APPEND_BLOCK_SIZE};
use crate::conditions::{evaluate_write, ResourceKind};
use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::lease::LeaseTarget;
use crate::locks::EntityKey;
use crate::models::{BlobModel, BlobRef, BlobType};

/// Conditions and checksum for one append.
#[derive(Debug, Clone, Default)]
pub struct AppendBlockOptions {
    pub content_md5: Option<String>,
    /// `x-ms-blob-condition-appendpos`: the append must start here.
    pub append_position: Option<u64>,
    /// `x-ms-blob-condition-maxsize`: the blob must not grow past this.
    pub max_size: Option<u64>,
    pub access: AccessConditions,
}

/// Result of a successful append.
#[derive(Debug, Clone)]
pub struct AppendOutcome {
    pub blob: BlobModel,
    /// Offset at which the block was written.
    pub append_offset: u64,
}

impl BlobEngine {
    /// Creates an empty append blob, replacing any blob with the same name.
    pub async fn create_append_blob(
        &self,
        ctx: &OperationContext,
        blob_ref: &BlobRef,
        options: BlobCreateOptions,
    ) -> StorageResult<BlobModel> {
        validate_blob_name(&blob_ref.name)?;
        options.validate()?;

        let _guard = self.locks.lock(EntityKey::blob(blob_ref)).await;
        let existing = self.find_blob(blob_ref, "").await?;
        evaluate_write(
            &options.access.conditions,
            existing.as_ref().map(blob_target),
            ResourceKind::Blob,
        )?;

        let mut blob = BlobModel::new(blob_ref, BlobType::AppendBlob, ctx.now);
        if let Some(existing) = &existing {
            existing
                .lease
                .check_write_access(options.access.lease_id(), LeaseTarget::Blob, ctx.now)?;
            blob.properties.created_on = existing.properties.created_on;
            blob.lease = existing.lease.after_write(ctx.now);
        }
        blob.properties.http_headers = options.http_headers;
        blob.metadata = options.metadata;
        blob.tags = options.tags;

        self.replace_blob(blob.clone()).await?;
        debug!(request_id = %ctx.request_id, "Created append blob {}", blob_ref);
        Ok(blob)
    }

    /// Appends `content` to the end of an append blob.
    pub async fn append_block(
        &self,
        ctx: &OperationContext,
        blob_ref: &BlobRef,
        content: Bytes,
        options: &AppendBlockOptions,
    ) -> StorageResult<AppendOutcome> {
        if content.is_empty() {
            return Err(StorageError::with_message(
                ErrorCode::InvalidHeaderValue,
                "An append block must not be empty.",
            ));
        }
        if content.len() as u64 > MAX_APPEND_BLOCK_SIZE {
            return Err(StorageError::new(ErrorCode::RequestBodyTooLarge));
        }
        verify_md5(&content, options.content_md5.as_deref())?;

        let _guard = self.locks.lock(EntityKey::blob(blob_ref)).await;
        let mut blob = self.load_blob(blob_ref, "").await?;
        if blob.properties.blob_type != BlobType::AppendBlob {
            return Err(StorageError::with_message(
                ErrorCode::InvalidBlobType,
                "The blob type is invalid for this operation.",
            ));
        }
        evaluate_write(&options.access.conditions, Some(blob_target(&blob)), ResourceKind::Blob)?;
        blob.lease
            .check_write_access(options.access.lease_id(), LeaseTarget::Blob, ctx.now)?;

        let block_count = blob.properties.committed_block_count.unwrap_or(0);
        if block_count >= MAX_APPEND_BLOCKS {
            return Err(StorageError::with_message(
                ErrorCode::BlockCountExceedsLimit,
                format!("An append blob cannot have more than {} blocks.", MAX_APPEND_BLOCKS),
            ));
        }

        let length = blob.properties.content_length;
        let size = content.len() as u64;
        if options.max_size.is_some_and(|max| length + size > max) {
            return Err(StorageError::new(ErrorCode::MaxBlobSizeConditionNotMet));
        }
        if options.append_position.is_some_and(|pos| pos != length) {
            return Err(StorageError::new(ErrorCode::AppendPositionConditionNotMet));
        }

        let chunk = self.extents.append(content).await?;
        blob.extent_chunks.push(chunk);
        blob.properties.content_length = length + size;
        blob.properties.committed_block_count = Some(block_count + 1);
        blob.properties.update_etag(ctx.now);
        blob.lease = blob.lease.after_write(ctx.now);

        self.metadata.put_blob(blob.clone()).await?;
        debug!(
            request_id = %ctx.request_id,
            "Appended {} bytes to {} at offset {}", size, blob_ref, length
        );
        Ok(AppendOutcome {
            blob,
            append_offset: length,
        })
    }
}
