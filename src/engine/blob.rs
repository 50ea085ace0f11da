//! Operations common to all blob types: put, read, delete, properties,
//! metadata, snapshots, tags and listings.

use bytes::Bytes;
use chrono::Duration;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::{
    blob_target, validate_blob_name, validate_metadata, AccessConditions, BlobEngine,
    OperationContext,
};
use crate::blocks::{plan_range, verify_md5, ByteRange, MAX_PUT_BLOB_SIZE};
use crate::conditions::{evaluate_read, evaluate_write, ResourceKind};
use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::lease::LeaseTarget;
use crate::listing::{effective_max_results, Page, PageBuilder};
use crate::locks::EntityKey;
use crate::models::{BlobHttpHeaders, BlobModel, BlobRef, BlobType};
use crate::storage::{read_chunks, BlobQuery};
use crate::tags::{validate_tags, FilterMode, TagFilter};

/// Blobs fetched from the store per round while filling a page.
const LIST_BATCH_SIZE: usize = 1000;

/// Properties applied when a blob is created or replaced.
#[derive(Debug, Clone, Default)]
pub struct BlobCreateOptions {
    pub http_headers: BlobHttpHeaders,
    pub metadata: HashMap<String, String>,
    pub tags: HashMap<String, String>,
    pub access: AccessConditions,
}

impl BlobCreateOptions {
    pub(crate) fn validate(&self) -> StorageResult<()> {
        validate_metadata(&self.metadata)?;
        validate_tags(&self.tags)
    }
}

/// What a delete on a base blob does with its snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteSnapshots {
    /// Delete the blob and all of its snapshots.
    Include,
    /// Delete only the snapshots.
    Only,
}

impl DeleteSnapshots {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "include" => Some(DeleteSnapshots::Include),
            "only" => Some(DeleteSnapshots::Only),
            _ => None,
        }
    }
}

/// A blob read in progress.
pub struct BlobDownload {
    pub blob: BlobModel,
    /// Inclusive byte range served, for ranged reads.
    pub range: Option<(u64, u64)>,
    pub body: BoxStream<'static, StorageResult<Bytes>>,
}

impl BlobDownload {
    pub fn content_length(&self) -> u64 {
        match self.range {
            Some((start, end)) => end - start + 1,
            None => self.blob.properties.content_length,
        }
    }
}

/// Options for listing blobs.
#[derive(Debug, Clone, Default)]
pub struct ListBlobsOptions {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub marker: Option<String>,
    pub max_results: Option<usize>,
    pub include_snapshots: bool,
}

/// One match of a tag query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedBlob {
    pub container: String,
    pub name: String,
    pub tags: HashMap<String, String>,
}

/// A page of tag query results. `next_marker` is `container/name`, or
/// empty when the query is complete.
#[derive(Debug, Clone, Default)]
pub struct TaggedBlobPage {
    pub blobs: Vec<TaggedBlob>,
    pub next_marker: String,
}

impl BlobEngine {
    /// Creates or replaces a block blob from a single payload.
    pub async fn put_blob(
        &self,
        ctx: &OperationContext,
        blob_ref: &BlobRef,
        content: Bytes,
        content_md5: Option<&str>,
        options: BlobCreateOptions,
    ) -> StorageResult<BlobModel> {
        validate_blob_name(&blob_ref.name)?;
        options.validate()?;
        if content.len() as u64 > MAX_PUT_BLOB_SIZE {
            return Err(StorageError::new(ErrorCode::RequestBodyTooLarge));
        }
        let computed_md5 = verify_md5(&content, content_md5)?;

        let length = content.len() as u64;
        let chunk = if content.is_empty() {
            None
        } else {
            Some(self.extents.append(content).await?)
        };

        let _guard = self.locks.lock(EntityKey::blob(blob_ref)).await;
        let existing = self.find_blob(blob_ref, "").await?;
        evaluate_write(
            &options.access.conditions,
            existing.as_ref().map(blob_target),
            ResourceKind::Blob,
        )?;

        let mut blob = BlobModel::new(blob_ref, BlobType::BlockBlob, ctx.now);
        if let Some(existing) = &existing {
            existing
                .lease
                .check_write_access(options.access.lease_id(), LeaseTarget::Blob, ctx.now)?;
            blob.properties.created_on = existing.properties.created_on;
            blob.lease = existing.lease.after_write(ctx.now);
        }
        blob.properties.content_length = length;
        blob.properties.http_headers = options.http_headers;
        if blob.properties.http_headers.content_md5.is_none() {
            blob.properties.http_headers.content_md5 = Some(computed_md5);
        }
        blob.metadata = options.metadata;
        blob.tags = options.tags;
        blob.extent_chunks = chunk.into_iter().collect();

        self.replace_blob(blob.clone()).await?;
        debug!(request_id = %ctx.request_id, "Put blob {} ({} bytes)", blob_ref, length);
        Ok(blob)
    }

    pub async fn get_blob_properties(
        &self,
        ctx: &OperationContext,
        blob_ref: &BlobRef,
        snapshot: &str,
        access: &AccessConditions,
    ) -> StorageResult<BlobModel> {
        let blob = self.load_blob(blob_ref, snapshot).await?;
        blob.lease
            .check_read_access(access.lease_id(), LeaseTarget::Blob, ctx.now)?;
        evaluate_read(&access.conditions, Some(blob_target(&blob)))?;
        Ok(blob)
    }

    /// Streams a blob's committed content, or the byte range requested.
    pub async fn download_blob(
        &self,
        ctx: &OperationContext,
        blob_ref: &BlobRef,
        snapshot: &str,
        range: Option<ByteRange>,
        access: &AccessConditions,
    ) -> StorageResult<BlobDownload> {
        let blob = self.get_blob_properties(ctx, blob_ref, snapshot, access).await?;

        let (chunks, range) = match range {
            Some(range) => {
                let (start, end) = range.resolve(blob.properties.content_length)?;
                (plan_range(&blob.extent_chunks, start, end), Some((start, end)))
            }
            None => (blob.extent_chunks.clone(), None),
        };

        Ok(BlobDownload {
            body: read_chunks(Arc::clone(&self.extents), chunks),
            blob,
            range,
        })
    }

    /// Deletes a base blob or a single snapshot.
    pub async fn delete_blob(
        &self,
        ctx: &OperationContext,
        blob_ref: &BlobRef,
        snapshot: &str,
        delete_snapshots: Option<DeleteSnapshots>,
        access: &AccessConditions,
    ) -> StorageResult<()> {
        let _guard = self.locks.lock(EntityKey::blob(blob_ref)).await;

        if !snapshot.is_empty() {
            if delete_snapshots.is_some() {
                return Err(StorageError::with_message(
                    ErrorCode::InvalidQueryParameterValue,
                    "x-ms-delete-snapshots cannot be specified when deleting a snapshot.",
                ));
            }
            let target = self.load_blob(blob_ref, snapshot).await?;
            evaluate_write(&access.conditions, Some(blob_target(&target)), ResourceKind::Blob)?;
            self.metadata.delete_blob(blob_ref, snapshot).await?;
            return Ok(());
        }

        let blob = self.load_blob(blob_ref, "").await?;
        evaluate_write(&access.conditions, Some(blob_target(&blob)), ResourceKind::Blob)?;
        blob.lease
            .check_write_access(access.lease_id(), LeaseTarget::Blob, ctx.now)?;

        let snapshots = self.metadata.list_snapshots(blob_ref).await?;
        match delete_snapshots {
            None if !snapshots.is_empty() => {
                return Err(StorageError::new(ErrorCode::SnapshotsPresent));
            }
            None => {}
            Some(_) => {
                for snap in &snapshots {
                    self.metadata.delete_blob(blob_ref, &snap.snapshot).await?;
                }
            }
        }
        if delete_snapshots != Some(DeleteSnapshots::Only) {
            self.metadata.delete_blob(blob_ref, "").await?;
        }

        debug!(request_id = %ctx.request_id, "Deleted blob {}", blob_ref);
        Ok(())
    }

    pub async fn set_blob_http_headers(
        &self,
        ctx: &OperationContext,
        blob_ref: &BlobRef,
        http_headers: BlobHttpHeaders,
        access: &AccessConditions,
    ) -> StorageResult<BlobModel> {
        self.modify_blob(ctx, blob_ref, access, |blob| {
            blob.properties.http_headers = http_headers;
            Ok(())
        })
        .await
    }

    pub async fn set_blob_metadata(
        &self,
        ctx: &OperationContext,
        blob_ref: &BlobRef,
        metadata: HashMap<String, String>,
        access: &AccessConditions,
    ) -> StorageResult<BlobModel> {
        validate_metadata(&metadata)?;
        self.modify_blob(ctx, blob_ref, access, |blob| {
            blob.metadata = metadata;
            Ok(())
        })
        .await
    }

    pub async fn set_blob_tags(
        &self,
        ctx: &OperationContext,
        blob_ref: &BlobRef,
        tags: HashMap<String, String>,
        access: &AccessConditions,
    ) -> StorageResult<BlobModel> {
        validate_tags(&tags)?;
        self.modify_blob(ctx, blob_ref, access, |blob| {
            blob.tags = tags;
            Ok(())
        })
        .await
    }

    pub async fn get_blob_tags(
        &self,
        ctx: &OperationContext,
        blob_ref: &BlobRef,
        snapshot: &str,
        access: &AccessConditions,
    ) -> StorageResult<HashMap<String, String>> {
        self.get_blob_properties(ctx, blob_ref, snapshot, access)
            .await
            .map(|blob| blob.tags)
    }

    /// Takes a read-only snapshot of the base blob. `metadata`, when not
    /// empty, replaces the copied metadata on the snapshot.
    pub async fn create_snapshot(
        &self,
        ctx: &OperationContext,
        blob_ref: &BlobRef,
        metadata: HashMap<String, String>,
        access: &AccessConditions,
    ) -> StorageResult<BlobModel> {
        validate_metadata(&metadata)?;

        let _guard = self.locks.lock(EntityKey::blob(blob_ref)).await;
        let blob = self.load_blob(blob_ref, "").await?;
        evaluate_write(&access.conditions, Some(blob_target(&blob)), ResourceKind::Blob)?;
        blob.lease
            .check_read_access(access.lease_id(), LeaseTarget::Blob, ctx.now)?;

        // Snapshot ids have 100ns resolution; step past any taken id.
        let mut at = ctx.now;
        let mut snapshot = blob.create_snapshot(at);
        while self.metadata.get_blob(blob_ref, &snapshot.snapshot).await?.is_some() {
            at += Duration::nanoseconds(100);
            snapshot = blob.create_snapshot(at);
        }
        if !metadata.is_empty() {
            snapshot.metadata = metadata;
        }

        self.metadata.put_blob(snapshot.clone()).await?;
        debug!(request_id = %ctx.request_id, "Created snapshot {} of {}", snapshot.snapshot, blob_ref);
        Ok(snapshot)
    }

    /// Lists a container's blobs in name order. Snapshots of a name are
    /// listed right after it and never split across pages.
    pub async fn list_blobs(
        &self,
        _ctx: &OperationContext,
        account: &str,
        container: &str,
        options: &ListBlobsOptions,
    ) -> StorageResult<Page<BlobModel>> {
        let max_results = effective_max_results(options.max_results)?;
        self.ensure_container(account, container).await?;

        let prefix = options.prefix.as_deref();
        let mut builder = PageBuilder::new(prefix, options.delimiter.as_deref(), max_results);
        let mut after = options.marker.clone().filter(|m| !m.is_empty());

        loop {
            let batch = self
                .metadata
                .list_blobs(
                    account,
                    container,
                    prefix,
                    after.as_deref(),
                    options.include_snapshots,
                    LIST_BATCH_SIZE,
                )
                .await?;
            if batch.is_empty() {
                break;
            }
            for blob in batch {
                let name = blob.name.clone();
                if !builder.offer(&name, blob) {
                    break;
                }
                after = Some(name);
            }
            if builder.is_closed() {
                break;
            }
        }
        Ok(builder.finish())
    }

    /// Finds base blobs whose tags satisfy a `where` expression, across the
    /// account or within one container.
    pub async fn find_blobs_by_tags(
        &self,
        _ctx: &OperationContext,
        account: &str,
        container: Option<&str>,
        expression: &str,
        marker: Option<&str>,
        max_results: Option<usize>,
    ) -> StorageResult<TaggedBlobPage> {
        let filter = TagFilter::parse(expression, FilterMode::Where)?;
        let max_results = effective_max_results(max_results)?;
        if let Some(container) = container {
            self.ensure_container(account, container).await?;
        }

        let after = match marker.filter(|m| !m.is_empty()) {
            Some(marker) => Some(marker.split_once('/').ok_or_else(|| {
                StorageError::with_message(
                    ErrorCode::InvalidQueryParameterValue,
                    format!("The marker '{}' is invalid.", marker),
                )
            })?),
            None => None,
        };

        let mut matches = self
            .metadata
            .query_blobs(&BlobQuery {
                account,
                container,
                filter: &filter,
                after,
                limit: max_results + 1,
            })
            .await?;

        let next_marker = if matches.len() > max_results {
            matches.truncate(max_results);
            matches
                .last()
                .map(|b| format!("{}/{}", b.container, b.name))
                .unwrap_or_default()
        } else {
            String::new()
        };

        Ok(TaggedBlobPage {
            blobs: matches
                .into_iter()
                .map(|b| TaggedBlob {
                    container: b.container,
                    name: b.name,
                    tags: b.tags,
                })
                .collect(),
            next_marker,
        })
    }

    /// Load, check, mutate and save a base blob under its lock.
    async fn modify_blob<F>(
        &self,
        ctx: &OperationContext,
        blob_ref: &BlobRef,
        access: &AccessConditions,
        mutate: F,
    ) -> StorageResult<BlobModel>
    where
        F: FnOnce(&mut BlobModel) -> StorageResult<()> + Send,
    {
        let _guard = self.locks.lock(EntityKey::blob(blob_ref)).await;
        let mut blob = self.load_blob(blob_ref, "").await?;
        evaluate_write(&access.conditions, Some(blob_target(&blob)), ResourceKind::Blob)?;
        blob.lease
            .check_write_access(access.lease_id(), LeaseTarget::Blob, ctx.now)?;

        mutate(&mut blob)?;
        blob.properties.update_etag(ctx.now);
        blob.lease = blob.lease.after_write(ctx.now);
        self.metadata.put_blob(blob.clone()).await?;
        Ok(blob)
    }
}
