//! Blob engine: the entry point REST handlers call into.
//!
//! Every mutating operation follows the same shape: take the entity lock,
//! load the current record, evaluate preconditions and lease access against
//! that one snapshot, derive the new record, then save it. Content bytes are
//! written to the extent store before the lock is taken where possible, so
//! the lock is held only across metadata work.

mod append_blob;
mod blob;
mod block_blob;
mod container;
mod lease;

pub use append_blob::*;
pub use blob::*;
pub use block_blob::*;
pub use container::*;
pub use lease::*;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::conditions::{ConditionTarget, ConditionalHeaders};
use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::locks::LockManager;
use crate::models::{BlobModel, BlobRef, ContainerModel};
use crate::storage::{ExtentStore, MetadataStore};

/// Total size allowed for user metadata names and values.
pub const MAX_METADATA_SIZE: usize = 8 * 1024;

/// Maximum blob name length.
pub const MAX_BLOB_NAME_LENGTH: usize = 1024;

/// Per-request values shared by everything an operation evaluates.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub request_id: String,
    /// Captured once; all lease and condition checks use this instant.
    pub now: DateTime<Utc>,
}

impl OperationContext {
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            now,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Lease id and preconditions supplied with a request.
#[derive(Debug, Clone, Default)]
pub struct AccessConditions {
    pub lease_id: Option<String>,
    pub conditions: ConditionalHeaders,
}

impl AccessConditions {
    pub fn lease(lease_id: impl Into<String>) -> Self {
        Self {
            lease_id: Some(lease_id.into()),
            ..Default::default()
        }
    }

    pub fn when(conditions: ConditionalHeaders) -> Self {
        Self {
            lease_id: None,
            conditions,
        }
    }

    pub fn lease_id(&self) -> Option<&str> {
        self.lease_id.as_deref()
    }
}

/// Coordinates the metadata store, the content store and entity locks.
pub struct BlobEngine {
    metadata: Arc<dyn MetadataStore>,
    extents: Arc<dyn ExtentStore>,
    locks: LockManager,
    /// Skips the block id length consistency check.
    loose: bool,
}

impl BlobEngine {
    pub fn new(metadata: Arc<dyn MetadataStore>, extents: Arc<dyn ExtentStore>) -> Self {
        Self {
            metadata,
            extents,
            locks: LockManager::new(),
            loose: false,
        }
    }

    pub fn with_loose(mut self, loose: bool) -> Self {
        self.loose = loose;
        self
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    pub fn extents(&self) -> &Arc<dyn ExtentStore> {
        &self.extents
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    async fn load_container(&self, account: &str, name: &str) -> StorageResult<ContainerModel> {
        self.metadata
            .get_container(account, name)
            .await?
            .ok_or_else(|| StorageError::new(ErrorCode::ContainerNotFound))
    }

    async fn ensure_container(&self, account: &str, name: &str) -> StorageResult<()> {
        self.load_container(account, name).await.map(|_| ())
    }

    /// Looks up a blob or snapshot, reporting a missing container first.
    async fn find_blob(&self, blob: &BlobRef, snapshot: &str) -> StorageResult<Option<BlobModel>> {
        self.ensure_container(&blob.account, &blob.container).await?;
        self.metadata.get_blob(blob, snapshot).await
    }

    async fn load_blob(&self, blob: &BlobRef, snapshot: &str) -> StorageResult<BlobModel> {
        self.find_blob(blob, snapshot)
            .await?
            .ok_or_else(|| StorageError::new(ErrorCode::BlobNotFound))
    }

    /// Stores a replacement for a base blob, discarding its staged blocks.
    async fn replace_blob(&self, blob: BlobModel) -> StorageResult<()> {
        let staged: Vec<String> = self
            .metadata
            .get_uncommitted_blocks(&blob.blob_ref())
            .await?
            .into_iter()
            .map(|b| b.block_id)
            .collect();
        self.metadata.commit_block_list(blob, &staged).await
    }
}

pub(crate) fn blob_target(blob: &BlobModel) -> ConditionTarget<'_> {
    ConditionTarget {
        etag: &blob.properties.etag,
        last_modified: blob.properties.last_modified,
        tags: Some(&blob.tags),
    }
}

pub(crate) fn container_target(container: &ContainerModel) -> ConditionTarget<'_> {
    ConditionTarget {
        etag: &container.properties.etag,
        last_modified: container.properties.last_modified,
        tags: None,
    }
}

/// Validates user metadata: names must be identifiers, and names plus
/// values must fit in [`MAX_METADATA_SIZE`].
pub fn validate_metadata(metadata: &HashMap<String, String>) -> StorageResult<()> {
    let mut total = 0;
    for (name, value) in metadata {
        let mut chars = name.chars();
        let valid = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(StorageError::with_message(
                ErrorCode::InvalidMetadata,
                format!("The metadata name '{}' is not a valid identifier.", name),
            ));
        }
        total += name.len() + value.len();
    }
    if total > MAX_METADATA_SIZE {
        return Err(StorageError::new(ErrorCode::MetadataTooLarge));
    }
    Ok(())
}

pub fn validate_blob_name(name: &str) -> StorageResult<()> {
    if name.is_empty() || name.chars().count() > MAX_BLOB_NAME_LENGTH {
        return Err(StorageError::with_message(
            ErrorCode::InvalidResourceName,
            format!(
                "The blob name must be between 1 and {} characters long.",
                MAX_BLOB_NAME_LENGTH
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_metadata() {
        let ok: HashMap<String, String> = [("Owner_1".to_string(), "x".to_string())].into();
        validate_metadata(&ok).unwrap();

        let bad: HashMap<String, String> = [("1owner".to_string(), "x".to_string())].into();
        assert_eq!(
            validate_metadata(&bad).unwrap_err().code,
            ErrorCode::InvalidMetadata
        );

        let big: HashMap<String, String> = [("k".to_string(), "v".repeat(MAX_METADATA_SIZE))].into();
        assert_eq!(
            validate_metadata(&big).unwrap_err().code,
            ErrorCode::MetadataTooLarge
        );
    }

    #[test]
    fn test_validate_blob_name() {
        validate_blob_name("dir/file.txt").unwrap();
        assert!(validate_blob_name("").is_err());
        assert!(validate_blob_name(&"a".repeat(MAX_BLOB_NAME_LENGTH + 1)).is_err());
    }
}
