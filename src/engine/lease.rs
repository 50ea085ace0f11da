//! Lease operations on blobs and containers.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::{blob_target, container_target, BlobEngine, OperationContext};
use crate::conditions::{evaluate_write, ConditionalHeaders, ResourceKind};
use crate::error::StorageResult;
use crate::lease::{LeaseAction, LeaseOutcome};
use crate::locks::EntityKey;
use crate::models::{new_etag, BlobRef};

/// Outcome of a lease operation with the resource's new change token.
#[derive(Debug, Clone)]
pub struct LeaseResponse {
    pub outcome: LeaseOutcome,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

impl BlobEngine {
    pub async fn blob_lease(
        &self,
        ctx: &OperationContext,
        blob_ref: &BlobRef,
        action: &LeaseAction,
        conditions: &ConditionalHeaders,
    ) -> StorageResult<LeaseResponse> {
        let _guard = self.locks.lock(EntityKey::blob(blob_ref)).await;
        let mut blob = self.load_blob(blob_ref, "").await?;
        evaluate_write(conditions, Some(blob_target(&blob)), ResourceKind::Blob)?;

        let outcome = blob.lease.apply(action, ctx.now)?;
        blob.lease = outcome.lease.clone();
        blob.properties.etag = new_etag();
        self.metadata.put_blob(blob.clone()).await?;

        debug!(request_id = %ctx.request_id, "Lease {} on blob {}", action.name(), blob_ref);
        Ok(LeaseResponse {
            outcome,
            etag: blob.properties.etag,
            last_modified: blob.properties.last_modified,
        })
    }

    pub async fn container_lease(
        &self,
        ctx: &OperationContext,
        account: &str,
        name: &str,
        action: &LeaseAction,
        conditions: &ConditionalHeaders,
    ) -> StorageResult<LeaseResponse> {
        let _guard = self.locks.lock(EntityKey::container(account, name)).await;
        let mut container = self.load_container(account, name).await?;
        evaluate_write(
            conditions,
            Some(container_target(&container)),
            ResourceKind::Container,
        )?;

        let outcome = container.lease.apply(action, ctx.now)?;
        container.lease = outcome.lease.clone();
        container.properties.etag = new_etag();
        self.metadata.put_container(container.clone()).await?;

        debug!(
            request_id = %ctx.request_id,
            "Lease {} on container {}/{}", action.name(), account, name
        );
        Ok(LeaseResponse {
            outcome,
            etag: container.properties.etag,
            last_modified: container.properties.last_modified,
        })
    }
}
