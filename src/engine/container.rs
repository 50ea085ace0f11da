//! Container operations.

use std::collections::HashMap;
use tracing::debug;

use super::{container_target, validate_metadata, AccessConditions, BlobEngine, OperationContext};
use crate::conditions::{evaluate_read, evaluate_write, ResourceKind};
use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::lease::LeaseTarget;
use crate::listing::{effective_max_results, Page, PageBuilder};
use crate::locks::EntityKey;
use crate::models::{ContainerModel, PublicAccessLevel, SignedIdentifier};

/// Maximum number of stored access policies per container.
pub const MAX_SIGNED_IDENTIFIERS: usize = 5;

/// Containers fetched from the store per round while filling a page.
const LIST_BATCH_SIZE: usize = 1000;

/// Checks container naming rules: 3 to 63 characters of lowercase letters,
/// digits and single hyphens, starting and ending with a letter or digit.
/// The reserved `$root`, `$logs` and `$web` names are also accepted.
pub fn validate_container_name(name: &str) -> StorageResult<()> {
    if matches!(name, "$root" | "$logs" | "$web") {
        return Ok(());
    }
    let invalid = || {
        StorageError::with_message(
            ErrorCode::InvalidResourceName,
            format!("The container name '{}' is invalid.", name),
        )
    };
    if !(3..=63).contains(&name.len()) {
        return Err(invalid());
    }
    let bytes = name.as_bytes();
    let edge_ok = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !edge_ok(bytes[0]) || !edge_ok(bytes[bytes.len() - 1]) {
        return Err(invalid());
    }
    if !bytes.iter().all(|&b| edge_ok(b) || b == b'-') || name.contains("--") {
        return Err(invalid());
    }
    Ok(())
}

/// Options for listing containers.
#[derive(Debug, Clone, Default)]
pub struct ListContainersOptions {
    pub prefix: Option<String>,
    pub marker: Option<String>,
    pub max_results: Option<usize>,
}

impl BlobEngine {
    pub async fn create_container(
        &self,
        ctx: &OperationContext,
        account: &str,
        name: &str,
        metadata: HashMap<String, String>,
        public_access: PublicAccessLevel,
    ) -> StorageResult<ContainerModel> {
        validate_container_name(name)?;
        validate_metadata(&metadata)?;

        let _guard = self.locks.lock(EntityKey::container(account, name)).await;
        if self.metadata.get_container(account, name).await?.is_some() {
            return Err(StorageError::new(ErrorCode::ContainerAlreadyExists));
        }

        let mut container = ContainerModel::new(account.to_string(), name.to_string(), ctx.now);
        container.metadata = metadata;
        container.properties.public_access = public_access;
        self.metadata.put_container(container.clone()).await?;

        debug!(request_id = %ctx.request_id, "Created container {}/{}", account, name);
        Ok(container)
    }

    pub async fn get_container_properties(
        &self,
        ctx: &OperationContext,
        account: &str,
        name: &str,
        access: &AccessConditions,
    ) -> StorageResult<ContainerModel> {
        let container = self.load_container(account, name).await?;
        container
            .lease
            .check_read_access(access.lease_id(), LeaseTarget::Container, ctx.now)?;
        evaluate_read(&access.conditions, Some(container_target(&container)))?;
        Ok(container)
    }

    pub async fn set_container_metadata(
        &self,
        ctx: &OperationContext,
        account: &str,
        name: &str,
        metadata: HashMap<String, String>,
        access: &AccessConditions,
    ) -> StorageResult<ContainerModel> {
        validate_metadata(&metadata)?;

        let _guard = self.locks.lock(EntityKey::container(account, name)).await;
        let mut container = self.load_container(account, name).await?;
        evaluate_write(
            &access.conditions,
            Some(container_target(&container)),
            ResourceKind::Container,
        )?;
        container
            .lease
            .check_read_access(access.lease_id(), LeaseTarget::Container, ctx.now)?;

        container.metadata = metadata;
        container.properties.update_etag(ctx.now);
        self.metadata.put_container(container.clone()).await?;
        Ok(container)
    }

    pub async fn get_container_acl(
        &self,
        ctx: &OperationContext,
        account: &str,
        name: &str,
        access: &AccessConditions,
    ) -> StorageResult<ContainerModel> {
        let container = self.load_container(account, name).await?;
        container
            .lease
            .check_read_access(access.lease_id(), LeaseTarget::Container, ctx.now)?;
        Ok(container)
    }

    pub async fn set_container_acl(
        &self,
        ctx: &OperationContext,
        account: &str,
        name: &str,
        public_access: PublicAccessLevel,
        identifiers: Vec<SignedIdentifier>,
        access: &AccessConditions,
    ) -> StorageResult<ContainerModel> {
        if identifiers.len() > MAX_SIGNED_IDENTIFIERS {
            return Err(StorageError::with_message(
                ErrorCode::InvalidXmlDocument,
                format!(
                    "A container may have at most {} signed identifiers.",
                    MAX_SIGNED_IDENTIFIERS
                ),
            ));
        }

        let _guard = self.locks.lock(EntityKey::container(account, name)).await;
        let mut container = self.load_container(account, name).await?;
        evaluate_write(
            &access.conditions,
            Some(container_target(&container)),
            ResourceKind::Container,
        )?;
        container
            .lease
            .check_read_access(access.lease_id(), LeaseTarget::Container, ctx.now)?;

        container.properties.public_access = public_access;
        container.signed_identifiers = identifiers;
        container.properties.update_etag(ctx.now);
        self.metadata.put_container(container.clone()).await?;
        Ok(container)
    }

    /// Deletes a container together with its blobs and staged blocks.
    pub async fn delete_container(
        &self,
        ctx: &OperationContext,
        account: &str,
        name: &str,
        access: &AccessConditions,
    ) -> StorageResult<()> {
        let _guard = self.locks.lock(EntityKey::container(account, name)).await;
        let container = self.load_container(account, name).await?;
        evaluate_write(
            &access.conditions,
            Some(container_target(&container)),
            ResourceKind::Container,
        )?;
        container
            .lease
            .check_write_access(access.lease_id(), LeaseTarget::Container, ctx.now)?;

        self.metadata.delete_container(account, name).await?;
        debug!(request_id = %ctx.request_id, "Deleted container {}/{}", account, name);
        Ok(())
    }

    pub async fn list_containers(
        &self,
        _ctx: &OperationContext,
        account: &str,
        options: &ListContainersOptions,
    ) -> StorageResult<Page<ContainerModel>> {
        let max_results = effective_max_results(options.max_results)?;
        let prefix = options.prefix.as_deref();
        let mut builder = PageBuilder::new(prefix, None, max_results);
        let mut after = options.marker.clone().filter(|m| !m.is_empty());

        loop {
            let batch = self
                .metadata
                .list_containers(account, prefix, after.as_deref(), LIST_BATCH_SIZE)
                .await?;
            let exhausted = batch.len() < LIST_BATCH_SIZE;
            for container in batch {
                let name = container.name.clone();
                if !builder.offer(&name, container) {
                    break;
                }
                after = Some(name);
            }
            if builder.is_closed() || exhausted {
                break;
            }
        }
        Ok(builder.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_container_name() {
        for ok in ["abc", "my-container-1", "$root", "$logs", "a1b"] {
            validate_container_name(ok).unwrap();
        }
        for bad in ["ab", "Upper", "-lead", "trail-", "double--hyphen", "under_score"] {
            assert_eq!(
                validate_container_name(bad).unwrap_err().code,
                ErrorCode::InvalidResourceName,
                "{}",
                bad
            );
        }
        assert!(validate_container_name(&"a".repeat(64)).is_err());
    }
}
