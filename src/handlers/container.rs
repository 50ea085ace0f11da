//! Container-level handlers.

use axum::{
    body::Body,
    http::{Response, StatusCode},
};
use bytes::Bytes;

use crate::context::RequestContext;
use crate::engine::{BlobEngine, ListBlobsOptions};
use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::models::PublicAccessLevel;
use crate::xml::{
    deserialize::parse_signed_identifiers,
    serialize::{
        serialize_blob_list, serialize_signed_identifiers, BlobListIncludes, ListingEcho,
    },
};

use super::{
    add_etag_headers, add_lease_headers, add_lease_outcome_headers, add_metadata_headers,
    build_response, common_headers, filter_blobs, lease_status_code, service_endpoint, set_header,
    xml_response,
};

fn public_access(ctx: &RequestContext) -> StorageResult<PublicAccessLevel> {
    match ctx.header("x-ms-blob-public-access") {
        None => Ok(PublicAccessLevel::None),
        Some(value) => PublicAccessLevel::from_str(value).ok_or_else(|| {
            StorageError::with_message(
                ErrorCode::InvalidHeaderValue,
                format!("The public access level '{}' is invalid.", value),
            )
        }),
    }
}

/// PUT /{container}?restype=container - Create container.
pub async fn create_container(
    ctx: &RequestContext,
    engine: &BlobEngine,
) -> StorageResult<Response<Body>> {
    let container = engine
        .create_container(
            &ctx.operation,
            &ctx.account,
            ctx.container_name()?,
            ctx.metadata(),
            public_access(ctx)?,
        )
        .await?;

    let mut headers = common_headers(ctx);
    add_etag_headers(
        &mut headers,
        &container.properties.etag,
        &container.properties.last_modified,
    );
    Ok(build_response(StatusCode::CREATED, headers, Body::empty()))
}

/// DELETE /{container}?restype=container - Delete container.
pub async fn delete_container(
    ctx: &RequestContext,
    engine: &BlobEngine,
) -> StorageResult<Response<Body>> {
    engine
        .delete_container(
            &ctx.operation,
            &ctx.account,
            ctx.container_name()?,
            &ctx.access_conditions()?,
        )
        .await?;

    Ok(build_response(
        StatusCode::ACCEPTED,
        common_headers(ctx),
        Body::empty(),
    ))
}

/// GET/HEAD /{container}?restype=container - Get container properties.
pub async fn get_container_properties(
    ctx: &RequestContext,
    engine: &BlobEngine,
) -> StorageResult<Response<Body>> {
    let container = engine
        .get_container_properties(
            &ctx.operation,
            &ctx.account,
            ctx.container_name()?,
            &ctx.access_conditions()?,
        )
        .await?;

    let mut headers = common_headers(ctx);
    add_etag_headers(
        &mut headers,
        &container.properties.etag,
        &container.properties.last_modified,
    );
    add_lease_headers(&mut headers, &container.lease, ctx.operation.now);
    add_metadata_headers(&mut headers, &container.metadata);
    if container.properties.public_access != PublicAccessLevel::None {
        set_header(
            &mut headers,
            "x-ms-blob-public-access",
            container.properties.public_access.as_str(),
        );
    }
    set_header(&mut headers, "x-ms-has-immutability-policy", "false");
    set_header(&mut headers, "x-ms-has-legal-hold", "false");

    Ok(build_response(StatusCode::OK, headers, Body::empty()))
}

/// PUT /{container}?restype=container&comp=metadata - Set container metadata.
pub async fn set_container_metadata(
    ctx: &RequestContext,
    engine: &BlobEngine,
) -> StorageResult<Response<Body>> {
    let container = engine
        .set_container_metadata(
            &ctx.operation,
            &ctx.account,
            ctx.container_name()?,
            ctx.metadata(),
            &ctx.access_conditions()?,
        )
        .await?;

    let mut headers = common_headers(ctx);
    add_etag_headers(
        &mut headers,
        &container.properties.etag,
        &container.properties.last_modified,
    );
    Ok(build_response(StatusCode::OK, headers, Body::empty()))
}

/// GET /{container}?restype=container&comp=acl - Get container ACL.
pub async fn get_container_acl(
    ctx: &RequestContext,
    engine: &BlobEngine,
) -> StorageResult<Response<Body>> {
    let container = engine
        .get_container_acl(
            &ctx.operation,
            &ctx.account,
            ctx.container_name()?,
            &ctx.access_conditions()?,
        )
        .await?;

    let mut headers = common_headers(ctx);
    add_etag_headers(
        &mut headers,
        &container.properties.etag,
        &container.properties.last_modified,
    );
    if container.properties.public_access != PublicAccessLevel::None {
        set_header(
            &mut headers,
            "x-ms-blob-public-access",
            container.properties.public_access.as_str(),
        );
    }

    let xml = serialize_signed_identifiers(&container.signed_identifiers);
    Ok(xml_response(StatusCode::OK, headers, xml))
}

/// PUT /{container}?restype=container&comp=acl - Set container ACL.
pub async fn set_container_acl(
    ctx: &RequestContext,
    engine: &BlobEngine,
    body: Bytes,
) -> StorageResult<Response<Body>> {
    let body = std::str::from_utf8(&body)
        .map_err(|_| StorageError::new(ErrorCode::InvalidXmlDocument))?;
    let identifiers = parse_signed_identifiers(body)?;

    let container = engine
        .set_container_acl(
            &ctx.operation,
            &ctx.account,
            ctx.container_name()?,
            public_access(ctx)?,
            identifiers,
            &ctx.access_conditions()?,
        )
        .await?;

    let mut headers = common_headers(ctx);
    add_etag_headers(
        &mut headers,
        &container.properties.etag,
        &container.properties.last_modified,
    );
    Ok(build_response(StatusCode::OK, headers, Body::empty()))
}

/// PUT /{container}?restype=container&comp=lease - Container lease.
pub async fn container_lease(
    ctx: &RequestContext,
    engine: &BlobEngine,
) -> StorageResult<Response<Body>> {
    let action = ctx.lease_action()?;
    let response = engine
        .container_lease(
            &ctx.operation,
            &ctx.account,
            ctx.container_name()?,
            &action,
            &ctx.conditions()?,
        )
        .await?;

    let mut headers = common_headers(ctx);
    add_etag_headers(&mut headers, &response.etag, &response.last_modified);
    add_lease_outcome_headers(&mut headers, &response.outcome);
    Ok(build_response(
        lease_status_code(&action),
        headers,
        Body::empty(),
    ))
}

/// GET /{container}?restype=container&comp=list - List blobs.
pub async fn list_blobs(
    ctx: &RequestContext,
    engine: &BlobEngine,
) -> StorageResult<Response<Body>> {
    let container = ctx.container_name()?;
    let includes: Vec<&str> = ctx
        .query_param("include")
        .map(|v| v.split(',').map(str::trim).collect())
        .unwrap_or_default();

    let options = ListBlobsOptions {
        prefix: ctx.query_param("prefix").map(String::from),
        delimiter: ctx
            .query_param("delimiter")
            .filter(|d| !d.is_empty())
            .map(String::from),
        marker: ctx.query_param("marker").map(String::from),
        max_results: ctx.max_results()?,
        include_snapshots: includes.contains(&"snapshots"),
    };

    let page = engine
        .list_blobs(&ctx.operation, &ctx.account, container, &options)
        .await?;

    let endpoint = service_endpoint(ctx);
    let echo = ListingEcho {
        service_endpoint: &endpoint,
        prefix: options.prefix.as_deref(),
        marker: options.marker.as_deref(),
        delimiter: options.delimiter.as_deref(),
        max_results: options.max_results,
    };
    let xml = serialize_blob_list(
        &page,
        &echo,
        container,
        BlobListIncludes {
            metadata: includes.contains(&"metadata"),
            tags: includes.contains(&"tags"),
        },
        ctx.operation.now,
    );

    Ok(xml_response(StatusCode::OK, common_headers(ctx), xml))
}

/// GET /{container}?restype=container&comp=blobs - Find blobs by tags.
pub async fn filter_blobs_container(
    ctx: &RequestContext,
    engine: &BlobEngine,
) -> StorageResult<Response<Body>> {
    filter_blobs(ctx, engine, Some(ctx.container_name()?)).await
}
