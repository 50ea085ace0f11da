//! Service-level handlers.

use axum::{
    body::Body,
    http::{Response, StatusCode},
};

use crate::context::RequestContext;
use crate::engine::{BlobEngine, ListContainersOptions};
use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::xml::serialize::{serialize_container_list, serialize_filter_blobs, ListingEcho};

use super::{common_headers, service_endpoint, xml_response};

/// GET /?comp=list - List containers.
pub async fn list_containers(
    ctx: &RequestContext,
    engine: &BlobEngine,
) -> StorageResult<Response<Body>> {
    let options = ListContainersOptions {
        prefix: ctx.query_param("prefix").map(String::from),
        marker: ctx.query_param("marker").map(String::from),
        max_results: ctx.max_results()?,
    };
    let include_metadata = ctx
        .query_param("include")
        .map(|v| v.split(',').any(|i| i.trim() == "metadata"))
        .unwrap_or(false);

    let page = engine
        .list_containers(&ctx.operation, &ctx.account, &options)
        .await?;

    let endpoint = service_endpoint(ctx);
    let echo = ListingEcho {
        service_endpoint: &endpoint,
        prefix: options.prefix.as_deref(),
        marker: options.marker.as_deref(),
        delimiter: None,
        max_results: options.max_results,
    };
    let xml = serialize_container_list(&page, &echo, include_metadata, ctx.operation.now);

    Ok(xml_response(StatusCode::OK, common_headers(ctx), xml))
}

/// GET /?comp=blobs - Find blobs by tags across the account.
pub async fn filter_blobs_service(
    ctx: &RequestContext,
    engine: &BlobEngine,
) -> StorageResult<Response<Body>> {
    filter_blobs(ctx, engine, None).await
}

/// Runs a `where` tag query, optionally scoped to one container.
pub async fn filter_blobs(
    ctx: &RequestContext,
    engine: &BlobEngine,
    container: Option<&str>,
) -> StorageResult<Response<Body>> {
    let expression = ctx.query_param("where").ok_or_else(|| {
        StorageError::with_message(
            ErrorCode::MissingRequiredQueryParameter,
            "The query parameter 'where' is required.",
        )
    })?;

    let page = engine
        .find_blobs_by_tags(
            &ctx.operation,
            &ctx.account,
            container,
            expression,
            ctx.query_param("marker"),
            ctx.max_results()?,
        )
        .await?;

    let xml = serialize_filter_blobs(&page, &service_endpoint(ctx), expression);
    Ok(xml_response(StatusCode::OK, common_headers(ctx), xml))
}
