//! Block blob handlers.

use axum::{
    body::Body,
    http::{Response, StatusCode},
};
use bytes::Bytes;

use crate::blocks::content_md5;
use crate::context::RequestContext;
use crate::engine::BlobEngine;
use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::models::BlockListType;
use crate::xml::{deserialize::parse_block_list, serialize::serialize_block_list};

use super::blob::{create_options, write_headers};
use super::{add_etag_headers, build_response, common_headers, set_header, xml_response};

/// PUT /{container}/{blob} with `x-ms-blob-type: BlockBlob` - Upload block blob.
pub async fn upload_block_blob(
    ctx: &RequestContext,
    engine: &BlobEngine,
    body: Bytes,
) -> StorageResult<Response<Body>> {
    let options = create_options(ctx)?;
    let blob = engine
        .put_blob(
            &ctx.operation,
            &ctx.writable_blob_ref()?,
            body,
            ctx.content_md5(),
            options,
        )
        .await?;

    let mut headers = write_headers(ctx, &blob);
    if let Some(ref md5) = blob.properties.http_headers.content_md5 {
        set_header(&mut headers, "content-md5", md5);
    }
    Ok(build_response(StatusCode::CREATED, headers, Body::empty()))
}

/// PUT /{container}/{blob}?comp=block - Stage block.
pub async fn stage_block(
    ctx: &RequestContext,
    engine: &BlobEngine,
    body: Bytes,
) -> StorageResult<Response<Body>> {
    let block_id = ctx.query_param("blockid").ok_or_else(|| {
        StorageError::with_message(
            ErrorCode::MissingRequiredQueryParameter,
            "The query parameter 'blockid' is required.",
        )
    })?;
    let md5 = content_md5(&body);

    engine
        .stage_block(
            &ctx.operation,
            &ctx.writable_blob_ref()?,
            block_id,
            body,
            ctx.content_md5(),
            ctx.lease_id(),
        )
        .await?;

    let mut headers = common_headers(ctx);
    set_header(&mut headers, "content-md5", &md5);
    set_header(&mut headers, "x-ms-request-server-encrypted", "true");
    Ok(build_response(StatusCode::CREATED, headers, Body::empty()))
}

/// PUT /{container}/{blob}?comp=blocklist - Commit block list.
pub async fn commit_block_list(
    ctx: &RequestContext,
    engine: &BlobEngine,
    body: Bytes,
) -> StorageResult<Response<Body>> {
    let xml = std::str::from_utf8(&body)
        .map_err(|_| StorageError::new(ErrorCode::InvalidXmlDocument))?;
    let entries = parse_block_list(xml)?;

    let blob = engine
        .commit_block_list(
            &ctx.operation,
            &ctx.writable_blob_ref()?,
            &entries,
            create_options(ctx)?,
        )
        .await?;

    Ok(build_response(
        StatusCode::CREATED,
        write_headers(ctx, &blob),
        Body::empty(),
    ))
}

/// GET /{container}/{blob}?comp=blocklist - Get block list.
pub async fn get_block_list(
    ctx: &RequestContext,
    engine: &BlobEngine,
) -> StorageResult<Response<Body>> {
    let list_type = match ctx.query_param("blocklisttype") {
        None => BlockListType::Committed,
        Some(value) => BlockListType::from_str(value).ok_or_else(|| {
            StorageError::with_message(
                ErrorCode::InvalidQueryParameterValue,
                format!("The blocklisttype value '{}' is invalid.", value),
            )
        })?,
    };

    let listing = engine
        .get_block_list(
            &ctx.operation,
            &ctx.blob_ref()?,
            ctx.snapshot(),
            list_type,
            &ctx.access_conditions()?,
        )
        .await?;

    let mut headers = common_headers(ctx);
    if let Some(ref blob) = listing.blob {
        add_etag_headers(
            &mut headers,
            &blob.properties.etag,
            &blob.properties.last_modified,
        );
        set_header(
            &mut headers,
            "x-ms-blob-content-length",
            &blob.properties.content_length.to_string(),
        );
    }

    Ok(xml_response(
        StatusCode::OK,
        headers,
        serialize_block_list(&listing.list),
    ))
}
