//! Append blob handlers.

use axum::{
    body::Body,
    http::{Response, StatusCode},
};
use bytes::Bytes;

use crate::context::RequestContext;
use crate::engine::{AppendBlockOptions, BlobEngine};
use crate::error::{ErrorCode, StorageError, StorageResult};

use super::blob::{create_options, write_headers};
use super::{build_response, set_header};

fn condition_header(ctx: &RequestContext, name: &str) -> StorageResult<Option<u64>> {
    ctx.header(name)
        .map(|v| {
            v.trim().parse().map_err(|_| {
                StorageError::with_message(
                    ErrorCode::InvalidHeaderValue,
                    format!("The value '{}' of header '{}' is invalid.", v, name),
                )
            })
        })
        .transpose()
}

/// PUT /{container}/{blob} with `x-ms-blob-type: AppendBlob` - Create append blob.
pub async fn create_append_blob(
    ctx: &RequestContext,
    engine: &BlobEngine,
) -> StorageResult<Response<Body>> {
    let blob = engine
        .create_append_blob(&ctx.operation, &ctx.writable_blob_ref()?, create_options(ctx)?)
        .await?;

    Ok(build_response(
        StatusCode::CREATED,
        write_headers(ctx, &blob),
        Body::empty(),
    ))
}

/// PUT /{container}/{blob}?comp=appendblock - Append block.
pub async fn append_block(
    ctx: &RequestContext,
    engine: &BlobEngine,
    body: Bytes,
) -> StorageResult<Response<Body>> {
    let options = AppendBlockOptions {
        content_md5: ctx.content_md5().map(String::from),
        append_position: condition_header(ctx, "x-ms-blob-condition-appendpos")?,
        max_size: condition_header(ctx, "x-ms-blob-condition-maxsize")?,
        access: ctx.access_conditions()?,
    };

    let outcome = engine
        .append_block(&ctx.operation, &ctx.writable_blob_ref()?, body, &options)
        .await?;

    let mut headers = write_headers(ctx, &outcome.blob);
    set_header(
        &mut headers,
        "x-ms-blob-append-offset",
        &outcome.append_offset.to_string(),
    );
    if let Some(count) = outcome.blob.properties.committed_block_count {
        set_header(
            &mut headers,
            "x-ms-blob-committed-block-count",
            &count.to_string(),
        );
    }
    Ok(build_response(StatusCode::CREATED, headers, Body::empty()))
}
