//! Blob-level handlers shared by all blob types.

use axum::{
    body::Body,
    http::{HeaderMap, Response, StatusCode},
};
use bytes::Bytes;

use crate::context::{format_http_date, RequestContext};
use crate::engine::{BlobCreateOptions, BlobEngine, DeleteSnapshots};
use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::models::{BlobModel, BlobType};
use crate::xml::{deserialize::parse_tags, serialize::serialize_tags};

use super::{
    add_etag_headers, add_lease_headers, add_lease_outcome_headers, add_metadata_headers,
    build_response, common_headers, lease_status_code, set_header, xml_response,
};

/// Writes the headers describing a blob's properties.
fn add_blob_headers(headers: &mut HeaderMap, blob: &BlobModel, ctx: &RequestContext) {
    let props = &blob.properties;
    add_etag_headers(headers, &props.etag, &props.last_modified);
    set_header(headers, "x-ms-creation-time", &format_http_date(&props.created_on));
    set_header(headers, "x-ms-blob-type", props.blob_type.as_str());
    set_header(headers, "content-type", props.content_type());

    let http = &props.http_headers;
    if let Some(ref v) = http.content_encoding {
        set_header(headers, "content-encoding", v);
    }
    if let Some(ref v) = http.content_language {
        set_header(headers, "content-language", v);
    }
    if let Some(ref v) = http.content_disposition {
        set_header(headers, "content-disposition", v);
    }
    if let Some(ref v) = http.cache_control {
        set_header(headers, "cache-control", v);
    }

    if !blob.is_snapshot() {
        add_lease_headers(headers, &blob.lease, ctx.operation.now);
    }
    add_metadata_headers(headers, &blob.metadata);
    if let Some(count) = props.committed_block_count {
        set_header(
            headers,
            "x-ms-blob-committed-block-count",
            &count.to_string(),
        );
    }
    if !blob.tags.is_empty() {
        set_header(headers, "x-ms-tag-count", &blob.tags.len().to_string());
    }
    set_header(headers, "x-ms-server-encrypted", "true");
    set_header(headers, "accept-ranges", "bytes");
}

/// Headers returned by every successful blob write.
pub(super) fn write_headers(ctx: &RequestContext, blob: &BlobModel) -> HeaderMap {
    let mut headers = common_headers(ctx);
    add_etag_headers(
        &mut headers,
        &blob.properties.etag,
        &blob.properties.last_modified,
    );
    set_header(&mut headers, "x-ms-request-server-encrypted", "true");
    headers
}

/// Collects the properties supplied when a blob is created.
pub(super) fn create_options(ctx: &RequestContext) -> StorageResult<BlobCreateOptions> {
    Ok(BlobCreateOptions {
        http_headers: ctx.upload_http_headers(),
        metadata: ctx.metadata(),
        tags: ctx.tags(),
        access: ctx.access_conditions()?,
    })
}

/// PUT /{container}/{blob} - Put blob, dispatched on `x-ms-blob-type`.
pub async fn put_blob(
    ctx: &RequestContext,
    engine: &BlobEngine,
    body: Bytes,
) -> StorageResult<Response<Body>> {
    let blob_type = ctx.required_header("x-ms-blob-type")?;
    match BlobType::from_str(blob_type) {
        Some(BlobType::BlockBlob) => super::upload_block_blob(ctx, engine, body).await,
        Some(BlobType::AppendBlob) => super::create_append_blob(ctx, engine).await,
        _ => Err(StorageError::with_message(
            ErrorCode::InvalidHeaderValue,
            format!("The blob type '{}' is not supported.", blob_type),
        )),
    }
}

/// GET /{container}/{blob} - Download blob.
pub async fn download_blob(
    ctx: &RequestContext,
    engine: &BlobEngine,
) -> StorageResult<Response<Body>> {
    let download = engine
        .download_blob(
            &ctx.operation,
            &ctx.blob_ref()?,
            ctx.snapshot(),
            ctx.range()?,
            &ctx.access_conditions()?,
        )
        .await?;

    let mut headers = common_headers(ctx);
    add_blob_headers(&mut headers, &download.blob, ctx);
    set_header(
        &mut headers,
        "content-length",
        &download.content_length().to_string(),
    );

    let status = match download.range {
        Some((start, end)) => {
            set_header(
                &mut headers,
                "content-range",
                &format!(
                    "bytes {}-{}/{}",
                    start, end, download.blob.properties.content_length
                ),
            );
            StatusCode::PARTIAL_CONTENT
        }
        None => {
            if let Some(ref md5) = download.blob.properties.http_headers.content_md5 {
                set_header(&mut headers, "content-md5", md5);
            }
            StatusCode::OK
        }
    };

    Ok(build_response(status, headers, Body::from_stream(download.body)))
}

/// HEAD /{container}/{blob} - Get blob properties.
pub async fn get_blob_properties(
    ctx: &RequestContext,
    engine: &BlobEngine,
) -> StorageResult<Response<Body>> {
    let blob = engine
        .get_blob_properties(
            &ctx.operation,
            &ctx.blob_ref()?,
            ctx.snapshot(),
            &ctx.access_conditions()?,
        )
        .await?;

    let mut headers = common_headers(ctx);
    add_blob_headers(&mut headers, &blob, ctx);
    set_header(
        &mut headers,
        "content-length",
        &blob.properties.content_length.to_string(),
    );
    if let Some(ref md5) = blob.properties.http_headers.content_md5 {
        set_header(&mut headers, "content-md5", md5);
    }

    Ok(build_response(StatusCode::OK, headers, Body::empty()))
}

/// DELETE /{container}/{blob} - Delete blob.
pub async fn delete_blob(
    ctx: &RequestContext,
    engine: &BlobEngine,
) -> StorageResult<Response<Body>> {
    let delete_snapshots = ctx
        .header("x-ms-delete-snapshots")
        .map(|v| {
            DeleteSnapshots::from_str(v).ok_or_else(|| {
                StorageError::with_message(
                    ErrorCode::InvalidHeaderValue,
                    format!("The value '{}' of header 'x-ms-delete-snapshots' is invalid.", v),
                )
            })
        })
        .transpose()?;

    engine
        .delete_blob(
            &ctx.operation,
            &ctx.blob_ref()?,
            ctx.snapshot(),
            delete_snapshots,
            &ctx.access_conditions()?,
        )
        .await?;

    let mut headers = common_headers(ctx);
    set_header(&mut headers, "x-ms-delete-type-permanent", "true");
    Ok(build_response(StatusCode::ACCEPTED, headers, Body::empty()))
}

/// PUT /{container}/{blob}?comp=properties - Set blob HTTP headers.
pub async fn set_blob_properties(
    ctx: &RequestContext,
    engine: &BlobEngine,
) -> StorageResult<Response<Body>> {
    let blob = engine
        .set_blob_http_headers(
            &ctx.operation,
            &ctx.writable_blob_ref()?,
            ctx.http_headers(),
            &ctx.access_conditions()?,
        )
        .await?;

    Ok(build_response(
        StatusCode::OK,
        write_headers(ctx, &blob),
        Body::empty(),
    ))
}

/// PUT /{container}/{blob}?comp=metadata - Set blob metadata.
pub async fn set_blob_metadata(
    ctx: &RequestContext,
    engine: &BlobEngine,
) -> StorageResult<Response<Body>> {
    let blob = engine
        .set_blob_metadata(
            &ctx.operation,
            &ctx.writable_blob_ref()?,
            ctx.metadata(),
            &ctx.access_conditions()?,
        )
        .await?;

    Ok(build_response(
        StatusCode::OK,
        write_headers(ctx, &blob),
        Body::empty(),
    ))
}

/// PUT /{container}/{blob}?comp=lease - Blob lease.
pub async fn blob_lease(
    ctx: &RequestContext,
    engine: &BlobEngine,
) -> StorageResult<Response<Body>> {
    let action = ctx.lease_action()?;
    let response = engine
        .blob_lease(
            &ctx.operation,
            &ctx.writable_blob_ref()?,
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

/// PUT /{container}/{blob}?comp=snapshot - Create snapshot.
pub async fn create_snapshot(
    ctx: &RequestContext,
    engine: &BlobEngine,
) -> StorageResult<Response<Body>> {
    let snapshot = engine
        .create_snapshot(
            &ctx.operation,
            &ctx.writable_blob_ref()?,
            ctx.metadata(),
            &ctx.access_conditions()?,
        )
        .await?;

    let mut headers = common_headers(ctx);
    add_etag_headers(
        &mut headers,
        &snapshot.properties.etag,
        &snapshot.properties.last_modified,
    );
    set_header(&mut headers, "x-ms-snapshot", &snapshot.snapshot);
    Ok(build_response(StatusCode::CREATED, headers, Body::empty()))
}

/// GET /{container}/{blob}?comp=tags - Get blob tags.
pub async fn get_blob_tags(
    ctx: &RequestContext,
    engine: &BlobEngine,
) -> StorageResult<Response<Body>> {
    let tags = engine
        .get_blob_tags(
            &ctx.operation,
            &ctx.blob_ref()?,
            ctx.snapshot(),
            &ctx.access_conditions()?,
        )
        .await?;

    Ok(xml_response(
        StatusCode::OK,
        common_headers(ctx),
        serialize_tags(&tags),
    ))
}

/// PUT /{container}/{blob}?comp=tags - Set blob tags.
pub async fn set_blob_tags(
    ctx: &RequestContext,
    engine: &BlobEngine,
    body: Bytes,
) -> StorageResult<Response<Body>> {
    let xml = std::str::from_utf8(&body)
        .map_err(|_| StorageError::new(ErrorCode::InvalidXmlDocument))?;
    let tags = parse_tags(xml)?;

    engine
        .set_blob_tags(
            &ctx.operation,
            &ctx.writable_blob_ref()?,
            tags,
            &ctx.access_conditions()?,
        )
        .await?;

    Ok(build_response(
        StatusCode::NO_CONTENT,
        common_headers(ctx),
        Body::empty(),
    ))
}
