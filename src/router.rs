//! Request routing for the blob service.

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, Method, Response},
    response::IntoResponse,
    routing::any,
    Router,
};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::config::Config;
use crate::context::RequestContext;
use crate::engine::BlobEngine;
use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::handlers;

/// Application state shared between handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: Arc<BlobEngine>,
}

/// Creates the main router for the blob service.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", any(service_handler))
        .route("/:account", any(service_handler))
        .route("/:account/:container", any(container_handler))
        .route("/:account/:container/*blob", any(blob_handler))
        // Upload sizes are checked per operation by the engine.
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

/// Converts a routed result into a response, tagging errors with the request id.
fn finish(ctx: &RequestContext, result: StorageResult<Response<Body>>) -> Response<Body> {
    match result {
        Ok(response) => response,
        Err(e) => {
            if e.is_store_failure() {
                warn!(request_id = %ctx.request_id(), "Store failure: {}", e.message);
            }
            e.with_request_id(ctx.request_id()).into_response()
        }
    }
}

/// Handler for service-level operations.
async fn service_handler(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    params: Option<Path<HashMap<String, String>>>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response<Body> {
    let params = params.map(|Path(p)| p).unwrap_or_default();
    let ctx = RequestContext::new(method, headers, params, query);
    let result = route_service_request(&ctx, &state.engine, body).await;
    finish(&ctx, result)
}

/// Handler for container-level operations.
async fn container_handler(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    Path(params): Path<HashMap<String, String>>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response<Body> {
    let ctx = RequestContext::new(method, headers, params, query);
    let result = route_container_request(&ctx, &state.engine, body).await;
    finish(&ctx, result)
}

/// Handler for blob-level operations.
async fn blob_handler(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    Path(params): Path<HashMap<String, String>>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response<Body> {
    let ctx = RequestContext::new(method, headers, params, query);
    let result = route_blob_request(&ctx, &state.engine, body).await;
    finish(&ctx, result)
}

/// Routes service-level requests.
async fn route_service_request(
    ctx: &RequestContext,
    engine: &BlobEngine,
    _body: Bytes,
) -> StorageResult<Response<Body>> {
    match (ctx.method.as_str(), ctx.restype(), ctx.comp()) {
        ("GET", None, Some("list")) => handlers::list_containers(ctx, engine).await,
        ("GET", None, Some("blobs")) => handlers::filter_blobs_service(ctx, engine).await,
        _ => Err(StorageError::new(ErrorCode::UnsupportedHttpVerb)),
    }
}

/// Routes container-level requests.
async fn route_container_request(
    ctx: &RequestContext,
    engine: &BlobEngine,
    body: Bytes,
) -> StorageResult<Response<Body>> {
    match (ctx.method.as_str(), ctx.restype(), ctx.comp()) {
        ("PUT", Some("container"), None) => handlers::create_container(ctx, engine).await,
        ("DELETE", Some("container"), None) => handlers::delete_container(ctx, engine).await,
        ("GET" | "HEAD", Some("container"), None) => {
            handlers::get_container_properties(ctx, engine).await
        }
        ("PUT", Some("container"), Some("metadata")) => {
            handlers::set_container_metadata(ctx, engine).await
        }
        ("GET" | "HEAD", Some("container"), Some("acl")) => {
            handlers::get_container_acl(ctx, engine).await
        }
        ("PUT", Some("container"), Some("acl")) => {
            handlers::set_container_acl(ctx, engine, body).await
        }
        ("GET", Some("container"), Some("list")) => handlers::list_blobs(ctx, engine).await,
        ("PUT", Some("container"), Some("lease")) => {
            handlers::container_lease(ctx, engine).await
        }
        ("GET", Some("container"), Some("blobs")) => {
            handlers::filter_blobs_container(ctx, engine).await
        }
        _ => Err(StorageError::new(ErrorCode::UnsupportedHttpVerb)),
    }
}

/// Routes blob-level requests.
async fn route_blob_request(
    ctx: &RequestContext,
    engine: &BlobEngine,
    body: Bytes,
) -> StorageResult<Response<Body>> {
    match (ctx.method.as_str(), ctx.comp()) {
        ("GET", None) => handlers::download_blob(ctx, engine).await,
        ("HEAD", None) => handlers::get_blob_properties(ctx, engine).await,
        ("DELETE", None) => handlers::delete_blob(ctx, engine).await,
        ("PUT", None) => handlers::put_blob(ctx, engine, body).await,
        ("PUT", Some("block")) => handlers::stage_block(ctx, engine, body).await,
        ("PUT", Some("blocklist")) => handlers::commit_block_list(ctx, engine, body).await,
        ("GET", Some("blocklist")) => handlers::get_block_list(ctx, engine).await,
        ("PUT", Some("appendblock")) => handlers::append_block(ctx, engine, body).await,
        ("PUT", Some("properties")) => handlers::set_blob_properties(ctx, engine).await,
        ("PUT", Some("metadata")) => handlers::set_blob_metadata(ctx, engine).await,
        ("PUT", Some("lease")) => handlers::blob_lease(ctx, engine).await,
        ("PUT", Some("snapshot")) => handlers::create_snapshot(ctx, engine).await,
        ("GET", Some("tags")) => handlers::get_blob_tags(ctx, engine).await,
        ("PUT", Some("tags")) => handlers::set_blob_tags(ctx, engine, body).await,
        _ => Err(StorageError::new(ErrorCode::UnsupportedHttpVerb)),
    }
}
