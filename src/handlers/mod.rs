//! Request handlers: translate REST requests into engine calls and engine
//! results into wire responses.

mod append_blob;
mod blob;
mod block_blob;
mod container;
mod service;

pub use append_blob::*;
pub use blob::*;
pub use block_blob::*;
pub use container::*;
pub use service::*;

use axum::body::Body;
use axum::http::{header::HeaderName, HeaderMap, HeaderValue, Response, StatusCode};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::config::DEFAULT_API_VERSION;
use crate::context::{format_http_date, RequestContext};
use crate::lease::{Lease, LeaseAction, LeaseOutcome};

/// Inserts a header, skipping values that are not valid header text.
pub fn set_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

/// Creates common response headers.
pub fn common_headers(ctx: &RequestContext) -> HeaderMap {
    let mut headers = HeaderMap::new();
    set_header(&mut headers, "x-ms-request-id", ctx.request_id());
    headers.insert("x-ms-version", HeaderValue::from_static(DEFAULT_API_VERSION));
    set_header(&mut headers, "date", &format_http_date(&ctx.operation.now));
    headers.insert("server", HeaderValue::from_static("Azurite-Blob/3.31.0"));
    if let Some(client_id) = ctx.header("x-ms-client-request-id") {
        set_header(&mut headers, "x-ms-client-request-id", client_id);
    }
    headers
}

/// Adds ETag and Last-Modified headers.
pub fn add_etag_headers(headers: &mut HeaderMap, etag: &str, last_modified: &DateTime<Utc>) {
    set_header(headers, "etag", etag);
    set_header(headers, "last-modified", &format_http_date(last_modified));
}

/// Adds the `x-ms-lease-*` state headers.
pub fn add_lease_headers(headers: &mut HeaderMap, lease: &Lease, now: DateTime<Utc>) {
    headers.insert(
        "x-ms-lease-status",
        HeaderValue::from_static(lease.status(now).as_str()),
    );
    headers.insert(
        "x-ms-lease-state",
        HeaderValue::from_static(lease.state(now).as_str()),
    );
    if let Some(duration) = lease.duration(now) {
        headers.insert("x-ms-lease-duration", HeaderValue::from_static(duration.as_str()));
    }
}

/// Adds the `x-ms-lease-id` and `x-ms-lease-time` headers of a lease operation.
pub fn add_lease_outcome_headers(headers: &mut HeaderMap, outcome: &LeaseOutcome) {
    if let Some(ref lease_id) = outcome.lease_id {
        set_header(headers, "x-ms-lease-id", lease_id);
    }
    if let Some(lease_time) = outcome.lease_time {
        set_header(headers, "x-ms-lease-time", &lease_time.to_string());
    }
}

/// Success status of a lease operation.
pub fn lease_status_code(action: &LeaseAction) -> StatusCode {
    match action {
        LeaseAction::Acquire { .. } => StatusCode::CREATED,
        LeaseAction::Break { .. } => StatusCode::ACCEPTED,
        _ => StatusCode::OK,
    }
}

/// Adds `x-ms-meta-*` headers.
pub fn add_metadata_headers(headers: &mut HeaderMap, metadata: &HashMap<String, String>) {
    for (key, value) in metadata {
        let name = HeaderName::from_bytes(format!("x-ms-meta-{}", key).as_bytes());
        if let (Ok(name), Ok(value)) = (name, HeaderValue::from_str(value)) {
            headers.insert(name, value);
        }
    }
}

/// Builds a response with the given status, headers, and body.
pub fn build_response(status: StatusCode, headers: HeaderMap, body: Body) -> Response<Body> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Builds an XML response.
pub fn xml_response(status: StatusCode, mut headers: HeaderMap, xml: String) -> Response<Body> {
    headers.insert(
        "content-type",
        HeaderValue::from_static("application/xml"),
    );
    set_header(&mut headers, "content-length", &xml.len().to_string());
    build_response(status, headers, Body::from(xml))
}

/// Base URL echoed as `ServiceEndpoint` in listings.
pub fn service_endpoint(ctx: &RequestContext) -> String {
    let host = ctx.header("host").unwrap_or("127.0.0.1");
    format!("http://{}/{}/", host, ctx.account)
}
