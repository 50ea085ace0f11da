//! Request context extraction and handling.

use axum::http::{header::HeaderMap, Method};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::blocks::ByteRange;
use crate::conditions::ConditionalHeaders;
use crate::config::DEFAULT_ACCOUNT;
use crate::engine::{AccessConditions, OperationContext};
use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::lease::LeaseAction;
use crate::models::{BlobHttpHeaders, BlobRef};

/// Extracted request context containing all relevant information.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Engine context: request id and the instant the request arrived.
    pub operation: OperationContext,
    /// HTTP method.
    pub method: Method,
    /// Account name extracted from path.
    pub account: String,
    /// Container name (if present).
    pub container: Option<String>,
    /// Blob name (if present).
    pub blob: Option<String>,
    /// Query parameters.
    pub query_params: HashMap<String, String>,
    /// Request headers.
    pub headers: HeaderMap,
}

impl RequestContext {
    /// Creates a new request context from request parts.
    pub fn new(
        method: Method,
        headers: HeaderMap,
        path_params: HashMap<String, String>,
        query_params: HashMap<String, String>,
    ) -> Self {
        let account = path_params
            .get("account")
            .cloned()
            .unwrap_or_else(|| DEFAULT_ACCOUNT.to_string());

        Self {
            operation: OperationContext::new(),
            method,
            account,
            container: path_params.get("container").cloned(),
            blob: path_params.get("blob").cloned(),
            query_params,
            headers,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.operation.request_id
    }

    /// Returns the value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query_params.get(name).map(|s| s.as_str())
    }

    /// Returns the value of a header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a header that must be present.
    pub fn required_header(&self, name: &str) -> StorageResult<&str> {
        self.header(name).ok_or_else(|| {
            StorageError::with_message(
                ErrorCode::MissingRequiredHeader,
                format!("The header '{}' is required.", name),
            )
        })
    }

    pub fn container_name(&self) -> StorageResult<&str> {
        self.container
            .as_deref()
            .ok_or_else(|| StorageError::new(ErrorCode::InvalidResourceName))
    }

    pub fn blob_ref(&self) -> StorageResult<BlobRef> {
        let container = self.container_name()?;
        let blob = self
            .blob
            .as_deref()
            .ok_or_else(|| StorageError::new(ErrorCode::InvalidResourceName))?;
        Ok(BlobRef::new(&self.account, container, blob))
    }

    /// Target of a write. Snapshots are immutable, so a `snapshot` query
    /// parameter is rejected.
    pub fn writable_blob_ref(&self) -> StorageResult<BlobRef> {
        if !self.snapshot().is_empty() {
            return Err(StorageError::with_message(
                ErrorCode::InvalidQueryParameterValue,
                "Value for one of the query parameters specified in the request URI is invalid. A blob snapshot cannot be modified.",
            ));
        }
        self.blob_ref()
    }

    /// Returns the Content-MD5 header value.
    pub fn content_md5(&self) -> Option<&str> {
        self.header("content-md5")
    }

    /// Returns the `x-ms-range` or `Range` header as a byte range.
    pub fn range(&self) -> StorageResult<Option<ByteRange>> {
        self.header("x-ms-range")
            .or_else(|| self.header("range"))
            .map(ByteRange::parse)
            .transpose()
    }

    /// Returns the x-ms-lease-id header value.
    pub fn lease_id(&self) -> Option<&str> {
        self.header("x-ms-lease-id")
    }

    /// Returns the x-ms-blob-type header value.
    pub fn blob_type(&self) -> Option<&str> {
        self.header("x-ms-blob-type")
    }

    fn date_header(&self, name: &str) -> StorageResult<Option<DateTime<Utc>>> {
        match self.header(name) {
            None => Ok(None),
            Some(value) => parse_http_date(value).map(Some).ok_or_else(|| {
                StorageError::with_message(
                    ErrorCode::InvalidHeaderValue,
                    format!("The value '{}' of header '{}' is not a valid date.", value, name),
                )
            }),
        }
    }

    /// Returns the precondition headers.
    pub fn conditions(&self) -> StorageResult<ConditionalHeaders> {
        Ok(ConditionalHeaders {
            if_match: self.header("if-match").map(String::from),
            if_none_match: self.header("if-none-match").map(String::from),
            if_modified_since: self.date_header("if-modified-since")?,
            if_unmodified_since: self.date_header("if-unmodified-since")?,
            if_tags: self.header("x-ms-if-tags").map(String::from),
        })
    }

    /// Returns the lease id and precondition headers.
    pub fn access_conditions(&self) -> StorageResult<AccessConditions> {
        Ok(AccessConditions {
            lease_id: self.lease_id().map(String::from),
            conditions: self.conditions()?,
        })
    }

    /// Returns user-defined metadata from x-ms-meta-* headers.
    pub fn metadata(&self) -> HashMap<String, String> {
        self.headers
            .iter()
            .filter_map(|(name, value)| {
                let name_str = name.as_str();
                if let Some(key) = name_str.strip_prefix("x-ms-meta-") {
                    value.to_str().ok().map(|v| (key.to_string(), v.to_string()))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Returns the blob content properties from the `x-ms-blob-*` headers.
    pub fn http_headers(&self) -> BlobHttpHeaders {
        let get = |name: &str| self.header(name).map(String::from);
        BlobHttpHeaders {
            content_type: get("x-ms-blob-content-type"),
            content_encoding: get("x-ms-blob-content-encoding"),
            content_language: get("x-ms-blob-content-language"),
            content_disposition: get("x-ms-blob-content-disposition"),
            cache_control: get("x-ms-blob-cache-control"),
            content_md5: get("x-ms-blob-content-md5"),
        }
    }

    /// Like [`Self::http_headers`], falling back to the request's own
    /// `Content-*` headers when a blob is uploaded in one request.
    pub fn upload_http_headers(&self) -> BlobHttpHeaders {
        let mut headers = self.http_headers();
        let fallback = |name: &str| self.header(name).map(String::from);
        headers.content_type = headers.content_type.or_else(|| fallback("content-type"));
        headers.content_encoding = headers
            .content_encoding
            .or_else(|| fallback("content-encoding"));
        headers.content_language = headers
            .content_language
            .or_else(|| fallback("content-language"));
        headers.content_disposition = headers
            .content_disposition
            .or_else(|| fallback("content-disposition"));
        headers.cache_control = headers.cache_control.or_else(|| fallback("cache-control"));
        headers
    }

    /// Returns the tags in the url-encoded `x-ms-tags` header.
    pub fn tags(&self) -> HashMap<String, String> {
        self.header("x-ms-tags")
            .map(|value| {
                url::form_urlencoded::parse(value.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the snapshot query parameter, empty for the base blob.
    pub fn snapshot(&self) -> &str {
        self.query_param("snapshot").unwrap_or_default()
    }

    /// Returns the restype query parameter.
    pub fn restype(&self) -> Option<&str> {
        self.query_param("restype")
    }

    /// Returns the comp query parameter.
    pub fn comp(&self) -> Option<&str> {
        self.query_param("comp")
    }

    /// Returns the `maxresults` query parameter.
    pub fn max_results(&self) -> StorageResult<Option<usize>> {
        self.query_param("maxresults")
            .map(|v| {
                v.parse().map_err(|_| {
                    StorageError::with_message(
                        ErrorCode::InvalidQueryParameterValue,
                        format!("The maxresults value '{}' is invalid.", v),
                    )
                })
            })
            .transpose()
    }

    /// Returns the lease operation described by the `x-ms-lease-*` headers.
    pub fn lease_action(&self) -> StorageResult<LeaseAction> {
        let action = self.required_header("x-ms-lease-action")?;
        let lease_id = || self.required_header("x-ms-lease-id").map(String::from);
        let proposed_id = || self.header("x-ms-proposed-lease-id").map(String::from);

        match action.to_ascii_lowercase().as_str() {
            "acquire" => Ok(LeaseAction::Acquire {
                duration: self.integer_header("x-ms-lease-duration")?.unwrap_or(-1),
                proposed_id: proposed_id(),
            }),
            "renew" => Ok(LeaseAction::Renew {
                lease_id: lease_id()?,
            }),
            "change" => Ok(LeaseAction::Change {
                lease_id: lease_id()?,
                proposed_id: proposed_id().ok_or_else(|| {
                    StorageError::with_message(
                        ErrorCode::MissingRequiredHeader,
                        "The header 'x-ms-proposed-lease-id' is required.",
                    )
                })?,
            }),
            "release" => Ok(LeaseAction::Release {
                lease_id: lease_id()?,
            }),
            "break" => Ok(LeaseAction::Break {
                break_period: self.integer_header("x-ms-lease-break-period")?,
            }),
            other => Err(StorageError::with_message(
                ErrorCode::InvalidHeaderValue,
                format!("The lease action '{}' is invalid.", other),
            )),
        }
    }

    fn integer_header(&self, name: &str) -> StorageResult<Option<i64>> {
        self.header(name)
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
}

/// Parses an HTTP date in RFC 1123 format.
fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(value, "%a, %d %b %Y %H:%M:%S GMT")
                .ok()
                .map(|dt| dt.and_utc())
        })
}

/// Formats a DateTime as RFC 1123 format for HTTP headers.
pub fn format_http_date(dt: &DateTime<Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn ctx(headers: &[(&'static str, &str)]) -> RequestContext {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        RequestContext::new(Method::PUT, map, HashMap::new(), HashMap::new())
    }

    #[test]
    fn test_conditions_parse_dates() {
        let c = ctx(&[("if-modified-since", "Fri, 01 Mar 2024 12:00:00 GMT")]);
        let conditions = c.conditions().unwrap();
        assert_eq!(
            conditions.if_modified_since.unwrap().to_rfc3339(),
            "2024-03-01T12:00:00+00:00"
        );

        let bad = ctx(&[("if-unmodified-since", "yesterday")]);
        assert_eq!(
            bad.conditions().unwrap_err().code,
            ErrorCode::InvalidHeaderValue
        );
    }

    #[test]
    fn test_lease_action_parsing() {
        let acquire = ctx(&[("x-ms-lease-action", "acquire"), ("x-ms-lease-duration", "15")]);
        assert_eq!(
            acquire.lease_action().unwrap(),
            LeaseAction::Acquire {
                duration: 15,
                proposed_id: None
            }
        );

        let renew = ctx(&[("x-ms-lease-action", "renew")]);
        assert_eq!(
            renew.lease_action().unwrap_err().code,
            ErrorCode::MissingRequiredHeader
        );

        let brk = ctx(&[("x-ms-lease-action", "break")]);
        assert_eq!(
            brk.lease_action().unwrap(),
            LeaseAction::Break { break_period: None }
        );
    }

    #[test]
    fn test_tags_header_is_url_decoded() {
        let c = ctx(&[("x-ms-tags", "project=alpha%20one&env=prod")]);
        let tags = c.tags();
        assert_eq!(tags.get("project").map(String::as_str), Some("alpha one"));
        assert_eq!(tags.get("env").map(String::as_str), Some("prod"));
    }

    #[test]
    fn test_upload_headers_fall_back_to_content_headers() {
        let c = ctx(&[
            ("content-type", "text/plain"),
            ("x-ms-blob-cache-control", "no-cache"),
        ]);
        let headers = c.upload_http_headers();
        assert_eq!(headers.content_type.as_deref(), Some("text/plain"));
        assert_eq!(headers.cache_control.as_deref(), Some("no-cache"));
    }
}
