//! Blob service error kinds and error response formatting.

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use hyper::ext::ReasonPhrase;
use thiserror::Error;

use crate::config::DEFAULT_API_VERSION;

/// Storage error codes surfaced in the `x-ms-error-code` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // General errors
    ConditionNotMet,
    InternalError,
    InvalidHeaderValue,
    InvalidInput,
    InvalidMd5,
    InvalidMetadata,
    InvalidOperation,
    InvalidQueryParameterValue,
    InvalidRange,
    InvalidResourceName,
    InvalidXmlDocument,
    Md5Mismatch,
    MetadataTooLarge,
    MissingRequiredHeader,
    MissingRequiredQueryParameter,
    MultipleConditionHeadersNotSupported,
    NotModified,
    PropertyValueTooLarge,
    RequestBodyTooLarge,
    EntityTooLarge,
    UnsupportedHttpVerb,

    // Blob service errors
    AppendPositionConditionNotMet,
    BlobAlreadyExists,
    BlobNotFound,
    BlockCountExceedsLimit,
    ContainerAlreadyExists,
    ContainerBeingDeleted,
    ContainerNotFound,
    InvalidBlobOrBlock,
    InvalidBlobType,
    InvalidBlockId,
    InvalidBlockList,
    InvalidTag,
    LeaseAlreadyPresent,
    LeaseIdMismatchWithBlobOperation,
    LeaseIdMismatchWithContainerOperation,
    LeaseIdMismatchWithLeaseOperation,
    LeaseIdMissing,
    LeaseIsBreakingAndCannotBeAcquired,
    LeaseIsBreakingAndCannotBeChanged,
    LeaseIsBrokenAndCannotBeRenewed,
    LeaseLost,
    LeaseNotPresentWithBlobOperation,
    LeaseNotPresentWithContainerOperation,
    LeaseNotPresentWithLeaseOperation,
    MaxBlobSizeConditionNotMet,
    SnapshotsPresent,
}

impl ErrorCode {
    /// Returns the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConditionNotMet => "ConditionNotMet",
            ErrorCode::InternalError => "InternalError",
            ErrorCode::InvalidHeaderValue => "InvalidHeaderValue",
            ErrorCode::InvalidInput => "InvalidInput",
            ErrorCode::InvalidMd5 => "InvalidMd5",
            ErrorCode::InvalidMetadata => "InvalidMetadata",
            ErrorCode::InvalidOperation => "InvalidOperation",
            ErrorCode::InvalidQueryParameterValue => "InvalidQueryParameterValue",
            ErrorCode::InvalidRange => "InvalidRange",
            ErrorCode::InvalidResourceName => "InvalidResourceName",
            ErrorCode::InvalidXmlDocument => "InvalidXmlDocument",
            ErrorCode::Md5Mismatch => "Md5Mismatch",
            ErrorCode::MetadataTooLarge => "MetadataTooLarge",
            ErrorCode::MissingRequiredHeader => "MissingRequiredHeader",
            ErrorCode::MissingRequiredQueryParameter => "MissingRequiredQueryParameter",
            ErrorCode::MultipleConditionHeadersNotSupported => {
                "MultipleConditionHeadersNotSupported"
            }
            ErrorCode::NotModified => "ConditionNotMet",
            ErrorCode::PropertyValueTooLarge => "PropertyValueTooLarge",
            ErrorCode::RequestBodyTooLarge => "RequestBodyTooLarge",
            ErrorCode::EntityTooLarge => "EntityTooLarge",
            ErrorCode::UnsupportedHttpVerb => "UnsupportedHttpVerb",
            ErrorCode::AppendPositionConditionNotMet => "AppendPositionConditionNotMet",
            ErrorCode::BlobAlreadyExists => "BlobAlreadyExists",
            ErrorCode::BlobNotFound => "BlobNotFound",
            ErrorCode::BlockCountExceedsLimit => "BlockCountExceedsLimit",
            ErrorCode::ContainerAlreadyExists => "ContainerAlreadyExists",
            ErrorCode::ContainerBeingDeleted => "ContainerBeingDeleted",
            ErrorCode::ContainerNotFound => "ContainerNotFound",
            ErrorCode::InvalidBlobOrBlock => "InvalidBlobOrBlock",
            ErrorCode::InvalidBlobType => "InvalidBlobType",
            ErrorCode::InvalidBlockId => "InvalidBlockId",
            ErrorCode::InvalidBlockList => "InvalidBlockList",
            ErrorCode::InvalidTag => "InvalidTag",
            ErrorCode::LeaseAlreadyPresent => "LeaseAlreadyPresent",
            ErrorCode::LeaseIdMismatchWithBlobOperation => "LeaseIdMismatchWithBlobOperation",
            ErrorCode::LeaseIdMismatchWithContainerOperation => {
                "LeaseIdMismatchWithContainerOperation"
            }
            ErrorCode::LeaseIdMismatchWithLeaseOperation => "LeaseIdMismatchWithLeaseOperation",
            ErrorCode::LeaseIdMissing => "LeaseIdMissing",
            ErrorCode::LeaseIsBreakingAndCannotBeAcquired => "LeaseIsBreakingAndCannotBeAcquired",
            ErrorCode::LeaseIsBreakingAndCannotBeChanged => "LeaseIsBreakingAndCannotBeChanged",
            ErrorCode::LeaseIsBrokenAndCannotBeRenewed => "LeaseIsBrokenAndCannotBeRenewed",
            ErrorCode::LeaseLost => "LeaseLost",
            ErrorCode::LeaseNotPresentWithBlobOperation => "LeaseNotPresentWithBlobOperation",
            ErrorCode::LeaseNotPresentWithContainerOperation => {
                "LeaseNotPresentWithContainerOperation"
            }
            ErrorCode::LeaseNotPresentWithLeaseOperation => "LeaseNotPresentWithLeaseOperation",
            ErrorCode::MaxBlobSizeConditionNotMet => "MaxBlobSizeConditionNotMet",
            ErrorCode::SnapshotsPresent => "SnapshotsPresent",
        }
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::NotModified => StatusCode::NOT_MODIFIED,

            ErrorCode::InvalidHeaderValue
            | ErrorCode::InvalidInput
            | ErrorCode::InvalidMd5
            | ErrorCode::InvalidMetadata
            | ErrorCode::InvalidOperation
            | ErrorCode::InvalidQueryParameterValue
            | ErrorCode::InvalidResourceName
            | ErrorCode::InvalidXmlDocument
            | ErrorCode::Md5Mismatch
            | ErrorCode::MetadataTooLarge
            | ErrorCode::MissingRequiredHeader
            | ErrorCode::MissingRequiredQueryParameter
            | ErrorCode::MultipleConditionHeadersNotSupported
            | ErrorCode::PropertyValueTooLarge
            | ErrorCode::InvalidBlobOrBlock
            | ErrorCode::InvalidBlockId
            | ErrorCode::InvalidBlockList
            | ErrorCode::InvalidTag => StatusCode::BAD_REQUEST,

            ErrorCode::BlobNotFound | ErrorCode::ContainerNotFound => StatusCode::NOT_FOUND,

            ErrorCode::UnsupportedHttpVerb => StatusCode::METHOD_NOT_ALLOWED,

            ErrorCode::BlobAlreadyExists
            | ErrorCode::BlockCountExceedsLimit
            | ErrorCode::ContainerAlreadyExists
            | ErrorCode::ContainerBeingDeleted
            | ErrorCode::InvalidBlobType
            | ErrorCode::LeaseAlreadyPresent
            | ErrorCode::LeaseIdMismatchWithLeaseOperation
            | ErrorCode::LeaseIsBreakingAndCannotBeAcquired
            | ErrorCode::LeaseIsBreakingAndCannotBeChanged
            | ErrorCode::LeaseIsBrokenAndCannotBeRenewed
            | ErrorCode::LeaseNotPresentWithLeaseOperation
            | ErrorCode::SnapshotsPresent => StatusCode::CONFLICT,

            ErrorCode::ConditionNotMet
            | ErrorCode::AppendPositionConditionNotMet
            | ErrorCode::MaxBlobSizeConditionNotMet
            | ErrorCode::LeaseIdMissing
            | ErrorCode::LeaseLost
            | ErrorCode::LeaseIdMismatchWithBlobOperation
            | ErrorCode::LeaseIdMismatchWithContainerOperation
            | ErrorCode::LeaseNotPresentWithBlobOperation
            | ErrorCode::LeaseNotPresentWithContainerOperation => StatusCode::PRECONDITION_FAILED,

            ErrorCode::RequestBodyTooLarge | ErrorCode::EntityTooLarge => {
                StatusCode::PAYLOAD_TOO_LARGE
            }

            ErrorCode::InvalidRange => StatusCode::RANGE_NOT_SATISFIABLE,

            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::BlobAlreadyExists => "The specified blob already exists.",
            ErrorCode::BlobNotFound => "The specified blob does not exist.",
            ErrorCode::ConditionNotMet | ErrorCode::NotModified => {
                "The condition specified using HTTP conditional header(s) is not met."
            }
            ErrorCode::ContainerAlreadyExists => "The specified container already exists.",
            ErrorCode::ContainerNotFound => "The specified container does not exist.",
            ErrorCode::InvalidBlockId => "The specified block ID is invalid.",
            ErrorCode::InvalidBlockList => "The specified block list is invalid.",
            ErrorCode::InvalidBlobOrBlock => "The specified blob or block content is invalid.",
            ErrorCode::InvalidBlobType => "The blob type is invalid for this operation.",
            ErrorCode::InvalidHeaderValue => "The value for one of the HTTP headers is not valid.",
            ErrorCode::InvalidRange => {
                "The range specified is invalid for the current size of the resource."
            }
            ErrorCode::InvalidResourceName => {
                "The specified resource name contains invalid characters."
            }
            ErrorCode::InvalidXmlDocument => "The XML request body is invalid.",
            ErrorCode::LeaseAlreadyPresent => "There is already a lease present.",
            ErrorCode::LeaseIdMismatchWithLeaseOperation => {
                "The lease ID specified did not match the lease ID for the resource with the specified lease operation."
            }
            ErrorCode::LeaseIdMismatchWithBlobOperation => {
                "The lease ID specified did not match the lease ID for the blob."
            }
            ErrorCode::LeaseIdMismatchWithContainerOperation => {
                "The lease ID specified did not match the lease ID for the container."
            }
            ErrorCode::LeaseIdMissing => {
                "There is currently a lease on the resource and no lease ID was specified in the request."
            }
            ErrorCode::LeaseIsBreakingAndCannotBeAcquired => {
                "There is already a breaking lease present."
            }
            ErrorCode::LeaseIsBreakingAndCannotBeChanged => {
                "The lease ID matched, but the lease is currently in breaking state and cannot be changed."
            }
            ErrorCode::LeaseIsBrokenAndCannotBeRenewed => {
                "The lease ID matched, but the lease has been broken explicitly and cannot be renewed."
            }
            ErrorCode::LeaseLost => {
                "A lease ID was specified, but the lease for the resource has expired."
            }
            ErrorCode::LeaseNotPresentWithBlobOperation => {
                "There is currently no lease on the blob."
            }
            ErrorCode::LeaseNotPresentWithContainerOperation => {
                "There is currently no lease on the container."
            }
            ErrorCode::LeaseNotPresentWithLeaseOperation => {
                "There is currently no lease on the resource."
            }
            ErrorCode::Md5Mismatch => {
                "The MD5 value specified in the request did not match with the MD5 value calculated by the server."
            }
            ErrorCode::MultipleConditionHeadersNotSupported => {
                "Multiple condition headers are not supported."
            }
            ErrorCode::RequestBodyTooLarge => "The request body is too large.",
            ErrorCode::EntityTooLarge => "The uploaded entity exceeds the maximum allowed size.",
            ErrorCode::SnapshotsPresent => {
                "This operation is not permitted because the blob has snapshots."
            }
            ErrorCode::InternalError => {
                "The server encountered an internal error. Please retry the request."
            }
            _ => "An error occurred while processing the request.",
        }
    }
}

/// Storage error with code and message.
#[derive(Debug, Error)]
#[error("{code:?}: {message}")]
pub struct StorageError {
    pub code: ErrorCode,
    pub message: String,
    pub request_id: Option<String>,
    /// Total resource length reported alongside `InvalidRange`.
    pub content_length: Option<u64>,
}

impl StorageError {
    /// Creates a new storage error with the given code and default message.
    pub fn new(code: ErrorCode) -> Self {
        Self {
            message: code.default_message().to_string(),
            code,
            request_id: None,
            content_length: None,
        }
    }

    /// Creates a new storage error with a custom message.
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            request_id: None,
            content_length: None,
        }
    }

    /// Range outside the content, naming the total length.
    pub fn invalid_range(content_length: u64) -> Self {
        Self {
            code: ErrorCode::InvalidRange,
            message: format!(
                "{} Content length: {}",
                ErrorCode::InvalidRange.default_message(),
                content_length
            ),
            request_id: None,
            content_length: Some(content_length),
        }
    }

    /// Metadata or content store failure.
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::InternalError, message)
    }

    /// Sets the request ID for this error.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Whether this error is an infrastructure fault rather than a caller error.
    pub fn is_store_failure(&self) -> bool {
        self.code == ErrorCode::InternalError
    }
}

impl IntoResponse for StorageError {
    fn into_response(self) -> Response {
        let status = self.code.status_code();
        let request_id = self
            .request_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");

        let body = if status == StatusCode::NOT_MODIFIED {
            String::new()
        } else {
            format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Error>
  <Code>{}</Code>
  <Message>{}
RequestId:{}
Time:{}</Message>
</Error>"#,
                self.code.as_str(),
                xml_escape(&self.message),
                request_id,
                timestamp
            )
        };

        let mut response = (status, body).into_response();
        let headers = response.headers_mut();
        headers.insert("Content-Type", HeaderValue::from_static("application/xml"));
        headers.insert("x-ms-version", HeaderValue::from_static(DEFAULT_API_VERSION));
        headers.insert(
            "x-ms-error-code",
            HeaderValue::from_static(self.code.as_str()),
        );
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            headers.insert("x-ms-request-id", value);
        }
        if let Some(length) = self.content_length {
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", length)) {
                headers.insert("Content-Range", value);
            }
        }

        // Surface the message in the status line for HTTP/1.1 clients.
        if let Ok(reason) = ReasonPhrase::try_from(self.message.as_bytes()) {
            response.extensions_mut().insert(reason);
        }

        response
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::store_unavailable(format!("Store I/O failure: {}", err))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::store_unavailable(format!("Store snapshot is corrupt: {}", err))
    }
}

/// Escapes special XML characters in a string.
pub(crate) fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
