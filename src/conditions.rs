//! Conditional request evaluation.
//!
//! Preconditions are evaluated against one snapshot of the target, in a fixed
//! order: `If-Match`, `If-None-Match`, the date conditions, then the tag
//! filter. Dates are compared at one-second granularity because HTTP dates
//! carry no sub-second part.

use chrono::{DateTime, SubsecRound, Utc};
use std::collections::HashMap;

use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::tags::{FilterMode, TagFilter};

/// Precondition headers of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionalHeaders {
    pub if_match: Option<String>,
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<DateTime<Utc>>,
    pub if_unmodified_since: Option<DateTime<Utc>>,
    /// `x-ms-if-tags` filter expression.
    pub if_tags: Option<String>,
}

impl ConditionalHeaders {
    pub fn is_empty(&self) -> bool {
        self.if_match.is_none()
            && self.if_none_match.is_none()
            && self.if_modified_since.is_none()
            && self.if_unmodified_since.is_none()
            && self.if_tags.is_none()
    }

    pub fn if_match(etag: impl Into<String>) -> Self {
        Self {
            if_match: Some(etag.into()),
            ..Default::default()
        }
    }

    pub fn if_none_match(etag: impl Into<String>) -> Self {
        Self {
            if_none_match: Some(etag.into()),
            ..Default::default()
        }
    }

    pub fn if_tags(filter: impl Into<String>) -> Self {
        Self {
            if_tags: Some(filter.into()),
            ..Default::default()
        }
    }
}

/// Current state of the entity a request targets.
#[derive(Debug, Clone, Copy)]
pub struct ConditionTarget<'a> {
    pub etag: &'a str,
    pub last_modified: DateTime<Utc>,
    /// Blob tags; `None` for containers.
    pub tags: Option<&'a HashMap<String, String>>,
}

/// Selects the conflict code for create-if-absent failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Blob,
    Container,
}

impl ResourceKind {
    fn already_exists(&self) -> ErrorCode {
        match self {
            ResourceKind::Blob => ErrorCode::BlobAlreadyExists,
            ResourceKind::Container => ErrorCode::ContainerAlreadyExists,
        }
    }
}

fn condition_not_met() -> StorageError {
    StorageError::new(ErrorCode::ConditionNotMet)
}

fn validate_single_etag(value: &Option<String>) -> StorageResult<()> {
    if value.as_deref().is_some_and(|v| v.contains(',')) {
        return Err(StorageError::new(
            ErrorCode::MultipleConditionHeadersNotSupported,
        ));
    }
    Ok(())
}

fn parse_tag_filter(conditions: &ConditionalHeaders) -> StorageResult<Option<TagFilter>> {
    conditions
        .if_tags
        .as_deref()
        .map(|expr| TagFilter::parse(expr, FilterMode::Condition))
        .transpose()
}

fn tags_hold(filter: &Option<TagFilter>, target: &ConditionTarget<'_>) -> bool {
    match (filter, target.tags) {
        (Some(filter), Some(tags)) => filter.matches(tags, None),
        _ => true,
    }
}

/// Codes reported when `If-None-Match` or `If-Modified-Since` fails. Every
/// other failed condition reports `ConditionNotMet`.
#[derive(Debug, Clone, Copy)]
struct FailureCodes {
    none_match_any: ErrorCode,
    none_match: ErrorCode,
    modified_since: ErrorCode,
}

/// Evaluates preconditions for an operation that mutates or creates the
/// target. `target` is `None` when the resource does not exist yet.
pub fn evaluate_write(
    conditions: &ConditionalHeaders,
    target: Option<ConditionTarget<'_>>,
    kind: ResourceKind,
) -> StorageResult<()> {
    evaluate(
        conditions,
        target,
        FailureCodes {
            none_match_any: kind.already_exists(),
            none_match: ErrorCode::ConditionNotMet,
            modified_since: ErrorCode::ConditionNotMet,
        },
    )
}

/// Evaluates preconditions for a read. `If-None-Match` and
/// `If-Modified-Since` failures report `NotModified` (304).
pub fn evaluate_read(
    conditions: &ConditionalHeaders,
    target: Option<ConditionTarget<'_>>,
) -> StorageResult<()> {
    evaluate(
        conditions,
        target,
        FailureCodes {
            none_match_any: ErrorCode::NotModified,
            none_match: ErrorCode::NotModified,
            modified_since: ErrorCode::NotModified,
        },
    )
}

fn evaluate(
    conditions: &ConditionalHeaders,
    target: Option<ConditionTarget<'_>>,
    codes: FailureCodes,
) -> StorageResult<()> {
    validate_single_etag(&conditions.if_match)?;
    validate_single_etag(&conditions.if_none_match)?;
    let filter = parse_tag_filter(conditions)?;

    let Some(target) = target else {
        if conditions.if_match.is_some() {
            return Err(condition_not_met());
        }
        return Ok(());
    };

    if let Some(if_match) = &conditions.if_match {
        if if_match != "*" && if_match != target.etag {
            return Err(condition_not_met());
        }
    }

    if let Some(if_none_match) = &conditions.if_none_match {
        if if_none_match == "*" {
            return Err(StorageError::new(codes.none_match_any));
        }
        if if_none_match == target.etag {
            return Err(StorageError::new(codes.none_match));
        }
    }

    let last_modified = target.last_modified.trunc_subsecs(0);
    if let Some(since) = conditions.if_modified_since {
        if last_modified <= since {
            return Err(StorageError::new(codes.modified_since));
        }
    }
    if let Some(since) = conditions.if_unmodified_since {
        if last_modified > since {
            return Err(condition_not_met());
        }
    }

    if !tags_hold(&filter, &target) {
        return Err(condition_not_met());
    }
    Ok(())
}
