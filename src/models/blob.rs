//! Blob data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::block::CommittedBlock;
use super::new_etag;
use crate::lease::Lease;

/// Blob types supported by the blob service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlobType {
    BlockBlob,
    PageBlob,
    AppendBlob,
}

impl BlobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlobType::BlockBlob => "BlockBlob",
            BlobType::PageBlob => "PageBlob",
            BlobType::AppendBlob => "AppendBlob",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "BlockBlob" => Some(BlobType::BlockBlob),
            "PageBlob" => Some(BlobType::PageBlob),
            "AppendBlob" => Some(BlobType::AppendBlob),
            _ => None,
        }
    }
}

/// Identity of a base blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlobRef {
    pub account: String,
    pub container: String,
    pub name: String,
}

impl BlobRef {
    pub fn new(
        account: impl Into<String>,
        container: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            container: container.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.account, self.container, self.name)
    }
}

/// Reference to data stored in an extent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtentChunk {
    /// Id of the extent containing this data.
    pub id: String,
    /// Byte offset within the extent.
    pub offset: u64,
    /// Number of bytes.
    pub count: u64,
}

impl ExtentChunk {
    pub fn new(id: String, offset: u64, count: u64) -> Self {
        Self { id, offset, count }
    }
}

/// Standard HTTP properties stored with a blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobHttpHeaders {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub content_language: Option<String>,
    pub content_disposition: Option<String>,
    pub cache_control: Option<String>,
    /// Base64 MD5 of the whole content.
    pub content_md5: Option<String>,
}

impl BlobHttpHeaders {
    /// Non-empty property values, for size validation.
    pub fn values(&self) -> impl Iterator<Item = &str> {
        [
            &self.content_type,
            &self.content_encoding,
            &self.content_language,
            &self.content_disposition,
            &self.cache_control,
        ]
        .into_iter()
        .filter_map(|value| value.as_deref())
    }
}

/// Blob properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobProperties {
    pub content_length: u64,
    pub http_headers: BlobHttpHeaders,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
    pub created_on: DateTime<Utc>,
    pub blob_type: BlobType,
    /// Committed block count for append blobs.
    pub committed_block_count: Option<u32>,
}

impl BlobProperties {
    /// Creates properties for a new blob created at `now`.
    pub fn new(blob_type: BlobType, now: DateTime<Utc>) -> Self {
        Self {
            content_length: 0,
            http_headers: BlobHttpHeaders::default(),
            etag: new_etag(),
            last_modified: now,
            created_on: now,
            blob_type,
            committed_block_count: match blob_type {
                BlobType::AppendBlob => Some(0),
                _ => None,
            },
        }
    }

    /// Regenerates the ETag and bumps the last modified time.
    pub fn update_etag(&mut self, now: DateTime<Utc>) {
        self.etag = new_etag();
        self.last_modified = now;
    }

    pub fn content_type(&self) -> &str {
        self.http_headers
            .content_type
            .as_deref()
            .unwrap_or("application/octet-stream")
    }
}

/// Complete blob model stored in the metadata store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobModel {
    /// Account name.
    pub account: String,
    /// Container name.
    pub container: String,
    /// Blob name (full path).
    pub name: String,
    /// Snapshot timestamp (empty for base blob).
    pub snapshot: String,
    /// Blob properties.
    pub properties: BlobProperties,
    /// Lease record; snapshots are never leased.
    pub lease: Lease,
    /// User-defined metadata.
    pub metadata: HashMap<String, String>,
    /// Tags for blob indexing.
    pub tags: HashMap<String, String>,
    /// Committed block list, for block blobs.
    pub committed_blocks: Vec<CommittedBlock>,
    /// Content chunks in read order.
    pub extent_chunks: Vec<ExtentChunk>,
}

impl BlobModel {
    /// Creates an empty blob.
    pub fn new(blob_ref: &BlobRef, blob_type: BlobType, now: DateTime<Utc>) -> Self {
        Self {
            account: blob_ref.account.clone(),
            container: blob_ref.container.clone(),
            name: blob_ref.name.clone(),
            snapshot: String::new(),
            properties: BlobProperties::new(blob_type, now),
            lease: Lease::Available,
            metadata: HashMap::new(),
            tags: HashMap::new(),
            committed_blocks: Vec::new(),
            extent_chunks: Vec::new(),
        }
    }

    pub fn blob_ref(&self) -> BlobRef {
        BlobRef::new(&self.account, &self.container, &self.name)
    }

    pub fn is_snapshot(&self) -> bool {
        !self.snapshot.is_empty()
    }

    /// Creates a snapshot of this blob at `now`.
    pub fn create_snapshot(&self, now: DateTime<Utc>) -> Self {
        let mut snapshot = self.clone();
        snapshot.snapshot = snapshot_id(now);
        snapshot.lease = Lease::Available;
        snapshot
    }
}

/// Formats a snapshot id, e.g. `2024-01-27T12:34:56.1234567Z`.
pub fn snapshot_id(at: DateTime<Utc>) -> String {
    format!(
        "{}.{:07}Z",
        at.format("%Y-%m-%dT%H:%M:%S"),
        at.timestamp_subsec_nanos() / 100
    )
}
